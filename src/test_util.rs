//! Scripted command runner for unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use crate::error::CloneError;
use crate::host::{CommandOutput, CommandRunner, HostCommand};

enum Reply {
    Exit(CommandOutput),
    SpawnFailure,
    Hang,
}

/// Replays canned replies per program and records every invocation.
///
/// A program with no reply left fails to spawn, like a missing binary.
#[derive(Default)]
pub struct FakeRunner {
    replies: Mutex<HashMap<String, VecDeque<Reply>>>,
    calls: Mutex<Vec<HostCommand>>,
    detached: Mutex<Vec<HostCommand>>,
}

impl FakeRunner {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(self, program: &str, reply: Reply) -> Self {
        self.replies
            .lock()
            .unwrap()
            .entry(program.to_string())
            .or_default()
            .push_back(reply);
        self
    }

    pub fn succeed(self, program: &str, stdout: &str) -> Self {
        self.push(
            program,
            Reply::Exit(CommandOutput {
                success: true,
                stdout: stdout.to_string(),
                stderr: String::new(),
            }),
        )
    }

    pub fn fail(self, program: &str, stderr: &str) -> Self {
        self.push(
            program,
            Reply::Exit(CommandOutput {
                success: false,
                stdout: String::new(),
                stderr: stderr.to_string(),
            }),
        )
    }

    pub fn spawn_failure(self, program: &str) -> Self {
        self.push(program, Reply::SpawnFailure)
    }

    /// The command starts but never finishes.
    pub fn hang(self, program: &str) -> Self {
        self.push(program, Reply::Hang)
    }

    pub fn calls(&self) -> Vec<HostCommand> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, program: &str) -> Vec<HostCommand> {
        self.calls()
            .into_iter()
            .filter(|c| c.program == program)
            .collect()
    }

    pub fn detached(&self) -> Vec<HostCommand> {
        self.detached.lock().unwrap().clone()
    }

    /// `Ok(None)` means the command hangs.
    fn next_reply(&self, cmd: &HostCommand) -> Result<Option<CommandOutput>, CloneError> {
        self.calls.lock().unwrap().push(cmd.clone());
        let reply = self
            .replies
            .lock()
            .unwrap()
            .get_mut(&cmd.program)
            .and_then(|q| q.pop_front());
        match reply {
            Some(Reply::Exit(out)) => Ok(Some(out)),
            Some(Reply::Hang) => Ok(None),
            Some(Reply::SpawnFailure) | None => Err(CloneError::Spawn {
                program: cmd.program.clone(),
                source: std::io::Error::from(std::io::ErrorKind::NotFound),
            }),
        }
    }
}

impl CommandRunner for FakeRunner {
    async fn output(&self, cmd: &HostCommand) -> Result<CommandOutput, CloneError> {
        match self.next_reply(cmd)? {
            Some(out) => Ok(out),
            None => std::future::pending().await,
        }
    }

    async fn stream<F>(&self, cmd: &HostCommand, mut on_line: F) -> Result<CommandOutput, CloneError>
    where
        F: FnMut(&str),
    {
        let Some(out) = self.next_reply(cmd)? else {
            return std::future::pending().await;
        };
        let merged = out.combined();
        for line in merged.lines() {
            on_line(line);
        }
        Ok(CommandOutput {
            success: out.success,
            stdout: merged,
            stderr: String::new(),
        })
    }

    fn spawn_detached(&self, cmd: HostCommand) {
        self.detached.lock().unwrap().push(cmd);
    }
}
