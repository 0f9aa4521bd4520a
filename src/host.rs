//! Host command execution.
//!
//! Every external tool (`virsh`, `df`, `cp`, `rm`, `virt-clone`) goes through
//! [`CommandRunner`] so the probe and clone logic can be driven by a scripted
//! runner in tests. [`HostRunner`] is the real implementation on top of
//! `tokio::process`.

use std::fmt;
use std::process::Stdio;
use std::sync::Arc;

use futures_util::StreamExt as _;
use tokio::process::Command;
use tokio::sync::OnceCell;
use tokio_util::bytes::BytesMut;
use tokio_util::codec::{Decoder, FramedRead};
use tokio_util::task::TaskTracker;

use crate::config::ElevationConfig;
use crate::connection::Elevation;
use crate::error::CloneError;

/// A command line to run on the host, plus its privilege hint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostCommand {
    pub program: String,
    pub args: Vec<String>,
    pub elevation: Elevation,
}

impl HostCommand {
    pub fn new(program: impl Into<String>, elevation: Elevation) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            elevation,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }
}

impl fmt::Display for HostCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Captured result of a finished command.
///
/// For streamed commands stdout and stderr are interleaved into `stdout` in
/// arrival order and `stderr` stays empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// stdout followed by stderr.
    pub fn combined(&self) -> String {
        let mut out = self.stdout.clone();
        if !self.stderr.is_empty() {
            if !out.is_empty() && !out.ends_with('\n') {
                out.push('\n');
            }
            out.push_str(&self.stderr);
        }
        out
    }
}

#[allow(async_fn_in_trait)] // trait is internal-only
pub trait CommandRunner {
    /// Run to completion and capture output. A non-zero exit is not an error
    /// here; only failing to spawn is.
    async fn output(&self, cmd: &HostCommand) -> Result<CommandOutput, CloneError>;

    /// Run to completion, passing each output line to `on_line` as it arrives.
    async fn stream<F>(&self, cmd: &HostCommand, on_line: F) -> Result<CommandOutput, CloneError>
    where
        F: FnMut(&str);

    /// Start a command without waiting for it. Its result is only logged.
    fn spawn_detached(&self, cmd: HostCommand);
}

// ── HostRunner ───────────────────────────────────────────

/// Runs commands on the local host, optionally through `sudo -n`.
#[derive(Clone)]
pub struct HostRunner {
    sudo: Option<String>,
    can_elevate: Arc<OnceCell<bool>>,
    detached: TaskTracker,
}

impl HostRunner {
    pub fn new(elevation: &ElevationConfig) -> Self {
        Self {
            sudo: elevation.enabled.then(|| elevation.sudo.clone()),
            can_elevate: Arc::new(OnceCell::new()),
            detached: TaskTracker::new(),
        }
    }

    /// Wait for detached commands to finish. Called once before exit so the
    /// runtime does not tear them down half-way.
    pub async fn settle(&self) {
        self.detached.close();
        self.detached.wait().await;
    }

    /// Whether `Elevation::Try` commands will actually be wrapped in sudo.
    /// Checked once with `sudo -n true` and cached.
    async fn elevation_available(&self) -> bool {
        let Some(sudo) = self.sudo.as_deref() else {
            return false;
        };
        if is_root() {
            return false;
        }
        *self
            .can_elevate
            .get_or_init(|| async move {
                let ok = Command::new(sudo)
                    .args(["-n", "true"])
                    .stdin(Stdio::null())
                    .stdout(Stdio::null())
                    .stderr(Stdio::null())
                    .status()
                    .await
                    .map(|s| s.success())
                    .unwrap_or(false);
                tracing::debug!(available = ok, "checked non-interactive sudo");
                ok
            })
            .await
    }

    async fn build(&self, cmd: &HostCommand) -> Command {
        let elevate = match cmd.elevation {
            Elevation::None => false,
            Elevation::Try => self.elevation_available().await,
        };

        let mut command = match (elevate, self.sudo.as_deref()) {
            (true, Some(sudo)) => {
                let mut c = Command::new(sudo);
                c.args(["-n", "--"]).arg(&cmd.program);
                c
            }
            _ => Command::new(&cmd.program),
        };
        command.args(&cmd.args).stdin(Stdio::null());
        tracing::debug!(command = %cmd, elevated = elevate, "running host command");
        command
    }
}

fn is_root() -> bool {
    nix::unistd::geteuid().is_root()
}

fn spawn_error(cmd: &HostCommand, source: std::io::Error) -> CloneError {
    CloneError::Spawn {
        program: cmd.program.clone(),
        source,
    }
}

impl CommandRunner for HostRunner {
    async fn output(&self, cmd: &HostCommand) -> Result<CommandOutput, CloneError> {
        let output = self
            .build(cmd)
            .await
            .output()
            .await
            .map_err(|e| spawn_error(cmd, e))?;

        Ok(CommandOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    async fn stream<F>(&self, cmd: &HostCommand, mut on_line: F) -> Result<CommandOutput, CloneError>
    where
        F: FnMut(&str),
    {
        let mut command = self.build(cmd).await;
        command.stdout(Stdio::piped()).stderr(Stdio::piped());
        let mut child = command.spawn().map_err(|e| spawn_error(cmd, e))?;

        let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
            return Err(CloneError::Io {
                context: format!("capturing output of {}", cmd.program),
                source: std::io::Error::other("stdio not piped"),
            });
        };

        let mut lines = futures_util::stream::select(
            FramedRead::new(stdout, OutputLines::default()),
            FramedRead::new(stderr, OutputLines::default()),
        );

        let mut combined = String::new();
        while let Some(line) = lines.next().await {
            match line {
                Ok(line) => {
                    on_line(&line);
                    combined.push_str(&line);
                    combined.push('\n');
                }
                // A read error ends that pipe's stream; the other keeps going.
                Err(e) => tracing::debug!(error = %e, "lost command output"),
            }
        }
        drop(lines);

        let status = child.wait().await.map_err(|e| CloneError::Io {
            context: format!("waiting for {}", cmd.program),
            source: e,
        })?;

        Ok(CommandOutput {
            success: status.success(),
            stdout: combined,
            stderr: String::new(),
        })
    }

    fn spawn_detached(&self, cmd: HostCommand) {
        let runner = self.clone();
        self.detached.spawn(async move {
            match runner.output(&cmd).await {
                Ok(out) if out.success => tracing::debug!(command = %cmd, "detached command finished"),
                Ok(out) => tracing::debug!(command = %cmd, stderr = %out.stderr.trim(), "detached command failed"),
                Err(e) => tracing::debug!(command = %cmd, error = %e, "detached command failed to start"),
            }
        });
    }
}

// ── Output decoding ──────────────────────────────────────

/// Longest line kept in one piece; longer runs without a newline (progress
/// bars redrawn with `\r`) are cut into chunks of this size.
const MAX_LINE_BYTES: usize = 8 * 1024;

/// Newline-delimited decoder that never fails on content.
///
/// Invalid UTF-8 is replaced rather than rejected: `FramedRead` ends the
/// stream after the first decode error, which would stop draining the pipe.
#[derive(Debug, Default)]
struct OutputLines {
    /// Bytes of the buffer already searched for a newline.
    searched: usize,
}

impl OutputLines {
    fn take(&mut self, buf: &mut BytesMut, len: usize, skip: usize) -> String {
        self.searched = 0;
        let frame = buf.split_to(len + skip);
        let text = String::from_utf8_lossy(&frame[..len]);
        text.strip_suffix('\r').unwrap_or(&text).to_string()
    }
}

impl Decoder for OutputLines {
    type Item = String;
    type Error = std::io::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<String>, Self::Error> {
        let end = buf.len().min(MAX_LINE_BYTES);
        let newline = buf[self.searched..end].iter().position(|b| *b == b'\n');
        match newline {
            Some(offset) => {
                let len = self.searched + offset;
                Ok(Some(self.take(buf, len, 1)))
            }
            None if buf.len() >= MAX_LINE_BYTES => Ok(Some(self.take(buf, MAX_LINE_BYTES, 0))),
            None => {
                self.searched = buf.len();
                Ok(None)
            }
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<String>, Self::Error> {
        if let Some(line) = self.decode(buf)? {
            return Ok(Some(line));
        }
        if buf.is_empty() {
            return Ok(None);
        }
        let len = buf.len();
        Ok(Some(self.take(buf, len, 0)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session_runner() -> HostRunner {
        HostRunner::new(&ElevationConfig {
            enabled: false,
            sudo: "sudo".into(),
        })
    }

    #[test]
    fn display_joins_args() {
        let cmd = HostCommand::new("virsh", Elevation::None).args(["domblklist", "foo"]);
        assert_eq!(cmd.to_string(), "virsh domblklist foo");
    }

    #[test]
    fn combined_appends_stderr() {
        let out = CommandOutput {
            success: false,
            stdout: "a".into(),
            stderr: "b\n".into(),
        };
        assert_eq!(out.combined(), "a\nb\n");
    }

    #[tokio::test]
    async fn output_captures_stdout_and_status() {
        let runner = session_runner();
        let cmd = HostCommand::new("sh", Elevation::None).args(["-c", "echo hello; exit 3"]);
        let out = runner.output(&cmd).await.unwrap();
        assert!(!out.success);
        assert_eq!(out.stdout, "hello\n");
    }

    #[tokio::test]
    async fn stream_delivers_both_streams() {
        let runner = session_runner();
        let cmd = HostCommand::new("sh", Elevation::None)
            .args(["-c", "echo one; echo two 1>&2; echo three"]);
        let mut seen = Vec::new();
        let out = runner
            .stream(&cmd, |line| seen.push(line.to_string()))
            .await
            .unwrap();
        assert!(out.success);
        assert_eq!(seen.len(), 3);
        assert!(seen.contains(&"two".to_string()));
        assert!(out.stdout.contains("one\n"));
        assert!(out.stdout.contains("three\n"));
    }

    #[tokio::test]
    async fn stream_survives_invalid_utf8() {
        let runner = session_runner();
        let cmd = HostCommand::new("sh", Elevation::None).args([
            "-c",
            "printf 'start\\n\\377bad\\n' >&2; echo 'ERROR: disk copy failed' >&2; exit 1",
        ]);
        let out = runner.stream(&cmd, |_| {}).await.unwrap();
        assert!(!out.success);
        assert!(out.stdout.contains("start\n"));
        assert!(out.stdout.contains("\u{FFFD}bad\n"));
        assert!(out.stdout.contains("ERROR: disk copy failed\n"));
    }

    #[tokio::test]
    async fn stream_drains_large_output_after_invalid_bytes() {
        let runner = session_runner();
        let cmd = HostCommand::new("sh", Elevation::None).args([
            "-c",
            "printf '\\377\\n'; head -c 300000 /dev/zero | tr '\\0' a; echo; echo finished",
        ]);
        let out = tokio::time::timeout(
            std::time::Duration::from_secs(30),
            runner.stream(&cmd, |_| {}),
        )
        .await
        .expect("stream returned")
        .unwrap();
        assert!(out.success);
        assert!(out.stdout.ends_with("finished\n"));
        let longest = out.stdout.lines().map(str::len).max().unwrap();
        assert_eq!(longest, MAX_LINE_BYTES);
        assert_eq!(out.stdout.matches('a').count(), 300_000);
    }

    #[test]
    fn decoder_splits_lines_and_keeps_partial_tail() {
        let mut codec = OutputLines::default();
        let mut buf = BytesMut::from(&b"one\r\ntw"[..]);
        assert_eq!(codec.decode(&mut buf).unwrap().as_deref(), Some("one"));
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        buf.extend_from_slice(b"o\nthree");
        assert_eq!(codec.decode(&mut buf).unwrap().as_deref(), Some("two"));
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        assert_eq!(codec.decode_eof(&mut buf).unwrap().as_deref(), Some("three"));
        assert_eq!(codec.decode_eof(&mut buf).unwrap(), None);
    }

    #[test]
    fn root_check_follows_effective_uid() {
        use std::os::unix::fs::MetadataExt;
        // new files are owned by the effective uid
        let file = tempfile::NamedTempFile::new().unwrap();
        let owner = file.as_file().metadata().unwrap().uid();
        assert_eq!(is_root(), owner == 0);
    }

    #[tokio::test]
    async fn missing_program_is_spawn_error() {
        let runner = session_runner();
        let cmd = HostCommand::new("/nonexistent/virsh", Elevation::Try);
        let err = runner.output(&cmd).await.unwrap_err();
        assert!(matches!(err, CloneError::Spawn { .. }));
    }

    #[tokio::test]
    async fn settle_waits_for_detached_commands() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("done");
        let runner = session_runner();
        runner.spawn_detached(
            HostCommand::new("touch", Elevation::None).arg(marker.to_string_lossy()),
        );
        runner.settle().await;
        assert!(marker.exists());
    }
}
