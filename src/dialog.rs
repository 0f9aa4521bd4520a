//! The clone form and its lifecycle.
//!
//! ```text
//! CheckingFilesystem ──► Ready ──submit──► Cloning ──ok──► Closed
//!                          ▲                  │
//!                          └──── error set ◄──┘
//! ```
//!
//! The struct is the whole form state: the front end renders from the
//! accessors and mutates only through the setters and `submit`.

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::clone::{self, CloneRequest};
use crate::config::ToolsConfig;
use crate::connection::SourceVm;
use crate::error::CloneError;
use crate::host::CommandRunner;
use crate::probe::{self, FsProbe};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialogPhase {
    CheckingFilesystem,
    Ready,
    Cloning,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("name must not be empty")]
    EmptyName,
}

impl From<ValidationError> for CloneError {
    fn from(e: ValidationError) -> Self {
        CloneError::Validation {
            message: e.to_string(),
        }
    }
}

/// Error shown in the form after a failed clone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DialogError {
    pub message: String,
    pub detail: String,
}

pub fn validate_name(name: &str) -> Result<(), ValidationError> {
    if name.trim().is_empty() {
        return Err(ValidationError::EmptyName);
    }
    Ok(())
}

pub struct CloneDialog {
    source: SourceVm,
    phase: DialogPhase,
    disk: Option<PathBuf>,
    probe: FsProbe,
    name: String,
    reflink: bool,
    output: String,
    error: Option<DialogError>,
}

impl CloneDialog {
    pub fn new(source: SourceVm) -> Self {
        let name = source.default_clone_name();
        Self {
            source,
            phase: DialogPhase::CheckingFilesystem,
            disk: None,
            probe: FsProbe::default(),
            name,
            reflink: false,
            output: String::new(),
            error: None,
        }
    }

    /// Probe the source VM's disk and make the form interactive.
    pub async fn check_filesystem<R: CommandRunner>(&mut self, runner: &R, tools: &ToolsConfig) {
        self.phase = DialogPhase::CheckingFilesystem;
        let (disk, probe) = probe::probe_vm(runner, tools, &self.source).await;
        self.disk = disk;
        self.reflink = probe.has_reflink;
        self.probe = probe;
        self.phase = DialogPhase::Ready;
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    /// Toggle reflink. It cannot be switched on without confirmed support;
    /// returns the resulting value.
    pub fn set_reflink(&mut self, enabled: bool) -> bool {
        self.reflink = enabled && self.probe.has_reflink;
        self.reflink
    }

    pub fn validate(&self) -> Option<ValidationError> {
        validate_name(&self.name).err()
    }

    pub fn can_submit(&self) -> bool {
        !matches!(self.phase, DialogPhase::Cloning | DialogPhase::Closed) && self.validate().is_none()
    }

    /// Run the clone with the current form values.
    ///
    /// Nothing is spawned if the form is invalid or closed. The dialog also
    /// refuses with [`CloneError::Busy`] while it is `Cloning`, which outlives
    /// a call whose future was dropped before `virt-clone` finished: that
    /// process is not killed and may still be writing the new VM.
    /// On success the dialog closes; on failure it returns to `Ready` with
    /// [`CloneDialog::error`] set and can be submitted again.
    pub async fn submit<R, F>(
        &mut self,
        runner: &R,
        tools: &ToolsConfig,
        mut on_line: F,
    ) -> Result<String, CloneError>
    where
        R: CommandRunner,
        F: FnMut(&str),
    {
        match self.phase {
            DialogPhase::Cloning => return Err(CloneError::Busy),
            DialogPhase::Closed => {
                return Err(CloneError::Validation {
                    message: "dialog is closed".into(),
                });
            }
            DialogPhase::CheckingFilesystem | DialogPhase::Ready => {}
        }
        validate_name(&self.name)?;

        let request = CloneRequest {
            new_name: self.name.trim().to_string(),
            reflink: self.reflink,
        };

        self.phase = DialogPhase::Cloning;
        self.error = None;
        self.output.clear();

        let output = &mut self.output;
        let result = clone::run_clone(runner, tools, &self.source, &request, &self.probe, |line| {
            output.push_str(line);
            output.push('\n');
            on_line(line);
        })
        .await;

        match result {
            Ok(out) => {
                self.phase = DialogPhase::Closed;
                Ok(out)
            }
            Err(e) => {
                let detail = match &e {
                    CloneError::CloneFailed { detail, .. } => detail.clone(),
                    other => other.to_string(),
                };
                self.error = Some(DialogError {
                    message: format!("VM {} failed to get cloned", self.source.name),
                    detail: detail.clone(),
                });
                self.phase = DialogPhase::Ready;
                Err(CloneError::CloneFailed {
                    vm: self.source.name.clone(),
                    detail,
                })
            }
        }
    }

    pub fn close(&mut self) {
        self.phase = DialogPhase::Closed;
    }

    pub fn source(&self) -> &SourceVm {
        &self.source
    }

    pub fn phase(&self) -> DialogPhase {
        self.phase
    }

    pub fn disk(&self) -> Option<&Path> {
        self.disk.as_deref()
    }

    pub fn probe(&self) -> &FsProbe {
        &self.probe
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn reflink(&self) -> bool {
        self.reflink
    }

    pub fn output(&self) -> &str {
        &self.output
    }

    pub fn error(&self) -> Option<&DialogError> {
        self.error.as_ref()
    }
}
