//! Hypervisor connection identity.
//!
//! A VM is addressed by its name plus the libvirt connection it lives on.
//! The connection scope also decides whether host commands should try to
//! run elevated: VMs on the system connection usually keep their disks in
//! root-owned directories, session VMs never need it.

use std::fmt;
use std::str::FromStr;

use crate::error::CloneError;

/// Which libvirt connection a VM belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum ConnectionScope {
    /// Per-user connection (`qemu:///session`).
    Session,
    /// System-wide connection (`qemu:///system`).
    #[default]
    System,
}

/// Privilege hint attached to every host command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Elevation {
    /// Run as the invoking user.
    None,
    /// Run elevated if that is possible without prompting, else as the user.
    Try,
}

impl ConnectionScope {
    pub fn uri(self) -> &'static str {
        match self {
            ConnectionScope::Session => "qemu:///session",
            ConnectionScope::System => "qemu:///system",
        }
    }

    pub fn elevation(self) -> Elevation {
        match self {
            ConnectionScope::Session => Elevation::None,
            ConnectionScope::System => Elevation::Try,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionScope::Session => "session",
            ConnectionScope::System => "system",
        }
    }
}

impl fmt::Display for ConnectionScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConnectionScope {
    type Err = CloneError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "session" => Ok(ConnectionScope::Session),
            "system" => Ok(ConnectionScope::System),
            other => Err(CloneError::Validation {
                message: format!("connection must be \"system\" or \"session\" (got '{other}')"),
            }),
        }
    }
}

/// The VM being cloned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceVm {
    pub name: String,
    pub scope: ConnectionScope,
}

impl SourceVm {
    pub fn new(name: impl Into<String>, scope: ConnectionScope) -> Self {
        Self {
            name: name.into(),
            scope,
        }
    }

    /// Suggested name for the copy: `<name>-clone`.
    pub fn default_clone_name(&self) -> String {
        format!("{}-clone", self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_scope_tries_elevation() {
        assert_eq!(ConnectionScope::System.elevation(), Elevation::Try);
        assert_eq!(ConnectionScope::System.uri(), "qemu:///system");
    }

    #[test]
    fn session_scope_never_elevates() {
        assert_eq!(ConnectionScope::Session.elevation(), Elevation::None);
        assert_eq!(ConnectionScope::Session.uri(), "qemu:///session");
    }

    #[test]
    fn parse_scope() {
        assert_eq!("system".parse::<ConnectionScope>().unwrap(), ConnectionScope::System);
        assert_eq!(" session ".parse::<ConnectionScope>().unwrap(), ConnectionScope::Session);
        assert!("qemu:///system".parse::<ConnectionScope>().is_err());
    }

    #[test]
    fn default_clone_name_appends_suffix() {
        let vm = SourceVm::new("foo", ConnectionScope::System);
        assert_eq!(vm.default_clone_name(), "foo-clone");
    }
}
