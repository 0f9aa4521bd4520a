//! Locate the first disk image backing a VM.
//!
//! `virsh domblklist` prints a table:
//!
//! ```text
//!  Target   Source
//! ------------------------------------------------
//!  vda      /var/lib/libvirt/images/foo.qcow2
//!  sda      -
//! ```
//!
//! Empty drives (CD-ROMs without media) show `-` as their source.

use std::path::PathBuf;

use crate::config::ToolsConfig;
use crate::connection::SourceVm;
use crate::host::{CommandRunner, HostCommand};

/// Placeholder virsh prints for a device with no backing file.
const NO_SOURCE: &str = "-";

pub fn domblklist_command(tools: &ToolsConfig, source: &SourceVm) -> HostCommand {
    HostCommand::new(&tools.virsh, source.scope.elevation())
        .args(["--connect", source.scope.uri(), "domblklist"])
        .arg(&source.name)
}

/// First usable source path in `domblklist` output, skipping the header row.
pub fn parse_first_disk(output: &str) -> Option<PathBuf> {
    output.lines().skip(1).find_map(|row| {
        let (_target, path) = row.trim().split_once(char::is_whitespace)?;
        let path = path.trim();
        (!path.is_empty() && path != NO_SOURCE).then(|| PathBuf::from(path))
    })
}

/// Find the VM's first disk. Query failures are logged and yield `None`.
pub async fn locate_first_disk<R: CommandRunner>(
    runner: &R,
    tools: &ToolsConfig,
    source: &SourceVm,
) -> Option<PathBuf> {
    let cmd = domblklist_command(tools, source);
    match runner.output(&cmd).await {
        Ok(out) if out.success => {
            let disk = parse_first_disk(&out.stdout);
            match &disk {
                Some(path) => tracing::info!(vm = %source.name, disk = %path.display(), "found first disk"),
                None => tracing::info!(vm = %source.name, "VM has no disk with a backing file"),
            }
            disk
        }
        Ok(out) => {
            tracing::warn!(vm = %source.name, stderr = %out.stderr.trim(), "listing disks failed");
            None
        }
        Err(e) => {
            tracing::warn!(vm = %source.name, error = %e, "listing disks failed");
            None
        }
    }
}
