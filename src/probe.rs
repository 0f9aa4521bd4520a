//! Reflink capability probe.
//!
//! Only xfs and btrfs can share extents between files. Even on those, the
//! kernel or mount options may refuse, so support is confirmed by actually
//! making a reflink copy of the disk next to itself and deleting it again.

use std::path::{Path, PathBuf};

use crate::config::ToolsConfig;
use crate::connection::{ConnectionScope, SourceVm};
use crate::disk;
use crate::host::{CommandRunner, HostCommand};
use crate::paths;

/// Filesystems worth attempting a trial reflink copy on.
pub const REFLINK_FILESYSTEMS: [&str; 2] = ["xfs", "btrfs"];

/// Outcome of probing a disk's filesystem.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FsProbe {
    pub has_reflink: bool,
    /// Filesystem type as reported by `df`, empty when it could not be determined.
    pub fs_type: String,
}

pub fn supports_trial_copy(fs_type: &str) -> bool {
    REFLINK_FILESYSTEMS.contains(&fs_type)
}

pub fn fstype_command(tools: &ToolsConfig, disk: &Path, scope: ConnectionScope) -> HostCommand {
    HostCommand::new(&tools.df, scope.elevation())
        .arg("--output=fstype")
        .arg(disk.to_string_lossy())
}

pub fn trial_copy_command(tools: &ToolsConfig, disk: &Path, scope: ConnectionScope) -> HostCommand {
    HostCommand::new(&tools.cp, scope.elevation())
        .arg("--reflink=always")
        .arg(disk.to_string_lossy())
        .arg(paths::trial_copy_path(disk).to_string_lossy())
}

pub fn cleanup_command(tools: &ToolsConfig, disk: &Path, scope: ConnectionScope) -> HostCommand {
    HostCommand::new(&tools.rm, scope.elevation())
        .arg("-f")
        .arg(paths::trial_copy_path(disk).to_string_lossy())
}

/// Filesystem type from `df --output=fstype`: header line, then the value.
pub fn parse_fs_type(output: &str) -> String {
    output
        .lines()
        .nth(1)
        .map(|line| line.trim().to_string())
        .unwrap_or_default()
}

/// Probe the filesystem holding `disk`.
///
/// Never fails: anything that goes wrong is logged and reported as
/// "no reflink". The trial copy is removed by a detached `rm` whose outcome
/// is not awaited.
pub async fn probe_filesystem<R: CommandRunner>(
    runner: &R,
    tools: &ToolsConfig,
    disk: &Path,
    scope: ConnectionScope,
) -> FsProbe {
    let fs_type = match runner.output(&fstype_command(tools, disk, scope)).await {
        Ok(out) if out.success => parse_fs_type(&out.stdout),
        Ok(out) => {
            tracing::warn!(disk = %disk.display(), stderr = %out.stderr.trim(), "filesystem type query failed");
            return FsProbe::default();
        }
        Err(e) => {
            tracing::warn!(disk = %disk.display(), error = %e, "filesystem type query failed");
            return FsProbe::default();
        }
    };

    if !supports_trial_copy(&fs_type) {
        tracing::info!(fs_type = %fs_type, "filesystem has no reflink support");
        return FsProbe {
            has_reflink: false,
            fs_type,
        };
    }

    let copied = match runner.output(&trial_copy_command(tools, disk, scope)).await {
        Ok(out) => {
            if !out.success {
                tracing::info!(fs_type = %fs_type, stderr = %out.stderr.trim(), "trial reflink copy refused");
            }
            out.success
        }
        Err(e) => {
            tracing::warn!(error = %e, "trial reflink copy failed to start");
            false
        }
    };

    // TODO: only remove the sibling when the trial copy created it; `rm -f`
    // also deletes a pre-existing `<disk>.test`.
    runner.spawn_detached(cleanup_command(tools, disk, scope));

    tracing::info!(fs_type = %fs_type, has_reflink = copied, "filesystem probed");
    FsProbe {
        has_reflink: copied,
        fs_type,
    }
}

/// Locate the VM's first disk and probe its filesystem.
///
/// Without a disk there is nothing to probe and the default result is returned.
pub async fn probe_vm<R: CommandRunner>(
    runner: &R,
    tools: &ToolsConfig,
    source: &SourceVm,
) -> (Option<PathBuf>, FsProbe) {
    let Some(disk) = disk::locate_first_disk(runner, tools, source).await else {
        return (None, FsProbe::default());
    };
    let probe = probe_filesystem(runner, tools, &disk, source.scope).await;
    (Some(disk), probe)
}
