use crate::config::ToolsConfig;
use crate::connection::SourceVm;
use crate::error::CloneError;
use crate::host::{CommandRunner, HostCommand};
use crate::probe::FsProbe;

/// What the user asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloneRequest {
    pub new_name: String,
    pub reflink: bool,
}

/// Reflink is used only if requested and the probe confirmed support.
pub fn effective_reflink(request: &CloneRequest, probe: &FsProbe) -> bool {
    request.reflink && probe.has_reflink
}

pub fn clone_command(
    tools: &ToolsConfig,
    source: &SourceVm,
    new_name: &str,
    use_reflink: bool,
) -> HostCommand {
    HostCommand::new(&tools.virt_clone, source.scope.elevation())
        .args(["--connect", source.scope.uri(), "--original"])
        .arg(&source.name)
        .arg("--name")
        .arg(new_name)
        .arg(if use_reflink { "--reflink" } else { "--auto-clone" })
}

/// Run `virt-clone`, forwarding each output line to `on_line`.
///
/// Returns the combined output on success. A non-zero exit becomes
/// [`CloneError::CloneFailed`] carrying that output as detail.
pub async fn run_clone<R, F>(
    runner: &R,
    tools: &ToolsConfig,
    source: &SourceVm,
    request: &CloneRequest,
    probe: &FsProbe,
    on_line: F,
) -> Result<String, CloneError>
where
    R: CommandRunner,
    F: FnMut(&str),
{
    let use_reflink = effective_reflink(request, probe);
    let cmd = clone_command(tools, source, request.new_name.trim(), use_reflink);
    tracing::info!(
        vm = %source.name,
        new_name = %request.new_name.trim(),
        reflink = use_reflink,
        "starting clone"
    );

    let out = runner.stream(&cmd, on_line).await?;
    if out.success {
        tracing::info!(vm = %source.name, new_name = %request.new_name.trim(), "clone finished");
        Ok(out.stdout)
    } else {
        tracing::warn!(vm = %source.name, "clone failed");
        Err(CloneError::CloneFailed {
            vm: source.name.clone(),
            detail: out.stdout,
        })
    }
}
