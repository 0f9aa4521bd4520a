use std::io::IsTerminal;

use clap::Parser;
use inquire::validator::Validation;
use inquire::{Confirm, Text};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::Layer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use vmclone::cli::{Cli, Command, OutputFormat};
use vmclone::config::{self, Config};
use vmclone::connection::SourceVm;
use vmclone::dialog::{self, CloneDialog};
use vmclone::error::CloneError;
use vmclone::history::{CloneRecord, History};
use vmclone::host::HostRunner;
use vmclone::logging::RunLog;
use vmclone::paths;
use vmclone::probe::{self, FsProbe};
use vmclone::progress::{OutputMode, StepProgress};

#[tokio::main]
async fn main() -> miette::Result<()> {
    let cli = Cli::parse();

    let output_format = resolve_output_format(&cli.output);
    let mode = resolve_output_mode(&output_format, cli.verbose, cli.quiet);

    // Tracing on the terminal would fight indicatif for the cursor, so it is
    // off while spinners are drawn.
    let terminal_filter = match mode {
        OutputMode::Verbose => EnvFilter::new("debug"),
        OutputMode::Normal | OutputMode::Quiet | OutputMode::Silent => EnvFilter::new("off"),
        OutputMode::Plain => EnvFilter::from_default_env()
            .add_directive("vmclone=info".parse().expect("valid log directive")),
    };

    let terminal_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_filter(terminal_filter);

    // File layer: discards until a clone activates it
    let run_log = RunLog::default();
    let file_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(run_log.clone())
        .with_filter(EnvFilter::new("vmclone=debug"));

    tracing_subscriber::registry()
        .with(terminal_layer)
        .with(file_layer)
        .init();

    let history = History::new(paths::history_dir());

    // `log` only reads saved records; it must work even with a broken config
    if let Command::Log { failed, all } = cli.command {
        return handle_log_command(&history, failed, all);
    }

    let config = config::load_config(cli.config.as_deref())?;
    let scope = cli.connect.unwrap_or_else(|| config.scope());

    match cli.command {
        Command::Log { .. } => unreachable!(),
        Command::Probe { vm } => {
            run_probe(&config, SourceVm::new(vm, scope), &output_format, mode).await?
        }
        Command::Clone {
            vm,
            name,
            no_reflink,
            yes,
        } => {
            if let Some(ref n) = name {
                dialog::validate_name(n).map_err(CloneError::from)?;
            }
            if let Err(e) = run_log.open(&paths::logs_dir().join("vmclone.log")) {
                tracing::warn!(error = %e, "cannot open vmclone.log");
            }

            let opts = CloneOptions {
                name,
                no_reflink,
                interactive: matches!(output_format, OutputFormat::Interactive) && !yes,
                json: matches!(output_format, OutputFormat::Json),
            };
            match run_clone(&config, SourceVm::new(vm, scope), opts, mode, &history).await {
                Err(CloneError::Cancelled) => println!("Cancelled."),
                other => other?,
            }
        }
    }

    Ok(())
}

// ── probe ───────────────────────────────────────────────────────────

async fn run_probe(
    config: &Config,
    source: SourceVm,
    output_format: &OutputFormat,
    mode: OutputMode,
) -> Result<(), CloneError> {
    let runner = HostRunner::new(&config.elevation);

    let mut progress = StepProgress::new(1, mode);
    let step = progress.begin(&format!("Checking filesystem of '{}'", source.name));
    let (disk, probe) = probe::probe_vm(&runner, &config.tools, &source).await;
    step.finish(describe_probe(&probe));
    runner.settle().await;

    if matches!(output_format, OutputFormat::Json) {
        println!(
            "{}",
            facet_json::to_string(&ProbeJson {
                vm: source.name.clone(),
                connection: source.scope.to_string(),
                disk: disk.map(|d| d.display().to_string()),
                fs_type: probe.fs_type,
                has_reflink: probe.has_reflink,
            })
            .expect("JSON serialization"),
        );
        return Ok(());
    }

    println!("VM '{}' ({})", source.name, source.scope);
    match disk {
        Some(d) => println!("  Disk: {}", d.display()),
        None => println!("  Disk: none found"),
    }
    if probe.fs_type.is_empty() {
        println!("  Filesystem: unknown");
    } else {
        println!("  Filesystem: {}", probe.fs_type);
    }
    println!("  Reflink: {}", if probe.has_reflink { "supported" } else { "not supported" });
    Ok(())
}

fn describe_probe(probe: &FsProbe) -> String {
    match (probe.fs_type.as_str(), probe.has_reflink) {
        ("", _) => "Filesystem unknown, full copy only".to_string(),
        (fs, true) => format!("Filesystem {fs}, reflink supported"),
        (fs, false) => format!("Filesystem {fs}, full copy only"),
    }
}

// ── clone ───────────────────────────────────────────────────────────

struct CloneOptions {
    name: Option<String>,
    no_reflink: bool,
    interactive: bool,
    json: bool,
}

async fn run_clone(
    config: &Config,
    source: SourceVm,
    opts: CloneOptions,
    mode: OutputMode,
    history: &History,
) -> Result<(), CloneError> {
    let runner = HostRunner::new(&config.elevation);
    let vm = source.name.clone();

    let mut dialog = CloneDialog::new(source);
    if let Some(name) = opts.name {
        dialog.set_name(name);
    }

    let mut progress = StepProgress::new(2, mode);
    let step = progress.begin(&format!("Checking filesystem of '{vm}'"));
    dialog.check_filesystem(&runner, &config.tools).await;
    step.finish(describe_probe(dialog.probe()));

    if opts.no_reflink {
        dialog.set_reflink(false);
    } else if !dialog.probe().has_reflink {
        progress.info("reflink copies not available here, making a full copy");
    }

    let result = loop {
        if opts.interactive {
            if let Err(e) = prompt_form(&mut dialog, !opts.no_reflink) {
                dialog.close();
                break Err(e);
            }
        }
        if let Some(e) = dialog.validate() {
            break Err(e.into());
        }

        let new_name = dialog.name().trim().to_string();
        let mut step = progress.begin(&format!("Cloning '{vm}' to '{new_name}'"));
        let outcome = dialog
            .submit(&runner, &config.tools, |line| step.log(line))
            .await;

        let record = CloneRecord::from_dialog(&dialog, outcome.is_ok());
        match history.save(&record) {
            Ok(path) => tracing::debug!(path = %path.display(), "saved clone record"),
            Err(e) => tracing::warn!(error = %e, "cannot save clone record"),
        }
        history.prune(&record.clone_name, config.logs.keep);

        match outcome {
            Ok(_) => {
                let how = if dialog.reflink() { "reflink copy" } else { "full copy" };
                step.finish(format!("Cloned '{vm}' to '{new_name}' ({how})"));
                if opts.json {
                    print_record_json(&record);
                }
                break Ok(());
            }
            Err(e) => {
                step.fail(format!("Cloning '{vm}' to '{new_name}' failed"));
                if opts.interactive {
                    if let Some(shown) = dialog.error() {
                        eprintln!("{}", console::style(&shown.message).red().bold());
                        eprintln!("{}", shown.detail.trim_end());
                    }
                    match Confirm::new("Try again?").with_default(true).prompt() {
                        Ok(true) => {
                            progress = StepProgress::new(1, mode);
                            continue;
                        }
                        Ok(false) => {}
                        Err(pe) => tracing::debug!(error = %pe, "retry prompt aborted"),
                    }
                }
                if opts.json {
                    print_record_json(&record);
                }
                break Err(e);
            }
        }
    };

    runner.settle().await;
    result
}

fn prompt_form(form: &mut CloneDialog, ask_reflink: bool) -> Result<(), CloneError> {
    let name = Text::new("Name of the new VM:")
        .with_default(form.name())
        .with_validator(|input: &str| match dialog::validate_name(input) {
            Ok(()) => Ok(Validation::Valid),
            Err(e) => Ok(Validation::Invalid(e.to_string().into())),
        })
        .prompt()
        .map_err(map_inquire_err)?;
    form.set_name(name);

    if ask_reflink && form.probe().has_reflink {
        let reflink = Confirm::new("Use a reflink copy?")
            .with_help_message("Shares unchanged blocks with the original disk; fast and space efficient")
            .with_default(form.reflink())
            .prompt()
            .map_err(map_inquire_err)?;
        form.set_reflink(reflink);
    }
    Ok(())
}

fn print_record_json(record: &CloneRecord) {
    println!("{}", facet_json::to_string(record).expect("JSON serialization"));
}

fn map_inquire_err(e: inquire::InquireError) -> CloneError {
    match e {
        inquire::InquireError::OperationCanceled | inquire::InquireError::OperationInterrupted => {
            CloneError::Cancelled
        }
        other => CloneError::Validation {
            message: format!("prompt error: {other}"),
        },
    }
}

// ── log ─────────────────────────────────────────────────────────────

fn handle_log_command(history: &History, failed: bool, all: bool) -> miette::Result<()> {
    if all {
        let saved = history.records();
        if saved.is_empty() {
            println!("No clone logs found.");
        }
        for entry in &saved {
            let rec = &entry.record;
            let status_indicator = if rec.success { " OK " } else { "FAIL" };
            println!(
                "[{status_indicator}] {} {} -> {} ({})",
                rec.finished_at_display(),
                rec.vm,
                rec.clone_name,
                entry.path.display()
            );
        }
        return Ok(());
    }

    let Some(entry) = history.latest(failed) else {
        if failed {
            println!("No failed clone logs found.");
        } else {
            println!("No clone logs found. Run `vmclone clone` first.");
        }
        return Ok(());
    };

    let rec = entry.record;
    let status = if rec.success { "ok" } else { "failed" };
    println!(
        "--- {} -> {} ({status}, {}) ---",
        rec.vm,
        rec.clone_name,
        rec.finished_at_display()
    );
    print!("{}", rec.output);
    if !rec.output.is_empty() && !rec.output.ends_with('\n') {
        println!();
    }
    Ok(())
}

// ── JSON output structs ─────────────────────────────────────────────

#[derive(facet::Facet)]
struct ProbeJson {
    vm: String,
    connection: String,
    disk: Option<String>,
    fs_type: String,
    has_reflink: bool,
}

/// Resolve `Auto` to a concrete format based on terminal detection.
fn resolve_output_format(format: &OutputFormat) -> OutputFormat {
    match format {
        OutputFormat::Auto => {
            if !std::io::stdout().is_terminal() || !std::io::stdin().is_terminal() {
                OutputFormat::Plain
            } else {
                OutputFormat::Interactive
            }
        }
        other => other.clone(),
    }
}

/// Map the resolved output format plus `--verbose`/`--quiet` to an `OutputMode`.
fn resolve_output_mode(format: &OutputFormat, verbose: bool, quiet: bool) -> OutputMode {
    match format {
        OutputFormat::Json => OutputMode::Silent,
        OutputFormat::Plain | OutputFormat::Auto => {
            if quiet {
                OutputMode::Quiet
            } else if verbose {
                OutputMode::Verbose
            } else {
                OutputMode::Plain
            }
        }
        OutputFormat::Interactive => {
            if quiet {
                OutputMode::Quiet
            } else if verbose {
                OutputMode::Verbose
            } else {
                OutputMode::Normal
            }
        }
    }
}
