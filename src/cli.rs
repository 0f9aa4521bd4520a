use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::connection::ConnectionScope;

#[derive(Parser, Debug)]
#[command(name = "vmclone", about = "Clone libvirt VMs, using reflink copies where the filesystem allows")]
pub struct Cli {
    /// Path to config file [default: ~/.config/vmclone/config.toml]
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// libvirt connection of the source VM (overrides config)
    #[arg(long, value_enum, global = true)]
    pub connect: Option<ConnectionScope>,

    /// Show debug logs and keep clone output after completion
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Only show step spinners
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Auto, global = true)]
    pub output: OutputFormat,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, ValueEnum)]
pub enum OutputFormat {
    /// Interactive when attached to a terminal, plain otherwise
    Auto,
    Interactive,
    Plain,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Find the VM's first disk and check whether its filesystem supports reflinks
    Probe {
        /// Source VM name
        vm: String,
    },

    /// Clone a VM
    Clone {
        /// Source VM name
        vm: String,

        /// Name of the new VM [default: <vm>-clone]
        #[arg(short, long)]
        name: Option<String>,

        /// Always make a full copy, even if reflinks are supported
        #[arg(long)]
        no_reflink: bool,

        /// Don't prompt; use the given or default values
        #[arg(short, long)]
        yes: bool,
    },

    /// Show saved clone output
    Log {
        /// Show the most recent failed clone
        #[arg(long)]
        failed: bool,

        /// List all saved clone logs
        #[arg(long)]
        all: bool,
    },
}
