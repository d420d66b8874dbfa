use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;

/// qa - declare Qubes OS qubes in one file and converge dom0 to it
#[derive(Parser)]
#[command(name = "qa")]
#[command(about = "Declarative qube management for Qubes OS dom0")]
#[command(version)]
pub struct Cli {
    /// Configuration file with settings, profiles and qubes
    #[arg(short, long, global = true, default_value = "qaconf.json")]
    pub config: PathBuf,

    /// Dry-run mode: show what would be changed without changing it.
    ///
    /// Queries (qvm-ls, qvm-prefs <vm> <pref>, ...) still run so drift is
    /// reported accurately. Mutating commands and qubesctl runs are logged
    /// and skipped.
    #[arg(long, global = true)]
    pub dry_run: bool,

    /// More output (-v debug, -vv trace). RUST_LOG overrides.
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Parse and resolve the configuration, check salt files
    Validate,
    /// Print resolved qubes in declaration order
    List,
    /// Report drift without changing anything
    Check {
        /// Qubes to check (default: all)
        vms: Vec<String>,
    },
    /// Create missing qubes, run their states and fix drift
    Apply {
        /// Qubes to apply (default: all)
        vms: Vec<String>,
    },
    /// Remove and rebuild a template or DispVM template
    Regenerate {
        vm: String,
    },
    /// Upgrade templates with pending updates
    Upgrade {
        /// Upgrade every declared template, not only updateable ones
        #[arg(long)]
        all: bool,
        /// Templates to upgrade (default: all declared)
        vms: Vec<String>,
    },
    /// Print the state runs of a qube with their rendered templates
    Render {
        vm: String,
    },
    /// Bundled salt state templates
    States {
        #[command(subcommand)]
        action: StatesCommands,
    },
}

#[derive(Subcommand)]
pub enum StatesCommands {
    /// Write the bundled state templates into the salt tree
    Install {
        /// Destination directory (default: <salt_root>/user_salt)
        #[arg(long)]
        dest: Option<PathBuf>,
    },
}

impl Cli {
    pub fn parse_args() -> Self {
        <Self as clap::Parser>::parse()
    }

    /// Default tracing filter for the `-v` count
    pub fn log_level(&self) -> &'static str {
        match self.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }
}
