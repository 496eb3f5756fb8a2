//! CLI - Command-line argument parsing

use clap::{Parser, Subcommand};
use ota_shared::VersionId;
use otad::{InstallMode, UpdateRequest};
use std::path::PathBuf;

/// otactl - drive the update agent by hand
#[derive(Parser, Debug)]
#[command(name = "otactl")]
#[command(about = "Check, download, install and finalize device updates", long_about = None)]
#[command(version = env!("OTACTL_VERSION"))]
#[command(disable_help_subcommand = true)]
pub struct Cli {
    /// Config file or conf.d directory; repeatable, later wins
    #[arg(short, long, global = true)]
    pub config: Vec<PathBuf>,

    /// Debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Check the catalog for an update
    Check,

    /// Download content without installing it
    Pull(TargetArgs),

    /// Install previously pulled content
    Install {
        #[command(flatten)]
        target: TargetArgs,

        /// all | delay-app-install
        #[arg(long)]
        install_mode: Option<InstallMode>,
    },

    /// Finalize a pending installation (after reboot or deferred apps)
    Run,

    /// Roll back to the previous version
    Rollback,

    /// Check, download and install in one go
    Update {
        #[command(flatten)]
        target: TargetArgs,

        /// all | delay-app-install
        #[arg(long)]
        install_mode: Option<InstallMode>,
    },

    /// Show device state and pending installation
    Status {
        /// Output JSON only
        #[arg(long)]
        json: bool,
    },

    /// List catalog versions for the configured tag
    List {
        /// Output JSON only
        #[arg(long)]
        json: bool,
    },
}

#[derive(clap::Args, Debug, Clone, Default)]
pub struct TargetArgs {
    /// Version id; latest when omitted
    pub version: Option<VersionId>,

    /// Allow installing an older version
    #[arg(long)]
    pub force: bool,
}

impl TargetArgs {
    pub fn request(&self, install_mode: Option<InstallMode>) -> UpdateRequest {
        UpdateRequest {
            version: self.version,
            force: self.force,
            install_mode,
        }
    }
}

impl Commands {
    /// Lock name; read-only commands return `None`
    pub fn operation(&self) -> Option<&'static str> {
        match self {
            Commands::Check => Some("check"),
            Commands::Pull(_) => Some("pull"),
            Commands::Install { .. } => Some("install"),
            Commands::Run => Some("run"),
            Commands::Rollback => Some("rollback"),
            Commands::Update { .. } => Some("update"),
            Commands::Status { .. } | Commands::List { .. } => None,
        }
    }
}
