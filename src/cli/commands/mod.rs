//! CLI commands implementation.
//!
//! This module contains the CLI parser and dispatches to command-specific modules.

mod device;
mod init;
mod jobs;
mod parse;
mod receipts;
mod serve;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::{load_settings_with_options, LoadOptions};
use crate::models::JobStatus;

#[derive(Parser)]
#[command(name = "receiptscan")]
#[command(about = "Receipt QR-scan ingestion and device sync")]
#[command(version)]
pub struct Cli {
    /// Config file path (overrides auto-discovery)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Resolve relative paths from current working directory instead of config file location
    #[arg(long, global = true)]
    cwd: bool,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Check if verbose mode is enabled (for early logging setup).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the data directory and databases
    Init,

    /// Start the ingestion server
    Serve {
        /// Address to bind: port, host, or host:port (defaults to server.bind)
        bind: Option<String>,
    },

    /// Resolve and run a parser for a URL without storing anything
    Parse {
        /// Receipt URL
        url: String,
        /// Pre-rendered HTML snapshot of the page
        #[arg(long)]
        html: Option<PathBuf>,
    },

    /// Inspect processing jobs
    Jobs {
        #[command(subcommand)]
        command: JobsCommands,
    },

    /// Manage stored receipts
    Receipts {
        #[command(subcommand)]
        command: ReceiptsCommands,
    },

    /// Capture a scanned URL on this device and try to submit it
    Scan {
        /// URL encoded in the receipt QR code
        url: String,
        /// HTML snapshot rendered on the device
        #[arg(long)]
        html: Option<PathBuf>,
        /// Signed-in user (defaults to device.user_id)
        #[arg(long, env = "RECEIPTSCAN_USER_ID")]
        user: Option<String>,
    },

    /// Submit queued scans to the server
    Sync {
        /// Keep running on the sync schedule
        #[arg(long)]
        daemon: bool,
        /// Seconds between runs in daemon mode (defaults to device.sync_interval)
        #[arg(long)]
        interval: Option<u64>,
    },

    /// List scans waiting in the device queue
    Queue,
}

#[derive(Subcommand)]
enum JobsCommands {
    /// List recent jobs
    List {
        /// Only jobs in this state (pending, processing, completed, failed)
        #[arg(short, long, value_parser = parse_status)]
        status: Option<JobStatus>,
        /// Maximum number of jobs to show
        #[arg(short, long, default_value = "50")]
        limit: i64,
    },
    /// Show the job for a scanned URL id
    Show {
        /// Scanned URL id (a job id also works)
        id: String,
    },
}

#[derive(Subcommand)]
enum ReceiptsCommands {
    /// List a user's receipts
    List {
        /// Owning user
        #[arg(short, long)]
        user: String,
    },
    /// Show a receipt with its items
    Show {
        /// Receipt ID
        id: String,
    },
    /// Delete a receipt and its items
    Delete {
        /// Receipt ID
        id: String,
        /// Owning user
        #[arg(short, long)]
        user: String,
        /// Skip confirmation prompt
        #[arg(short = 'y', long)]
        confirm: bool,
    },
}

fn parse_status(s: &str) -> Result<JobStatus, String> {
    JobStatus::from_str(&s.to_lowercase()).ok_or_else(|| {
        format!(
            "unknown status '{}' (expected pending, processing, completed or failed)",
            s
        )
    })
}

/// Run the CLI.
pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let options = LoadOptions {
        config_path: cli.config,
        use_cwd: cli.cwd,
    };
    let (settings, _config) = load_settings_with_options(options).await;

    match cli.command {
        Commands::Init => init::cmd_init(&settings).await,
        Commands::Serve { bind } => {
            let bind = bind.unwrap_or_else(|| settings.server.bind.clone());
            serve::cmd_serve(&settings, &bind).await
        }
        Commands::Parse { url, html } => parse::cmd_parse(&settings, &url, html.as_deref()).await,
        Commands::Jobs { command } => match command {
            JobsCommands::List { status, limit } => {
                jobs::cmd_jobs_list(&settings, status, limit).await
            }
            JobsCommands::Show { id } => jobs::cmd_jobs_show(&settings, &id).await,
        },
        Commands::Receipts { command } => match command {
            ReceiptsCommands::List { user } => receipts::cmd_receipts_list(&settings, &user).await,
            ReceiptsCommands::Show { id } => receipts::cmd_receipts_show(&settings, &id).await,
            ReceiptsCommands::Delete { id, user, confirm } => {
                receipts::cmd_receipts_delete(&settings, &id, &user, confirm).await
            }
        },
        Commands::Scan { url, html, user } => {
            device::cmd_scan(&settings, &url, html.as_deref(), user).await
        }
        Commands::Sync { daemon, interval } => device::cmd_sync(&settings, daemon, interval).await,
        Commands::Queue => device::cmd_queue(&settings).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_jobs_list_with_status() {
        let cli =
            Cli::try_parse_from(["receiptscan", "jobs", "list", "--status", "Failed"]).unwrap();
        match cli.command {
            Commands::Jobs {
                command: JobsCommands::List { status, limit },
            } => {
                assert_eq!(status, Some(JobStatus::Failed));
                assert_eq!(limit, 50);
            }
            _ => panic!("expected jobs list"),
        }

        assert!(Cli::try_parse_from(["receiptscan", "jobs", "list", "--status", "done"]).is_err());
    }

    #[test]
    fn test_parse_sync_daemon() {
        let cli = Cli::try_parse_from(["receiptscan", "-v", "sync", "--daemon", "--interval", "60"])
            .unwrap();
        assert!(cli.verbose);
        assert!(matches!(
            cli.command,
            Commands::Sync {
                daemon: true,
                interval: Some(60)
            }
        ));
    }
}
