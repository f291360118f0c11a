use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use opshub::live::Room;
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::BoxMakeWriter;

mod cmd;

#[derive(Parser)]
#[command(name = "opshub")]
#[command(version, about = "Live workspace client for Cloud Ops Hub")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Write logs to this file instead of stderr
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    /// Signed-in user id. Live updates need it.
    #[arg(long, global = true)]
    pub user: Option<String>,

    /// Active organization id
    #[arg(long, global = true)]
    pub org: Option<String>,

    /// Bearer token for the REST API (overrides OPSHUB_TOKEN)
    #[arg(long, global = true)]
    pub token: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Connect and print every pushed event
    Watch {
        /// Also join this room, e.g. `project:p1` (repeatable)
        #[arg(long = "room", value_name = "SCOPE:ID")]
        rooms: Vec<Room>,
    },
    /// Live task table for a project
    Tasks {
        project_id: String,
        /// Print the snapshot and exit
        #[arg(long)]
        once: bool,
    },
    /// Pending admin requests and the unread badge for the organization
    Inbox {
        /// Print the snapshot and exit
        #[arg(long)]
        once: bool,
    },
    /// Upload a file as a task attachment and print its public URL
    Upload {
        file: PathBuf,
        #[arg(long)]
        bucket: Option<String>,
    },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show the effective configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
    /// Write a default .opshub/opshub.toml
    Init,
}

/// Filter used when `RUST_LOG` is unset.
fn default_directive(verbose: bool) -> &'static str {
    if verbose { "opshub=debug,info" } else { "info" }
}

/// Install the global subscriber. The returned guard flushes the file
/// writer and must live until exit.
fn init_logging(verbose: bool, json: bool, log_file: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbose)));

    let (writer, guard) = match log_file {
        Some(path) => {
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            let name = path
                .file_name()
                .with_context(|| format!("Log file path {} has no file name", path.display()))?;
            let appender = tracing_appender::rolling::never(dir, name);
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            (BoxMakeWriter::new(non_blocking), Some(guard))
        }
        None => (BoxMakeWriter::new(std::io::stderr), None),
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(log_file.is_none())
        .with_writer(writer);
    let installed = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    installed.map_err(|e| anyhow::anyhow!("Failed to install logger: {}", e))?;
    Ok(guard)
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let _log_guard = init_logging(cli.verbose, cli.log_json, cli.log_file.as_deref())?;
    let project_dir = std::env::current_dir().context("Failed to get current directory")?;

    match &cli.command {
        Commands::Watch { rooms } => cmd::cmd_watch(&cli, &project_dir, rooms).await?,
        Commands::Tasks { project_id, once } => {
            cmd::cmd_tasks(&cli, &project_dir, project_id, *once).await?
        }
        Commands::Inbox { once } => cmd::cmd_inbox(&cli, &project_dir, *once).await?,
        Commands::Upload { file, bucket } => {
            cmd::cmd_upload(&cli, &project_dir, file, bucket.as_deref()).await?
        }
        Commands::Config { command } => cmd::cmd_config(&cli, &project_dir, command.clone())?,
    }

    Ok(())
}
