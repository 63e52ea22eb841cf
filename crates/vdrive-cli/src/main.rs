//! vdrive command-line front end.
//!
//! Drives are declared in `drives.toml` and addressed as `/<drive>/<path>`.
//!
//! Usage:
//!   vdrive ls /nas/photos
//!   vdrive cp /nas/photos /scratch/backup
//!   vdrive put ./report.pdf /nas/docs/report.pdf --force
//!   vdrive serve --listen 127.0.0.1:8080

mod commands;
mod config;
mod serve;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use vdrive_kernel::copy::TransferMode;
use vdrive_kernel::drive::DriveRegistry;

use crate::config::CliConfig;

/// Browse and transfer files across configured drives.
#[derive(Parser, Debug)]
#[command(name = "vdrive")]
#[command(about = "Unified access to WebDAV and in-memory drives")]
struct Args {
    /// Drive configuration file
    #[arg(long, global = true, env = "VDRIVE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List a directory, or the mounted drives for `/`
    Ls { path: String },
    /// Show one entry
    Stat { path: String },
    /// Create a directory
    Mkdir { path: String },
    /// Remove a file or directory tree
    Rm { path: String },
    /// Copy a file or directory tree
    Cp {
        src: String,
        dst: String,
        /// Overwrite existing files
        #[arg(short, long)]
        force: bool,
    },
    /// Move a file or directory tree
    Mv {
        src: String,
        dst: String,
        /// Overwrite existing files
        #[arg(short, long)]
        force: bool,
    },
    /// Download a file to a local path, or stdout
    Get {
        path: String,
        local: Option<PathBuf>,
    },
    /// Upload a local file
    Put {
        local: PathBuf,
        path: String,
        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },
    /// Serve file content over HTTP at `/<drive>/<path>`
    Serve {
        #[arg(long, default_value = "127.0.0.1:8080")]
        listen: SocketAddr,
        /// Relay every URL through this server instead of redirecting
        #[arg(long)]
        proxy: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();
    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<()> {
    let config = CliConfig::load(args.config.as_deref())?;
    let registry = DriveRegistry::new();
    config.mount_all(&registry).await?;
    let temp_dir = config.temp_dir();

    match args.command {
        Command::Ls { path } => commands::ls(&registry, &path).await,
        Command::Stat { path } => commands::stat(&registry, &path).await,
        Command::Mkdir { path } => commands::mkdir(&registry, &path).await,
        Command::Rm { path } => commands::rm(&registry, &path).await,
        Command::Cp { src, dst, force } => {
            commands::transfer(&registry, &src, &dst, force, TransferMode::Copy, &temp_dir).await
        }
        Command::Mv { src, dst, force } => {
            commands::transfer(&registry, &src, &dst, force, TransferMode::Move, &temp_dir).await
        }
        Command::Get { path, local } => commands::get(&registry, &path, local.as_deref()).await,
        Command::Put { local, path, force } => {
            commands::put(&registry, &local, &path, force).await
        }
        Command::Serve { listen, proxy } => serve::run(registry, listen, proxy).await,
    }
}
