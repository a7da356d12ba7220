//! `cachesalvage` CLI: scan a browser cache directory for recoverable
//! media and optionally recover a selection of it to an output folder.

use std::path::PathBuf;
use std::sync::atomic::AtomicBool;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cachesalvage::config::RecoveryOptions;
use cachesalvage::error::Result;
use cachesalvage::recovery::RecoveryDriver;
use cachesalvage::{cache_paths, grouper};

/// Application version.
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name.
const APP_NAME: &str = "cachesalvage";

#[derive(Parser)]
#[command(name = "cachesalvage", version, about = "Recover media from a browser's disk cache")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List every known browser cache location and whether it exists.
    Locate,
    /// Scan a cache directory and list what could be recovered.
    Scan {
        /// Cache directory to scan (a `Cache` folder, not the browser profile root).
        dir: PathBuf,
    },
    /// Scan a cache directory and recover everything found into `out_dir`.
    Recover {
        /// Cache directory to scan.
        dir: PathBuf,
        /// Destination directory for recovered files.
        out_dir: PathBuf,
        /// Path to a TOML config file with `RecoveryOptions`. Defaults are used if absent.
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();
    tracing::info!("{} v{} starting", APP_NAME, VERSION);

    let cli = Cli::parse();
    match cli.command {
        Command::Locate => run_locate(),
        Command::Scan { dir } => run_scan(&dir)?,
        Command::Recover { dir, out_dir, config } => run_recover(&dir, &out_dir, config.as_deref()).await?,
    }

    Ok(())
}

fn run_locate() {
    for info in cache_paths::discover_cache_paths() {
        tracing::info!(
            "{:?}: {} ({} files, {} bytes) at {}",
            info.client_name,
            if info.exists { "found" } else { "not found" },
            info.file_count,
            info.total_size,
            info.path.display()
        );
    }
}

fn run_scan(dir: &std::path::Path) -> Result<()> {
    let cancel = AtomicBool::new(false);
    let resources = grouper::scan_directory(dir, &cancel, |progress| {
        tracing::debug!("scan progress: {:?} {}/{}", progress.phase, progress.current, progress.total);
    })?;

    tracing::info!("found {} recoverable resources", resources.len());
    for resource in &resources {
        tracing::info!(
            "{:?} [{:?}] {} file(s), {} bytes: {}",
            resource.kind,
            resource.category,
            resource.files.len(),
            resource.total_size,
            resource.display_name
        );
    }
    Ok(())
}

async fn run_recover(dir: &std::path::Path, out_dir: &std::path::Path, config_path: Option<&std::path::Path>) -> Result<()> {
    let options = match config_path {
        Some(path) => RecoveryOptions::from_file(path.to_string_lossy().as_ref()).unwrap_or_else(|e| {
            tracing::warn!("failed to load config {}: {}. Using defaults.", path.display(), e);
            RecoveryOptions::default()
        }),
        None => RecoveryOptions::default(),
    };

    let cancel = AtomicBool::new(false);
    let resources = grouper::scan_directory_with_options(dir, &options, &cancel, |_| {})?;
    tracing::info!("recovering {} resources to {}", resources.len(), out_dir.display());

    let driver = RecoveryDriver::new(options);
    let outcomes = driver
        .run(&resources, out_dir, &cancel, |progress| {
            if let Some(file) = &progress.current_file {
                tracing::info!("[{}/{}] {}", progress.current, progress.total, file);
            }
        })
        .await;

    let failures = outcomes.iter().filter(|o| o.error.is_some()).count();
    tracing::info!("recovery finished: {} ok, {} failed", outcomes.len() - failures, failures);
    for outcome in outcomes.iter().filter(|o| o.error.is_some()) {
        tracing::warn!("{}: {}", outcome.resource_id, outcome.error.as_deref().unwrap_or("unknown error"));
    }
    Ok(())
}

/// Initialize logging with tracing.
fn init_logging() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cachesalvage=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
