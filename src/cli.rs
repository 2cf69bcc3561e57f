//! CLI interface for the tracker.
//!
//! - `tracker run`: poll every target on the configured interval until
//!   interrupted, or once with `--once`. `--dry-run` leaves the state file
//!   untouched.
//! - `tracker status`: show what the state file remembers.
//! - `tracker validate`: check the config and list its targets.

mod format;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::Config;
use crate::fetch::Retrying;
use crate::fetch::webdriver::WebDriverFetcher;
use crate::notify::Sinks;
use crate::storage::{JsonFileStore, MemoryStore, StateStore};
use crate::tracker::Tracker;

use format::{format_status, format_targets};

/// Watch web pages and report what changed.
#[derive(Debug, Parser)]
#[command(name = "tracker", version)]
pub struct Cli {
    /// Config file. Defaults to `~/.tracker/config.toml`.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log debug output. `RUST_LOG` takes precedence.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Check every target, persist the results, and notify.
    ///
    /// Repeats every `interval-secs` until Ctrl-C or SIGTERM.
    Run {
        /// Run a single cycle and exit.
        #[arg(long)]
        once: bool,

        /// Read the state file but never write it.
        #[arg(long)]
        dry_run: bool,
    },

    /// Show the stored state of every target.
    Status,

    /// Check the config file and list its targets.
    Validate,
}

/// Run the CLI, returning an error message on failure.
pub async fn run(cli: Cli) -> Result<(), String> {
    let path = match cli.config {
        Some(path) => path,
        None => Config::default_path().ok_or("could not determine home directory")?,
    };
    let config = Config::load(&path).map_err(|e| e.to_string())?;

    match cli.command {
        Command::Run { once, dry_run } => cmd_run(config, once, dry_run).await,
        Command::Status => cmd_status(&config),
        Command::Validate => {
            println!("{} is valid\n", path.display());
            print!("{}", format_targets(&config.targets));
            Ok(())
        }
    }
}

async fn cmd_run(config: Config, once: bool, dry_run: bool) -> Result<(), String> {
    if dry_run {
        info!("dry run: the state file will not be written");
        let records = JsonFileStore::read(&config.state_file).map_err(|e| e.to_string())?;
        return track(config, MemoryStore::from(records), once).await;
    }
    let store = JsonFileStore::load(&config.state_file).map_err(|e| e.to_string())?;
    track(config, store, once).await
}

async fn track<S: StateStore>(config: Config, store: S, once: bool) -> Result<(), String> {
    let sinks = Sinks::from_config(&config.notify, &config.targets)
        .map_err(|e| format!("failed to set up notifications: {e}"))?;
    let fetcher = WebDriverFetcher::new(config.browser.clone())
        .map_err(|e| format!("failed to set up browser: {e}"))?;
    let fetcher = Retrying::new(fetcher, config.retry.backoff());

    if sinks.is_empty() {
        warn!("no notification sinks configured, changes will only be stored");
    }
    info!(
        state = %config.state_file.display(),
        targets = config.targets.len(),
        sinks = sinks.len(),
        webdriver = %config.browser.webdriver,
        "tracker started"
    );

    let interval = config.interval();
    let tracker = Tracker::new(fetcher, store, config.targets)
        .with_concurrency(config.concurrency)
        .with_sinks(sinks);

    let cancel = CancellationToken::new();
    tokio::spawn(cancel_on_signal(cancel.clone()));

    tracker
        .run(interval, once, &cancel)
        .await
        .map_err(|e| format!("failed to save state: {e}"))
}

fn cmd_status(config: &Config) -> Result<(), String> {
    let records = JsonFileStore::read(&config.state_file).map_err(|e| e.to_string())?;
    print!("{}", format_status(&records, &config.targets));
    Ok(())
}

/// Cancel on Ctrl-C, or SIGTERM on Unix.
async fn cancel_on_signal(cancel: CancellationToken) {
    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                warn!(error = %e, "cannot listen for Ctrl-C");
                return;
            }
        }
        () = terminate => {}
    }

    info!("shutdown requested, finishing in-flight checks");
    cancel.cancel();
}
