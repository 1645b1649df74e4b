//! dash-sync: headless account state sync for the trading dashboard.
//!
//! Usage:
//!   dash-sync [OPTIONS] [COMMAND]
//!
//! Commands:
//!   watch                 Keep the account snapshot in sync and log a summary (default)
//!   apply-change          Apply an evolved strategy parameter
//!   set-base-url <URL>    Persist the backend base URL
//!
//! Options:
//!   -c, --config <FILE>   Config file path (default: config/dash.toml)
//!   --base-url <URL>      Backend base URL (overrides config and stored preference)
//!   --transport <KIND>    stream or poll (overrides config)
//!   --log-level <LEVEL>   trace, debug, info, warn or error

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use dash_common::ApplyChangeRequest;
use dash_core::{LocalStore, SyncConfig, SyncCore, SyncHandle};
use dash_feed::SnapshotFetcher;
use tokio::time::interval;
use tracing::{Level, error, info, warn};
use tracing_subscriber::FmtSubscriber;

/// CLI arguments for dash-sync.
#[derive(Parser, Debug)]
#[command(name = "dash-sync")]
#[command(about = "Real-time account state sync for the trading dashboard")]
#[command(version)]
struct Args {
    /// Config file path
    #[arg(short, long, default_value = "config/dash.toml")]
    config: PathBuf,

    /// Backend base URL (overrides config file and stored preference)
    #[arg(long)]
    base_url: Option<String>,

    /// Push transport: stream or poll
    #[arg(long)]
    transport: Option<String>,

    /// Log level
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Keep the account snapshot in sync until interrupted
    Watch {
        /// Seconds between summary lines
        #[arg(long, default_value_t = 10)]
        summary_secs: u64,
    },

    /// Apply an evolved strategy parameter change
    ApplyChange {
        #[arg(long)]
        strategy: String,

        #[arg(long)]
        parameter: String,

        /// New value as JSON; plain text is sent as a string
        #[arg(long)]
        value: String,

        #[arg(long, default_value = "")]
        reason: String,
    },

    /// Persist the backend base URL used on the next start
    SetBaseUrl { url: String },
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<()> {
    if let Err(e) = dotenvy::dotenv()
        && !e.not_found()
    {
        eprintln!("Warning: failed to load .env: {e}");
    }

    let args = Args::parse();

    let config_missing = !args.config.exists();
    let mut config = if config_missing {
        SyncConfig::default()
    } else {
        SyncConfig::from_file(&args.config)?
    };

    let mut store = LocalStore::open(&config.prefs_path);
    if let Some(url) = store.base_url() {
        config.base_url = url;
    }

    config.apply_env_overrides();
    config.apply_cli_overrides(args.base_url, args.transport, args.log_level)?;

    init_logging(&config.log_level)?;
    if config_missing {
        warn!("Config file not found at {:?}, using defaults", args.config);
    }
    config.validate()?;

    match args.command.unwrap_or(Command::Watch { summary_secs: 10 }) {
        Command::Watch { summary_secs } => watch(config, store, summary_secs).await,
        Command::ApplyChange {
            strategy,
            parameter,
            value,
            reason,
        } => {
            let request = ApplyChangeRequest {
                strategy,
                parameter,
                new_value: parse_value(&value),
                reason,
            };
            apply_change(&config, &request).await
        }
        Command::SetBaseUrl { url } => {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                bail!("Base URL must start with http:// or https://, got {url:?}");
            }
            store
                .set_base_url(&url)
                .with_context(|| format!("Failed to store base URL in {:?}", store.path()))?;
            info!("Stored base URL {}", url.trim_end_matches('/'));
            Ok(())
        }
    }
}

fn init_logging(level: &str) -> Result<()> {
    let log_level = match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder().with_max_level(log_level).finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

fn parse_value(raw: &str) -> serde_json::Value {
    serde_json::from_str(raw).unwrap_or_else(|_| serde_json::Value::String(raw.to_string()))
}

async fn watch(config: SyncConfig, store: LocalStore, summary_secs: u64) -> Result<()> {
    info!("Starting dash-sync");
    info!("Backend: {} ({})", config.base_url, config.transport);

    let mut core = SyncCore::new(config)?.with_store(store);
    let handle = core.handle();
    core.start();

    let summary_period = Duration::from_secs(summary_secs.max(1));
    let summary_task = tokio::spawn(async move {
        let mut ticker = interval(summary_period);
        loop {
            ticker.tick().await;
            log_summary(&handle);
        }
    });

    info!("Syncing. Press Ctrl+C to stop.");
    wait_for_signal().await?;

    info!("Initiating graceful shutdown...");
    summary_task.abort();
    core.shutdown().await;
    info!("Shutdown complete");
    Ok(())
}

fn log_summary(handle: &SyncHandle) {
    let snapshot = handle.snapshot();
    let equity = snapshot
        .portfolio
        .as_ref()
        .map(|p| p.total_equity.to_string())
        .unwrap_or_else(|| "-".to_string());
    let risk = handle
        .risk_gauges()
        .map(|g| {
            format!(
                "loss {:.0}% trades {:.0}% positions {:.0}%",
                g.daily_loss.pct, g.trades.pct, g.positions.pct
            )
        })
        .unwrap_or_else(|| "-".to_string());

    info!(
        "Sync: connection={}, demo={}, equity={}, positions={}, pending={}, health={}, risk=[{}]",
        snapshot.connection,
        snapshot.is_demo,
        equity,
        snapshot.positions().len(),
        snapshot.pending_orders().len(),
        handle.health_badge(),
        risk,
    );
}

async fn apply_change(config: &SyncConfig, request: &ApplyChangeRequest) -> Result<()> {
    let fetcher = SnapshotFetcher::new(&config.base_url, config.request_timeout)?;
    let response = fetcher
        .apply_change(request)
        .await
        .with_context(|| format!("Failed to apply {}.{}", request.strategy, request.parameter))?;
    info!(
        "Applied {}.{} = {}: {}",
        request.strategy, request.parameter, request.new_value, response.message
    );
    Ok(())
}

async fn wait_for_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM"),
            _ = sigint.recv() => info!("Received SIGINT"),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl+C");
    }

    Ok(())
}
