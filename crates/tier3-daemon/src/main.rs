//! tier3-daemon binary: POS sidecar for Tier 3 loyalty decisions.
//!
//! Startup order matters: logging first, then the database (schema init and
//! the daily-count retention sweep), then the listener. The daemon runs in
//! the foreground; the store's service supervisor owns process lifecycle.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use rust_decimal::Decimal;
use tokio::net::TcpListener;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use tier3_core::clock::SystemClock;
use tier3_core::engine::{EngineConfig, Tier3Engine};
use tier3_core::Clock;

use tier3_daemon::config::{DaemonConfig, DAILY_COUNT_RETENTION_DAYS};
use tier3_daemon::protocol::Dispatcher;
use tier3_daemon::{server, SqliteStore};

/// Tier 3 loyalty decision sidecar
#[derive(Parser, Debug)]
#[command(name = "tier3-daemon")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "tier3.toml")]
    config: PathBuf,

    /// Listen address for POS connections (overrides config)
    #[arg(long)]
    listen: Option<std::net::SocketAddr>,

    /// SQLite database path (overrides config)
    #[arg(long)]
    database: Option<PathBuf>,

    /// Loyalty discount used when an allowance row carries no amount
    #[arg(long)]
    default_loyalty_discount: Option<Decimal>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// Log to file instead of stdout
    #[arg(long)]
    log_file: Option<PathBuf>,
}

fn load_config(args: &Args) -> Result<DaemonConfig> {
    let mut config = if args.config.exists() {
        DaemonConfig::from_file(&args.config).context("failed to load configuration")?
    } else {
        DaemonConfig::default()
    };

    if let Some(listen) = args.listen {
        config.listen_addr = listen;
    }
    if let Some(database) = &args.database {
        config.database_path.clone_from(database);
    }
    if let Some(discount) = args.default_loyalty_discount {
        config.default_loyalty_discount = discount;
    }
    if let Some(level) = &args.log_level {
        config.log_level.clone_from(level);
    }
    if let Some(file) = &args.log_file {
        config.log_file = Some(file.clone());
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(&args)?;

    let filter =
        EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    if let Some(log_file) = &config.log_file {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_file)
            .context("failed to open log file")?;
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(file)
                    .with_ansi(false),
            )
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    if !args.config.exists() {
        info!(config = %args.config.display(), "no config file found, using defaults");
    }

    let store = SqliteStore::open(&config.database_path)
        .with_context(|| format!("failed to open {}", config.database_path.display()))?;

    // Bound the daily-count table before accepting traffic.
    let clock = SystemClock;
    let cutoff = clock.today() - chrono::Duration::days(DAILY_COUNT_RETENTION_DAYS);
    if let Err(err) = store.sweep_daily_counts(cutoff) {
        warn!(error = %err, "daily count sweep failed, continuing");
    }

    let engine = Tier3Engine::new(
        Arc::new(store.clone()),
        Arc::new(store),
        Arc::new(clock),
        EngineConfig {
            default_loyalty_discount: config.default_loyalty_discount,
        },
    );
    let dispatcher = Dispatcher::new(engine);

    let listener = TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.listen_addr))?;
    info!(
        addr = %config.listen_addr,
        database = %config.database_path.display(),
        "tier3-daemon started"
    );

    let server_task = tokio::spawn(server::run(listener, dispatcher));

    let mut sigterm = signal(SignalKind::terminate()).context("failed to register SIGTERM")?;
    let mut sigint = signal(SignalKind::interrupt()).context("failed to register SIGINT")?;
    tokio::select! {
        _ = sigterm.recv() => info!("received SIGTERM"),
        _ = sigint.recv() => info!("received SIGINT"),
        result = server_task => {
            warn!("POS listener exited unexpectedly");
            result.context("listener task panicked")?;
        }
    }

    info!("tier3-daemon shutdown complete");
    Ok(())
}
