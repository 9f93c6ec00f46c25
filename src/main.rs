//! Watchlist Scanner - Entry Point
//!
//! Subcommands:
//! - `watchlist add|remove|list` - manage the scanned symbols
//! - `run` - stream, detect and alert until Ctrl+C
//! - `test-connection` - check store, Alpaca and Telegram credentials

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::signal;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use watchlist_scanner::config::{
    self, init_logging_with_config, AppConfig, LoggingConfig, SupabaseConfig,
};
use watchlist_scanner::core::{
    run_scanner, shutdown_channel, AlertDeduplicator, AlertQueue, Backpressure, DetectorRegistry, RetryPolicy,
    SharedClock, StreamProcessor, SubscriptionManager, Symbol, SystemClock,
};
use watchlist_scanner::detectors::build_detectors;
use watchlist_scanner::feed::{AlpacaConfig, AlpacaFeed, MarketFeed};
use watchlist_scanner::notifier::{NotificationTransport, Notifier, TelegramConfig, TelegramTransport};
use watchlist_scanner::storage::{InMemoryStore, RestStore, Store, WatchlistStore};

const DEFAULT_CONFIG_PATH: &str = "config.yaml";
const TEST_MESSAGE: &str = "Test message from Watchlist Scanner";

#[derive(Parser, Debug)]
#[command(name = "watchlist-scanner", version, about = "Real-time watchlist pattern scanner")]
struct Cli {
    /// YAML configuration file (defaults to ./config.yaml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Manage the watchlist
    Watchlist {
        #[command(subcommand)]
        action: WatchlistAction,
    },
    /// Start scanning
    Run(RunArgs),
    /// Check connectivity to the store, Alpaca and Telegram
    TestConnection,
}

#[derive(Subcommand, Debug)]
enum WatchlistAction {
    Add { symbol: String },
    Remove { symbol: String },
    /// Print active symbols as a JSON array
    List,
}

#[derive(clap::Args, Debug)]
struct RunArgs {
    /// Upper bound on watchlist symbols to scan
    #[arg(long)]
    symbols_limit: Option<usize>,
    /// Seconds between subscription rotations
    #[arg(long)]
    rotate_interval_sec: Option<u64>,
    /// Log level ("debug") or a full filter directive
    #[arg(long)]
    log_level: Option<String>,
    /// Log alerts instead of sending them
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file (if it exists)
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let log_level = match &cli.command {
        Command::Run(args) => args.log_level.as_deref(),
        _ => None,
    };
    init_logging_with_config(LoggingConfig::from_env().with_level(log_level));

    let (path, explicit) = match &cli.config {
        Some(path) => (path.clone(), true),
        None => (PathBuf::from(DEFAULT_CONFIG_PATH), false),
    };
    let mut cfg = match config::load_config_or_default(&path, explicit) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(path = %path.display(), error = %e, "Configuration failed");
            std::process::exit(1);
        }
    };

    if let Command::Run(args) = &cli.command {
        cfg.apply_overrides(args.symbols_limit, args.rotate_interval_sec, args.dry_run)
            .context("invalid command-line override")?;
    }

    let result = match SupabaseConfig::from_env()? {
        Some(supabase) => {
            let store = Arc::new(RestStore::new(&supabase)?);
            dispatch(cli.command, cfg, store).await
        }
        None => {
            warn!("Supabase not configured, using in-memory store (nothing is persisted)");
            dispatch(cli.command, cfg, Arc::new(InMemoryStore::new())).await
        }
    };

    if let Err(e) = &result {
        error!(error = %e, "Exited with error");
    }
    result
}

async fn dispatch<S: Store + 'static>(command: Command, cfg: AppConfig, store: Arc<S>) -> anyhow::Result<()> {
    match command {
        Command::Watchlist { action } => watchlist(action, &cfg, store).await,
        Command::Run(_) => run(cfg, store).await,
        Command::TestConnection => test_connection(&cfg, store).await,
    }
}

// ============================================================================
// watchlist
// ============================================================================

async fn watchlist<S: Store>(action: WatchlistAction, cfg: &AppConfig, store: Arc<S>) -> anyhow::Result<()> {
    match action {
        WatchlistAction::Add { symbol } => {
            let symbol = Symbol::parse(&symbol)?;
            store.add(&symbol).await?;
            info!(symbol = %symbol, "Added to watchlist");
        }
        WatchlistAction::Remove { symbol } => {
            let symbol = Symbol::parse(&symbol)?;
            store.remove(&symbol).await?;
            info!(symbol = %symbol, "Removed from watchlist");
        }
        WatchlistAction::List => {
            let symbols = store.list_active(Some(cfg.watchlist.max_size)).await?;
            println!("{}", serde_json::to_string(&symbols)?);
        }
    }
    Ok(())
}

// ============================================================================
// run
// ============================================================================

fn build_notifier(cfg: &AppConfig) -> anyhow::Result<Notifier> {
    if cfg.notifier.dry_run {
        info!("Dry-run mode: alerts are logged, not sent");
        return Ok(Notifier::dry_run_only());
    }

    let telegram = TelegramConfig::from_env().context("Telegram is required unless --dry-run is set")?;
    let transport: Arc<dyn NotificationTransport> = Arc::new(TelegramTransport::new(telegram)?);
    let policy = RetryPolicy::new(
        cfg.notifier.retry_attempts,
        cfg.notifier.initial_backoff_ms,
        cfg.notifier.max_backoff_ms,
    );
    Ok(Notifier::new(transport, policy, false))
}

async fn run<S: Store + 'static>(cfg: AppConfig, store: Arc<S>) -> anyhow::Result<()> {
    info!(
        backend = store.backend_name(),
        max_concurrent = cfg.subscriptions.max_concurrent,
        rotation_interval_sec = cfg.subscriptions.rotation_interval_sec,
        watchlist_max = cfg.watchlist.max_size,
        dry_run = cfg.notifier.dry_run,
        "Watchlist scanner starting"
    );

    let clock: SharedClock = Arc::new(SystemClock);
    let notifier = Arc::new(build_notifier(&cfg)?);
    let detectors = build_detectors(&cfg.detectors)?;

    let mut feed = AlpacaFeed::new(
        AlpacaConfig::from_env(&cfg.feed)?,
        cfg.feed.channels.clone(),
        cfg.subscriptions.max_concurrent,
    );
    let events = feed
        .take_event_receiver()
        .context("feed event receiver already taken")?;
    let feed = Arc::new(Mutex::new(feed));

    let registry = Arc::new(DetectorRegistry::new(detectors, store.clone(), clock.clone()));
    info!(detectors = ?registry.detector_names(), "Detectors registered");

    let dedup = Arc::new(AlertDeduplicator::new(store.clone(), clock.clone(), cfg.alerts.cooldown()));
    let queue = Arc::new(AlertQueue::new(
        cfg.alerts.queue_capacity,
        Backpressure::from_config(&cfg.alerts),
    ));
    let processor = StreamProcessor::new(registry, dedup, notifier, store.clone(), queue, clock)
        .with_workers(cfg.alerts.workers)
        .with_drain_timeout(cfg.alerts.drain_timeout());

    let manager = SubscriptionManager::new(feed, store, &cfg.subscriptions, cfg.watchlist.max_size);

    let shutdown_tx = shutdown_channel();
    let shutdown_signal = shutdown_tx.clone();
    tokio::spawn(async move {
        match signal::ctrl_c().await {
            Ok(()) => {
                info!("[SHUTDOWN] Graceful shutdown initiated");
                let _ = shutdown_signal.send(());
            }
            Err(err) => {
                error!(error = %err, "Failed to listen for Ctrl+C signal");
            }
        }
    });

    let summary = run_scanner(manager, processor, events, shutdown_tx).await?;
    info!(
        events = summary.events,
        candidates = summary.candidates,
        delivered = summary.delivered,
        dry_run = summary.dry_run,
        suppressed = summary.suppressed,
        failed = summary.failed,
        lost = summary.lost,
        queue_drops = summary.queue_drops,
        unflushed_states = summary.unflushed_states,
        "[SHUTDOWN] Clean exit"
    );
    Ok(())
}

// ============================================================================
// test-connection
// ============================================================================

fn report(check: &str, result: &anyhow::Result<()>) {
    match result {
        Ok(()) => println!("{:<10} ok", check),
        Err(e) => println!("{:<10} FAILED: {:#}", check, e),
    }
}

async fn test_connection<S: Store>(cfg: &AppConfig, store: Arc<S>) -> anyhow::Result<()> {
    let store_check: anyhow::Result<()> = store
        .ping()
        .await
        .with_context(|| format!("{} store unreachable", store.backend_name()));
    report("store", &store_check);

    let alpaca_check: anyhow::Result<()> = async {
        let feed = AlpacaFeed::new(
            AlpacaConfig::from_env(&cfg.feed)?,
            cfg.feed.channels.clone(),
            cfg.subscriptions.max_concurrent,
        );
        feed.ping().await?;
        Ok::<(), anyhow::Error>(())
    }
    .await;
    report("alpaca", &alpaca_check);

    let telegram_check: anyhow::Result<()> = async {
        let transport = TelegramTransport::new(TelegramConfig::from_env()?)?;
        transport.send(TEST_MESSAGE).await?;
        Ok::<(), anyhow::Error>(())
    }
    .await;
    report("telegram", &telegram_check);

    let failed = [&store_check, &alpaca_check, &telegram_check]
        .iter()
        .filter(|r| r.is_err())
        .count();
    if failed > 0 {
        anyhow::bail!("{} of 3 connection checks failed", failed);
    }
    info!("All connection checks passed");
    Ok(())
}
