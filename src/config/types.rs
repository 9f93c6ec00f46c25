//! Configuration types for the scanner
//!
//! Every section is optional in YAML and falls back to its `Default`.
//! Secrets never live here; they are read from the environment by the
//! component that needs them.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::detectors::{build_detectors, DetectorSpec};
use crate::error::AppError;

// ============================================================================
// Enums
// ============================================================================

/// Alpaca account environment (selects the REST host)
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum FeedEnvironment {
    #[default]
    Paper,
    Live,
}

/// Alpaca market-data feed
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum DataFeed {
    #[default]
    Iex,
    Sip,
}

impl std::fmt::Display for DataFeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DataFeed::Iex => write!(f, "iex"),
            DataFeed::Sip => write!(f, "sip"),
        }
    }
}

/// Stream channel a symbol is subscribed on
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Trades,
    Quotes,
    Bars,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Trades => "trades",
            Channel::Quotes => "quotes",
            Channel::Bars => "bars",
        }
    }
}

/// What to do when the alert queue is full
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum BackpressureKind {
    #[default]
    DropOldest,
    Block,
}

// ============================================================================
// Sections
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FeedConfig {
    pub environment: FeedEnvironment,
    pub data_feed: DataFeed,
    pub channels: Vec<Channel>,
    /// Override of the market-data WebSocket URL
    pub stream_url: Option<String>,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            environment: FeedEnvironment::Paper,
            data_feed: DataFeed::Iex,
            channels: vec![Channel::Bars],
            stream_url: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SubscriptionConfig {
    /// Provider limit on concurrently subscribed symbols
    pub max_concurrent: usize,
    pub rotation_interval_sec: u64,
    /// Attempts per transport operation before the manager gives up
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 30,
            rotation_interval_sec: 300,
            max_attempts: 5,
            initial_backoff_ms: 500,
            max_backoff_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AlertsConfig {
    pub cooldown_sec: u64,
    pub queue_capacity: usize,
    pub backpressure: BackpressureKind,
    /// Only used with `backpressure: block`
    pub block_timeout_ms: u64,
    pub workers: usize,
    pub drain_timeout_sec: u64,
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            cooldown_sec: 300,
            queue_capacity: 1024,
            backpressure: BackpressureKind::DropOldest,
            block_timeout_ms: 1_000,
            workers: 4,
            drain_timeout_sec: 10,
        }
    }
}

impl AlertsConfig {
    pub fn cooldown(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.cooldown_sec as i64)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_sec)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WatchlistConfig {
    /// Upper bound on symbols read from the watchlist
    pub max_size: usize,
}

impl Default for WatchlistConfig {
    fn default() -> Self {
        Self { max_size: 200 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NotifierConfig {
    pub retry_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// Log alerts instead of sending them
    pub dry_run: bool,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            retry_attempts: 3,
            initial_backoff_ms: 500,
            max_backoff_ms: 10_000,
            dry_run: false,
        }
    }
}

// ============================================================================
// Root
// ============================================================================

fn default_detectors() -> Vec<DetectorSpec> {
    vec![DetectorSpec::Name("bull_flag".to_string())]
}

/// Root application configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub feed: FeedConfig,
    pub subscriptions: SubscriptionConfig,
    pub alerts: AlertsConfig,
    pub watchlist: WatchlistConfig,
    pub notifier: NotifierConfig,
    pub detectors: Vec<DetectorSpec>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            feed: FeedConfig::default(),
            subscriptions: SubscriptionConfig::default(),
            alerts: AlertsConfig::default(),
            watchlist: WatchlistConfig::default(),
            notifier: NotifierConfig::default(),
            detectors: default_detectors(),
        }
    }
}

impl AppConfig {
    /// Validate all configuration rules
    pub fn validate(&self) -> Result<(), AppError> {
        if self.feed.channels.is_empty() {
            return Err(AppError::Config("feed.channels cannot be empty".to_string()));
        }
        if let Some(url) = &self.feed.stream_url {
            if !url.starts_with("wss://") && !url.starts_with("ws://") {
                return Err(AppError::Config(format!(
                    "feed.stream_url must be a ws:// or wss:// URL (got {})",
                    url
                )));
            }
        }

        let subs = &self.subscriptions;
        if subs.max_concurrent == 0 {
            return Err(AppError::Config(
                "subscriptions.max_concurrent must be > 0".to_string(),
            ));
        }
        if subs.rotation_interval_sec == 0 {
            return Err(AppError::Config(
                "subscriptions.rotation_interval_sec must be > 0".to_string(),
            ));
        }
        if subs.max_attempts == 0 {
            return Err(AppError::Config(
                "subscriptions.max_attempts must be >= 1".to_string(),
            ));
        }
        if subs.initial_backoff_ms > subs.max_backoff_ms {
            return Err(AppError::Config(format!(
                "subscriptions.initial_backoff_ms ({}) must be <= max_backoff_ms ({})",
                subs.initial_backoff_ms, subs.max_backoff_ms
            )));
        }

        let alerts = &self.alerts;
        if alerts.cooldown_sec == 0 {
            return Err(AppError::Config("alerts.cooldown_sec must be > 0".to_string()));
        }
        if alerts.queue_capacity == 0 || alerts.workers == 0 {
            return Err(AppError::Config(format!(
                "alerts.queue_capacity and alerts.workers must be > 0 (got {} and {})",
                alerts.queue_capacity, alerts.workers
            )));
        }
        if alerts.backpressure == BackpressureKind::Block && alerts.block_timeout_ms == 0 {
            return Err(AppError::Config(
                "alerts.block_timeout_ms must be > 0 with backpressure: block".to_string(),
            ));
        }

        if self.watchlist.max_size == 0 {
            return Err(AppError::Config("watchlist.max_size must be > 0".to_string()));
        }

        let notifier = &self.notifier;
        if notifier.retry_attempts == 0 {
            return Err(AppError::Config(
                "notifier.retry_attempts must be >= 1".to_string(),
            ));
        }
        if notifier.initial_backoff_ms > notifier.max_backoff_ms {
            return Err(AppError::Config(format!(
                "notifier.initial_backoff_ms ({}) must be <= max_backoff_ms ({})",
                notifier.initial_backoff_ms, notifier.max_backoff_ms
            )));
        }

        if self.detectors.is_empty() {
            return Err(AppError::Config(
                "At least one detector must be configured".to_string(),
            ));
        }
        build_detectors(&self.detectors)?;

        Ok(())
    }

    /// Apply `run` command-line overrides on top of the file
    pub fn apply_overrides(
        &mut self,
        symbols_limit: Option<usize>,
        rotate_interval_sec: Option<u64>,
        dry_run: bool,
    ) -> Result<(), AppError> {
        if let Some(limit) = symbols_limit {
            self.watchlist.max_size = limit;
        }
        if let Some(interval) = rotate_interval_sec {
            self.subscriptions.rotation_interval_sec = interval;
        }
        if dry_run {
            self.notifier.dry_run = true;
        }
        self.validate()
    }
}

// ============================================================================
// Tests
// ============================================================================
