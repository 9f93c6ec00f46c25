//! Alpaca Configuration
//!
//! Credentials come from `ALPACA_API_KEY` / `ALPACA_SECRET_KEY`; endpoints
//! follow the `feed` section of the YAML config.

use tracing::info;

use crate::config::{DataFeed, FeedConfig, FeedEnvironment, SanitizedValue};
use crate::feed::errors::{FeedError, FeedResult};

const PAPER_REST_URL: &str = "https://paper-api.alpaca.markets";
const LIVE_REST_URL: &str = "https://api.alpaca.markets";
const STREAM_BASE_URL: &str = "wss://stream.data.alpaca.markets/v2";

/// Configuration for the Alpaca market-data connection
#[derive(Debug, Clone)]
pub struct AlpacaConfig {
    pub api_key: String,
    pub secret_key: String,
    pub environment: FeedEnvironment,
    pub data_feed: DataFeed,
    /// Overrides the stream URL derived from `data_feed`
    pub stream_url: Option<String>,
    /// Overrides the REST host derived from `environment`
    pub rest_url: Option<String>,
}

impl AlpacaConfig {
    /// Create configuration from environment variables
    pub fn from_env(feed: &FeedConfig) -> FeedResult<Self> {
        let api_key = require_env("ALPACA_API_KEY")?;
        let secret_key = require_env("ALPACA_SECRET_KEY")?;

        info!(
            api_key = %SanitizedValue::new(&api_key),
            environment = ?feed.environment,
            data_feed = %feed.data_feed,
            "Alpaca configuration loaded"
        );

        Ok(Self {
            api_key,
            secret_key,
            environment: feed.environment,
            data_feed: feed.data_feed,
            stream_url: feed.stream_url.clone(),
            rest_url: None,
        })
    }

    /// Trading REST base URL (used for the account ping)
    pub fn rest_base_url(&self) -> &str {
        if let Some(url) = &self.rest_url {
            return url.trim_end_matches('/');
        }
        match self.environment {
            FeedEnvironment::Paper => PAPER_REST_URL,
            FeedEnvironment::Live => LIVE_REST_URL,
        }
    }

    /// Market-data WebSocket URL
    pub fn stream_url(&self) -> String {
        match &self.stream_url {
            Some(url) => url.clone(),
            None => format!("{}/{}", STREAM_BASE_URL, self.data_feed),
        }
    }
}

fn require_env(name: &str) -> FeedResult<String> {
    match std::env::var(name) {
        Ok(v) if !v.is_empty() => Ok(v),
        Ok(_) => Err(FeedError::NotConfigured(format!("{} is empty", name))),
        Err(_) => Err(FeedError::NotConfigured(format!("{} not set", name))),
    }
}
