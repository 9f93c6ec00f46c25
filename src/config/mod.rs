//! Configuration module
//!
//! This module provides:
//! - Configuration types (`AppConfig` and its sections)
//! - YAML loading functionality (`load_config`)
//! - Remote store settings from the environment (`SupabaseConfig`)
//! - Logging setup and secret redaction

pub mod logging;
mod loader;
mod supabase;
mod types;

pub use types::{
    AlertsConfig, AppConfig, BackpressureKind, Channel, DataFeed, FeedConfig, FeedEnvironment,
    NotifierConfig, SubscriptionConfig, WatchlistConfig,
};

pub use loader::{load_config, load_config_from_str, load_config_or_default};
pub use logging::{init_logging_with_config, LogFormat, LoggingConfig, SanitizedValue};
pub use supabase::SupabaseConfig;
