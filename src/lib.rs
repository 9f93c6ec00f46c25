//! Watchlist Scanner
//!
//! Streams market data for a rotating window of watchlist symbols, runs
//! pattern detectors over every event and sends deduplicated alerts:
//! - Feed adapters (Alpaca market-data WebSocket)
//! - Subscription rotation under the provider symbol limit
//! - Detector registry with persisted per-symbol state
//! - Cooldown dedup, bounded alert queue, Telegram delivery with retry

pub mod config;
pub mod core;
pub mod detectors;
pub mod error;
pub mod feed;
pub mod notifier;
pub mod storage;

pub use error::AppError;
