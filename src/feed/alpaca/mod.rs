//! Alpaca market-data stream

pub mod adapter;
pub mod config;
pub mod types;

pub use adapter::AlpacaFeed;
pub use config::AlpacaConfig;
pub use types::{map_message, Inbound};
