//! Market-data feeds
//!
//! `MarketFeed` is the seam between the subscription manager / stream
//! processor and a concrete provider connection.

pub mod alpaca;
pub mod errors;
pub mod shared;
pub mod test_utils;
pub mod traits;

pub use alpaca::{AlpacaConfig, AlpacaFeed};
pub use errors::{FeedError, FeedResult};
pub use traits::MarketFeed;
