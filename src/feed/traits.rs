//! MarketFeed trait definition
//!
//! A feed owns one streaming connection. Events are delivered through a
//! channel taken once by the stream processor; the same receiver keeps
//! yielding events across reconnects.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, Notify};

use super::errors::{FeedError, FeedResult};
use crate::core::types::{MarketEvent, Symbol};

#[async_trait]
pub trait MarketFeed: Send + Sync {
    /// Open the connection and authenticate
    async fn connect(&mut self) -> FeedResult<()>;

    /// Close the connection; subscriptions are forgotten
    async fn disconnect(&mut self) -> FeedResult<()>;

    /// Reconnect without restoring subscriptions; the caller resubscribes
    async fn reconnect(&mut self) -> FeedResult<()>;

    /// Subscribe to every configured channel for these symbols
    async fn subscribe(&mut self, symbols: &[Symbol]) -> FeedResult<()>;

    async fn unsubscribe(&mut self, symbols: &[Symbol]) -> FeedResult<()>;

    fn is_connected(&self) -> bool;

    /// Event stream; `None` once taken
    fn take_event_receiver(&mut self) -> Option<mpsc::Receiver<MarketEvent>>;

    /// Notified when the connection ends without `disconnect()` being called
    fn disconnect_signal(&self) -> Arc<Notify>;

    /// A fatal provider error observed by the background reader, if any
    fn take_fatal_error(&mut self) -> Option<FeedError> {
        None
    }

    /// Provider label for logs
    fn name(&self) -> &'static str;
}
