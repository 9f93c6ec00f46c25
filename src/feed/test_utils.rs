//! Scriptable feed for subscription and pipeline tests
//!
//! Records every subscribe/unsubscribe call and lets a test push events or
//! simulate a dropped connection.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, Notify};

use crate::core::types::{MarketEvent, Symbol};
use crate::feed::errors::{FeedError, FeedResult};
use crate::feed::traits::MarketFeed;

pub struct MockFeed {
    pub connected: bool,
    /// Currently subscribed symbols, in subscription order
    pub subscribed: Vec<Symbol>,
    pub subscribe_calls: Vec<Vec<Symbol>>,
    pub unsubscribe_calls: Vec<Vec<Symbol>>,
    pub connect_count: usize,
    pub reconnect_count: usize,
    /// Next N subscribe calls fail with a transient error
    pub fail_subscribes: usize,
    /// Next N connect/reconnect calls fail with a transient error
    pub fail_connects: usize,
    /// Connect fails with this rejection code
    pub reject_connect: Option<u16>,
    /// Returned once from `take_fatal_error`
    pub fatal_error: Option<FeedError>,
    event_tx: mpsc::Sender<MarketEvent>,
    event_rx: Option<mpsc::Receiver<MarketEvent>>,
    disconnect_notify: Arc<Notify>,
}

impl MockFeed {
    pub fn new() -> Self {
        let (event_tx, event_rx) = mpsc::channel(1024);
        Self {
            connected: false,
            subscribed: Vec::new(),
            subscribe_calls: Vec::new(),
            unsubscribe_calls: Vec::new(),
            connect_count: 0,
            reconnect_count: 0,
            fail_subscribes: 0,
            fail_connects: 0,
            reject_connect: None,
            fatal_error: None,
            event_tx,
            event_rx: Some(event_rx),
            disconnect_notify: Arc::new(Notify::new()),
        }
    }

    /// Sender feeding the receiver returned by `take_event_receiver`
    pub fn event_sender(&self) -> mpsc::Sender<MarketEvent> {
        self.event_tx.clone()
    }

    /// Drop the "connection": subscriptions are lost and the signal fires
    pub fn simulate_disconnect(&mut self) {
        self.connected = false;
        self.subscribed.clear();
        self.disconnect_notify.notify_one();
    }

    /// Subscribed set as plain strings, for assertions
    pub fn subscribed_names(&self) -> Vec<String> {
        self.subscribed.iter().map(|s| s.to_string()).collect()
    }

    fn try_connect(&mut self) -> FeedResult<()> {
        if let Some(code) = self.reject_connect {
            return Err(FeedError::Rejected {
                code,
                message: "mock rejection".into(),
            });
        }
        if self.fail_connects > 0 {
            self.fail_connects -= 1;
            return Err(FeedError::ConnectionFailed("mock connect failure".into()));
        }
        self.connected = true;
        Ok(())
    }
}

impl Default for MockFeed {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MarketFeed for MockFeed {
    async fn connect(&mut self) -> FeedResult<()> {
        self.connect_count += 1;
        self.try_connect()
    }

    async fn disconnect(&mut self) -> FeedResult<()> {
        self.connected = false;
        self.subscribed.clear();
        Ok(())
    }

    async fn reconnect(&mut self) -> FeedResult<()> {
        self.reconnect_count += 1;
        self.connected = false;
        self.subscribed.clear();
        self.try_connect()
    }

    async fn subscribe(&mut self, symbols: &[Symbol]) -> FeedResult<()> {
        if !self.connected {
            return Err(FeedError::subscription_failed(symbols, "not connected"));
        }
        if self.fail_subscribes > 0 {
            self.fail_subscribes -= 1;
            return Err(FeedError::subscription_failed(symbols, "mock subscribe failure"));
        }
        self.subscribe_calls.push(symbols.to_vec());
        for symbol in symbols {
            if !self.subscribed.contains(symbol) {
                self.subscribed.push(symbol.clone());
            }
        }
        Ok(())
    }

    async fn unsubscribe(&mut self, symbols: &[Symbol]) -> FeedResult<()> {
        if !self.connected {
            return Err(FeedError::subscription_failed(symbols, "not connected"));
        }
        self.unsubscribe_calls.push(symbols.to_vec());
        self.subscribed.retain(|s| !symbols.contains(s));
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn take_event_receiver(&mut self) -> Option<mpsc::Receiver<MarketEvent>> {
        self.event_rx.take()
    }

    fn disconnect_signal(&self) -> Arc<Notify> {
        Arc::clone(&self.disconnect_notify)
    }

    fn take_fatal_error(&mut self) -> Option<FeedError> {
        self.fatal_error.take()
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}
