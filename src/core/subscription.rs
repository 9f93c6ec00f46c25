//! Subscription manager: keeps a bounded window of the watchlist subscribed
//!
//! The provider caps how many symbols one connection may stream. When the
//! watchlist is larger, the window rotates round-robin over it on a timer,
//! so every symbol is scanned within `ceil(W / M)` windows.
//!
//! ```text
//! Idle -> Subscribing -> Active <-> Rotating
//!              ^            |
//!              +-- disconnect
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, watch, Mutex};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use super::retry::{retry_with_backoff, RetryPolicy};
use super::types::Symbol;
use crate::config::SubscriptionConfig;
use crate::error::{AppError, Result};
use crate::feed::{FeedError, MarketFeed};
use crate::storage::WatchlistStore;

const COMPONENT: &str = "subscription_manager";

// =============================================================================
// Rotation planning
// =============================================================================

/// Round-robin window selection over an ordered watchlist
#[derive(Debug, Clone)]
pub struct RotationPlanner {
    watchlist: Vec<Symbol>,
    max: usize,
    cursor: usize,
}

impl RotationPlanner {
    pub fn new(watchlist: Vec<Symbol>, max: usize) -> Self {
        Self {
            watchlist,
            max: max.max(1),
            cursor: 0,
        }
    }

    pub fn watchlist(&self) -> &[Symbol] {
        &self.watchlist
    }

    /// More symbols than fit in one window
    pub fn needs_rotation(&self) -> bool {
        self.watchlist.len() > self.max
    }

    /// Window starting at the cursor, wrapping around the watchlist
    pub fn current_window(&self) -> Vec<Symbol> {
        let len = self.watchlist.len();
        (0..self.max.min(len))
            .map(|i| self.watchlist[(self.cursor + i) % len].clone())
            .collect()
    }

    /// Move the cursor by one window and return the new window.
    /// A watchlist that fits in one window never moves.
    pub fn advance(&mut self) -> Vec<Symbol> {
        if self.needs_rotation() {
            self.cursor = (self.cursor + self.max) % self.watchlist.len();
        }
        self.current_window()
    }

    /// Swap in a new watchlist, keeping the cursor when it is still in range
    pub fn replace_watchlist(&mut self, watchlist: Vec<Symbol>) {
        if self.cursor >= watchlist.len() {
            self.cursor = 0;
        }
        self.watchlist = watchlist;
    }
}

/// Symbols in `from` that are absent from `to`, in `from` order
fn missing_from(from: &[Symbol], to: &[Symbol]) -> Vec<Symbol> {
    from.iter().filter(|s| !to.contains(s)).cloned().collect()
}

// =============================================================================
// Subscription manager
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    Idle,
    Subscribing,
    Active,
    Rotating,
}

impl fmt::Display for SubscriptionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SubscriptionState::Idle => "idle",
            SubscriptionState::Subscribing => "subscribing",
            SubscriptionState::Active => "active",
            SubscriptionState::Rotating => "rotating",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy)]
enum FeedAction {
    Connect,
    Reconnect,
    Subscribe,
    Unsubscribe,
}

impl FeedAction {
    fn label(self) -> &'static str {
        match self {
            FeedAction::Connect => "feed_connect",
            FeedAction::Reconnect => "feed_reconnect",
            FeedAction::Subscribe => "feed_subscribe",
            FeedAction::Unsubscribe => "feed_unsubscribe",
        }
    }
}

pub struct SubscriptionManager<F: MarketFeed> {
    feed: Arc<Mutex<F>>,
    watchlist: Arc<dyn WatchlistStore>,
    watchlist_limit: usize,
    rotation_interval: Duration,
    policy: RetryPolicy,
    planner: RotationPlanner,
    window: Vec<Symbol>,
    state: watch::Sender<SubscriptionState>,
}

impl<F: MarketFeed + 'static> SubscriptionManager<F> {
    pub fn new(
        feed: Arc<Mutex<F>>,
        watchlist: Arc<dyn WatchlistStore>,
        config: &SubscriptionConfig,
        watchlist_limit: usize,
    ) -> Self {
        let (state, _) = watch::channel(SubscriptionState::Idle);
        Self {
            feed,
            watchlist,
            watchlist_limit,
            rotation_interval: Duration::from_secs(config.rotation_interval_sec),
            policy: RetryPolicy::new(config.max_attempts, config.initial_backoff_ms, config.max_backoff_ms),
            planner: RotationPlanner::new(Vec::new(), config.max_concurrent),
            window: Vec::new(),
            state,
        }
    }

    /// Override the retry schedule (tests use immediate retries)
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn state(&self) -> SubscriptionState {
        *self.state.borrow()
    }

    /// Observe state transitions
    pub fn state_receiver(&self) -> watch::Receiver<SubscriptionState> {
        self.state.subscribe()
    }

    /// Currently subscribed window
    pub fn window(&self) -> &[Symbol] {
        &self.window
    }

    fn set_state(&self, state: SubscriptionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!(from = %previous, to = %state, "Subscription state change");
        }
    }

    /// Run one feed operation under the retry policy
    ///
    /// A subscribe that finds the connection gone reconnects and subscribes
    /// all of `window`, since a fresh connection carries no subscriptions.
    async fn feed_op(&self, action: FeedAction, symbols: &[Symbol], window: &[Symbol]) -> Result<()> {
        let feed = &self.feed;
        let outcome = retry_with_backoff(&self.policy, action.label(), || async move {
            let mut feed = feed.lock().await;
            match action {
                FeedAction::Connect => feed.connect().await,
                FeedAction::Reconnect => feed.reconnect().await,
                FeedAction::Subscribe => {
                    if !feed.is_connected() {
                        warn!(window = window.len(), "Connection lost before subscribe, restoring full window");
                        feed.reconnect().await?;
                        return feed.subscribe(window).await;
                    }
                    feed.subscribe(symbols).await
                }
                // A dead connection has no subscriptions left to remove
                FeedAction::Unsubscribe if !feed.is_connected() => Ok(()),
                FeedAction::Unsubscribe => feed.unsubscribe(symbols).await,
            }
        })
        .await;

        outcome.result.map_err(|e: FeedError| {
            error!(
                action = action.label(),
                attempts = outcome.attempts,
                symbols = symbols.len(),
                error = %e,
                "Feed operation failed permanently"
            );
            AppError::fatal_subscription(COMPONENT, symbols, e)
        })
    }

    /// Load the watchlist, connect, and subscribe the first window
    pub async fn start(&mut self) -> Result<()> {
        self.set_state(SubscriptionState::Subscribing);

        let limit = Some(self.watchlist_limit);
        let store = &self.watchlist;
        let loaded = retry_with_backoff(&self.policy, "watchlist_load", || store.list_active(limit)).await;
        let symbols = loaded.result.map_err(|e| {
            AppError::fatal_subscription(COMPONENT, &[], format!("watchlist unavailable: {}", e))
        })?;
        if symbols.is_empty() {
            warn!("Watchlist is empty; nothing to subscribe until symbols are added");
        }
        self.planner.replace_watchlist(symbols);

        let connected = self.feed.lock().await.is_connected();
        if !connected {
            self.feed_op(FeedAction::Connect, &[], &[]).await?;
        }

        let window = self.planner.current_window();
        self.feed_op(FeedAction::Subscribe, &window, &window).await?;
        self.window = window;

        info!(
            watchlist = self.planner.watchlist().len(),
            window = self.window.len(),
            rotating = self.planner.needs_rotation(),
            "Subscriptions active"
        );
        self.set_state(SubscriptionState::Active);
        Ok(())
    }

    /// Re-read the watchlist. Returns whether it changed; a store failure
    /// keeps the previous list.
    pub async fn refresh_watchlist(&mut self) -> bool {
        let latest = match self.watchlist.list_active(Some(self.watchlist_limit)).await {
            Ok(latest) => latest,
            Err(e) => {
                warn!(error = %e, "Watchlist refresh failed, keeping previous list");
                return false;
            }
        };
        if latest.as_slice() == self.planner.watchlist() {
            return false;
        }

        let added = missing_from(&latest, self.planner.watchlist()).len();
        let removed = missing_from(self.planner.watchlist(), &latest).len();
        info!(added, removed, total = latest.len(), "Watchlist changed");
        self.planner.replace_watchlist(latest);
        true
    }

    /// Rotation tick: refresh the watchlist, then move to the next window
    pub async fn rotate(&mut self) -> Result<()> {
        let changed = self.refresh_watchlist().await;
        let next = if self.planner.needs_rotation() {
            self.planner.advance()
        } else if changed {
            self.planner.current_window()
        } else {
            debug!("Watchlist fits in one window, no rotation");
            return Ok(());
        };

        self.set_state(SubscriptionState::Rotating);
        self.apply_window(next).await?;
        self.set_state(SubscriptionState::Active);
        Ok(())
    }

    /// Unsubscribe what left the window, then subscribe what entered it
    async fn apply_window(&mut self, next: Vec<Symbol>) -> Result<()> {
        let removed = missing_from(&self.window, &next);
        let added = missing_from(&next, &self.window);

        let connected = self.feed.lock().await.is_connected();
        if !connected {
            warn!(window = next.len(), "Feed disconnected during rotation, subscribing full window");
            self.feed_op(FeedAction::Subscribe, &next, &next).await?;
            info!(window = next.len(), "Subscription window restored");
            self.window = next;
            return Ok(());
        }

        if !removed.is_empty() {
            self.feed_op(FeedAction::Unsubscribe, &removed, &next).await?;
        }
        if !added.is_empty() {
            self.feed_op(FeedAction::Subscribe, &added, &next).await?;
        }

        info!(
            removed = removed.len(),
            added = added.len(),
            window = next.len(),
            "Subscription window rotated"
        );
        self.window = next;
        Ok(())
    }

    /// Connection dropped: reconnect and resubscribe the same window
    pub async fn handle_disconnect(&mut self) -> Result<()> {
        if let Some(fatal) = self.feed.lock().await.take_fatal_error() {
            error!(error = %fatal, "Feed reported a fatal error");
            return Err(AppError::fatal_subscription(COMPONENT, &self.window, fatal));
        }

        warn!(window = self.window.len(), "Feed disconnected, resubscribing");
        self.set_state(SubscriptionState::Subscribing);
        self.feed_op(FeedAction::Reconnect, &self.window, &self.window).await?;
        self.feed_op(FeedAction::Subscribe, &self.window, &self.window).await?;
        self.set_state(SubscriptionState::Active);
        info!(window = self.window.len(), "Resubscribed after disconnect");
        Ok(())
    }

    /// Start, then rotate on the timer and recover from disconnects until
    /// shutdown. Returns an error only for unrecoverable failures.
    pub async fn run(mut self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        self.start().await?;

        let disconnected = self.feed.lock().await.disconnect_signal();
        let mut ticker = tokio::time::interval_at(
            tokio::time::Instant::now() + self.rotation_interval,
            self.rotation_interval,
        );
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(interval_sec = self.rotation_interval.as_secs(), "Subscription manager started");

        let result = loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.rotate().await {
                        break Err(e);
                    }
                }
                _ = disconnected.notified() => {
                    if let Err(e) = self.handle_disconnect().await {
                        break Err(e);
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Subscription manager shutting down");
                    break Ok(());
                }
            }
        };

        if let Err(e) = self.feed.lock().await.disconnect().await {
            warn!(error = %e, "Feed disconnect failed");
        }
        self.set_state(SubscriptionState::Idle);
        result
    }
}
