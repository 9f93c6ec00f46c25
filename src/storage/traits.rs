//! Persistence traits
//!
//! Three narrow traits, one per table family, so components depend only on
//! what they touch. Both backends implement all three; `Store` bundles them
//! for wiring.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use super::errors::StoreResult;
use crate::core::types::{AlertRecord, DedupKey, DetectorState, Symbol};

/// Ordered set of symbols to scan
#[async_trait]
pub trait WatchlistStore: Send + Sync {
    /// Active symbols in insertion order, truncated to `limit` when given
    async fn list_active(&self, limit: Option<usize>) -> StoreResult<Vec<Symbol>>;

    /// Add a symbol, or re-activate it if it was removed
    async fn add(&self, symbol: &Symbol) -> StoreResult<()>;

    /// Soft-disable a symbol; removing an absent symbol is a no-op
    async fn remove(&self, symbol: &Symbol) -> StoreResult<()>;
}

/// Per-(symbol, detector) state documents
#[async_trait]
pub trait DetectorStateStore: Send + Sync {
    async fn get(&self, symbol: &Symbol, detector: &str) -> StoreResult<Option<DetectorState>>;

    async fn upsert(&self, symbol: &Symbol, detector: &str, state: &DetectorState) -> StoreResult<()>;
}

/// Alert gate and append-only alerts log
#[async_trait]
pub trait AlertLogStore: Send + Sync {
    /// Atomically claim `key` unless it was claimed less than `window` ago.
    ///
    /// Returns `true` when the claim succeeded (caller may send), `false`
    /// when the key is still within its window.
    async fn try_insert_if_absent(
        &self,
        key: &DedupKey,
        now: DateTime<Utc>,
        window: Duration,
    ) -> StoreResult<bool>;

    async fn append(&self, record: &AlertRecord) -> StoreResult<()>;
}

/// Full backend: every table plus a liveness probe
#[async_trait]
pub trait Store: WatchlistStore + DetectorStateStore + AlertLogStore {
    /// Cheap round-trip proving the backend is reachable
    async fn ping(&self) -> StoreResult<()>;

    /// Backend label for logs
    fn backend_name(&self) -> &'static str;
}

/// Shared store handle
pub type SharedStore = Arc<dyn Store>;
