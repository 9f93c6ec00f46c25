//! Store doubles for tests
//!
//! `FlakyStore` wraps an `InMemoryStore` and can be switched to fail every
//! call with `StoreError::Unavailable`, simulating an unreachable database.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use super::errors::{StoreError, StoreResult};
use super::memory::InMemoryStore;
use super::traits::{AlertLogStore, DetectorStateStore, Store, WatchlistStore};
use crate::core::types::{AlertRecord, DedupKey, DetectorState, Symbol};

#[derive(Debug, Default)]
pub struct FlakyStore {
    pub inner: InMemoryStore,
    unavailable: AtomicBool,
    /// Calls to `try_insert_if_absent`, successful or not
    pub gate_calls: AtomicUsize,
    /// Calls to `upsert`, successful or not
    pub upsert_calls: AtomicUsize,
}

impl FlakyStore {
    pub fn new(inner: InMemoryStore) -> Self {
        Self {
            inner,
            ..Default::default()
        }
    }

    /// A store that fails every call until `set_available(true)`
    pub fn unavailable() -> Self {
        let store = Self::default();
        store.set_available(false);
        store
    }

    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    fn check(&self) -> StoreResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("connection refused".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl WatchlistStore for FlakyStore {
    async fn list_active(&self, limit: Option<usize>) -> StoreResult<Vec<Symbol>> {
        self.check()?;
        self.inner.list_active(limit).await
    }

    async fn add(&self, symbol: &Symbol) -> StoreResult<()> {
        self.check()?;
        self.inner.add(symbol).await
    }

    async fn remove(&self, symbol: &Symbol) -> StoreResult<()> {
        self.check()?;
        self.inner.remove(symbol).await
    }
}

#[async_trait]
impl DetectorStateStore for FlakyStore {
    async fn get(&self, symbol: &Symbol, detector: &str) -> StoreResult<Option<DetectorState>> {
        self.check()?;
        self.inner.get(symbol, detector).await
    }

    async fn upsert(&self, symbol: &Symbol, detector: &str, state: &DetectorState) -> StoreResult<()> {
        self.upsert_calls.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        self.inner.upsert(symbol, detector, state).await
    }
}

#[async_trait]
impl AlertLogStore for FlakyStore {
    async fn try_insert_if_absent(
        &self,
        key: &DedupKey,
        now: DateTime<Utc>,
        window: Duration,
    ) -> StoreResult<bool> {
        self.gate_calls.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        self.inner.try_insert_if_absent(key, now, window).await
    }

    async fn append(&self, record: &AlertRecord) -> StoreResult<()> {
        self.check()?;
        self.inner.append(record).await
    }
}

#[async_trait]
impl Store for FlakyStore {
    async fn ping(&self) -> StoreResult<()> {
        self.check()
    }

    fn backend_name(&self) -> &'static str {
        "flaky"
    }
}
