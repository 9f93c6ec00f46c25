//! In-process store
//!
//! Used by tests and as the fallback backend when no remote store is
//! configured. Nothing survives a restart.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;

use super::errors::StoreResult;
use super::traits::{AlertLogStore, DetectorStateStore, Store, WatchlistStore};
use crate::core::types::{AlertRecord, DedupKey, DetectorState, Symbol};

#[derive(Debug, Clone)]
struct WatchlistEntry {
    symbol: Symbol,
    active: bool,
}

#[derive(Debug, Default)]
pub struct InMemoryStore {
    /// Insertion-ordered; removed symbols keep their slot
    watchlist: RwLock<Vec<WatchlistEntry>>,
    states: RwLock<HashMap<(Symbol, String), DetectorState>>,
    gate: RwLock<HashMap<DedupKey, DateTime<Utc>>>,
    alerts: RwLock<Vec<AlertRecord>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the watchlist in order
    pub async fn with_symbols(symbols: &[&str]) -> StoreResult<Self> {
        let store = Self::new();
        for raw in symbols {
            let symbol = Symbol::parse(raw)
                .map_err(|e| super::errors::StoreError::InvalidData(e.to_string()))?;
            store.add(&symbol).await?;
        }
        Ok(store)
    }

    /// Snapshot of the alerts log
    pub async fn alerts(&self) -> Vec<AlertRecord> {
        self.alerts.read().await.clone()
    }
}

#[async_trait]
impl WatchlistStore for InMemoryStore {
    async fn list_active(&self, limit: Option<usize>) -> StoreResult<Vec<Symbol>> {
        let watchlist = self.watchlist.read().await;
        let active = watchlist.iter().filter(|e| e.active).map(|e| e.symbol.clone());
        Ok(match limit {
            Some(n) => active.take(n).collect(),
            None => active.collect(),
        })
    }

    async fn add(&self, symbol: &Symbol) -> StoreResult<()> {
        let mut watchlist = self.watchlist.write().await;
        match watchlist.iter_mut().find(|e| &e.symbol == symbol) {
            Some(entry) => entry.active = true,
            None => watchlist.push(WatchlistEntry {
                symbol: symbol.clone(),
                active: true,
            }),
        }
        Ok(())
    }

    async fn remove(&self, symbol: &Symbol) -> StoreResult<()> {
        let mut watchlist = self.watchlist.write().await;
        if let Some(entry) = watchlist.iter_mut().find(|e| &e.symbol == symbol) {
            entry.active = false;
        }
        Ok(())
    }
}

#[async_trait]
impl DetectorStateStore for InMemoryStore {
    async fn get(&self, symbol: &Symbol, detector: &str) -> StoreResult<Option<DetectorState>> {
        let states = self.states.read().await;
        Ok(states.get(&(symbol.clone(), detector.to_string())).cloned())
    }

    async fn upsert(&self, symbol: &Symbol, detector: &str, state: &DetectorState) -> StoreResult<()> {
        let mut states = self.states.write().await;
        states.insert((symbol.clone(), detector.to_string()), state.clone());
        Ok(())
    }
}

#[async_trait]
impl AlertLogStore for InMemoryStore {
    async fn try_insert_if_absent(
        &self,
        key: &DedupKey,
        now: DateTime<Utc>,
        window: Duration,
    ) -> StoreResult<bool> {
        // Check-and-set under one write lock
        let mut gate = self.gate.write().await;
        match gate.get(key) {
            Some(last) if now - *last < window => Ok(false),
            _ => {
                gate.insert(key.clone(), now);
                Ok(true)
            }
        }
    }

    async fn append(&self, record: &AlertRecord) -> StoreResult<()> {
        self.alerts.write().await.push(record.clone());
        Ok(())
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
