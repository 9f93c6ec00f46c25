//! Detector registry: runs every detector over each event with its state
//!
//! State for a (symbol, detector) key is loaded from the store the first
//! time the key is seen and written through after every change. Each key
//! has its own async mutex, so one symbol's evaluations are serialized while
//! different symbols can evaluate concurrently.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::clock::SharedClock;
use super::types::{CandidateAlert, DetectorState, MarketEvent, Symbol};
use crate::detectors::Detector;
use crate::storage::DetectorStateStore;

type StateKey = (Symbol, &'static str);

/// Loaded state for one key; `None` until first use
type Slot = Arc<Mutex<Option<DetectorState>>>;

pub struct DetectorRegistry {
    detectors: Vec<Arc<dyn Detector>>,
    store: Arc<dyn DetectorStateStore>,
    clock: SharedClock,
    slots: std::sync::Mutex<HashMap<StateKey, Slot>>,
    /// Keys whose last write-through failed
    dirty: Mutex<HashSet<StateKey>>,
}

impl DetectorRegistry {
    pub fn new(detectors: Vec<Arc<dyn Detector>>, store: Arc<dyn DetectorStateStore>, clock: SharedClock) -> Self {
        Self {
            detectors,
            store,
            clock,
            slots: std::sync::Mutex::new(HashMap::new()),
            dirty: Mutex::new(HashSet::new()),
        }
    }

    /// Detector names in evaluation order
    pub fn detector_names(&self) -> Vec<&'static str> {
        self.detectors.iter().map(|d| d.name()).collect()
    }

    fn slot(&self, key: &StateKey) -> Slot {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(slots.entry(key.clone()).or_default())
    }

    async fn load(&self, symbol: &Symbol, detector: &'static str) -> DetectorState {
        match self.store.get(symbol, detector).await {
            Ok(Some(state)) => state,
            Ok(None) => DetectorState::default(),
            Err(e) => {
                warn!(
                    symbol = %symbol,
                    detector,
                    error = %e,
                    "Detector state load failed, starting from default"
                );
                DetectorState::default()
            }
        }
    }

    /// Evaluate every detector, in registration order, against one event.
    ///
    /// A detector that rejects the event is logged and skipped; the others
    /// still run.
    pub async fn process(&self, event: &MarketEvent) -> Vec<CandidateAlert> {
        let mut candidates = Vec::new();

        for detector in &self.detectors {
            let name = detector.name();
            let key = (event.symbol.clone(), name);
            let slot = self.slot(&key);
            let mut guard = slot.lock().await;

            let state = match guard.take() {
                Some(state) => state,
                None => self.load(&event.symbol, name).await,
            };

            let evaluation = match detector.evaluate(&event.symbol, event, &state) {
                Ok(evaluation) => evaluation,
                Err(e) => {
                    warn!(
                        symbol = %event.symbol,
                        detector = name,
                        event_type = %event.event_type,
                        error = %e,
                        "Detector rejected event, skipping"
                    );
                    *guard = Some(state);
                    continue;
                }
            };

            let mut new_state = evaluation.new_state;
            if evaluation.fired {
                let now = self.clock.now();
                new_state.last_triggered_at = Some(now);
                new_state.last_payload_hash = Some(evaluation.payload_hash.clone());
                debug!(symbol = %event.symbol, detector = name, "Detector fired");
                candidates.push(CandidateAlert {
                    symbol: event.symbol.clone(),
                    detector_name: Arc::from(name),
                    message: evaluation.message,
                    payload_hash: evaluation.payload_hash,
                    raw_event: event.raw.clone(),
                    generated_at: now,
                });
            }

            if new_state != state {
                self.write_through(&key, &new_state).await;
            }
            *guard = Some(new_state);
        }

        candidates
    }

    async fn write_through(&self, key: &StateKey, state: &DetectorState) {
        match self.store.upsert(&key.0, key.1, state).await {
            Ok(()) => {
                self.dirty.lock().await.remove(key);
            }
            Err(e) => {
                warn!(
                    symbol = %key.0,
                    detector = key.1,
                    error = %e,
                    "Detector state write failed, will retry on flush"
                );
                self.dirty.lock().await.insert(key.clone());
            }
        }
    }

    /// Retry every failed write-through. Returns how many keys are still dirty.
    pub async fn flush(&self) -> usize {
        let pending: Vec<StateKey> = self.dirty.lock().await.iter().cloned().collect();
        if pending.is_empty() {
            return 0;
        }

        for key in pending {
            let slot = self.slot(&key);
            let guard = slot.lock().await;
            let Some(state) = guard.as_ref() else {
                self.dirty.lock().await.remove(&key);
                continue;
            };
            self.write_through(&key, state).await;
        }

        let remaining = self.dirty.lock().await.len();
        if remaining == 0 {
            info!("Detector state flushed");
        } else {
            warn!(remaining, "Detector state flush incomplete");
        }
        remaining
    }

    /// Keys waiting for a successful write
    pub async fn dirty_count(&self) -> usize {
        self.dirty.lock().await.len()
    }
}
