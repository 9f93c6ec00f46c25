//! Alert deduplication with a cooldown window
//!
//! Two layers: an in-process cache that answers repeat keys without I/O, and
//! the durable alert gate (`AlertLogStore::try_insert_if_absent`) that keeps
//! separate processes from double-sending. A key is reserved in the cache
//! before the store call, so concurrent workers never both accept it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::clock::SharedClock;
use super::types::{CandidateAlert, DedupKey};
use crate::storage::AlertLogStore;

/// Cache size above which expired entries are pruned
const PRUNE_THRESHOLD: usize = 10_000;

/// Why a candidate was not sent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuppressReason {
    /// Sent (or reserved) by this process within the cooldown
    Cooldown,
    /// The durable gate already holds the key within the cooldown
    Duplicate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupDecision {
    /// Send it. `best_effort` means the durable gate was unreachable and
    /// only the in-process cache vouches for uniqueness.
    Accept { best_effort: bool },
    Suppressed(SuppressReason),
}

impl DedupDecision {
    pub fn is_accepted(&self) -> bool {
        matches!(self, DedupDecision::Accept { .. })
    }
}

#[derive(Debug, Clone, Copy)]
struct CacheEntry {
    at: DateTime<Utc>,
    reservation: u64,
    /// Accepted while the gate was unreachable; held for the process lifetime
    pinned: bool,
}

impl CacheEntry {
    fn blocks(&self, now: DateTime<Utc>, cooldown: Duration) -> bool {
        self.pinned || now - self.at < cooldown
    }
}

pub struct AlertDeduplicator {
    gate: Arc<dyn AlertLogStore>,
    clock: SharedClock,
    cooldown: Duration,
    cache: Mutex<HashMap<DedupKey, CacheEntry>>,
    next_reservation: AtomicU64,
}

impl AlertDeduplicator {
    pub fn new(gate: Arc<dyn AlertLogStore>, clock: SharedClock, cooldown: Duration) -> Self {
        Self {
            gate,
            clock,
            cooldown,
            cache: Mutex::new(HashMap::new()),
            next_reservation: AtomicU64::new(1),
        }
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    /// Whether `candidate` may be sent now
    pub async fn should_send(&self, candidate: &CandidateAlert) -> bool {
        self.check(candidate).await.is_accepted()
    }

    /// Decide and, on acceptance, claim the key for the cooldown window
    pub async fn check(&self, candidate: &CandidateAlert) -> DedupDecision {
        let key = candidate.dedup_key();
        let now = self.clock.now();

        let reservation = {
            let mut cache = self.cache.lock().await;
            if let Some(entry) = cache.get(&key) {
                if entry.blocks(now, self.cooldown) {
                    debug!(key = %key, pinned = entry.pinned, "Suppressed: within cooldown");
                    return DedupDecision::Suppressed(SuppressReason::Cooldown);
                }
            }
            if cache.len() >= PRUNE_THRESHOLD {
                let cooldown = self.cooldown;
                cache.retain(|_, e| e.blocks(now, cooldown));
            }
            let reservation = self.next_reservation.fetch_add(1, Ordering::Relaxed);
            cache.insert(
                key.clone(),
                CacheEntry {
                    at: now,
                    reservation,
                    pinned: false,
                },
            );
            reservation
        };

        match self.gate.try_insert_if_absent(&key, now, self.cooldown).await {
            Ok(true) => DedupDecision::Accept { best_effort: false },
            Ok(false) => {
                self.release(&key, reservation).await;
                debug!(key = %key, "Suppressed: duplicate in alert gate");
                DedupDecision::Suppressed(SuppressReason::Duplicate)
            }
            Err(e) => {
                warn!(
                    key = %key,
                    error = %e,
                    "Alert gate unavailable, accepting on in-memory dedup only"
                );
                self.pin(&key, reservation).await;
                DedupDecision::Accept { best_effort: true }
            }
        }
    }

    /// Drop our reservation unless a later one replaced it
    async fn release(&self, key: &DedupKey, reservation: u64) {
        let mut cache = self.cache.lock().await;
        if cache.get(key).map(|e| e.reservation) == Some(reservation) {
            cache.remove(key);
        }
    }

    /// Keep a best-effort key suppressed until the process exits: without
    /// the gate, the cache is the only record that it was sent.
    async fn pin(&self, key: &DedupKey, reservation: u64) {
        let mut cache = self.cache.lock().await;
        if let Some(entry) = cache.get_mut(key) {
            if entry.reservation == reservation {
                entry.pinned = true;
            }
        }
    }

    /// Keys currently held in the cache
    pub async fn cached_keys(&self) -> usize {
        self.cache.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::clock::{Clock, ManualClock};
    use crate::core::types::Symbol;
    use crate::storage::test_utils::FlakyStore;
    use crate::storage::InMemoryStore;
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 4, 14, 30, 0).unwrap()
    }

    fn candidate(symbol: &str, payload_hash: &str) -> CandidateAlert {
        CandidateAlert {
            symbol: Symbol::parse(symbol).unwrap(),
            detector_name: Arc::from("price_cross"),
            message: "Price crossed above 100: 101".into(),
            payload_hash: payload_hash.into(),
            raw_event: serde_json::Value::Null,
            generated_at: start(),
        }
    }

    fn dedup(gate: Arc<dyn AlertLogStore>, clock: Arc<ManualClock>) -> AlertDeduplicator {
        AlertDeduplicator::new(gate, clock, Duration::seconds(300))
    }

    #[tokio::test]
    async fn test_cooldown_sequence_0_150_301() {
        let clock = Arc::new(ManualClock::new(start()));
        let dedup = dedup(Arc::new(InMemoryStore::new()), clock.clone());
        let c = candidate("AAPL", "h1");

        assert!(dedup.should_send(&c).await);
        clock.advance(Duration::seconds(150));
        assert_eq!(
            dedup.check(&c).await,
            DedupDecision::Suppressed(SuppressReason::Cooldown)
        );
        clock.advance(Duration::seconds(151));
        assert_eq!(dedup.check(&c).await, DedupDecision::Accept { best_effort: false });
    }

    #[tokio::test]
    async fn test_exact_cooldown_boundary_accepts() {
        let clock = Arc::new(ManualClock::new(start()));
        let dedup = dedup(Arc::new(InMemoryStore::new()), clock.clone());
        let c = candidate("AAPL", "h1");

        assert!(dedup.should_send(&c).await);
        clock.advance(Duration::seconds(300));
        assert!(dedup.should_send(&c).await);
    }

    #[tokio::test]
    async fn test_distinct_payloads_are_independent() {
        let clock = Arc::new(ManualClock::new(start()));
        let dedup = dedup(Arc::new(InMemoryStore::new()), clock);

        assert!(dedup.should_send(&candidate("AAPL", "h1")).await);
        assert!(dedup.should_send(&candidate("AAPL", "h2")).await);
        assert!(dedup.should_send(&candidate("MSFT", "h1")).await);
        assert!(!dedup.should_send(&candidate("AAPL", "h1")).await);
    }

    #[tokio::test]
    async fn test_gate_conflict_is_duplicate_and_releases_reservation() {
        let clock = Arc::new(ManualClock::new(start()));
        let store = Arc::new(InMemoryStore::new());
        let c = candidate("AAPL", "h1");

        // Another process claimed the key
        store
            .try_insert_if_absent(&c.dedup_key(), start(), Duration::seconds(300))
            .await
            .unwrap();

        let dedup = dedup(store, clock);
        assert_eq!(
            dedup.check(&c).await,
            DedupDecision::Suppressed(SuppressReason::Duplicate)
        );
        assert_eq!(dedup.cached_keys().await, 0);
    }

    #[tokio::test]
    async fn test_store_unreachable_accepts_once_best_effort() {
        let clock = Arc::new(ManualClock::new(start()));
        let store = Arc::new(FlakyStore::unavailable());
        let dedup = dedup(store.clone(), clock.clone());
        let c = candidate("AAPL", "h1");

        assert_eq!(dedup.check(&c).await, DedupDecision::Accept { best_effort: true });
        clock.advance(Duration::seconds(10));
        assert!(!dedup.should_send(&c).await);
        // The second check never reached the store
        assert_eq!(store.gate_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_best_effort_key_stays_suppressed_past_cooldown() {
        let clock = Arc::new(ManualClock::new(start()));
        let store = Arc::new(FlakyStore::unavailable());
        let dedup = dedup(store.clone(), clock.clone());
        let c = candidate("AAPL", "h1");

        assert_eq!(dedup.check(&c).await, DedupDecision::Accept { best_effort: true });
        clock.advance(Duration::seconds(301));
        assert_eq!(
            dedup.check(&c).await,
            DedupDecision::Suppressed(SuppressReason::Cooldown)
        );
        clock.advance(Duration::hours(24));
        assert!(!dedup.should_send(&c).await);
        assert_eq!(store.gate_calls.load(Ordering::SeqCst), 1);

        // Once the gate is back, other keys go through it normally
        store.set_available(true);
        assert_eq!(
            dedup.check(&candidate("MSFT", "h1")).await,
            DedupDecision::Accept { best_effort: false }
        );
    }

    #[tokio::test]
    async fn test_concurrent_checks_accept_exactly_one() {
        let clock = Arc::new(ManualClock::new(start()));
        let dedup = Arc::new(dedup(Arc::new(FlakyStore::unavailable()), clock));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let dedup = dedup.clone();
            handles.push(tokio::spawn(async move {
                dedup.should_send(&candidate("AAPL", "h1")).await
            }));
        }
        let mut accepted = 0;
        for h in handles {
            if h.await.unwrap() {
                accepted += 1;
            }
        }
        assert_eq!(accepted, 1);
    }

    proptest! {
        /// Accepted sends of one key are always at least a cooldown apart
        #[test]
        fn prop_accepted_sends_respect_cooldown(gaps in proptest::collection::vec(0i64..700, 1..40)) {
            let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
            rt.block_on(async {
                let clock = Arc::new(ManualClock::new(start()));
                let dedup = dedup(Arc::new(InMemoryStore::new()), clock.clone());
                let c = candidate("AAPL", "h1");

                let mut last_accepted: Option<DateTime<Utc>> = None;
                for gap in gaps {
                    clock.advance(Duration::seconds(gap));
                    let now = clock.now();
                    let accepted = dedup.should_send(&c).await;
                    let expected = last_accepted.map_or(true, |t| now - t >= Duration::seconds(300));
                    prop_assert_eq!(accepted, expected);
                    if accepted {
                        last_accepted = Some(now);
                    }
                }
                Ok(())
            })?;
        }
    }
}
