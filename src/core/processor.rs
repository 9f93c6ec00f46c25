//! Stream processor: feed events -> detectors -> alert queue -> workers
//!
//! One ingestion loop evaluates events in arrival order and only ever
//! enqueues candidates; notification I/O happens on the worker pool. On
//! shutdown the queue is closed and drained for up to `drain_timeout`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use super::channels::{AlertQueue, PushOutcome};
use super::clock::SharedClock;
use super::dedup::{AlertDeduplicator, DedupDecision};
use super::registry::DetectorRegistry;
use super::types::{AlertRecord, CandidateAlert, DeliveryStatus, MarketEvent};
use crate::notifier::Notifier;
use crate::storage::AlertLogStore;

/// Pipeline counters
#[derive(Debug, Default)]
pub struct ProcessorStats {
    pub events: AtomicU64,
    pub candidates: AtomicU64,
    pub queue_drops: AtomicU64,
    pub suppressed: AtomicU64,
    pub delivered: AtomicU64,
    pub dry_run: AtomicU64,
    pub failed: AtomicU64,
    pub in_flight: AtomicU64,
}

/// Counter values at shutdown
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessorSummary {
    pub events: u64,
    pub candidates: u64,
    pub queue_drops: u64,
    pub suppressed: u64,
    pub delivered: u64,
    pub dry_run: u64,
    pub failed: u64,
    /// Alerts still queued or in flight when the drain timed out
    pub lost: u64,
    /// Detector states that could not be flushed
    pub unflushed_states: usize,
}

impl ProcessorStats {
    fn snapshot(&self) -> ProcessorSummary {
        ProcessorSummary {
            events: self.events.load(Ordering::Relaxed),
            candidates: self.candidates.load(Ordering::Relaxed),
            queue_drops: self.queue_drops.load(Ordering::Relaxed),
            suppressed: self.suppressed.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            dry_run: self.dry_run.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            ..Default::default()
        }
    }
}

/// Everything an alert worker needs, shared by `Arc`
struct AlertPipeline {
    dedup: Arc<AlertDeduplicator>,
    notifier: Arc<Notifier>,
    alerts_log: Arc<dyn AlertLogStore>,
    clock: SharedClock,
    stats: Arc<ProcessorStats>,
}

impl AlertPipeline {
    async fn handle(&self, candidate: CandidateAlert) {
        let best_effort = match self.dedup.check(&candidate).await {
            DedupDecision::Accept { best_effort } => best_effort,
            DedupDecision::Suppressed(reason) => {
                self.stats.suppressed.fetch_add(1, Ordering::Relaxed);
                debug!(key = %candidate.dedup_key(), ?reason, "Alert suppressed");
                return;
            }
        };

        let mut record = AlertRecord::from_candidate(&candidate, self.clock.now(), best_effort);
        // The outcome is recorded on `record`; the notifier already logged it
        if let Err(e) = self.notifier.deliver(&mut record).await {
            debug!(alert_id = %record.id, error = %e, "Delivery failed");
        }

        let counter = match record.delivery {
            DeliveryStatus::Delivered => &self.stats.delivered,
            DeliveryStatus::DryRun => &self.stats.dry_run,
            DeliveryStatus::Failed => &self.stats.failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);

        if let Err(e) = self.alerts_log.append(&record).await {
            warn!(alert_id = %record.id, error = %e, "Failed to append alert record");
        }
    }
}

pub struct StreamProcessor {
    registry: Arc<DetectorRegistry>,
    queue: Arc<AlertQueue<CandidateAlert>>,
    pipeline: Arc<AlertPipeline>,
    workers: usize,
    drain_timeout: Duration,
}

impl StreamProcessor {
    pub fn new(
        registry: Arc<DetectorRegistry>,
        dedup: Arc<AlertDeduplicator>,
        notifier: Arc<Notifier>,
        alerts_log: Arc<dyn AlertLogStore>,
        queue: Arc<AlertQueue<CandidateAlert>>,
        clock: SharedClock,
    ) -> Self {
        Self {
            registry,
            queue,
            pipeline: Arc::new(AlertPipeline {
                dedup,
                notifier,
                alerts_log,
                clock,
                stats: Arc::new(ProcessorStats::default()),
            }),
            workers: 4,
            drain_timeout: Duration::from_secs(10),
        }
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_drain_timeout(mut self, drain_timeout: Duration) -> Self {
        self.drain_timeout = drain_timeout;
        self
    }

    /// Live counters
    pub fn stats(&self) -> Arc<ProcessorStats> {
        Arc::clone(&self.pipeline.stats)
    }

    fn spawn_workers(&self, tracker: &TaskTracker) -> Vec<JoinHandle<()>> {
        (0..self.workers)
            .map(|worker| {
                let queue = Arc::clone(&self.queue);
                let pipeline = Arc::clone(&self.pipeline);
                tracker.spawn(async move {
                    debug!(worker, "Alert worker started");
                    while let Some(candidate) = queue.pop().await {
                        pipeline.stats.in_flight.fetch_add(1, Ordering::Relaxed);
                        pipeline.handle(candidate).await;
                        pipeline.stats.in_flight.fetch_sub(1, Ordering::Relaxed);
                    }
                    debug!(worker, "Alert worker stopped");
                })
            })
            .collect()
    }

    /// Evaluate one event and enqueue its candidates
    async fn ingest(&self, event: MarketEvent) {
        let stats = &self.pipeline.stats;
        stats.events.fetch_add(1, Ordering::Relaxed);

        for candidate in self.registry.process(&event).await {
            stats.candidates.fetch_add(1, Ordering::Relaxed);
            match self.queue.push(candidate).await {
                PushOutcome::Queued => {}
                PushOutcome::EvictedOldest(old) => {
                    stats.queue_drops.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        key = %old.dedup_key(),
                        dropped_total = self.queue.dropped_count(),
                        "Alert queue full, dropped oldest alert"
                    );
                }
                PushOutcome::Rejected(new) => {
                    stats.queue_drops.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        key = %new.dedup_key(),
                        dropped_total = self.queue.dropped_count(),
                        "Alert queue full, dropped new alert"
                    );
                }
            }
        }
    }

    /// Consume `events` until shutdown or end of stream, then drain.
    pub async fn run(
        &self,
        mut events: mpsc::Receiver<MarketEvent>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> ProcessorSummary {
        let tracker = TaskTracker::new();
        let handles = self.spawn_workers(&tracker);
        info!(workers = self.workers, "Stream processor started");

        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(event) => self.ingest(event).await,
                    None => {
                        warn!("Event stream ended");
                        break;
                    }
                },
                _ = shutdown_rx.recv() => {
                    info!("Stream processor shutting down");
                    break;
                }
            }
        }

        self.shutdown(tracker, handles).await
    }

    async fn shutdown(&self, tracker: TaskTracker, handles: Vec<JoinHandle<()>>) -> ProcessorSummary {
        self.queue.close();
        tracker.close();

        let pending = self.queue.len();
        if pending > 0 {
            info!(pending, timeout_sec = self.drain_timeout.as_secs(), "Draining alert queue");
        }

        let mut lost = 0;
        if tokio::time::timeout(self.drain_timeout, tracker.wait()).await.is_err() {
            let stats = &self.pipeline.stats;
            lost = self.queue.len() as u64 + stats.in_flight.load(Ordering::Relaxed);
            for handle in &handles {
                handle.abort();
            }
            error!(lost, "Drain timed out, aborted alert workers; alerts may be lost");
        }

        let unflushed_states = self.registry.flush().await;

        let summary = ProcessorSummary {
            lost,
            unflushed_states,
            ..self.pipeline.stats.snapshot()
        };
        info!(
            events = summary.events,
            candidates = summary.candidates,
            delivered = summary.delivered,
            dry_run = summary.dry_run,
            failed = summary.failed,
            suppressed = summary.suppressed,
            queue_drops = summary.queue_drops,
            lost = summary.lost,
            "Stream processor stopped"
        );
        summary
    }
}
