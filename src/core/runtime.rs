//! Scanner runtime: subscription manager and stream processor side by side
//!
//! Both tasks listen to the same shutdown broadcast. A fatal subscription
//! error triggers that broadcast itself, so the processor still drains and
//! flushes before the error is returned.

use tokio::sync::{broadcast, mpsc};
use tracing::{error, info};

use super::processor::{ProcessorSummary, StreamProcessor};
use super::subscription::SubscriptionManager;
use super::types::MarketEvent;
use crate::error::{AppError, Result};
use crate::feed::MarketFeed;

/// Run until shutdown or a fatal subscription error
pub async fn run_scanner<F>(
    manager: SubscriptionManager<F>,
    processor: StreamProcessor,
    events: mpsc::Receiver<MarketEvent>,
    shutdown_tx: broadcast::Sender<()>,
) -> Result<ProcessorSummary>
where
    F: MarketFeed + 'static,
{
    let processor_rx = shutdown_tx.subscribe();
    let processor_task = tokio::spawn(async move { processor.run(events, processor_rx).await });
    let manager_task = tokio::spawn(manager.run(shutdown_tx.subscribe()));

    let manager_result = match manager_task.await {
        Ok(result) => result,
        Err(e) => Err(AppError::fatal_subscription("runtime", &[], format!("manager task failed: {}", e))),
    };

    if let Err(e) = &manager_result {
        error!(error = %e, "Subscription manager stopped with a fatal error, shutting down");
        let _ = shutdown_tx.send(());
    }

    let summary = processor_task
        .await
        .map_err(|e| AppError::fatal_subscription("runtime", &[], format!("processor task failed: {}", e)))?;

    manager_result?;
    info!(delivered = summary.delivered, lost = summary.lost, "Scanner stopped cleanly");
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SubscriptionConfig;
    use crate::core::channels::{AlertQueue, Backpressure};
    use crate::core::clock::{SharedClock, SystemClock};
    use crate::core::dedup::AlertDeduplicator;
    use crate::core::registry::DetectorRegistry;
    use crate::core::retry::RetryPolicy;
    use crate::detectors::{build_detectors, DetectorSpec};
    use crate::feed::test_utils::MockFeed;
    use crate::notifier::Notifier;
    use crate::storage::InMemoryStore;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::Mutex;

    fn processor(store: Arc<InMemoryStore>) -> StreamProcessor {
        let clock: SharedClock = Arc::new(SystemClock);
        let detectors = build_detectors(&[DetectorSpec::Name("price_cross".into())]).unwrap();
        StreamProcessor::new(
            Arc::new(DetectorRegistry::new(detectors, store.clone(), clock.clone())),
            Arc::new(AlertDeduplicator::new(store.clone(), clock.clone(), chrono::Duration::seconds(300))),
            Arc::new(Notifier::dry_run_only()),
            store,
            Arc::new(AlertQueue::new(8, Backpressure::DropOldest)),
            clock,
        )
        .with_drain_timeout(Duration::from_secs(1))
    }

    #[tokio::test]
    async fn test_fatal_subscription_error_stops_everything() {
        let store = Arc::new(InMemoryStore::with_symbols(&["AAPL"]).await.unwrap());
        let mut feed = MockFeed::new();
        feed.reject_connect = Some(402);
        let events = feed.take_event_receiver().unwrap();
        let feed = Arc::new(Mutex::new(feed));

        let manager = SubscriptionManager::new(feed, store.clone(), &SubscriptionConfig::default(), 200)
            .with_retry_policy(RetryPolicy::immediate(2));
        let shutdown_tx = broadcast::channel(1).0;

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            run_scanner(manager, processor(store), events, shutdown_tx),
        )
        .await
        .unwrap();
        assert!(matches!(result, Err(AppError::FatalSubscription { .. })));
    }

    #[tokio::test]
    async fn test_shutdown_returns_summary() {
        let store = Arc::new(InMemoryStore::with_symbols(&["AAPL"]).await.unwrap());
        let mut feed = MockFeed::new();
        let events = feed.take_event_receiver().unwrap();
        let sender = feed.event_sender();
        let feed = Arc::new(Mutex::new(feed));

        let manager = SubscriptionManager::new(feed.clone(), store.clone(), &SubscriptionConfig::default(), 200);
        let shutdown_tx = broadcast::channel(1).0;
        let run = tokio::spawn(run_scanner(manager, processor(store.clone()), events, shutdown_tx.clone()));

        sender
            .send(MarketEvent::trade(
                crate::core::types::Symbol::parse("AAPL").unwrap(),
                Some(101.0),
                Some(1.0),
                chrono::Utc::now(),
            ))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        shutdown_tx.send(()).unwrap();

        let summary = run.await.unwrap().unwrap();
        assert_eq!(summary.dry_run, 1);
        assert_eq!(store.alerts().await.len(), 1);
        assert!(!feed.lock().await.is_connected());
    }
}
