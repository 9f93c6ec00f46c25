//! Alert delivery with bounded retry and dry-run

use std::sync::Arc;

use tracing::{error, info};

use super::errors::NotifyResult;
use super::traits::NotificationTransport;
use crate::core::retry::{retry_with_backoff, RetryPolicy};
use crate::core::types::{AlertRecord, DeliveryStatus};

/// Sends alert records over a transport
pub struct Notifier {
    /// `None` only for dry-run notifiers built without credentials
    transport: Option<Arc<dyn NotificationTransport>>,
    policy: RetryPolicy,
    dry_run: bool,
}

impl Notifier {
    pub fn new(transport: Arc<dyn NotificationTransport>, policy: RetryPolicy, dry_run: bool) -> Self {
        Self {
            transport: Some(transport),
            policy,
            dry_run,
        }
    }

    /// Dry-run notifier that needs no channel credentials
    pub fn dry_run_only() -> Self {
        Self {
            transport: None,
            policy: RetryPolicy::immediate(1),
            dry_run: true,
        }
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// Deliver a record, retrying transient failures per the policy
    pub async fn send(&self, record: &AlertRecord) -> NotifyResult<DeliveryStatus> {
        let mut record = record.clone();
        self.deliver(&mut record).await
    }

    /// Deliver and fill in `delivery`, `attempts` and `error` on the record
    pub async fn deliver(&self, record: &mut AlertRecord) -> NotifyResult<DeliveryStatus> {
        let text = record.notification_text();

        let transport = match (&self.transport, self.dry_run) {
            (Some(transport), false) => transport,
            _ => {
                info!(
                    alert_id = %record.id,
                    symbol = %record.symbol,
                    detector = %record.detector_name,
                    text = %text,
                    "[DRY-RUN] Alert not sent"
                );
                record.delivery = DeliveryStatus::DryRun;
                record.attempts = 0;
                record.error = None;
                return Ok(DeliveryStatus::DryRun);
            }
        };

        let outcome = retry_with_backoff(&self.policy, "notify", || transport.send(&text)).await;
        record.attempts = outcome.attempts;

        match outcome.result {
            Ok(()) => {
                info!(
                    alert_id = %record.id,
                    symbol = %record.symbol,
                    detector = %record.detector_name,
                    channel = transport.name(),
                    attempts = outcome.attempts,
                    "Alert delivered"
                );
                record.delivery = DeliveryStatus::Delivered;
                record.error = None;
                Ok(DeliveryStatus::Delivered)
            }
            Err(e) => {
                error!(
                    alert_id = %record.id,
                    symbol = %record.symbol,
                    detector = %record.detector_name,
                    channel = transport.name(),
                    attempts = outcome.attempts,
                    error = %e,
                    "Alert delivery failed"
                );
                record.delivery = DeliveryStatus::Failed;
                record.error = Some(e.to_string());
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{CandidateAlert, Symbol};
    use crate::notifier::errors::NotifyError;
    use crate::notifier::test_utils::RecordingTransport;
    use chrono::Utc;

    fn record() -> AlertRecord {
        let candidate = CandidateAlert {
            symbol: Symbol::parse("AAPL").unwrap(),
            detector_name: Arc::from("price_cross"),
            message: "Price crossed above 100: 101".into(),
            payload_hash: "abc".into(),
            raw_event: serde_json::Value::Null,
            generated_at: Utc::now(),
        };
        AlertRecord::from_candidate(&candidate, Utc::now(), false)
    }

    #[tokio::test]
    async fn test_delivers_on_first_attempt() {
        let transport = Arc::new(RecordingTransport::new());
        let notifier = Notifier::new(transport.clone(), RetryPolicy::immediate(3), false);

        let mut rec = record();
        let status = notifier.deliver(&mut rec).await.unwrap();
        assert_eq!(status, DeliveryStatus::Delivered);
        assert_eq!(rec.attempts, 1);
        assert_eq!(transport.sent(), vec!["[AAPL] price_cross: Price crossed above 100: 101"]);
    }

    #[tokio::test]
    async fn test_retries_then_succeeds() {
        let transport = Arc::new(RecordingTransport::failing_first(2));
        let notifier = Notifier::new(transport.clone(), RetryPolicy::immediate(3), false);

        let mut rec = record();
        assert_eq!(notifier.deliver(&mut rec).await.unwrap(), DeliveryStatus::Delivered);
        assert_eq!(rec.attempts, 3);
        assert_eq!(transport.calls(), 3);
    }

    #[tokio::test]
    async fn test_exhaustion_marks_record_failed() {
        let transport = Arc::new(RecordingTransport::failing_first(10));
        let notifier = Notifier::new(transport.clone(), RetryPolicy::immediate(3), false);

        let mut rec = record();
        let err = notifier.deliver(&mut rec).await.unwrap_err();
        assert!(matches!(err, NotifyError::Transport(_)));
        assert_eq!(rec.delivery, DeliveryStatus::Failed);
        assert_eq!(rec.attempts, 3);
        assert!(rec.error.as_deref().unwrap_or_default().contains("simulated outage"));
        assert!(transport.sent().is_empty());
    }

    #[tokio::test]
    async fn test_dry_run_skips_transport() {
        let transport = Arc::new(RecordingTransport::new());
        let notifier = Notifier::new(transport.clone(), RetryPolicy::immediate(3), true);

        let status = notifier.send(&record()).await.unwrap();
        assert_eq!(status, DeliveryStatus::DryRun);
        assert_eq!(transport.calls(), 0);
    }
}
