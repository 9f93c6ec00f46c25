//! Outbound notification channel

use async_trait::async_trait;

use super::errors::NotifyResult;

/// A channel that can deliver one text message per call
#[async_trait]
pub trait NotificationTransport: Send + Sync {
    async fn send(&self, text: &str) -> NotifyResult<()>;

    /// Channel label for logs
    fn name(&self) -> &'static str;
}
