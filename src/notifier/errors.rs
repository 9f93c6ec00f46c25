//! Notification error types

use thiserror::Error;

use crate::core::retry::Retryable;

#[derive(Error, Debug)]
pub enum NotifyError {
    /// Transport failed or returned a non-success status; retryable
    #[error("Transport error: {0}")]
    Transport(String),

    /// HTTP client failure (connect, timeout, body)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Credentials or destination rejected; retrying will not help
    #[error("Rejected by channel: {0}")]
    Rejected(String),

    /// Required channel settings are missing
    #[error("Notifier not configured: {0}")]
    NotConfigured(String),
}

impl Retryable for NotifyError {
    fn is_retryable(&self) -> bool {
        matches!(self, NotifyError::Transport(_) | NotifyError::Http(_))
    }
}

pub type NotifyResult<T> = Result<T, NotifyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_classification() {
        assert!(NotifyError::Transport("502".into()).is_retryable());
        assert!(!NotifyError::Rejected("401 Unauthorized".into()).is_retryable());
        assert!(!NotifyError::NotConfigured("TELEGRAM_BOT_TOKEN".into()).is_retryable());
    }
}
