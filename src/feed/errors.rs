//! Market-data feed error types
//!
//! Transport failures are retried by the subscription manager; a provider
//! rejection (bad credentials, quota) is not.

use thiserror::Error;

use crate::core::retry::Retryable;

#[derive(Error, Debug)]
pub enum FeedError {
    /// Connection to the provider failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Subscribe or unsubscribe could not be sent
    #[error("Subscription failed for [{symbols}]: {reason}")]
    SubscriptionFailed { symbols: String, reason: String },

    /// Network operation timed out
    #[error("Network timeout after {0}ms")]
    NetworkTimeout(u64),

    /// Invalid or unexpected message from the provider
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// The provider refused us; reconnecting will not help
    #[error("Rejected by provider (code {code}): {message}")]
    Rejected { code: u16, message: String },

    /// Provider credentials are missing from the environment
    #[error("Feed not configured: {0}")]
    NotConfigured(String),

    /// WebSocket protocol error (boxed to reduce enum size)
    #[error("WebSocket error: {0}")]
    WebSocket(Box<tokio_tungstenite::tungstenite::Error>),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl FeedError {
    pub fn subscription_failed(symbols: &[crate::core::Symbol], reason: impl std::fmt::Display) -> Self {
        FeedError::SubscriptionFailed {
            symbols: symbols
                .iter()
                .map(|s| s.as_str())
                .collect::<Vec<_>>()
                .join(", "),
            reason: reason.to_string(),
        }
    }
}

impl Retryable for FeedError {
    fn is_retryable(&self) -> bool {
        !matches!(self, FeedError::Rejected { .. } | FeedError::NotConfigured(_))
    }
}

/// Result type alias for feed operations
pub type FeedResult<T> = std::result::Result<T, FeedError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Symbol;

    #[test]
    fn test_connection_failed_display() {
        let err = FeedError::ConnectionFailed("timeout".to_string());
        assert_eq!(err.to_string(), "Connection failed: timeout");
    }

    #[test]
    fn test_subscription_failed_lists_symbols() {
        let symbols = vec![Symbol::parse("aapl").unwrap(), Symbol::parse("MSFT").unwrap()];
        let err = FeedError::subscription_failed(&symbols, "socket closed");
        assert_eq!(err.to_string(), "Subscription failed for [AAPL, MSFT]: socket closed");
    }

    #[test]
    fn test_network_timeout_display() {
        assert_eq!(FeedError::NetworkTimeout(5000).to_string(), "Network timeout after 5000ms");
    }

    #[test]
    fn test_rejection_is_not_retryable() {
        let rejected = FeedError::Rejected {
            code: 402,
            message: "auth failed".into(),
        };
        assert!(!rejected.is_retryable());
        assert!(FeedError::NetworkTimeout(10).is_retryable());
        assert!(FeedError::ConnectionFailed("reset".into()).is_retryable());
    }
}
