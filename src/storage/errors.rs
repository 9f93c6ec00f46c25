//! Persistence error types

use thiserror::Error;

use crate::core::retry::Retryable;

/// Errors returned by store backends
#[derive(Error, Debug)]
pub enum StoreError {
    /// Backend not reachable or returned a server-side failure; retryable
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// Transport-level failure talking to a remote backend
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Credentials rejected
    #[error("Store rejected credentials: {0}")]
    Unauthorized(String),

    /// Stored data could not be decoded
    #[error("Invalid stored data: {0}")]
    InvalidData(String),
}

impl StoreError {
    /// Whether a retry might succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_) | StoreError::Network(_))
    }
}

impl Retryable for StoreError {
    fn is_retryable(&self) -> bool {
        self.is_transient()
    }
}

/// Result type alias for store operations
pub type StoreResult<T> = Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(StoreError::Unavailable("503".into()).is_transient());
        assert!(!StoreError::Unauthorized("bad key".into()).is_transient());
        assert!(!StoreError::InvalidData("x".into()).is_transient());
    }

    #[test]
    fn test_display() {
        assert_eq!(
            StoreError::Unauthorized("401".into()).to_string(),
            "Store rejected credentials: 401"
        );
    }
}
