//! Application-wide error types using thiserror
//!
//! Component errors (`FeedError`, `StoreError`, `NotifyError`) convert into
//! `AppError` so fatal failures surface from `main` with their context.

use crate::feed::errors::FeedError;
use crate::notifier::errors::NotifyError;
use crate::storage::errors::StoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid symbol: {0}")]
    InvalidSymbol(String),

    #[error("Feed error: {0}")]
    Feed(#[from] FeedError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Notification error: {0}")]
    Notify(#[from] NotifyError),

    /// The stream cannot be (re)established; the process must exit non-zero
    #[error("Fatal subscription error in {component} for [{symbols}]: {cause}")]
    FatalSubscription {
        component: &'static str,
        symbols: String,
        cause: String,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AppError {
    /// Build a fatal subscription error from the symbols involved
    pub fn fatal_subscription(
        component: &'static str,
        symbols: &[crate::core::Symbol],
        cause: impl std::fmt::Display,
    ) -> Self {
        let symbols = symbols
            .iter()
            .map(|s| s.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        AppError::FatalSubscription {
            component,
            symbols,
            cause: cause.to_string(),
        }
    }
}

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;
