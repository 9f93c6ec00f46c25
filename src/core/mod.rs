//! Core module - domain types, detector pipeline, dedup, subscriptions
//!
//! This module uses **explicit re-exports** instead of glob exports
//! (`pub use module::*`) so additions to the public API stay deliberate.
//!
//! ## Usage
//! Prefer importing from `crate::core`:
//! ```ignore
//! use crate::core::{Symbol, MarketEvent, DetectorRegistry};
//! ```

pub mod channels;
pub mod clock;
pub mod dedup;
pub mod processor;
pub mod registry;
pub mod retry;
pub mod runtime;
pub mod subscription;
pub mod types;

// Domain types
pub use types::{
    AlertRecord, BarData, CandidateAlert, DedupKey, DeliveryStatus, DetectorState, EventType, MarketEvent,
    QuoteData, Symbol,
};

pub use channels::{shutdown_channel, AlertQueue, Backpressure, PushOutcome};
pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use dedup::{AlertDeduplicator, DedupDecision, SuppressReason};
pub use processor::{ProcessorStats, ProcessorSummary, StreamProcessor};
pub use registry::DetectorRegistry;
pub use retry::{retry_with_backoff, Retried, RetryPolicy, Retryable};
pub use runtime::run_scanner;
pub use subscription::{RotationPlanner, SubscriptionManager, SubscriptionState};
