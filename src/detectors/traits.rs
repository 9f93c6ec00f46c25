//! Detector trait definition
//!
//! A detector is a pure evaluation unit: given a symbol, one market event and
//! its own prior state, it decides whether to fire and returns its next state.
//! It performs no I/O and never mutates shared structures, so evaluating the
//! same inputs twice yields the same output.

use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::core::types::{DetectorState, MarketEvent, Symbol};

/// Non-fatal evaluation failure; the caller skips this detector for this event
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EvaluationError {
    /// A field the detector needs is absent from the event
    #[error("{detector}: event for {symbol} is missing required field '{field}'")]
    MissingField {
        detector: &'static str,
        symbol: String,
        field: &'static str,
    },

    /// A field is present but unusable (NaN, negative price, ...)
    #[error("{detector}: invalid '{field}' for {symbol}: {reason}")]
    InvalidField {
        detector: &'static str,
        symbol: String,
        field: &'static str,
        reason: String,
    },

    /// Persisted detector memory could not be decoded
    #[error("{detector}: corrupt state for {symbol}: {reason}")]
    CorruptState {
        detector: &'static str,
        symbol: String,
        reason: String,
    },
}

/// Result of a single `evaluate` call
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub fired: bool,
    pub message: String,
    pub payload_hash: String,
    pub new_state: DetectorState,
}

impl Evaluation {
    /// Not fired; state carried forward
    pub fn quiet(new_state: DetectorState) -> Self {
        Self {
            fired: false,
            message: String::new(),
            payload_hash: String::new(),
            new_state,
        }
    }

    /// Fired with a message and the canonical payload it was derived from
    pub fn fired(message: String, payload: &str, new_state: DetectorState) -> Self {
        Self {
            fired: true,
            message,
            payload_hash: payload_hash(payload),
            new_state,
        }
    }
}

/// Common trait for all pattern detectors
///
/// # Example Implementation
///
/// ```ignore
/// struct AlwaysFires;
///
/// impl Detector for AlwaysFires {
///     fn name(&self) -> &'static str { "always" }
///     fn evaluate(&self, symbol: &Symbol, event: &MarketEvent, state: &DetectorState)
///         -> Result<Evaluation, EvaluationError>
///     {
///         Ok(Evaluation::fired("hit".into(), symbol.as_str(), state.clone()))
///     }
/// }
/// ```
pub trait Detector: Send + Sync {
    /// Stable identifier, also the persistence key
    fn name(&self) -> &'static str;

    /// Evaluate one event against the detector's prior state for `symbol`
    fn evaluate(
        &self,
        symbol: &Symbol,
        event: &MarketEvent,
        state: &DetectorState,
    ) -> Result<Evaluation, EvaluationError>;
}

/// Lowercase hex SHA-256 of a canonical payload string
pub fn payload_hash(payload: &str) -> String {
    hex::encode(Sha256::digest(payload.as_bytes()))
}

/// Decode typed detector memory from a state document; `null` gives the default
pub(crate) fn load_memory<T>(
    detector: &'static str,
    symbol: &Symbol,
    state: &DetectorState,
) -> Result<T, EvaluationError>
where
    T: DeserializeOwned + Default,
{
    if state.memory.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(state.memory.clone()).map_err(|e| EvaluationError::CorruptState {
        detector,
        symbol: symbol.to_string(),
        reason: e.to_string(),
    })
}

/// Encode typed detector memory back into the state document
pub(crate) fn store_memory<T: Serialize>(state: &mut DetectorState, memory: &T) {
    state.memory = serde_json::to_value(memory).unwrap_or(serde_json::Value::Null);
}

/// Require a finite, positive price from an event
pub(crate) fn require_price(
    detector: &'static str,
    symbol: &Symbol,
    event: &MarketEvent,
) -> Result<f64, EvaluationError> {
    let price = event.price.ok_or_else(|| EvaluationError::MissingField {
        detector,
        symbol: symbol.to_string(),
        field: "price",
    })?;
    if !price.is_finite() || price <= 0.0 {
        return Err(EvaluationError::InvalidField {
            detector,
            symbol: symbol.to_string(),
            field: "price",
            reason: format!("expected a positive finite number, got {}", price),
        });
    }
    Ok(price)
}
