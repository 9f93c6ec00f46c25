//! Core data types for the scanning pipeline.
//!
//! Symbols, normalized market events, detector state, candidate alerts and
//! the durable alert record all live here so every component speaks the same
//! vocabulary.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;

// =============================================================================
// Symbol
// =============================================================================

/// Case-normalized ticker symbol (e.g. "AAPL", "BRK.B").
///
/// Cheap to clone (`Arc<str>`), so it can be copied into every event and
/// alert without reallocating.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Symbol(Arc<str>);

impl Symbol {
    /// Maximum accepted ticker length
    pub const MAX_LEN: usize = 16;

    /// Parse and normalize a ticker: trimmed, uppercased, ASCII alphanumerics
    /// plus `.` and `-`.
    pub fn parse(raw: &str) -> Result<Self, AppError> {
        let normalized = raw.trim().to_ascii_uppercase();
        if normalized.is_empty() {
            return Err(AppError::InvalidSymbol("symbol cannot be empty".into()));
        }
        if normalized.len() > Self::MAX_LEN {
            return Err(AppError::InvalidSymbol(format!(
                "'{}' is longer than {} characters",
                normalized,
                Self::MAX_LEN
            )));
        }
        if !normalized
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-')
        {
            return Err(AppError::InvalidSymbol(format!(
                "'{}' contains unsupported characters",
                normalized
            )));
        }
        Ok(Self(Arc::from(normalized.as_str())))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Symbol {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Symbol {
    type Error = AppError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Symbol::parse(&value)
    }
}

impl From<Symbol> for String {
    fn from(symbol: Symbol) -> Self {
        symbol.0.to_string()
    }
}

// =============================================================================
// Market Events
// =============================================================================

/// Kind of normalized feed record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Trade,
    Quote,
    Bar,
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventType::Trade => write!(f, "trade"),
            EventType::Quote => write!(f, "quote"),
            EventType::Bar => write!(f, "bar"),
        }
    }
}

/// Top-of-book quote detail
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QuoteData {
    pub bid: f64,
    pub ask: f64,
}

/// OHLCV bar detail
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BarData {
    /// Bar timeframe label from the provider (e.g. "1Min")
    pub timeframe: String,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// One normalized tick/quote/trade/bar record.
///
/// `price` is optional at the type level: the feed mapper keeps records with
/// missing fields so that detectors can reject them individually.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketEvent {
    pub symbol: Symbol,
    pub event_type: EventType,
    /// Trade price, bar close, or quote mid
    pub price: Option<f64>,
    /// Trade size or bar volume
    pub size: Option<f64>,
    pub quote: Option<QuoteData>,
    pub bar: Option<BarData>,
    pub timestamp: DateTime<Utc>,
    /// Provider record as received
    pub raw: serde_json::Value,
}

impl MarketEvent {
    /// Build a trade event
    pub fn trade(symbol: Symbol, price: Option<f64>, size: Option<f64>, timestamp: DateTime<Utc>) -> Self {
        Self {
            symbol,
            event_type: EventType::Trade,
            price,
            size,
            quote: None,
            bar: None,
            timestamp,
            raw: serde_json::Value::Null,
        }
    }

    /// Build a quote event; `price` is the mid when both sides are positive
    pub fn quote(symbol: Symbol, bid: f64, ask: f64, timestamp: DateTime<Utc>) -> Self {
        let price = (bid > 0.0 && ask > 0.0).then(|| (bid + ask) / 2.0);
        Self {
            symbol,
            event_type: EventType::Quote,
            price,
            size: None,
            quote: Some(QuoteData { bid, ask }),
            bar: None,
            timestamp,
            raw: serde_json::Value::Null,
        }
    }

    /// Build a bar event; `price` is the close and `size` the volume
    pub fn bar(symbol: Symbol, bar: BarData, timestamp: DateTime<Utc>) -> Self {
        Self {
            symbol,
            event_type: EventType::Bar,
            price: Some(bar.close),
            size: Some(bar.volume),
            quote: None,
            bar: Some(bar),
            timestamp,
            raw: serde_json::Value::Null,
        }
    }

    /// Attach the provider record
    pub fn with_raw(mut self, raw: serde_json::Value) -> Self {
        self.raw = raw;
        self
    }
}

// =============================================================================
// Detector State
// =============================================================================

/// Per-(symbol, detector) mutable record, persisted between runs
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DetectorState {
    pub last_triggered_at: Option<DateTime<Utc>>,
    pub last_payload_hash: Option<String>,
    /// Detector-owned scratch document (rolling windows, last price, ...)
    #[serde(default)]
    pub memory: serde_json::Value,
}

// =============================================================================
// Alerts
// =============================================================================

/// Alert produced by a detector firing, before deduplication
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateAlert {
    pub symbol: Symbol,
    pub detector_name: Arc<str>,
    pub message: String,
    pub payload_hash: String,
    pub raw_event: serde_json::Value,
    pub generated_at: DateTime<Utc>,
}

impl CandidateAlert {
    pub fn dedup_key(&self) -> DedupKey {
        DedupKey {
            symbol: self.symbol.clone(),
            detector_name: self.detector_name.clone(),
            payload_hash: self.payload_hash.clone(),
        }
    }

    /// Text sent to the notification channel
    pub fn notification_text(&self) -> String {
        format!("[{}] {}: {}", self.symbol, self.detector_name, self.message)
    }
}

/// Deduplication identity of an alert
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DedupKey {
    pub symbol: Symbol,
    pub detector_name: Arc<str>,
    pub payload_hash: String,
}

impl fmt::Display for DedupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let short = self.payload_hash.get(..12).unwrap_or(&self.payload_hash);
        write!(f, "{}/{}/{}", self.symbol, self.detector_name, short)
    }
}

/// Outcome of a delivery attempt as stored in the alerts log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Delivered,
    DryRun,
    Failed,
}

/// Durable, append-only alert log entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRecord {
    pub id: Uuid,
    pub symbol: Symbol,
    pub detector_name: String,
    pub message: String,
    pub payload_hash: String,
    pub sent_at: DateTime<Utc>,
    pub raw_event: serde_json::Value,
    pub delivery: DeliveryStatus,
    pub attempts: u32,
    pub error: Option<String>,
    /// Dedup decision was made without the durable store
    pub best_effort: bool,
}

impl AlertRecord {
    /// Build a record for a candidate; delivery fields are filled in by the
    /// worker once the notifier returns.
    pub fn from_candidate(candidate: &CandidateAlert, sent_at: DateTime<Utc>, best_effort: bool) -> Self {
        Self {
            id: Uuid::new_v4(),
            symbol: candidate.symbol.clone(),
            detector_name: candidate.detector_name.to_string(),
            message: candidate.message.clone(),
            payload_hash: candidate.payload_hash.clone(),
            sent_at,
            raw_event: candidate.raw_event.clone(),
            delivery: DeliveryStatus::Failed,
            attempts: 0,
            error: None,
            best_effort,
        }
    }

    pub fn notification_text(&self) -> String {
        format!("[{}] {}: {}", self.symbol, self.detector_name, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_symbol_is_case_normalized() {
        let symbol = Symbol::parse("  aapl ").unwrap();
        assert_eq!(symbol.as_str(), "AAPL");
        assert_eq!(symbol, Symbol::parse("AAPL").unwrap());
    }

    #[test]
    fn test_symbol_accepts_class_shares() {
        assert_eq!(Symbol::parse("brk.b").unwrap().as_str(), "BRK.B");
    }

    #[test]
    fn test_symbol_rejects_empty_and_garbage() {
        assert!(Symbol::parse("   ").is_err());
        assert!(Symbol::parse("AA PL").is_err());
        assert!(Symbol::parse("ABCDEFGHIJKLMNOPQ").is_err());
    }

    #[test]
    fn test_symbol_deserialize_normalizes() {
        let symbol: Symbol = serde_json::from_str("\"msft\"").unwrap();
        assert_eq!(symbol.as_str(), "MSFT");
        assert!(serde_json::from_str::<Symbol>("\"\"").is_err());
    }

    #[test]
    fn test_quote_event_uses_mid_price() {
        let event = MarketEvent::quote(Symbol::parse("AAPL").unwrap(), 100.0, 101.0, Utc::now());
        assert_eq!(event.price, Some(100.5));
        assert_eq!(event.event_type, EventType::Quote);
    }

    #[test]
    fn test_quote_event_without_valid_side_has_no_price() {
        let event = MarketEvent::quote(Symbol::parse("AAPL").unwrap(), 0.0, 101.0, Utc::now());
        assert_eq!(event.price, None);
    }

    #[test]
    fn test_dedup_key_display_truncates_hash() {
        let key = DedupKey {
            symbol: Symbol::parse("AAPL").unwrap(),
            detector_name: Arc::from("price_cross"),
            payload_hash: "0123456789abcdef0123".to_string(),
        };
        assert_eq!(key.to_string(), "AAPL/price_cross/0123456789ab");
    }

    #[test]
    fn test_candidate_alert_json_shape() {
        let candidate = CandidateAlert {
            symbol: Symbol::parse("AAPL").unwrap(),
            detector_name: Arc::from("price_cross"),
            message: "Price crossed above 100: 101".to_string(),
            payload_hash: "abc".to_string(),
            raw_event: serde_json::json!({ "p": 101.0 }),
            generated_at: Utc::now(),
        };
        let json = serde_json::to_value(&candidate).unwrap();
        assert_eq!(json["detector_name"], "price_cross");

        let back: CandidateAlert = serde_json::from_value(json).unwrap();
        assert_eq!(back.dedup_key(), candidate.dedup_key());
    }

    #[test]
    fn test_detector_state_default_is_empty() {
        let state = DetectorState::default();
        assert!(state.last_triggered_at.is_none());
        assert!(state.memory.is_null());
    }
}
