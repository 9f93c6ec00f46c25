//! Alpaca stream message types and mapping to `MarketEvent`
//!
//! Every frame is a JSON array of objects tagged by `T`:
//! `t` trade, `q` quote, `b` bar, plus the control messages `success`,
//! `subscription` and `error`.

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::core::types::{BarData, MarketEvent, Symbol};
use crate::feed::errors::{FeedError, FeedResult};

/// Timeframe assumed for bars that carry no `tfn`
pub const DEFAULT_BAR_TIMEFRAME: &str = "1Min";

/// Error codes after which reconnecting cannot succeed
/// (auth failed, auth timeout, symbol or connection limit, insufficient subscription)
pub const FATAL_ERROR_CODES: [u16; 6] = [401, 402, 404, 405, 406, 409];

// =============================================================================
// Wire Types
// =============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "T")]
pub enum AlpacaMessage {
    #[serde(rename = "t")]
    Trade(AlpacaTrade),
    #[serde(rename = "q")]
    Quote(AlpacaQuote),
    #[serde(rename = "b")]
    Bar(AlpacaBar),
    #[serde(rename = "success")]
    Success { msg: String },
    #[serde(rename = "subscription")]
    Subscription(AlpacaSubscription),
    #[serde(rename = "error")]
    Error { code: u16, msg: String },
    /// Daily/updated bars, statuses, corrections: not consumed
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AlpacaTrade {
    #[serde(rename = "S")]
    pub symbol: String,
    #[serde(rename = "p")]
    pub price: Option<f64>,
    #[serde(rename = "s")]
    pub size: Option<f64>,
    #[serde(rename = "t")]
    pub timestamp: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AlpacaQuote {
    #[serde(rename = "S")]
    pub symbol: String,
    #[serde(rename = "bp", default)]
    pub bid: f64,
    #[serde(rename = "ap", default)]
    pub ask: f64,
    #[serde(rename = "t")]
    pub timestamp: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AlpacaBar {
    #[serde(rename = "S")]
    pub symbol: String,
    #[serde(rename = "o")]
    pub open: f64,
    #[serde(rename = "h")]
    pub high: f64,
    #[serde(rename = "l")]
    pub low: f64,
    #[serde(rename = "c")]
    pub close: f64,
    #[serde(rename = "v")]
    pub volume: f64,
    #[serde(rename = "t")]
    pub timestamp: String,
    #[serde(rename = "tfn")]
    pub timeframe: Option<String>,
}

/// Current subscription set echoed by the server
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AlpacaSubscription {
    #[serde(default)]
    pub trades: Vec<String>,
    #[serde(default)]
    pub quotes: Vec<String>,
    #[serde(default)]
    pub bars: Vec<String>,
}

// =============================================================================
// Mapping
// =============================================================================

/// One decoded item of a stream frame
#[derive(Debug, Clone)]
pub enum Inbound {
    Event(MarketEvent),
    Success(String),
    Subscription(AlpacaSubscription),
    Error { code: u16, message: String },
}

impl Inbound {
    /// Provider error that should stop the process
    pub fn fatal_error(&self) -> Option<FeedError> {
        match self {
            Inbound::Error { code, message } if FATAL_ERROR_CODES.contains(code) => Some(FeedError::Rejected {
                code: *code,
                message: message.clone(),
            }),
            _ => None,
        }
    }
}

/// Decode a stream frame. Items that fail to decode are logged and skipped;
/// only a frame that is not JSON at all is an error.
pub fn map_message(text: &str) -> FeedResult<Vec<Inbound>> {
    let payload: serde_json::Value = serde_json::from_str(text)
        .map_err(|e| FeedError::InvalidResponse(format!("Invalid JSON frame: {}", e)))?;

    let items = match payload {
        serde_json::Value::Array(items) => items,
        single => vec![single],
    };

    let mut out = Vec::with_capacity(items.len());
    for item in items {
        match map_item(item) {
            Ok(Some(inbound)) => out.push(inbound),
            Ok(None) => {}
            Err(reason) => tracing::warn!(reason = %reason, "Skipping undecodable Alpaca record"),
        }
    }
    Ok(out)
}

fn map_item(item: serde_json::Value) -> Result<Option<Inbound>, String> {
    let message: AlpacaMessage = serde_json::from_value(item.clone()).map_err(|e| e.to_string())?;

    let inbound = match message {
        AlpacaMessage::Trade(t) => {
            let symbol = parse_symbol(&t.symbol)?;
            let ts = parse_timestamp(&t.timestamp)?;
            Inbound::Event(MarketEvent::trade(symbol, t.price, t.size, ts).with_raw(item))
        }
        AlpacaMessage::Quote(q) => {
            let symbol = parse_symbol(&q.symbol)?;
            let ts = parse_timestamp(&q.timestamp)?;
            Inbound::Event(MarketEvent::quote(symbol, q.bid, q.ask, ts).with_raw(item))
        }
        AlpacaMessage::Bar(b) => {
            let symbol = parse_symbol(&b.symbol)?;
            let ts = parse_timestamp(&b.timestamp)?;
            let bar = BarData {
                timeframe: b.timeframe.unwrap_or_else(|| DEFAULT_BAR_TIMEFRAME.to_string()),
                open: b.open,
                high: b.high,
                low: b.low,
                close: b.close,
                volume: b.volume,
            };
            Inbound::Event(MarketEvent::bar(symbol, bar, ts).with_raw(item))
        }
        AlpacaMessage::Success { msg } => Inbound::Success(msg),
        AlpacaMessage::Subscription(sub) => Inbound::Subscription(sub),
        AlpacaMessage::Error { code, msg } => Inbound::Error { code, message: msg },
        AlpacaMessage::Other => return Ok(None),
    };
    Ok(Some(inbound))
}

fn parse_symbol(raw: &str) -> Result<Symbol, String> {
    Symbol::parse(raw).map_err(|e| e.to_string())
}

/// RFC 3339 timestamp normalized to UTC
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| format!("bad timestamp '{}': {}", raw, e))
}
