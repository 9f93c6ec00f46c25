//! Upward threshold crossing on trade or bar prices.

use serde::{Deserialize, Serialize};

use super::traits::{load_memory, require_price, store_memory, Detector, Evaluation, EvaluationError};
use crate::core::types::{DetectorState, EventType, MarketEvent, Symbol};

pub const PRICE_CROSS_NAME: &str = "price_cross";

/// Constructor arguments (`detectors: [{name: price_cross, args: {...}}]`)
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct PriceCrossArgs {
    pub threshold: f64,
}

impl Default for PriceCrossArgs {
    fn default() -> Self {
        Self { threshold: 100.0 }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CrossMemory {
    last_price: Option<f64>,
}

/// Fires when price moves from at-or-below `threshold` to above it.
///
/// The first observation for a symbol counts as a crossing when it is
/// already above the threshold.
#[derive(Debug, Clone)]
pub struct PriceCrossDetector {
    threshold: f64,
}

impl PriceCrossDetector {
    pub fn new(args: PriceCrossArgs) -> Self {
        Self {
            threshold: args.threshold,
        }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }
}

impl Detector for PriceCrossDetector {
    fn name(&self) -> &'static str {
        PRICE_CROSS_NAME
    }

    fn evaluate(
        &self,
        symbol: &Symbol,
        event: &MarketEvent,
        state: &DetectorState,
    ) -> Result<Evaluation, EvaluationError> {
        if event.event_type == EventType::Quote {
            return Ok(Evaluation::quiet(state.clone()));
        }

        let price = require_price(PRICE_CROSS_NAME, symbol, event)?;
        let mut memory: CrossMemory = load_memory(PRICE_CROSS_NAME, symbol, state)?;

        let was_above = memory.last_price.is_some_and(|p| p > self.threshold);
        memory.last_price = Some(price);

        let mut new_state = state.clone();
        store_memory(&mut new_state, &memory);

        if was_above || price <= self.threshold {
            return Ok(Evaluation::quiet(new_state));
        }

        // Same threshold on the same symbol is one logical alert
        let payload = format!("{}|{}|{}", symbol, PRICE_CROSS_NAME, self.threshold);
        let message = format!("Price crossed above {}: {}", self.threshold, price);
        Ok(Evaluation::fired(message, &payload, new_state))
    }
}
