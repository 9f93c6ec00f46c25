//! Bull flag breakout detector (bars only).
//!
//! Pattern, read from the most recent `impulse_len + flag_len + 1` bars:
//!
//! 1. **Flagpole**: strong up move across `impulse_len` bars
//! 2. **Flag**: tight, flat-to-down consolidation across `flag_len` bars
//! 3. **Breakout**: the newest bar closes above the flag high plus a buffer,
//!    with volume confirmation when volume is usable
//!
//! The rolling bar window lives in `DetectorState::memory`, so the detector
//! itself holds configuration only.

use serde::{Deserialize, Serialize};

use super::traits::{load_memory, store_memory, Detector, Evaluation, EvaluationError};
use crate::core::types::{BarData, DetectorState, EventType, MarketEvent, Symbol};

pub const BULL_FLAG_NAME: &str = "bull_flag";

/// Constructor arguments; every field defaults
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct BullFlagArgs {
    pub max_bars: usize,
    pub impulse_len: usize,
    pub flag_len: usize,
    pub min_impulse_pct: f64,
    pub max_flag_retrace_pct: f64,
    pub max_flag_range_pct: f64,
    pub max_flag_slope_pct_per_bar: f64,
    pub breakout_buffer_pct: f64,
    pub min_breakout_volume_mult: f64,
    pub cooldown_bars: u64,
    /// Only evaluate bars with these timeframes (e.g. ["1Min", "5Min"])
    pub timeframe_allowlist: Option<Vec<String>>,
}

impl Default for BullFlagArgs {
    fn default() -> Self {
        Self {
            max_bars: 250,
            impulse_len: 12,
            flag_len: 10,
            min_impulse_pct: 2.0,
            max_flag_retrace_pct: 50.0,
            max_flag_range_pct: 1.2,
            max_flag_slope_pct_per_bar: 0.15,
            breakout_buffer_pct: 0.05,
            min_breakout_volume_mult: 1.5,
            cooldown_bars: 25,
            timeframe_allowlist: None,
        }
    }
}

impl BullFlagArgs {
    /// Reject window sizes that can never produce a pattern
    pub fn validate(&self) -> Result<(), String> {
        if self.impulse_len == 0 || self.flag_len == 0 {
            return Err("impulse_len and flag_len must be > 0".into());
        }
        let needed = self.impulse_len + self.flag_len + 1;
        if self.max_bars < needed {
            return Err(format!(
                "max_bars ({}) must be >= impulse_len + flag_len + 1 ({})",
                self.max_bars, needed
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct WindowBar {
    h: f64,
    l: f64,
    c: f64,
    v: f64,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct FlagMemory {
    bars: Vec<WindowBar>,
    /// Monotonic count of accepted bars
    bars_seen: u64,
    last_trigger_bar: u64,
}

/// Measurements of a confirmed breakout
#[derive(Debug, Clone, Copy)]
struct Breakout {
    impulse_pct: f64,
    retrace_pct: f64,
    flag_range_pct: f64,
    flag_high: f64,
    close: f64,
    threshold: f64,
}

#[derive(Debug, Clone)]
pub struct BullFlagDetector {
    args: BullFlagArgs,
}

impl BullFlagDetector {
    pub fn new(args: BullFlagArgs) -> Self {
        Self { args }
    }

    pub fn args(&self) -> &BullFlagArgs {
        &self.args
    }

    fn check_bar(symbol: &Symbol, bar: &BarData) -> Result<(), EvaluationError> {
        for (field, value) in [
            ("high", bar.high),
            ("low", bar.low),
            ("close", bar.close),
            ("volume", bar.volume),
        ] {
            if !value.is_finite() {
                return Err(EvaluationError::InvalidField {
                    detector: BULL_FLAG_NAME,
                    symbol: symbol.to_string(),
                    field,
                    reason: format!("non-finite value {}", value),
                });
            }
        }
        Ok(())
    }

    /// Run the pattern checks over a full window; `None` when any stage fails
    fn detect(&self, bars: &[WindowBar]) -> Option<Breakout> {
        let a = &self.args;
        let n = bars.len();
        let impulse = &bars[n - (a.flag_len + a.impulse_len + 1)..n - (a.flag_len + 1)];
        let flag = &bars[n - (a.flag_len + 1)..n - 1];
        let breakout = bars[n - 1];

        // 1) Flagpole
        let impulse_low = impulse.iter().map(|b| b.l).fold(f64::INFINITY, f64::min);
        let impulse_high = impulse.iter().map(|b| b.h).fold(f64::NEG_INFINITY, f64::max);
        if impulse_low <= 0.0 {
            return None;
        }
        let impulse_pct = (impulse_high - impulse_low) / impulse_low * 100.0;
        if impulse_pct < a.min_impulse_pct {
            return None;
        }

        // 2) Flag
        let flag_low = flag.iter().map(|b| b.l).fold(f64::INFINITY, f64::min);
        let flag_high = flag.iter().map(|b| b.h).fold(f64::NEG_INFINITY, f64::max);
        if flag_low <= 0.0 {
            return None;
        }
        let flag_range_pct = (flag_high - flag_low) / flag_low * 100.0;
        if flag_range_pct > a.max_flag_range_pct {
            return None;
        }

        let impulse_size = impulse_high - impulse_low;
        if impulse_size <= 0.0 {
            return None;
        }
        let retrace_pct = (impulse_high - flag_low) / impulse_size * 100.0;
        if retrace_pct > a.max_flag_retrace_pct {
            return None;
        }

        let first_close = flag[0].c;
        let last_close = flag[flag.len() - 1].c;
        if first_close <= 0.0 {
            return None;
        }
        let slope_total = (last_close - first_close) / first_close * 100.0;
        let slope_per_bar = slope_total / (flag.len().saturating_sub(1).max(1)) as f64;
        if slope_per_bar > a.max_flag_slope_pct_per_bar {
            return None;
        }

        // 3) Breakout
        let threshold = flag_high * (1.0 + a.breakout_buffer_pct / 100.0);
        if breakout.c <= threshold {
            return None;
        }

        let avg_flag_vol = flag.iter().map(|b| b.v).sum::<f64>() / flag.len() as f64;
        if avg_flag_vol > 0.0 && breakout.v > 0.0 && breakout.v < avg_flag_vol * a.min_breakout_volume_mult {
            return None;
        }

        Some(Breakout {
            impulse_pct,
            retrace_pct,
            flag_range_pct,
            flag_high,
            close: breakout.c,
            threshold,
        })
    }
}

impl Detector for BullFlagDetector {
    fn name(&self) -> &'static str {
        BULL_FLAG_NAME
    }

    fn evaluate(
        &self,
        symbol: &Symbol,
        event: &MarketEvent,
        state: &DetectorState,
    ) -> Result<Evaluation, EvaluationError> {
        if event.event_type != EventType::Bar {
            return Ok(Evaluation::quiet(state.clone()));
        }
        let bar = event.bar.as_ref().ok_or_else(|| EvaluationError::MissingField {
            detector: BULL_FLAG_NAME,
            symbol: symbol.to_string(),
            field: "bar",
        })?;

        if let Some(allow) = &self.args.timeframe_allowlist {
            if !allow.iter().any(|tf| tf == &bar.timeframe) {
                return Ok(Evaluation::quiet(state.clone()));
            }
        }
        Self::check_bar(symbol, bar)?;

        let mut memory: FlagMemory = load_memory(BULL_FLAG_NAME, symbol, state)?;
        memory.bars.push(WindowBar {
            h: bar.high,
            l: bar.low,
            c: bar.close,
            v: bar.volume,
        });
        if memory.bars.len() > self.args.max_bars {
            let excess = memory.bars.len() - self.args.max_bars;
            memory.bars.drain(..excess);
        }
        memory.bars_seen += 1;

        let needed = self.args.impulse_len + self.args.flag_len + 1;
        let cooling = memory.bars_seen - memory.last_trigger_bar < self.args.cooldown_bars;
        let found = if memory.bars.len() < needed || cooling {
            None
        } else {
            self.detect(&memory.bars)
        };

        let mut new_state = state.clone();
        let Some(b) = found else {
            store_memory(&mut new_state, &memory);
            return Ok(Evaluation::quiet(new_state));
        };

        memory.last_trigger_bar = memory.bars_seen;
        store_memory(&mut new_state, &memory);

        let message = format!(
            "Bull flag breakout on {}: impulse={:.2}% retrace={:.1}% flag_range={:.2}% close={:.4} > {:.4}",
            bar.timeframe, b.impulse_pct, b.retrace_pct, b.flag_range_pct, b.close, b.threshold
        );
        // Repeated breakouts of the same flag share one payload
        let payload = format!(
            "{}|{}|{}|{:.4}",
            symbol, BULL_FLAG_NAME, bar.timeframe, b.flag_high
        );
        Ok(Evaluation::fired(message, &payload, new_state))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn bar_event(high: f64, low: f64, close: f64, volume: f64) -> MarketEvent {
        let bar = BarData {
            timeframe: "1Min".into(),
            open: close,
            high,
            low,
            close,
            volume,
        };
        MarketEvent::bar(Symbol::parse("AAPL").unwrap(), bar, Utc::now())
    }

    /// Small window: 3 impulse bars, 3 flag bars, 1 breakout bar
    fn small_args() -> BullFlagArgs {
        BullFlagArgs {
            max_bars: 20,
            impulse_len: 3,
            flag_len: 3,
            cooldown_bars: 0,
            ..Default::default()
        }
    }

    /// Impulse 100 -> 105, flag holding 104.2..104.9, then a close of `breakout`
    fn pattern(breakout_close: f64, breakout_vol: f64) -> Vec<MarketEvent> {
        vec![
            bar_event(101.0, 100.0, 100.8, 1000.0),
            bar_event(103.0, 100.7, 102.9, 1000.0),
            bar_event(105.0, 102.8, 104.9, 1000.0),
            bar_event(104.9, 104.3, 104.6, 500.0),
            bar_event(104.8, 104.2, 104.5, 500.0),
            bar_event(104.7, 104.2, 104.4, 500.0),
            bar_event(breakout_close + 0.1, 104.5, breakout_close, breakout_vol),
        ]
    }

    fn run(det: &BullFlagDetector, events: &[MarketEvent]) -> Vec<Evaluation> {
        let symbol = Symbol::parse("AAPL").unwrap();
        let mut state = DetectorState::default();
        let mut out = Vec::new();
        for event in events {
            let eval = det.evaluate(&symbol, event, &state).unwrap();
            state = eval.new_state.clone();
            out.push(eval);
        }
        out
    }

    #[test]
    fn test_breakout_fires_once_window_is_full() {
        let det = BullFlagDetector::new(small_args());
        let evals = run(&det, &pattern(105.5, 2000.0));
        assert!(evals[..6].iter().all(|e| !e.fired));
        let last = evals.last().unwrap();
        assert!(last.fired, "expected breakout");
        assert!(last.message.starts_with("Bull flag breakout on 1Min: impulse=5.00%"));
    }

    #[test]
    fn test_close_inside_flag_does_not_fire() {
        let det = BullFlagDetector::new(small_args());
        let evals = run(&det, &pattern(104.8, 2000.0));
        assert!(!evals.last().unwrap().fired);
    }

    #[test]
    fn test_weak_breakout_volume_does_not_fire() {
        let det = BullFlagDetector::new(small_args());
        // 600 < 500 * 1.5
        let evals = run(&det, &pattern(105.5, 600.0));
        assert!(!evals.last().unwrap().fired);
    }

    #[test]
    fn test_zero_volume_skips_confirmation() {
        let det = BullFlagDetector::new(small_args());
        let evals = run(&det, &pattern(105.5, 0.0));
        assert!(evals.last().unwrap().fired);
    }

    #[test]
    fn test_cooldown_bars_suppress_refire() {
        let det = BullFlagDetector::new(BullFlagArgs {
            cooldown_bars: 5,
            ..small_args()
        });
        let mut events = pattern(105.5, 2000.0);
        // Pad so the first breakout is past the initial cooldown
        let mut padded = vec![bar_event(100.0, 99.5, 99.8, 1000.0); 5];
        padded.append(&mut events);
        padded.push(bar_event(106.0, 105.4, 105.9, 3000.0));

        let evals = run(&det, &padded);
        let fired: Vec<usize> = evals
            .iter()
            .enumerate()
            .filter(|(_, e)| e.fired)
            .map(|(i, _)| i)
            .collect();
        assert_eq!(fired, vec![11]);
    }

    #[test]
    fn test_window_is_capped_at_max_bars() {
        let det = BullFlagDetector::new(BullFlagArgs {
            max_bars: 8,
            ..small_args()
        });
        let events = vec![bar_event(10.0, 9.0, 9.5, 1.0); 30];
        let evals = run(&det, &events);
        let memory: FlagMemory = serde_json::from_value(evals.last().unwrap().new_state.memory.clone()).unwrap();
        assert_eq!(memory.bars.len(), 8);
        assert_eq!(memory.bars_seen, 30);
    }

    #[test]
    fn test_non_bar_events_are_ignored() {
        let det = BullFlagDetector::new(BullFlagArgs::default());
        let symbol = Symbol::parse("AAPL").unwrap();
        let event = MarketEvent::trade(symbol.clone(), Some(10.0), None, Utc::now());
        let eval = det.evaluate(&symbol, &event, &DetectorState::default()).unwrap();
        assert!(!eval.fired);
    }

    #[test]
    fn test_timeframe_allowlist_filters() {
        let det = BullFlagDetector::new(BullFlagArgs {
            timeframe_allowlist: Some(vec!["5Min".into()]),
            ..small_args()
        });
        let evals = run(&det, &pattern(105.5, 2000.0));
        assert!(evals.iter().all(|e| !e.fired && e.new_state.memory.is_null()));
    }

    #[test]
    fn test_nan_bar_is_invalid() {
        let det = BullFlagDetector::new(BullFlagArgs::default());
        let symbol = Symbol::parse("AAPL").unwrap();
        let event = bar_event(f64::NAN, 1.0, 1.0, 1.0);
        assert!(matches!(
            det.evaluate(&symbol, &event, &DetectorState::default()),
            Err(EvaluationError::InvalidField { field: "high", .. })
        ));
    }

    #[test]
    fn test_args_validate_window() {
        let bad = BullFlagArgs {
            max_bars: 5,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
        assert!(BullFlagArgs::default().validate().is_ok());
    }
}
