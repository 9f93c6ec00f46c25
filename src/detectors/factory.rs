//! Detector factory
//!
//! Builds the ordered detector list from config entries. An entry is either a
//! bare name (`- bull_flag`) or a name with constructor arguments
//! (`- {name: price_cross, args: {threshold: 250}}`).

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::bull_flag::{BullFlagArgs, BullFlagDetector, BULL_FLAG_NAME};
use super::price_cross::{PriceCrossArgs, PriceCrossDetector, PRICE_CROSS_NAME};
use super::traits::Detector;
use crate::error::{AppError, Result};

/// All registered detector names.
pub const SUPPORTED_DETECTORS: &[&str] = &[PRICE_CROSS_NAME, BULL_FLAG_NAME];

/// One `detectors:` config entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DetectorSpec {
    Name(String),
    WithArgs {
        name: String,
        #[serde(default)]
        args: serde_json::Value,
    },
}

impl DetectorSpec {
    pub fn name(&self) -> &str {
        match self {
            DetectorSpec::Name(name) => name,
            DetectorSpec::WithArgs { name, .. } => name,
        }
    }

    fn args(&self) -> serde_json::Value {
        match self {
            DetectorSpec::Name(_) => serde_json::Value::Null,
            DetectorSpec::WithArgs { args, .. } => args.clone(),
        }
    }
}

fn parse_args<T>(name: &str, args: serde_json::Value) -> Result<T>
where
    T: for<'de> Deserialize<'de> + Default,
{
    if args.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(args)
        .map_err(|e| AppError::Config(format!("Invalid args for detector '{}': {}", name, e)))
}

/// Create one detector from its config entry.
pub fn create_detector(spec: &DetectorSpec) -> Result<Arc<dyn Detector>> {
    let name = spec.name();
    match name {
        // Legacy alias kept for existing configs
        PRICE_CROSS_NAME | "example_price_cross" => {
            let args: PriceCrossArgs = parse_args(name, spec.args())?;
            if !args.threshold.is_finite() {
                return Err(AppError::Config(format!(
                    "Invalid args for detector '{}': threshold must be finite",
                    name
                )));
            }
            Ok(Arc::new(PriceCrossDetector::new(args)))
        }
        BULL_FLAG_NAME => {
            let args: BullFlagArgs = parse_args(name, spec.args())?;
            args.validate()
                .map_err(|e| AppError::Config(format!("Invalid args for detector '{}': {}", name, e)))?;
            Ok(Arc::new(BullFlagDetector::new(args)))
        }
        _ => Err(AppError::Config(format!(
            "Unknown detector: '{}'. Supported: {}",
            name,
            SUPPORTED_DETECTORS.join(", ")
        ))),
    }
}

/// Build detectors in config order; duplicates are rejected since the name is
/// the state key.
pub fn build_detectors(specs: &[DetectorSpec]) -> Result<Vec<Arc<dyn Detector>>> {
    let mut detectors: Vec<Arc<dyn Detector>> = Vec::with_capacity(specs.len());
    for spec in specs {
        let detector = create_detector(spec)?;
        if detectors.iter().any(|d| d.name() == detector.name()) {
            return Err(AppError::Config(format!(
                "Detector '{}' is configured more than once",
                detector.name()
            )));
        }
        detectors.push(detector);
    }
    Ok(detectors)
}
