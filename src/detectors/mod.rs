//! Pattern detectors
//!
//! Detectors are pure evaluation units behind the `Detector` trait; the
//! factory turns config entries into an ordered, registration-order list.

pub mod bull_flag;
pub mod factory;
pub mod price_cross;
pub mod traits;

pub use bull_flag::{BullFlagArgs, BullFlagDetector};
pub use factory::{build_detectors, create_detector, DetectorSpec, SUPPORTED_DETECTORS};
pub use price_cross::{PriceCrossArgs, PriceCrossDetector};
pub use traits::{payload_hash, Detector, Evaluation, EvaluationError};
