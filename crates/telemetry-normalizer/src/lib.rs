//! Telemetry Normalization
//!
//! Converts raw GPS51 device reports into canonical positions: corrected
//! speed units, sanity-checked coordinates, and an ignition determination
//! with a confidence score and detection-method tag. Normalization is a
//! total function: contradictory or absent signals degrade the confidence,
//! they never fail the report.

mod ignition;
mod normalizer;
mod position;

pub use ignition::{
    IgnitionCascade, IgnitionConfig, IgnitionDetector, SpeedInferenceDetector, StatusBitDetector,
    StatusTextDetector,
};
pub use normalizer::{Normalizer, NormalizerConfig};
pub use position::{IgnitionMethod, IgnitionReading, NormalizedPosition};
