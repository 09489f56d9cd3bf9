//! Normalized Position Types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How the ignition state was determined, ordered by authority
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IgnitionMethod {
    /// Hardware ACC bit in the 32-bit status word
    StatusBit,
    /// Explicit "ACC ON"/"ACC OFF" text in the status string
    StringParse,
    /// Inferred from reported speed only
    SpeedInference,
    /// Status bit corroborated by movement
    MultiSignal,
    /// No usable signal in the report
    Unknown,
}

impl IgnitionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            IgnitionMethod::StatusBit => "status_bit",
            IgnitionMethod::StringParse => "string_parse",
            IgnitionMethod::SpeedInference => "speed_inference",
            IgnitionMethod::MultiSignal => "multi_signal",
            IgnitionMethod::Unknown => "unknown",
        }
    }

    /// Parse the storage representation; unrecognized tags map to Unknown
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "status_bit" => IgnitionMethod::StatusBit,
            "string_parse" => IgnitionMethod::StringParse,
            "speed_inference" => IgnitionMethod::SpeedInference,
            "multi_signal" => IgnitionMethod::MultiSignal,
            _ => IgnitionMethod::Unknown,
        }
    }

    /// Whether this method reflects an explicit device-side signal rather
    /// than an inference from movement
    pub fn is_authoritative(&self) -> bool {
        matches!(
            self,
            IgnitionMethod::StatusBit | IgnitionMethod::StringParse | IgnitionMethod::MultiSignal
        )
    }
}

/// One ignition determination: state, confidence, and how it was reached.
///
/// Confidence and method travel together: a confidence without its method
/// (or vice versa) is meaningless for monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IgnitionReading {
    pub on: bool,
    pub confidence: f64,
    pub method: IgnitionMethod,
}

impl IgnitionReading {
    pub fn new(on: bool, confidence: f64, method: IgnitionMethod) -> Self {
        Self {
            on,
            confidence: confidence.clamp(0.0, 1.0),
            method,
        }
    }

    /// Terminal reading when no signal exists; never an error
    pub fn unknown() -> Self {
        Self {
            on: false,
            confidence: 0.0,
            method: IgnitionMethod::Unknown,
        }
    }
}

/// Canonical, persisted position record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedPosition {
    pub device_id: String,
    /// Validated latitude; None when the device had no fix
    pub latitude: Option<f64>,
    /// Validated longitude; None when the device had no fix
    pub longitude: Option<f64>,
    /// Speed in km/h, unit-corrected; 0 when absent
    pub speed_kmh: f64,
    /// Heading in degrees [0, 360)
    pub heading: Option<f64>,
    /// Battery charge clamped to [0, 100]
    pub battery_percent: Option<f64>,
    /// Cumulative odometer in km when reported
    pub odometer_km: Option<f64>,
    pub ignition_on: bool,
    pub ignition_confidence: f64,
    pub ignition_method: IgnitionMethod,
    /// GPS fix time as reported by the device
    pub gps_time: DateTime<Utc>,
    /// When this report entered the pipeline
    pub received_at: DateTime<Utc>,
}

impl NormalizedPosition {
    /// Whether the record carries usable coordinates
    pub fn has_fix(&self) -> bool {
        self.latitude.is_some() && self.longitude.is_some()
    }

    pub fn ignition(&self) -> IgnitionReading {
        IgnitionReading {
            on: self.ignition_on,
            confidence: self.ignition_confidence,
            method: self.ignition_method,
        }
    }
}
