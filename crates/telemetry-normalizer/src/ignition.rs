//! Ignition Detection Cascade
//!
//! Ordered detector strategies, highest authority first:
//!
//! 1. status word ACC bits (JT808 base + vendor extension)
//! 2. status text parsing ("ACC ON" and variants)
//! 3. speed inference
//!
//! The cascade accepts the first reading whose confidence crosses the
//! decision threshold; when nothing crosses it, the strongest sub-threshold
//! reading is used, and absence of any signal terminates in an Unknown
//! reading with confidence 0. Detection never fails a report.

use crate::position::{IgnitionMethod, IgnitionReading};
use gps51_client::RawDeviceReport;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Low 16 bits of the status word: standard JT808 semantics
const BASE_STATUS_MASK: u32 = 0xFFFF;

/// Detection weights and thresholds.
///
/// The weights were tuned against live device fleets, not derived; treat
/// them as calibration data rather than constants to "fix".
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IgnitionConfig {
    /// Confidence a reading must reach to short-circuit the cascade
    pub decision_threshold: f64,
    /// Contribution of the base-protocol ACC bit
    pub base_bit_weight: f64,
    /// Contribution of the extended-status ACC bit
    pub extended_bit_weight: f64,
    /// Contribution of movement corroboration
    pub moving_weight: f64,
    /// Speed above which movement corroborates ignition (km/h)
    pub moving_speed_kmh: f64,
    /// Confidence of an unambiguous status-text match
    pub string_confidence: f64,
    /// Speed above which inference reports ignition-on strongly (km/h)
    pub fast_speed_kmh: f64,
    /// Confidence for the fast-speed inference tier
    pub fast_confidence: f64,
    /// Confidence for the slow-movement inference tier
    pub slow_confidence: f64,
    /// Speed at or below which the vehicle counts as stopped (km/h)
    pub stopped_speed_kmh: f64,
    /// Confidence that a stopped vehicle has ignition off
    pub stopped_confidence: f64,
}

impl Default for IgnitionConfig {
    fn default() -> Self {
        Self {
            decision_threshold: 0.5,
            base_bit_weight: 0.6,
            extended_bit_weight: 0.2,
            moving_weight: 0.2,
            moving_speed_kmh: 3.0,
            string_confidence: 0.9,
            fast_speed_kmh: 5.0,
            fast_confidence: 0.4,
            slow_confidence: 0.3,
            stopped_speed_kmh: 0.5,
            stopped_confidence: 0.5,
        }
    }
}

/// One detection strategy in the cascade
pub trait IgnitionDetector: Send + Sync {
    fn name(&self) -> &'static str;

    /// Produce a reading, or None when this strategy has nothing to say.
    /// `speed_kmh` is the unit-corrected speed, None when unreported.
    fn detect(
        &self,
        report: &RawDeviceReport,
        speed_kmh: Option<f64>,
        config: &IgnitionConfig,
    ) -> Option<IgnitionReading>;
}

/// ACC bits out of the 32-bit status word.
///
/// Bit 0 of the low half is the JT808 ACC flag; bit 0 of the high half is
/// the vendor's extended ACC flag. Status words above 0xFFFF are expected
/// extended encodings, not errors.
pub struct StatusBitDetector;

impl IgnitionDetector for StatusBitDetector {
    fn name(&self) -> &'static str {
        "status_bit"
    }

    fn detect(
        &self,
        report: &RawDeviceReport,
        speed_kmh: Option<f64>,
        config: &IgnitionConfig,
    ) -> Option<IgnitionReading> {
        let status = report.status?;
        let base_acc = status & BASE_STATUS_MASK & 0x01 == 0x01;
        let extended_acc = (status >> 16) & 0x01 == 0x01;
        let moving = speed_kmh.is_some_and(|s| s > config.moving_speed_kmh);

        if !base_acc && !extended_acc {
            // Bits clear: the status word says nothing about ignition-on;
            // the lower tiers determine the off state
            return None;
        }

        let mut confidence = 0.0;
        if base_acc {
            confidence += config.base_bit_weight;
        }
        if extended_acc {
            confidence += config.extended_bit_weight;
        }
        if moving {
            confidence += config.moving_weight;
        }
        let confidence = confidence.min(1.0);

        let method = if moving && (base_acc || extended_acc) {
            IgnitionMethod::MultiSignal
        } else {
            IgnitionMethod::StatusBit
        };

        Some(IgnitionReading::new(true, confidence, method))
    }
}

/// Case-insensitive "ACC ON"/"ACC OFF" matching across the separator
/// variants seen in the field.
pub struct StatusTextDetector;

const ACC_ON_PATTERNS: [&str; 4] = ["ACC ON", "ACC:ON", "ACC_ON", "ACC=ON"];
const ACC_OFF_PATTERNS: [&str; 4] = ["ACC OFF", "ACC:OFF", "ACC_OFF", "ACC=OFF"];

impl IgnitionDetector for StatusTextDetector {
    fn name(&self) -> &'static str {
        "string_parse"
    }

    fn detect(
        &self,
        report: &RawDeviceReport,
        _speed_kmh: Option<f64>,
        config: &IgnitionConfig,
    ) -> Option<IgnitionReading> {
        let text = report.status_text.as_deref()?.to_ascii_uppercase();

        let on = ACC_ON_PATTERNS.iter().any(|p| text.contains(p));
        let off = ACC_OFF_PATTERNS.iter().any(|p| text.contains(p));

        match (on, off) {
            (true, false) => Some(IgnitionReading::new(
                true,
                config.string_confidence,
                IgnitionMethod::StringParse,
            )),
            (false, true) => Some(IgnitionReading::new(
                false,
                config.string_confidence,
                IgnitionMethod::StringParse,
            )),
            (true, true) => {
                warn!(device_id = %report.device_id, %text, "contradictory ACC text, ignoring");
                None
            }
            (false, false) => None,
        }
    }
}

/// Last-resort inference from reported speed
pub struct SpeedInferenceDetector;

impl IgnitionDetector for SpeedInferenceDetector {
    fn name(&self) -> &'static str {
        "speed_inference"
    }

    fn detect(
        &self,
        _report: &RawDeviceReport,
        speed_kmh: Option<f64>,
        config: &IgnitionConfig,
    ) -> Option<IgnitionReading> {
        let speed = speed_kmh?;

        let reading = if speed > config.fast_speed_kmh {
            IgnitionReading::new(true, config.fast_confidence, IgnitionMethod::SpeedInference)
        } else if speed > config.moving_speed_kmh {
            IgnitionReading::new(true, config.slow_confidence, IgnitionMethod::SpeedInference)
        } else if speed <= config.stopped_speed_kmh {
            IgnitionReading::new(
                false,
                config.stopped_confidence,
                IgnitionMethod::SpeedInference,
            )
        } else {
            // Crawling between the stopped and moving thresholds: too weak
            // to claim either state
            return None;
        };

        Some(reading)
    }
}

/// Ordered ignition detection over the strategy list
pub struct IgnitionCascade {
    config: IgnitionConfig,
    detectors: Vec<Box<dyn IgnitionDetector>>,
}

impl IgnitionCascade {
    pub fn new(config: IgnitionConfig) -> Self {
        Self {
            config,
            detectors: vec![
                Box::new(StatusBitDetector),
                Box::new(StatusTextDetector),
                Box::new(SpeedInferenceDetector),
            ],
        }
    }

    pub fn config(&self) -> &IgnitionConfig {
        &self.config
    }

    /// Run the cascade. Always returns a reading; absence of data is the
    /// Unknown reading, not an error.
    pub fn detect(&self, report: &RawDeviceReport, speed_kmh: Option<f64>) -> IgnitionReading {
        let mut fallback: Option<IgnitionReading> = None;

        for detector in &self.detectors {
            let Some(reading) = detector.detect(report, speed_kmh, &self.config) else {
                continue;
            };

            if reading.confidence >= self.config.decision_threshold {
                return reading;
            }

            // Some signal was present but not decisive; surface for
            // monitoring and keep the strongest candidate
            debug!(
                device_id = %report.device_id,
                detector = detector.name(),
                confidence = reading.confidence,
                "sub-threshold ignition reading"
            );
            if fallback.map_or(true, |best| reading.confidence > best.confidence) {
                fallback = Some(reading);
            }
        }

        match fallback {
            Some(reading) => {
                warn!(
                    device_id = %report.device_id,
                    confidence = reading.confidence,
                    method = reading.method.as_str(),
                    "ambiguous ignition signals, using best sub-threshold reading"
                );
                reading
            }
            None => IgnitionReading::unknown(),
        }
    }
}

impl Default for IgnitionCascade {
    fn default() -> Self {
        Self::new(IgnitionConfig::default())
    }
}
