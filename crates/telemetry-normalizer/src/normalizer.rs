//! Report Normalization
//!
//! One raw report in, exactly one normalized position out. Bad fields are
//! defaulted or dropped; a malformed coordinate never aborts normalization
//! of the rest of the report.

use crate::ignition::{IgnitionCascade, IgnitionConfig};
use crate::position::NormalizedPosition;
use chrono::{DateTime, Utc};
use gps51_client::RawDeviceReport;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Normalization configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizerConfig {
    /// Speeds above this are assumed to be meters/hour firmware output and
    /// divided by 1000: once, never iteratively
    pub max_plausible_speed_kmh: f64,
    /// Ignition detection weights and thresholds
    pub ignition: IgnitionConfig,
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        Self {
            max_plausible_speed_kmh: 300.0,
            ignition: IgnitionConfig::default(),
        }
    }
}

/// Turns raw device reports into normalized positions
pub struct Normalizer {
    config: NormalizerConfig,
    cascade: IgnitionCascade,
}

impl Normalizer {
    pub fn new(config: NormalizerConfig) -> Self {
        let cascade = IgnitionCascade::new(config.ignition.clone());
        Self { config, cascade }
    }

    /// Normalize one report. Total: never fails, degraded fields become
    /// None/defaults and the ignition reading absorbs the uncertainty.
    pub fn normalize(
        &self,
        report: &RawDeviceReport,
        received_at: DateTime<Utc>,
    ) -> NormalizedPosition {
        let speed_kmh = self.correct_speed_unit(report.speed);
        let (latitude, longitude) = validate_coordinates(report);
        let ignition = self.cascade.detect(report, speed_kmh);

        NormalizedPosition {
            device_id: report.device_id.clone(),
            latitude,
            longitude,
            speed_kmh: speed_kmh.unwrap_or(0.0),
            heading: normalize_heading(report.heading),
            battery_percent: report.battery_percent.map(|b| b.clamp(0.0, 100.0)),
            odometer_km: report.odometer_km.filter(|&o| o.is_finite() && o >= 0.0),
            ignition_on: ignition.on,
            ignition_confidence: ignition.confidence,
            ignition_method: ignition.method,
            gps_time: report.reported_at,
            received_at,
        }
    }

    /// Detect and correct meters/hour firmware output in a single pass.
    ///
    /// Values already under the plausibility ceiling are trusted as km/h;
    /// a corrected value is never rescaled again even if it remains large.
    fn correct_speed_unit(&self, speed: Option<f64>) -> Option<f64> {
        let speed = speed.filter(|s| s.is_finite() && *s >= 0.0)?;
        if speed > self.config.max_plausible_speed_kmh {
            debug!(speed, "speed above plausible km/h ceiling, treating as m/h");
            Some(speed / 1000.0)
        } else {
            Some(speed)
        }
    }
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::new(NormalizerConfig::default())
    }
}

/// Validate lat/lon as a pair: either both usable or both absent.
///
/// (0, 0) is the classic no-fix placeholder and is treated as unknown.
fn validate_coordinates(report: &RawDeviceReport) -> (Option<f64>, Option<f64>) {
    let (Some(lat), Some(lon)) = (report.latitude, report.longitude) else {
        return (None, None);
    };

    let in_range =
        lat.is_finite() && lon.is_finite() && lat.abs() <= 90.0 && lon.abs() <= 180.0;
    let no_fix_placeholder = lat == 0.0 && lon == 0.0;

    if in_range && !no_fix_placeholder {
        (Some(lat), Some(lon))
    } else {
        debug!(
            device_id = %report.device_id,
            lat,
            lon,
            "discarding implausible coordinates"
        );
        (None, None)
    }
}

/// Wrap heading into [0, 360)
fn normalize_heading(heading: Option<f64>) -> Option<f64> {
    heading
        .filter(|h| h.is_finite())
        .map(|h| h.rem_euclid(360.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::position::IgnitionMethod;
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn raw(device_id: &str) -> RawDeviceReport {
        RawDeviceReport {
            device_id: device_id.into(),
            status: None,
            status_text: None,
            latitude: None,
            longitude: None,
            speed: None,
            heading: None,
            battery_percent: None,
            odometer_km: None,
            reported_at: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_100, 0).unwrap()
    }

    #[test]
    fn test_speed_unit_correction_single_pass() {
        let normalizer = Normalizer::default();

        let mut report = raw("D1");
        report.speed = Some(45_000.0); // meters/hour firmware
        let pos = normalizer.normalize(&report, now());
        assert!((pos.speed_kmh - 45.0).abs() < 1e-9);

        // Already-plausible values pass through untouched
        report.speed = Some(120.0);
        let pos = normalizer.normalize(&report, now());
        assert!((pos.speed_kmh - 120.0).abs() < 1e-9);

        // A corrected value that is still large is NOT rescaled again
        report.speed = Some(400_000.0);
        let pos = normalizer.normalize(&report, now());
        assert!((pos.speed_kmh - 400.0).abs() < 1e-9);
    }

    #[test]
    fn test_negative_speed_discarded() {
        let normalizer = Normalizer::default();
        let mut report = raw("D1");
        report.speed = Some(-5.0);
        let pos = normalizer.normalize(&report, now());
        assert_eq!(pos.speed_kmh, 0.0);
        // No speed signal means no speed-based ignition inference either
        assert_eq!(pos.ignition_method, IgnitionMethod::Unknown);
    }

    #[test]
    fn test_zero_zero_coordinates_are_unknown() {
        let normalizer = Normalizer::default();
        let mut report = raw("D1");
        report.latitude = Some(0.0);
        report.longitude = Some(0.0);
        let pos = normalizer.normalize(&report, now());
        assert!(!pos.has_fix());
    }

    #[test]
    fn test_out_of_range_coordinates_dropped_rest_kept() {
        let normalizer = Normalizer::default();
        let mut report = raw("D1");
        report.latitude = Some(123.0);
        report.longitude = Some(174.7);
        report.speed = Some(40.0);
        report.status = Some(1);

        let pos = normalizer.normalize(&report, now());
        assert!(!pos.has_fix());
        // One bad field never aborts the rest of the report
        assert!((pos.speed_kmh - 40.0).abs() < 1e-9);
        assert!(pos.ignition_on);
    }

    #[test]
    fn test_heading_wraps() {
        let normalizer = Normalizer::default();
        let mut report = raw("D1");
        report.heading = Some(370.0);
        let pos = normalizer.normalize(&report, now());
        assert!((pos.heading.unwrap() - 10.0).abs() < 1e-9);

        report.heading = Some(-90.0);
        let pos = normalizer.normalize(&report, now());
        assert!((pos.heading.unwrap() - 270.0).abs() < 1e-9);
    }

    #[test]
    fn test_battery_clamped() {
        let normalizer = Normalizer::default();
        let mut report = raw("D1");
        report.battery_percent = Some(130.0);
        let pos = normalizer.normalize(&report, now());
        assert_eq!(pos.battery_percent, Some(100.0));
    }

    #[test]
    fn test_confidence_and_method_always_paired() {
        let normalizer = Normalizer::default();
        let pos = normalizer.normalize(&raw("D1"), now());
        assert_eq!(pos.ignition_method, IgnitionMethod::Unknown);
        assert_eq!(pos.ignition_confidence, 0.0);
        assert!(!pos.ignition_on);
    }

    proptest! {
        /// Confidence is always a valid probability, whatever the input
        #[test]
        fn prop_confidence_bounded(status in proptest::option::of(any::<u32>()),
                                   speed in proptest::option::of(0.0f64..500_000.0)) {
            let normalizer = Normalizer::default();
            let mut report = raw("D1");
            report.status = status;
            report.speed = speed;
            let pos = normalizer.normalize(&report, now());
            prop_assert!((0.0..=1.0).contains(&pos.ignition_confidence));
        }

        /// The base ACC bit decides ignition-on independent of the upper
        /// 16 extension bits
        #[test]
        fn prop_base_bit_independent_of_extension(upper in any::<u16>()) {
            let normalizer = Normalizer::default();

            let mut report = raw("D1");
            report.speed = Some(0.0);

            report.status = Some(((upper as u32) << 16) | 0x0001);
            let on = normalizer.normalize(&report, now());
            prop_assert!(on.ignition_on);

            report.status = Some(((upper as u32) << 16) | 0x0006);
            let off = normalizer.normalize(&report, now());
            prop_assert!(!off.ignition_on);
        }

        /// Unit correction is idempotent in effect: output is always in a
        /// plausible km/h range for plausible inputs
        #[test]
        fn prop_speed_correction_plausible(speed in 0.0f64..500_000.0) {
            let normalizer = Normalizer::default();
            let mut report = raw("D1");
            report.speed = Some(speed);
            let pos = normalizer.normalize(&report, now());
            prop_assert!(pos.speed_kmh <= 500.0);
            prop_assert!(pos.speed_kmh >= 0.0);
        }
    }
}
