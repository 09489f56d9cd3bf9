//! Segmentation configuration

use serde::{Deserialize, Serialize};

/// Trip segmentation thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TripConfig {
    /// Close an open trip after this long at standstill, even if the
    /// ignition signal never goes off (guards against stuck-on reports)
    pub idle_timeout_secs: i64,

    /// Trips below this distance are discarded as GPS jitter: but only
    /// when no ignition signal confirmed the trip
    pub min_trip_distance_km: f64,

    /// Speed above which the vehicle counts as moving (km/h); also the
    /// standstill threshold for idle tracking
    pub movement_speed_kmh: f64,

    /// A gap between consecutive points longer than this is a data outage:
    /// close at the last known point rather than bridging it
    pub max_gap_minutes: i64,

    /// Search window when backfilling missing trip coordinates
    pub reconcile_window_minutes: i64,

    /// Minimum confidence for an ignition reading to drive transitions
    pub ignition_confidence_threshold: f64,
}

impl Default for TripConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: 180,
            min_trip_distance_km: 0.1,
            movement_speed_kmh: 1.0,
            max_gap_minutes: 30,
            reconcile_window_minutes: 15,
            ignition_confidence_threshold: 0.5,
        }
    }
}
