//! Trip Record

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A derived journey over a contiguous run of positions for one device.
///
/// Open while the vehicle is still travelling (`end_time` is None); closed
/// trips are immutable except for coordinate reconciliation. The
/// `(device_id, start_time, end_time)` tuple identifies a closed trip;
/// exact duplicates are rejected at write time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trip {
    pub id: Uuid,
    pub device_id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub start_latitude: Option<f64>,
    pub start_longitude: Option<f64>,
    pub end_latitude: Option<f64>,
    pub end_longitude: Option<f64>,
    /// Accumulated distance in km (haversine hops, odometer delta when the
    /// device reports a strictly increasing odometer)
    pub distance_km: f64,
    pub duration_secs: i64,
    pub max_speed_kmh: f64,
    pub avg_speed_kmh: f64,
    /// Whether the trip boundaries came from the ignition signal rather
    /// than speed inference
    pub ignition_confirmed: bool,
}

impl Trip {
    pub fn is_open(&self) -> bool {
        self.end_time.is_none()
    }

    /// Whether both endpoints carry coordinates
    pub fn has_complete_coordinates(&self) -> bool {
        let start = self.start_latitude.is_some() && self.start_longitude.is_some();
        let end = self.is_open() || (self.end_latitude.is_some() && self.end_longitude.is_some());
        start && end
    }
}
