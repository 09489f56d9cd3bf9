//! Coordinate Reconciliation
//!
//! Trips occasionally open or close on a position that momentarily lacked a
//! GPS fix, leaving placeholder coordinates. A reconciliation pass repairs
//! them from the nearest-in-time position within a bounded window and
//! recomputes the distance over the trip's span.

use crate::geo::haversine_km;
use crate::types::Trip;
use chrono::{DateTime, Duration, Utc};
use telemetry_normalizer::NormalizedPosition;
use tracing::debug;

/// Nearest position with a fix inside `window` of `target`
fn nearest_fix<'a>(
    positions: &'a [NormalizedPosition],
    target: DateTime<Utc>,
    window: Duration,
) -> Option<&'a NormalizedPosition> {
    positions
        .iter()
        .filter(|p| p.has_fix())
        .filter(|p| (p.gps_time - target).abs() <= window)
        .min_by_key(|p| (p.gps_time - target).abs())
}

/// Fill missing start/end coordinates from nearby positions and recompute
/// the distance. Returns the repaired trip, or None when nothing changed.
pub fn backfill_coordinates(
    trip: &Trip,
    positions: &[NormalizedPosition],
    window: Duration,
) -> Option<Trip> {
    if trip.has_complete_coordinates() {
        return None;
    }

    let mut repaired = trip.clone();
    let mut changed = false;

    if repaired.start_latitude.is_none() || repaired.start_longitude.is_none() {
        if let Some(p) = nearest_fix(positions, repaired.start_time, window) {
            debug!(
                device_id = %repaired.device_id,
                trip_id = %repaired.id,
                source_time = %p.gps_time,
                "backfilling trip start coordinates"
            );
            repaired.start_latitude = p.latitude;
            repaired.start_longitude = p.longitude;
            changed = true;
        }
    }

    if let Some(end_time) = repaired.end_time {
        if repaired.end_latitude.is_none() || repaired.end_longitude.is_none() {
            if let Some(p) = nearest_fix(positions, end_time, window) {
                debug!(
                    device_id = %repaired.device_id,
                    trip_id = %repaired.id,
                    source_time = %p.gps_time,
                    "backfilling trip end coordinates"
                );
                repaired.end_latitude = p.latitude;
                repaired.end_longitude = p.longitude;
                changed = true;
            }
        }
    }

    if !changed {
        return None;
    }

    if let Some(end_time) = repaired.end_time {
        if let Some(distance) = span_distance(positions, repaired.start_time, end_time) {
            repaired.distance_km = distance;
        }
    }

    Some(repaired)
}

/// Haversine fold over the positions inside the trip span; None when fewer
/// than two fixes are available
fn span_distance(
    positions: &[NormalizedPosition],
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Option<f64> {
    let mut total = 0.0;
    let mut hops = 0u32;
    let mut prev: Option<(f64, f64)> = None;

    for p in positions {
        if p.gps_time < start || p.gps_time > end {
            continue;
        }
        let (Some(lat), Some(lon)) = (p.latitude, p.longitude) else {
            continue;
        };
        if let Some((plat, plon)) = prev {
            total += haversine_km(plat, plon, lat, lon);
            hops += 1;
        }
        prev = Some((lat, lon));
    }

    (hops > 0).then_some(total)
}
