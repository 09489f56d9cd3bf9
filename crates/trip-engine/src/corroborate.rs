//! ACC Interval Corroboration
//!
//! The platform exposes its own ACC on/off intervals through a dedicated
//! report endpoint. When available they outrank locally inferred
//! transitions: trip boundaries within tolerance of an interval edge are
//! snapped to it, and disagreements are surfaced for monitoring.

use crate::types::Trip;
use chrono::{DateTime, Duration, Utc};
use gps51_client::AccStateInterval;
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CorroborationConfig {
    /// Maximum distance between a trip boundary and an interval edge for
    /// the two to be considered the same event
    pub tolerance_secs: i64,
}

impl Default for CorroborationConfig {
    fn default() -> Self {
        Self { tolerance_secs: 120 }
    }
}

/// Outcome of checking one trip against the vendor's ACC intervals
#[derive(Debug, Clone)]
pub struct Corroboration {
    pub trip: Trip,
    pub start_adjusted: bool,
    pub end_adjusted: bool,
    /// Whether any vendor interval matched this trip at all
    pub corroborated: bool,
}

fn nearest_edge(
    edges: impl Iterator<Item = DateTime<Utc>>,
    target: DateTime<Utc>,
    tolerance: Duration,
) -> Option<DateTime<Utc>> {
    edges
        .filter(|edge| (*edge - target).abs() <= tolerance)
        .min_by_key(|edge| (*edge - target).abs())
}

/// Snap trip boundaries to vendor ACC-on interval edges within tolerance.
///
/// The trip's start is matched against interval begins, its end against
/// interval ends. A trip with no matching interval is returned unchanged
/// with `corroborated: false`: that disagreement is a quality signal, not
/// an error.
pub fn corroborate(
    trip: &Trip,
    intervals: &[AccStateInterval],
    config: &CorroborationConfig,
) -> Corroboration {
    let tolerance = Duration::seconds(config.tolerance_secs);
    let on_intervals: Vec<&AccStateInterval> = intervals
        .iter()
        .filter(|i| i.device_id == trip.device_id && i.state.is_on())
        .collect();

    let mut adjusted = trip.clone();
    let mut start_adjusted = false;
    let mut end_adjusted = false;

    if let Some(edge) = nearest_edge(
        on_intervals.iter().map(|i| i.begin_time),
        trip.start_time,
        tolerance,
    ) {
        if edge != adjusted.start_time {
            debug!(
                device_id = %trip.device_id,
                trip_id = %trip.id,
                local = %adjusted.start_time,
                vendor = %edge,
                "snapping trip start to vendor ACC interval"
            );
            adjusted.start_time = edge;
            start_adjusted = true;
        }
        if adjusted.start_latitude.is_none() {
            if let Some(interval) = on_intervals.iter().find(|i| i.begin_time == edge) {
                adjusted.start_latitude = interval.begin_latitude;
                adjusted.start_longitude = interval.begin_longitude;
            }
        }
    }

    if let Some(end_time) = adjusted.end_time {
        if let Some(edge) = nearest_edge(
            on_intervals.iter().map(|i| i.end_time),
            end_time,
            tolerance,
        ) {
            // Never let a snap invert the trip
            if edge != end_time && edge > adjusted.start_time {
                debug!(
                    device_id = %trip.device_id,
                    trip_id = %trip.id,
                    local = %end_time,
                    vendor = %edge,
                    "snapping trip end to vendor ACC interval"
                );
                adjusted.end_time = Some(edge);
                end_adjusted = true;
            }
            if adjusted.end_latitude.is_none() {
                if let Some(interval) = on_intervals.iter().find(|i| i.end_time == edge) {
                    adjusted.end_latitude = interval.end_latitude;
                    adjusted.end_longitude = interval.end_longitude;
                }
            }
        }
    }

    if let Some(end_time) = adjusted.end_time {
        adjusted.duration_secs = (end_time - adjusted.start_time).num_seconds().max(0);
    }

    let corroborated = start_adjusted
        || end_adjusted
        || on_intervals.iter().any(|i| {
            (i.begin_time - trip.start_time).abs() <= tolerance
                || trip
                    .end_time
                    .map_or(false, |end| (i.end_time - end).abs() <= tolerance)
        });

    Corroboration {
        trip: adjusted,
        start_adjusted,
        end_adjusted,
        corroborated,
    }
}
