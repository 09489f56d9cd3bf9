//! Coordinate Reconciliation Pass
//!
//! Finds closed trips with placeholder coordinates and repairs them from
//! nearby stored positions. Run on demand or after backfills; each repair
//! is an independent write, so a partial pass is safely rerun.

use crate::config::PipelineConfig;
use crate::PipelineError;
use chrono::Duration;
use fleet_storage::FleetStore;
use tracing::{debug, info};
use trip_engine::backfill_coordinates;

/// Result of one reconciliation pass
#[derive(Debug, Clone, Copy)]
pub struct ReconcileReport {
    pub examined: usize,
    pub repaired: usize,
}

/// Repair coordinates for up to `reconcile_batch_size` broken trips
pub async fn run_reconcile<S>(
    store: &S,
    config: &PipelineConfig,
) -> Result<ReconcileReport, PipelineError>
where
    S: FleetStore + ?Sized,
{
    let window = Duration::minutes(config.trip.reconcile_window_minutes);
    let trips = store
        .trips_missing_coordinates(config.reconcile_batch_size)
        .await?;

    let mut repaired = 0;
    for trip in &trips {
        let Some(end_time) = trip.end_time else {
            continue;
        };

        let positions = store
            .positions_in_range(&trip.device_id, trip.start_time - window, end_time + window)
            .await?;

        match backfill_coordinates(trip, &positions, window) {
            Some(fixed) => {
                store.update_trip_coordinates(&fixed).await?;
                repaired += 1;
            }
            None => {
                debug!(
                    device_id = %trip.device_id,
                    trip_id = %trip.id,
                    "no position close enough to repair trip coordinates"
                );
            }
        }
    }

    info!(
        examined = trips.len(),
        repaired, "coordinate reconciliation pass finished"
    );

    Ok(ReconcileReport {
        examined: trips.len(),
        repaired,
    })
}
