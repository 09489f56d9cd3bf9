//! Historical Backfill
//!
//! Re-ingests a device's history over an explicit range, chunk by chunk,
//! under a wall-clock budget. Every write is idempotent, so a budget-
//! exhausted or crashed run is simply rerun over the same range and
//! continues where it left off.

use crate::config::PipelineConfig;
use crate::runner::segment_device_window;
use crate::PipelineError;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use fleet_storage::FleetStore;
use gps51_client::VendorApi;
use std::time::{Duration, Instant};
use telemetry_normalizer::Normalizer;
use tracing::{info, warn};

/// Result of one backfill invocation
#[derive(Debug, Clone)]
pub struct BackfillReport {
    pub chunks_processed: u32,
    pub positions_fetched: u64,
    pub positions_written: u64,
    pub intervals_written: u64,
    pub trips_created: u64,
    pub trips_skipped: u64,
    /// False when the wall-clock budget ran out; rerun to continue
    pub completed: bool,
}

/// Backfill one device over [from, to]
pub async fn run_backfill<V, S>(
    vendor: &V,
    store: &S,
    config: &PipelineConfig,
    device_id: &str,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<BackfillReport, PipelineError>
where
    V: VendorApi + ?Sized,
    S: FleetStore + ?Sized,
{
    let budget = Duration::from_secs(config.cycle_budget_secs);
    let started = Instant::now();
    let chunk = ChronoDuration::hours(config.backfill_chunk_hours.max(1));
    let normalizer = Normalizer::new(config.normalizer.clone());

    let mut report = BackfillReport {
        chunks_processed: 0,
        positions_fetched: 0,
        positions_written: 0,
        intervals_written: 0,
        trips_created: 0,
        trips_skipped: 0,
        completed: true,
    };

    let mut cursor = from;
    while cursor < to {
        if started.elapsed() >= budget {
            warn!(
                device_id,
                resume_from = %cursor,
                "backfill budget exhausted, stopping between chunks"
            );
            report.completed = false;
            break;
        }

        let chunk_end = (cursor + chunk).min(to);

        let raw_reports = vendor.position_history(device_id, cursor, chunk_end).await?;
        report.positions_fetched += raw_reports.len() as u64;
        for raw in &raw_reports {
            let position = normalizer.normalize(raw, now);
            if store.insert_position(&position).await? {
                report.positions_written += 1;
            }
        }

        let intervals = vendor.acc_intervals(device_id, cursor, chunk_end).await?;
        for interval in &intervals {
            if store.insert_interval(interval).await? {
                report.intervals_written += 1;
            }
        }

        report.chunks_processed += 1;
        cursor = chunk_end;
    }

    // One segmentation pass over the covered range; identical to what the
    // same positions would have produced incrementally
    let covered_to = cursor;
    if covered_to > from {
        let tail_start = now - ChronoDuration::hours(config.tail_window_hours);
        let sync_open_trip = covered_to >= tail_start;
        let stats =
            segment_device_window(store, config, device_id, from, covered_to, sync_open_trip)
                .await?;
        report.trips_created = stats.created;
        report.trips_skipped = stats.skipped;
    }

    info!(
        device_id,
        chunks = report.chunks_processed,
        positions = report.positions_written,
        trips = report.trips_created,
        completed = report.completed,
        "backfill pass finished"
    );

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use fleet_storage::{MemoryStore, PositionStore, TripStore};
    use gps51_client::{AccStateInterval, ClientError, RawDeviceReport};

    const BASE_TS: i64 = 1_700_000_000;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(BASE_TS + secs, 0).unwrap()
    }

    struct HistoryVendor {
        reports: Vec<RawDeviceReport>,
    }

    #[async_trait]
    impl VendorApi for HistoryVendor {
        async fn last_positions(
            &self,
            _device_ids: &[String],
        ) -> Result<Vec<RawDeviceReport>, ClientError> {
            Ok(Vec::new())
        }

        async fn position_history(
            &self,
            device_id: &str,
            from: DateTime<Utc>,
            to: DateTime<Utc>,
        ) -> Result<Vec<RawDeviceReport>, ClientError> {
            Ok(self
                .reports
                .iter()
                .filter(|r| {
                    r.device_id == device_id && r.reported_at >= from && r.reported_at <= to
                })
                .cloned()
                .collect())
        }

        async fn acc_intervals(
            &self,
            _device_id: &str,
            _from: DateTime<Utc>,
            _to: DateTime<Utc>,
        ) -> Result<Vec<AccStateInterval>, ClientError> {
            Ok(Vec::new())
        }
    }

    fn raw(t_secs: i64, status: u32, speed: f64, lat: f64, lon: f64) -> RawDeviceReport {
        RawDeviceReport {
            device_id: "D1".into(),
            status: Some(status),
            status_text: None,
            latitude: Some(lat),
            longitude: Some(lon),
            speed: Some(speed),
            heading: None,
            battery_percent: None,
            odometer_km: None,
            reported_at: ts(t_secs),
        }
    }

    fn journey() -> Vec<RawDeviceReport> {
        vec![
            raw(0, 1, 0.0, -36.8500, 174.7600),
            raw(120, 1, 40.0, -36.8600, 174.7700),
            raw(600, 0, 0.0, -36.8700, 174.7800),
            raw(7200, 1, 0.0, -36.8700, 174.7800),
            raw(7260, 1, 50.0, -36.8800, 174.7900),
            raw(7500, 0, 0.0, -36.8900, 174.8000),
        ]
    }

    #[tokio::test]
    async fn test_backfill_produces_trips_across_chunks() {
        let vendor = HistoryVendor { reports: journey() };
        let store = MemoryStore::new();
        let mut config = PipelineConfig::default();
        config.backfill_chunk_hours = 1; // journey spans three one-hour chunks

        let report = run_backfill(
            &vendor,
            &store,
            &config,
            "D1",
            ts(0),
            ts(7600),
            ts(7600),
        )
        .await
        .unwrap();

        assert!(report.completed);
        assert_eq!(report.chunks_processed, 3);
        assert_eq!(report.trips_created, 2);

        let trips = store.trips_in_range("D1", ts(-10), ts(8000)).await.unwrap();
        assert_eq!(trips.len(), 2);
        assert_eq!(trips[0].end_time, Some(ts(600)));
        assert_eq!(trips[1].start_time, ts(7200));
    }

    #[tokio::test]
    async fn test_backfill_rerun_is_idempotent() {
        let vendor = HistoryVendor { reports: journey() };
        let store = MemoryStore::new();
        let config = PipelineConfig::default();

        let first = run_backfill(&vendor, &store, &config, "D1", ts(0), ts(7600), ts(7600))
            .await
            .unwrap();
        assert_eq!(first.trips_created, 2);

        let second = run_backfill(&vendor, &store, &config, "D1", ts(0), ts(7600), ts(7600))
            .await
            .unwrap();
        assert_eq!(second.positions_written, 0);
        assert_eq!(second.trips_created, 0);
        assert_eq!(second.trips_skipped, 2);
        assert_eq!(store.position_count(), 6);
    }

    #[tokio::test]
    async fn test_backfill_matches_incremental_ingestion() {
        // The same journey fed as one backfill and as stored positions
        // segmented incrementally must yield the same trips
        let vendor = HistoryVendor { reports: journey() };
        let backfill_store = MemoryStore::new();
        let config = PipelineConfig::default();

        run_backfill(
            &vendor,
            &backfill_store,
            &config,
            "D1",
            ts(0),
            ts(7600),
            ts(7600),
        )
        .await
        .unwrap();

        let incremental_store = MemoryStore::new();
        let normalizer = Normalizer::new(config.normalizer.clone());
        for raw in journey() {
            let pos = normalizer.normalize(&raw, ts(7600));
            incremental_store.insert_position(&pos).await.unwrap();
            // Segment after every new point, as the scheduled cycles do
            segment_device_window(
                &incremental_store,
                &config,
                "D1",
                ts(-10),
                raw.reported_at,
                true,
            )
            .await
            .unwrap();
        }

        let a = backfill_store.trips_in_range("D1", ts(-10), ts(8000)).await.unwrap();
        let b = incremental_store
            .trips_in_range("D1", ts(-10), ts(8000))
            .await
            .unwrap();

        let closed =
            |trips: &[trip_engine::Trip]| -> Vec<(DateTime<Utc>, Option<DateTime<Utc>>)> {
                trips
                    .iter()
                    .filter(|t| !t.is_open())
                    .map(|t| (t.start_time, t.end_time))
                    .collect()
            };
        assert_eq!(closed(&a), closed(&b));
    }
}
