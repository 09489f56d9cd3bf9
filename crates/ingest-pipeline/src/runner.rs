//! Ingestion Cycle
//!
//! One scheduled pass: poll latest positions for the device set, normalize
//! and persist them, then re-segment each device's recent tail and write
//! trips. Segmentation is re-run from the open trip's start (or the tail
//! window, whichever is earlier) so boundaries are reproduced identically
//! run over run, with store-level dedup absorbing the overlap.

use crate::config::PipelineConfig;
use crate::quality::{QualityMonitor, QualitySummary};
use crate::PipelineError;
use chrono::{DateTime, Duration, Utc};
use fleet_storage::FleetStore;
use gps51_client::{RawDeviceReport, VendorApi};
use std::collections::HashMap;
use telemetry_normalizer::Normalizer;
use tracing::{debug, error, info, warn};
use trip_engine::{corroborate, segment, Trip};

/// Aggregate result of one ingestion cycle
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub devices_processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Devices with no fresh report this cycle
    pub skipped: usize,
    pub positions_written: u64,
    pub trips_created: u64,
    pub trips_skipped: u64,
    pub quality: QualitySummary,
}

#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct SegmentStats {
    pub created: u64,
    pub skipped: u64,
    pub out_of_order_points: u64,
    pub discarded_jitter_trips: u64,
}

/// Run one ingestion cycle at `now`
pub async fn run_cycle<V, S>(
    vendor: &V,
    store: &S,
    config: &PipelineConfig,
    now: DateTime<Utc>,
) -> Result<CycleReport, PipelineError>
where
    V: VendorApi + ?Sized,
    S: FleetStore + ?Sized,
{
    let mut quality = QualityMonitor::new(config.trip.ignition_confidence_threshold);

    if config.devices.is_empty() {
        warn!("no devices configured, nothing to ingest");
        return Ok(CycleReport {
            devices_processed: 0,
            succeeded: 0,
            failed: 0,
            skipped: 0,
            positions_written: 0,
            trips_created: 0,
            trips_skipped: 0,
            quality: quality.summary(),
        });
    }

    // One batched poll covers the whole fleet; a failure here is the whole
    // cycle's failure and the next scheduled run retries naturally
    let reports = vendor.last_positions(&config.devices).await?;
    let mut by_device: HashMap<&str, Vec<&RawDeviceReport>> = HashMap::new();
    for report in &reports {
        by_device.entry(report.device_id.as_str()).or_default().push(report);
    }

    let normalizer = Normalizer::new(config.normalizer.clone());
    let mut report = CycleReport {
        devices_processed: config.devices.len(),
        succeeded: 0,
        failed: 0,
        skipped: 0,
        positions_written: 0,
        trips_created: 0,
        trips_skipped: 0,
        quality: QualitySummary {
            samples: 0,
            mean_confidence: 0.0,
            low_confidence: 0,
            method_counts: HashMap::new(),
        },
    };

    for device_id in &config.devices {
        let device_reports = by_device.get(device_id.as_str());
        if device_reports.is_none() {
            debug!(%device_id, "no fresh report this cycle");
            report.skipped += 1;
        }

        let outcome = ingest_device(
            store,
            config,
            &normalizer,
            &mut quality,
            device_id,
            device_reports.map(Vec::as_slice).unwrap_or_default(),
            now,
        )
        .await;

        match outcome {
            Ok((written, stats)) => {
                report.succeeded += 1;
                report.positions_written += written;
                report.trips_created += stats.created;
                report.trips_skipped += stats.skipped;
            }
            Err(e) => {
                // Per-device isolation: record and move on
                report.failed += 1;
                error!(%device_id, error = %e, "device ingestion failed");
            }
        }
    }

    report.quality = quality.summary();
    metrics::counter!("ingest_cycles_total").increment(1);
    metrics::counter!("trips_created_total").increment(report.trips_created);
    metrics::counter!("trips_skipped_total").increment(report.trips_skipped);

    info!(
        devices = report.devices_processed,
        succeeded = report.succeeded,
        failed = report.failed,
        positions = report.positions_written,
        trips = report.trips_created,
        "ingestion cycle complete"
    );

    Ok(report)
}

/// Normalize and persist one device's fresh reports, then re-segment its
/// recent tail
async fn ingest_device<S>(
    store: &S,
    config: &PipelineConfig,
    normalizer: &Normalizer,
    quality: &mut QualityMonitor,
    device_id: &str,
    reports: &[&RawDeviceReport],
    now: DateTime<Utc>,
) -> Result<(u64, SegmentStats), PipelineError>
where
    S: FleetStore + ?Sized,
{
    let mut written = 0u64;
    let mut newest: Option<&RawDeviceReport> = None;

    for report in reports.iter().copied() {
        let position = normalizer.normalize(report, now);
        quality.record(&position.ignition());

        if store.insert_position(&position).await? {
            written += 1;
        }
        if newest.map_or(true, |n| report.reported_at > n.reported_at) {
            newest = Some(report);
        }
    }

    if let Some(latest) = newest {
        store
            .upsert_latest(&normalizer.normalize(latest, now))
            .await?;
    }

    // Window starts at the open trip's beginning so its boundaries are
    // re-derived from the same evidence every run
    let tail_start = now - Duration::hours(config.tail_window_hours);
    let window_start = match store.find_open_trip(device_id).await? {
        Some(open) => open.start_time.min(tail_start),
        None => tail_start,
    };

    let stats = segment_device_window(store, config, device_id, window_start, now, true).await?;
    Ok((written, stats))
}

/// Segment one device's stored positions in [from, to] and write the
/// resulting trips. `sync_open_trip` controls whether the window's trailing
/// open trip is persisted: false for historical ranges whose end predates
/// the live stream.
pub(crate) async fn segment_device_window<S>(
    store: &S,
    config: &PipelineConfig,
    device_id: &str,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
    sync_open_trip: bool,
) -> Result<SegmentStats, PipelineError>
where
    S: FleetStore + ?Sized,
{
    let positions = store.positions_in_range(device_id, from, to).await?;
    if positions.is_empty() {
        return Ok(SegmentStats::default());
    }

    let outcome = segment(&positions, &config.trip);
    let intervals = store.intervals_in_range(device_id, from, to).await?;

    let mut stats = SegmentStats {
        out_of_order_points: outcome.out_of_order_points,
        discarded_jitter_trips: outcome.discarded_jitter_trips,
        ..Default::default()
    };

    for trip in outcome.closed {
        let trip = validate_against_intervals(trip, &intervals, config);

        // Prefer converting the stored open row; fall back to a fresh
        // insert with span dedup (races on the unique index are benign)
        if store.close_open_trip(&trip).await? {
            stats.created += 1;
            continue;
        }
        if store.insert_trip(&trip).await? {
            stats.created += 1;
        } else {
            stats.skipped += 1;
        }
    }

    match outcome.open {
        Some(open) if sync_open_trip => store.upsert_open_trip(&open).await?,
        Some(open) => {
            debug!(
                device_id,
                start = %open.start_time,
                "open trip at end of historical window, not synced"
            );
        }
        None => {}
    }

    Ok(stats)
}

/// Check a freshly closed trip against stored vendor ACC intervals.
///
/// Boundaries are never rewritten here: the (device, start, end) span is
/// the trip's dedup identity across runs: but missing endpoint coordinates
/// are filled from the matching interval, and disagreement is surfaced as a
/// quality metric.
fn validate_against_intervals(
    trip: Trip,
    intervals: &[gps51_client::AccStateInterval],
    config: &PipelineConfig,
) -> Trip {
    if intervals.is_empty() {
        return trip;
    }

    let checked = corroborate(&trip, intervals, &config.corroboration);
    if !checked.corroborated {
        warn!(
            device_id = %trip.device_id,
            start = %trip.start_time,
            "trip not corroborated by vendor ACC intervals"
        );
        metrics::counter!("trips_uncorroborated_total").increment(1);
        return trip;
    }

    let mut validated = trip;
    if validated.start_latitude.is_none() {
        validated.start_latitude = checked.trip.start_latitude;
        validated.start_longitude = checked.trip.start_longitude;
    }
    if validated.end_latitude.is_none() {
        validated.end_latitude = checked.trip.end_latitude;
        validated.end_longitude = checked.trip.end_longitude;
    }
    validated
}
