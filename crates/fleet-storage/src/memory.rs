//! In-Memory Backend
//!
//! Mirrors the Postgres backend's duplicate and upsert semantics behind
//! mutex-guarded collections. Used by unit and pipeline tests; not intended
//! for production retention.

use crate::{AccIntervalStore, PositionStore, StorageError, TripStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gps51_client::AccStateInterval;
use std::collections::HashMap;
use std::sync::Mutex;
use telemetry_normalizer::NormalizedPosition;
use trip_engine::Trip;

/// In-memory store
#[derive(Default)]
pub struct MemoryStore {
    positions: Mutex<Vec<NormalizedPosition>>,
    latest: Mutex<HashMap<String, NormalizedPosition>>,
    trips: Mutex<Vec<Trip>>,
    intervals: Mutex<Vec<AccStateInterval>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_err(what: &str) -> StorageError {
        StorageError::Database(format!("lock poisoned: {what}"))
    }

    /// Total stored history rows (test helper)
    pub fn position_count(&self) -> usize {
        self.positions.lock().map(|p| p.len()).unwrap_or(0)
    }

    /// Total stored trips, open and closed (test helper)
    pub fn trip_count(&self) -> usize {
        self.trips.lock().map(|t| t.len()).unwrap_or(0)
    }
}

#[async_trait]
impl PositionStore for MemoryStore {
    async fn insert_position(&self, position: &NormalizedPosition) -> Result<bool, StorageError> {
        let mut positions = self
            .positions
            .lock()
            .map_err(|_| Self::lock_err("positions"))?;

        let duplicate = positions
            .iter()
            .any(|p| p.device_id == position.device_id && p.gps_time == position.gps_time);
        if duplicate {
            return Ok(false);
        }

        positions.push(position.clone());
        Ok(true)
    }

    async fn upsert_latest(&self, position: &NormalizedPosition) -> Result<(), StorageError> {
        let mut latest = self.latest.lock().map_err(|_| Self::lock_err("latest"))?;
        latest.insert(position.device_id.clone(), position.clone());
        Ok(())
    }

    async fn latest_position(
        &self,
        device_id: &str,
    ) -> Result<Option<NormalizedPosition>, StorageError> {
        let latest = self.latest.lock().map_err(|_| Self::lock_err("latest"))?;
        Ok(latest.get(device_id).cloned())
    }

    async fn positions_in_range(
        &self,
        device_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<NormalizedPosition>, StorageError> {
        let positions = self
            .positions
            .lock()
            .map_err(|_| Self::lock_err("positions"))?;

        let mut matched: Vec<NormalizedPosition> = positions
            .iter()
            .filter(|p| p.device_id == device_id && p.gps_time >= from && p.gps_time <= to)
            .cloned()
            .collect();
        matched.sort_by_key(|p| p.gps_time);
        Ok(matched)
    }
}

#[async_trait]
impl TripStore for MemoryStore {
    async fn insert_trip(&self, trip: &Trip) -> Result<bool, StorageError> {
        if trip.end_time.is_none() {
            return Err(StorageError::InvalidRecord(
                "insert_trip requires a closed trip".into(),
            ));
        }

        let mut trips = self.trips.lock().map_err(|_| Self::lock_err("trips"))?;

        let duplicate = trips.iter().any(|t| {
            t.device_id == trip.device_id
                && t.start_time == trip.start_time
                && t.end_time == trip.end_time
        });
        if duplicate {
            return Ok(false);
        }

        trips.push(trip.clone());
        Ok(true)
    }

    async fn upsert_open_trip(&self, trip: &Trip) -> Result<(), StorageError> {
        if trip.end_time.is_some() {
            return Err(StorageError::InvalidRecord(
                "upsert_open_trip requires an open trip".into(),
            ));
        }

        let mut trips = self.trips.lock().map_err(|_| Self::lock_err("trips"))?;

        if let Some(existing) = trips
            .iter_mut()
            .find(|t| t.device_id == trip.device_id && t.is_open())
        {
            // Keep the original row id stable across extensions
            let id = existing.id;
            *existing = trip.clone();
            existing.id = id;
        } else {
            trips.push(trip.clone());
        }
        Ok(())
    }

    async fn find_open_trip(&self, device_id: &str) -> Result<Option<Trip>, StorageError> {
        let trips = self.trips.lock().map_err(|_| Self::lock_err("trips"))?;
        Ok(trips
            .iter()
            .find(|t| t.device_id == device_id && t.is_open())
            .cloned())
    }

    async fn close_open_trip(&self, trip: &Trip) -> Result<bool, StorageError> {
        let mut trips = self.trips.lock().map_err(|_| Self::lock_err("trips"))?;

        let Some(open) = trips
            .iter_mut()
            .find(|t| t.device_id == trip.device_id && t.is_open() && t.start_time == trip.start_time)
        else {
            return Ok(false);
        };

        let id = open.id;
        *open = trip.clone();
        open.id = id;
        Ok(true)
    }

    async fn update_trip_coordinates(&self, trip: &Trip) -> Result<(), StorageError> {
        let mut trips = self.trips.lock().map_err(|_| Self::lock_err("trips"))?;

        let Some(stored) = trips.iter_mut().find(|t| t.id == trip.id) else {
            return Err(StorageError::NotFound);
        };

        stored.start_latitude = trip.start_latitude;
        stored.start_longitude = trip.start_longitude;
        stored.end_latitude = trip.end_latitude;
        stored.end_longitude = trip.end_longitude;
        stored.distance_km = trip.distance_km;
        Ok(())
    }

    async fn trips_missing_coordinates(&self, limit: i64) -> Result<Vec<Trip>, StorageError> {
        let trips = self.trips.lock().map_err(|_| Self::lock_err("trips"))?;

        let mut missing: Vec<Trip> = trips
            .iter()
            .filter(|t| !t.is_open() && !t.has_complete_coordinates())
            .cloned()
            .collect();
        missing.sort_by_key(|t| std::cmp::Reverse(t.start_time));
        missing.truncate(limit.max(0) as usize);
        Ok(missing)
    }

    async fn trips_in_range(
        &self,
        device_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Trip>, StorageError> {
        let trips = self.trips.lock().map_err(|_| Self::lock_err("trips"))?;

        let mut matched: Vec<Trip> = trips
            .iter()
            .filter(|t| t.device_id == device_id && t.start_time >= from && t.start_time <= to)
            .cloned()
            .collect();
        matched.sort_by_key(|t| t.start_time);
        Ok(matched)
    }
}

#[async_trait]
impl AccIntervalStore for MemoryStore {
    async fn insert_interval(&self, interval: &AccStateInterval) -> Result<bool, StorageError> {
        let mut intervals = self
            .intervals
            .lock()
            .map_err(|_| Self::lock_err("intervals"))?;

        let duplicate = intervals.iter().any(|i| {
            i.device_id == interval.device_id
                && i.state == interval.state
                && i.begin_time == interval.begin_time
        });
        if duplicate {
            return Ok(false);
        }

        intervals.push(interval.clone());
        Ok(true)
    }

    async fn intervals_in_range(
        &self,
        device_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<AccStateInterval>, StorageError> {
        let intervals = self
            .intervals
            .lock()
            .map_err(|_| Self::lock_err("intervals"))?;

        let mut matched: Vec<AccStateInterval> = intervals
            .iter()
            .filter(|i| i.device_id == device_id && i.begin_time >= from && i.begin_time <= to)
            .cloned()
            .collect();
        matched.sort_by_key(|i| i.begin_time);
        Ok(matched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use telemetry_normalizer::IgnitionMethod;
    use uuid::Uuid;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn position(device_id: &str, t_secs: i64) -> NormalizedPosition {
        NormalizedPosition {
            device_id: device_id.into(),
            latitude: Some(-36.85),
            longitude: Some(174.76),
            speed_kmh: 30.0,
            heading: None,
            battery_percent: None,
            odometer_km: None,
            ignition_on: true,
            ignition_confidence: 0.6,
            ignition_method: IgnitionMethod::StatusBit,
            gps_time: ts(t_secs),
            received_at: ts(t_secs + 2),
        }
    }

    fn closed_trip(device_id: &str, start_secs: i64, end_secs: i64) -> Trip {
        Trip {
            id: Uuid::new_v4(),
            device_id: device_id.into(),
            start_time: ts(start_secs),
            end_time: Some(ts(end_secs)),
            start_latitude: Some(-36.85),
            start_longitude: Some(174.76),
            end_latitude: Some(-36.90),
            end_longitude: Some(174.80),
            distance_km: 4.2,
            duration_secs: end_secs - start_secs,
            max_speed_kmh: 60.0,
            avg_speed_kmh: 35.0,
            ignition_confirmed: true,
        }
    }

    #[tokio::test]
    async fn test_position_history_dedupes_on_device_and_time() {
        let store = MemoryStore::new();
        assert!(store.insert_position(&position("D1", 0)).await.unwrap());
        assert!(!store.insert_position(&position("D1", 0)).await.unwrap());
        assert!(store.insert_position(&position("D1", 60)).await.unwrap());
        assert!(store.insert_position(&position("D2", 0)).await.unwrap());
        assert_eq!(store.position_count(), 3);
    }

    #[tokio::test]
    async fn test_latest_is_keyed_upsert() {
        let store = MemoryStore::new();
        store.upsert_latest(&position("D1", 0)).await.unwrap();
        store.upsert_latest(&position("D1", 60)).await.unwrap();

        let latest = store.latest_position("D1").await.unwrap().unwrap();
        assert_eq!(latest.gps_time, ts(60));
        assert!(store.latest_position("D2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_trip_is_skipped_not_error() {
        let store = MemoryStore::new();
        let trip = closed_trip("D1", 0, 600);

        assert!(store.insert_trip(&trip).await.unwrap());

        // Same span, different row id: still a duplicate
        let mut again = trip.clone();
        again.id = Uuid::new_v4();
        assert!(!store.insert_trip(&again).await.unwrap());
        assert_eq!(store.trip_count(), 1);
    }

    #[tokio::test]
    async fn test_open_trip_lifecycle() {
        let store = MemoryStore::new();

        let mut open = closed_trip("D1", 0, 600);
        open.end_time = None;
        store.upsert_open_trip(&open).await.unwrap();

        let found = store.find_open_trip("D1").await.unwrap().unwrap();
        assert_eq!(found.start_time, ts(0));

        // Extending replaces fields, keeps one open row
        let mut extended = open.clone();
        extended.distance_km = 9.9;
        store.upsert_open_trip(&extended).await.unwrap();
        assert_eq!(store.trip_count(), 1);

        // Closing converts it in place
        let closed = closed_trip("D1", 0, 900);
        assert!(store.close_open_trip(&closed).await.unwrap());
        assert!(store.find_open_trip("D1").await.unwrap().is_none());
        assert_eq!(store.trip_count(), 1);

        // Closing again finds nothing: caller falls back to insert_trip
        assert!(!store.close_open_trip(&closed).await.unwrap());
    }

    #[tokio::test]
    async fn test_inserting_open_trip_is_invalid() {
        let store = MemoryStore::new();
        let mut open = closed_trip("D1", 0, 600);
        open.end_time = None;
        assert!(matches!(
            store.insert_trip(&open).await,
            Err(StorageError::InvalidRecord(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_coordinate_query() {
        let store = MemoryStore::new();

        let mut broken = closed_trip("D1", 0, 600);
        broken.end_latitude = None;
        broken.end_longitude = None;
        store.insert_trip(&broken).await.unwrap();
        store.insert_trip(&closed_trip("D1", 1000, 1600)).await.unwrap();

        let missing = store.trips_missing_coordinates(10).await.unwrap();
        assert_eq!(missing.len(), 1);
        assert_eq!(missing[0].id, broken.id);
    }

    #[tokio::test]
    async fn test_interval_dedupe() {
        let store = MemoryStore::new();
        let interval = AccStateInterval {
            device_id: "D1".into(),
            state: gps51_client::AccState::On,
            begin_time: ts(0),
            end_time: ts(600),
            begin_latitude: None,
            begin_longitude: None,
            end_latitude: None,
            end_longitude: None,
            source: None,
        };

        assert!(store.insert_interval(&interval).await.unwrap());
        assert!(!store.insert_interval(&interval).await.unwrap());
    }
}
