//! Storage Layer
//!
//! Three logical relations: `normalized_positions` (append-only history plus
//! an upserted latest row per device), `trips` (append-only, updated in
//! place only to close an open trip or backfill coordinates), and
//! `acc_state_intervals` (append-only vendor corroboration data).
//!
//! All writes follow upsert-or-skip-duplicate patterns; the database unique
//! constraints are the final arbiter for concurrent runs, and violations
//! are success-equivalent, never errors.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use telemetry_normalizer::NormalizedPosition;
use thiserror::Error;
use trip_engine::Trip;

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(String),
    #[error("record not found")]
    NotFound,
    #[error("invalid record: {0}")]
    InvalidRecord(String),
}

impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        StorageError::Database(err.to_string())
    }
}

impl From<sqlx::migrate::MigrateError> for StorageError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        StorageError::Database(err.to_string())
    }
}

/// Position history and latest-position access
#[async_trait]
pub trait PositionStore: Send + Sync {
    /// Append to history. Duplicate (device, gps_time) samples are skipped;
    /// returns whether a new row was written.
    async fn insert_position(&self, position: &NormalizedPosition) -> Result<bool, StorageError>;

    /// Insert or overwrite the device's latest-position row
    async fn upsert_latest(&self, position: &NormalizedPosition) -> Result<(), StorageError>;

    async fn latest_position(
        &self,
        device_id: &str,
    ) -> Result<Option<NormalizedPosition>, StorageError>;

    /// History for one device, ascending by GPS time, bounds inclusive
    async fn positions_in_range(
        &self,
        device_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<NormalizedPosition>, StorageError>;
}

/// Trip persistence
#[async_trait]
pub trait TripStore: Send + Sync {
    /// Insert a closed trip unless an identical (device, start, end) span
    /// already exists. Returns whether a new row was written; duplicates
    /// and insert races are success-equivalent.
    async fn insert_trip(&self, trip: &Trip) -> Result<bool, StorageError>;

    /// Insert or update the device's single open-trip row
    async fn upsert_open_trip(&self, trip: &Trip) -> Result<(), StorageError>;

    async fn find_open_trip(&self, device_id: &str) -> Result<Option<Trip>, StorageError>;

    /// Close the open trip matching (device, start_time) with the final
    /// fields. Returns false when no such open trip exists.
    async fn close_open_trip(&self, trip: &Trip) -> Result<bool, StorageError>;

    /// Overwrite coordinates and distance after reconciliation
    async fn update_trip_coordinates(&self, trip: &Trip) -> Result<(), StorageError>;

    /// Closed trips missing start or end coordinates, newest first
    async fn trips_missing_coordinates(&self, limit: i64) -> Result<Vec<Trip>, StorageError>;

    /// Trips starting within the given bounds, ascending
    async fn trips_in_range(
        &self,
        device_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Trip>, StorageError>;
}

/// Vendor ACC interval persistence
#[async_trait]
pub trait AccIntervalStore: Send + Sync {
    /// Append an interval; duplicates on (device, state, begin) are skipped
    async fn insert_interval(
        &self,
        interval: &gps51_client::AccStateInterval,
    ) -> Result<bool, StorageError>;

    async fn intervals_in_range(
        &self,
        device_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<gps51_client::AccStateInterval>, StorageError>;
}

/// Everything the ingestion pipeline needs from a backend
pub trait FleetStore: PositionStore + TripStore + AccIntervalStore {}

impl<T: PositionStore + TripStore + AccIntervalStore> FleetStore for T {}
