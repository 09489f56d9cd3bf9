//! Postgres Backend
//!
//! sqlx-based implementation of the store traits. No multi-statement
//! transactions: each write is an independent upsert-or-skip so a
//! mid-pipeline failure never leaves a lock held, and concurrent runs
//! settle on the unique indexes.

use crate::{AccIntervalStore, PositionStore, StorageError, TripStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gps51_client::{AccState, AccStateInterval};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use telemetry_normalizer::{IgnitionMethod, NormalizedPosition};
use tracing::{info, warn};
use trip_engine::Trip;

/// Postgres-backed store
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect and run pending migrations
    pub async fn connect(database_url: &str) -> Result<Self, StorageError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;
        info!("connected to Postgres and applied migrations");

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Postgres unique-violation SQLSTATE
fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .and_then(|db| db.code())
        .map_or(false, |code| code == "23505")
}

fn position_from_row(row: &PgRow) -> Result<NormalizedPosition, sqlx::Error> {
    let method: String = row.try_get("ignition_method")?;
    Ok(NormalizedPosition {
        device_id: row.try_get("device_id")?,
        latitude: row.try_get("latitude")?,
        longitude: row.try_get("longitude")?,
        speed_kmh: row.try_get("speed_kmh")?,
        heading: row.try_get("heading")?,
        battery_percent: row.try_get("battery_percent")?,
        odometer_km: row.try_get("odometer_km")?,
        ignition_on: row.try_get("ignition_on")?,
        ignition_confidence: row.try_get("ignition_confidence")?,
        ignition_method: IgnitionMethod::from_tag(&method),
        gps_time: row.try_get("gps_time")?,
        received_at: row.try_get("received_at")?,
    })
}

fn trip_from_row(row: &PgRow) -> Result<Trip, sqlx::Error> {
    Ok(Trip {
        id: row.try_get("id")?,
        device_id: row.try_get("device_id")?,
        start_time: row.try_get("start_time")?,
        end_time: row.try_get("end_time")?,
        start_latitude: row.try_get("start_latitude")?,
        start_longitude: row.try_get("start_longitude")?,
        end_latitude: row.try_get("end_latitude")?,
        end_longitude: row.try_get("end_longitude")?,
        distance_km: row.try_get("distance_km")?,
        duration_secs: row.try_get("duration_secs")?,
        max_speed_kmh: row.try_get("max_speed_kmh")?,
        avg_speed_kmh: row.try_get("avg_speed_kmh")?,
        ignition_confirmed: row.try_get("ignition_confirmed")?,
    })
}

fn interval_from_row(row: &PgRow) -> Result<AccStateInterval, sqlx::Error> {
    let state: String = row.try_get("state")?;
    Ok(AccStateInterval {
        device_id: row.try_get("device_id")?,
        state: if state.eq_ignore_ascii_case("on") {
            AccState::On
        } else {
            AccState::Off
        },
        begin_time: row.try_get("begin_time")?,
        end_time: row.try_get("end_time")?,
        begin_latitude: row.try_get("begin_latitude")?,
        begin_longitude: row.try_get("begin_longitude")?,
        end_latitude: row.try_get("end_latitude")?,
        end_longitude: row.try_get("end_longitude")?,
        source: row.try_get("source")?,
    })
}

#[async_trait]
impl PositionStore for PgStore {
    async fn insert_position(&self, position: &NormalizedPosition) -> Result<bool, StorageError> {
        let result = sqlx::query(
            "INSERT INTO normalized_positions \
             (device_id, gps_time, received_at, latitude, longitude, speed_kmh, heading, \
              battery_percent, odometer_km, ignition_on, ignition_confidence, ignition_method) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12) \
             ON CONFLICT (device_id, gps_time) DO NOTHING",
        )
        .bind(&position.device_id)
        .bind(position.gps_time)
        .bind(position.received_at)
        .bind(position.latitude)
        .bind(position.longitude)
        .bind(position.speed_kmh)
        .bind(position.heading)
        .bind(position.battery_percent)
        .bind(position.odometer_km)
        .bind(position.ignition_on)
        .bind(position.ignition_confidence)
        .bind(position.ignition_method.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn upsert_latest(&self, position: &NormalizedPosition) -> Result<(), StorageError> {
        sqlx::query(
            "INSERT INTO latest_positions \
             (device_id, gps_time, received_at, latitude, longitude, speed_kmh, heading, \
              battery_percent, odometer_km, ignition_on, ignition_confidence, ignition_method) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12) \
             ON CONFLICT (device_id) DO UPDATE SET \
               gps_time = EXCLUDED.gps_time, \
               received_at = EXCLUDED.received_at, \
               latitude = EXCLUDED.latitude, \
               longitude = EXCLUDED.longitude, \
               speed_kmh = EXCLUDED.speed_kmh, \
               heading = EXCLUDED.heading, \
               battery_percent = EXCLUDED.battery_percent, \
               odometer_km = EXCLUDED.odometer_km, \
               ignition_on = EXCLUDED.ignition_on, \
               ignition_confidence = EXCLUDED.ignition_confidence, \
               ignition_method = EXCLUDED.ignition_method",
        )
        .bind(&position.device_id)
        .bind(position.gps_time)
        .bind(position.received_at)
        .bind(position.latitude)
        .bind(position.longitude)
        .bind(position.speed_kmh)
        .bind(position.heading)
        .bind(position.battery_percent)
        .bind(position.odometer_km)
        .bind(position.ignition_on)
        .bind(position.ignition_confidence)
        .bind(position.ignition_method.as_str())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn latest_position(
        &self,
        device_id: &str,
    ) -> Result<Option<NormalizedPosition>, StorageError> {
        let row = sqlx::query("SELECT * FROM latest_positions WHERE device_id = $1")
            .bind(device_id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(position_from_row).transpose().map_err(Into::into)
    }

    async fn positions_in_range(
        &self,
        device_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<NormalizedPosition>, StorageError> {
        let rows = sqlx::query(
            "SELECT * FROM normalized_positions \
             WHERE device_id = $1 AND gps_time >= $2 AND gps_time <= $3 \
             ORDER BY gps_time ASC",
        )
        .bind(device_id)
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(position_from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(Into::into)
    }
}

#[async_trait]
impl TripStore for PgStore {
    async fn insert_trip(&self, trip: &Trip) -> Result<bool, StorageError> {
        let Some(end_time) = trip.end_time else {
            return Err(StorageError::InvalidRecord(
                "insert_trip requires a closed trip".into(),
            ));
        };

        // Pre-insert existence check; the unique index still backstops
        // races between concurrent segmentation runs
        let exists = sqlx::query(
            "SELECT 1 FROM trips WHERE device_id = $1 AND start_time = $2 AND end_time = $3",
        )
        .bind(&trip.device_id)
        .bind(trip.start_time)
        .bind(end_time)
        .fetch_optional(&self.pool)
        .await?;
        if exists.is_some() {
            return Ok(false);
        }

        let result = sqlx::query(
            "INSERT INTO trips \
             (id, device_id, start_time, end_time, start_latitude, start_longitude, \
              end_latitude, end_longitude, distance_km, duration_secs, max_speed_kmh, \
              avg_speed_kmh, ignition_confirmed) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13) \
             ON CONFLICT DO NOTHING",
        )
        .bind(trip.id)
        .bind(&trip.device_id)
        .bind(trip.start_time)
        .bind(end_time)
        .bind(trip.start_latitude)
        .bind(trip.start_longitude)
        .bind(trip.end_latitude)
        .bind(trip.end_longitude)
        .bind(trip.distance_km)
        .bind(trip.duration_secs)
        .bind(trip.max_speed_kmh)
        .bind(trip.avg_speed_kmh)
        .bind(trip.ignition_confirmed)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn upsert_open_trip(&self, trip: &Trip) -> Result<(), StorageError> {
        if trip.end_time.is_some() {
            return Err(StorageError::InvalidRecord(
                "upsert_open_trip requires an open trip".into(),
            ));
        }

        sqlx::query(
            "INSERT INTO trips \
             (id, device_id, start_time, end_time, start_latitude, start_longitude, \
              end_latitude, end_longitude, distance_km, duration_secs, max_speed_kmh, \
              avg_speed_kmh, ignition_confirmed) \
             VALUES ($1, $2, $3, NULL, $4, $5, $6, $7, $8, $9, $10, $11, $12) \
             ON CONFLICT (device_id) WHERE end_time IS NULL DO UPDATE SET \
               start_time = EXCLUDED.start_time, \
               start_latitude = EXCLUDED.start_latitude, \
               start_longitude = EXCLUDED.start_longitude, \
               end_latitude = EXCLUDED.end_latitude, \
               end_longitude = EXCLUDED.end_longitude, \
               distance_km = EXCLUDED.distance_km, \
               duration_secs = EXCLUDED.duration_secs, \
               max_speed_kmh = EXCLUDED.max_speed_kmh, \
               avg_speed_kmh = EXCLUDED.avg_speed_kmh, \
               ignition_confirmed = EXCLUDED.ignition_confirmed",
        )
        .bind(trip.id)
        .bind(&trip.device_id)
        .bind(trip.start_time)
        .bind(trip.start_latitude)
        .bind(trip.start_longitude)
        .bind(trip.end_latitude)
        .bind(trip.end_longitude)
        .bind(trip.distance_km)
        .bind(trip.duration_secs)
        .bind(trip.max_speed_kmh)
        .bind(trip.avg_speed_kmh)
        .bind(trip.ignition_confirmed)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_open_trip(&self, device_id: &str) -> Result<Option<Trip>, StorageError> {
        let row = sqlx::query("SELECT * FROM trips WHERE device_id = $1 AND end_time IS NULL")
            .bind(device_id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(trip_from_row).transpose().map_err(Into::into)
    }

    async fn close_open_trip(&self, trip: &Trip) -> Result<bool, StorageError> {
        let Some(end_time) = trip.end_time else {
            return Err(StorageError::InvalidRecord(
                "close_open_trip requires a closed trip".into(),
            ));
        };

        let result = sqlx::query(
            "UPDATE trips SET \
               end_time = $3, \
               end_latitude = $4, \
               end_longitude = $5, \
               distance_km = $6, \
               duration_secs = $7, \
               max_speed_kmh = $8, \
               avg_speed_kmh = $9, \
               ignition_confirmed = $10 \
             WHERE device_id = $1 AND start_time = $2 AND end_time IS NULL",
        )
        .bind(&trip.device_id)
        .bind(trip.start_time)
        .bind(end_time)
        .bind(trip.end_latitude)
        .bind(trip.end_longitude)
        .bind(trip.distance_km)
        .bind(trip.duration_secs)
        .bind(trip.max_speed_kmh)
        .bind(trip.avg_speed_kmh)
        .bind(trip.ignition_confirmed)
        .execute(&self.pool)
        .await;

        match result {
            Ok(done) => Ok(done.rows_affected() > 0),
            Err(e) if is_unique_violation(&e) => {
                // A concurrent run already stored this span as a closed
                // trip; the open row is redundant
                warn!(
                    device_id = %trip.device_id,
                    start_time = %trip.start_time,
                    "trip closed concurrently, dropping redundant open row"
                );
                sqlx::query(
                    "DELETE FROM trips \
                     WHERE device_id = $1 AND start_time = $2 AND end_time IS NULL",
                )
                .bind(&trip.device_id)
                .bind(trip.start_time)
                .execute(&self.pool)
                .await?;
                Ok(true)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn update_trip_coordinates(&self, trip: &Trip) -> Result<(), StorageError> {
        let result = sqlx::query(
            "UPDATE trips SET \
               start_latitude = $2, \
               start_longitude = $3, \
               end_latitude = $4, \
               end_longitude = $5, \
               distance_km = $6 \
             WHERE id = $1",
        )
        .bind(trip.id)
        .bind(trip.start_latitude)
        .bind(trip.start_longitude)
        .bind(trip.end_latitude)
        .bind(trip.end_longitude)
        .bind(trip.distance_km)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound);
        }
        Ok(())
    }

    async fn trips_missing_coordinates(&self, limit: i64) -> Result<Vec<Trip>, StorageError> {
        let rows = sqlx::query(
            "SELECT * FROM trips \
             WHERE end_time IS NOT NULL \
               AND (start_latitude IS NULL OR start_longitude IS NULL \
                    OR end_latitude IS NULL OR end_longitude IS NULL) \
             ORDER BY start_time DESC \
             LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(trip_from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(Into::into)
    }

    async fn trips_in_range(
        &self,
        device_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Trip>, StorageError> {
        let rows = sqlx::query(
            "SELECT * FROM trips \
             WHERE device_id = $1 AND start_time >= $2 AND start_time <= $3 \
             ORDER BY start_time ASC",
        )
        .bind(device_id)
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(trip_from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(Into::into)
    }
}

#[async_trait]
impl AccIntervalStore for PgStore {
    async fn insert_interval(&self, interval: &AccStateInterval) -> Result<bool, StorageError> {
        let state = match interval.state {
            AccState::On => "on",
            AccState::Off => "off",
        };

        let result = sqlx::query(
            "INSERT INTO acc_state_intervals \
             (device_id, state, begin_time, end_time, begin_latitude, begin_longitude, \
              end_latitude, end_longitude, source) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
             ON CONFLICT (device_id, state, begin_time) DO NOTHING",
        )
        .bind(&interval.device_id)
        .bind(state)
        .bind(interval.begin_time)
        .bind(interval.end_time)
        .bind(interval.begin_latitude)
        .bind(interval.begin_longitude)
        .bind(interval.end_latitude)
        .bind(interval.end_longitude)
        .bind(&interval.source)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn intervals_in_range(
        &self,
        device_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<AccStateInterval>, StorageError> {
        let rows = sqlx::query(
            "SELECT * FROM acc_state_intervals \
             WHERE device_id = $1 AND begin_time >= $2 AND begin_time <= $3 \
             ORDER BY begin_time ASC",
        )
        .bind(device_id)
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(interval_from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(Into::into)
    }
}
