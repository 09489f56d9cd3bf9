//! Ingestion Pipeline
//!
//! Orchestrates one vendor-poll-to-store pass: fetch raw reports, normalize,
//! persist positions, re-segment the recent tail of each device's stream,
//! and write trips with duplicate-tolerant semantics. Also provides chunked
//! historical backfill and a coordinate reconciliation pass.
//!
//! Each device is processed independently; one device's failure is recorded
//! in the aggregate report and never aborts the batch.

mod backfill;
mod config;
mod quality;
mod reconcile;
mod runner;

pub use backfill::{run_backfill, BackfillReport};
pub use config::PipelineConfig;
pub use quality::{QualityMonitor, QualitySummary};
pub use reconcile::{run_reconcile, ReconcileReport};
pub use runner::{run_cycle, CycleReport};

use thiserror::Error;

/// Pipeline errors
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("vendor API error: {0}")]
    Client(#[from] gps51_client::ClientError),

    #[error("storage error: {0}")]
    Storage(#[from] fleet_storage::StorageError),

    #[error("configuration error: {0}")]
    Config(#[from] ::config::ConfigError),
}
