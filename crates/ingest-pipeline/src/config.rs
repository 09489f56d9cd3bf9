//! Pipeline Configuration
//!
//! Layered: built-in defaults, then an optional `fleet.toml`, then
//! `FLEET_*` environment variables (`__` separates nested keys, e.g.
//! `FLEET_VENDOR__BASE_URL`).

use crate::PipelineError;
use gps51_client::ClientConfig;
use serde::{Deserialize, Serialize};
use telemetry_normalizer::NormalizerConfig;
use trip_engine::{CorroborationConfig, TripConfig};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Devices polled each cycle
    pub devices: Vec<String>,

    /// How far back the incremental segmentation window reaches
    pub tail_window_hours: i64,

    /// Chunk size for historical backfill
    pub backfill_chunk_hours: i64,

    /// Wall-clock budget per invocation; backfill stops between chunks
    /// once exceeded (rerun resumes idempotently)
    pub cycle_budget_secs: u64,

    /// Scheduled-loop period
    pub interval_secs: u64,

    /// Trips examined per reconciliation pass
    pub reconcile_batch_size: i64,

    pub vendor: ClientConfig,
    pub normalizer: NormalizerConfig,
    pub trip: TripConfig,
    pub corroboration: CorroborationConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            devices: Vec::new(),
            tail_window_hours: 24,
            backfill_chunk_hours: 24,
            cycle_budget_secs: 55,
            interval_secs: 300,
            reconcile_batch_size: 100,
            vendor: ClientConfig::default(),
            normalizer: NormalizerConfig::default(),
            trip: TripConfig::default(),
            corroboration: CorroborationConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Load from defaults < optional `fleet.toml` < `FLEET_*` environment
    pub fn load() -> Result<Self, PipelineError> {
        let settings = ::config::Config::builder()
            .add_source(::config::File::with_name("fleet").required(false))
            .add_source(
                ::config::Environment::with_prefix("FLEET")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("devices"),
            )
            .build()?;

        Ok(settings.try_deserialize()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.tail_window_hours, 24);
        assert_eq!(config.interval_secs, 300);
        assert!(config.devices.is_empty());
        assert_eq!(config.trip.idle_timeout_secs, 180);
    }
}
