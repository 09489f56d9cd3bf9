//! Fleet Telemetry Ingestion Daemon
//!
//! Default mode runs scheduled ingestion cycles; one-shot modes cover
//! operational tasks:
//!
//! ```text
//! ingestd                                    scheduled loop
//! ingestd once                               single cycle
//! ingestd backfill <device> <from> <to>      historical range (RFC3339)
//! ingestd reconcile                          repair trip coordinates
//! ```

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use fleet_storage::PgStore;
use gps51_client::Gps51Client;
use ingest_pipeline::{run_backfill, run_cycle, run_reconcile, PipelineConfig};
use std::time::Duration;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

/// Initialize logging
fn init_logging() {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .expect("Failed to set tracing subscriber");
}

fn parse_time(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .with_context(|| format!("invalid RFC3339 timestamp: {raw}"))
}

async fn run_loop(
    client: &Gps51Client,
    store: &PgStore,
    config: &PipelineConfig,
) -> Result<()> {
    let period = Duration::from_secs(config.interval_secs.max(60));
    let mut ticker = tokio::time::interval(period);

    info!(
        interval_secs = period.as_secs(),
        devices = config.devices.len(),
        "starting scheduled ingestion"
    );

    loop {
        ticker.tick().await;
        match run_cycle(client, store, config, Utc::now()).await {
            Ok(report) => info!(
                succeeded = report.succeeded,
                failed = report.failed,
                positions = report.positions_written,
                trips = report.trips_created,
                mean_confidence = report.quality.mean_confidence,
                "cycle finished"
            ),
            Err(e) => error!(error = %e, "cycle failed, retrying on next tick"),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    info!(
        "=== MyMoto Fleet Telemetry Pipeline v{} ===",
        env!("CARGO_PKG_VERSION")
    );

    let config = PipelineConfig::load().context("loading configuration")?;
    if config.vendor.base_url.is_empty() {
        bail!("vendor base URL is not configured (FLEET_VENDOR__BASE_URL)");
    }
    if config.devices.is_empty() {
        info!("no devices configured (FLEET_DEVICES); cycles will be no-ops");
    }

    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
    let store = PgStore::connect(&database_url)
        .await
        .context("connecting to database")?;
    let client = Gps51Client::new(config.vendor.clone()).context("building vendor client")?;

    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.first().map(String::as_str) {
        None => run_loop(&client, &store, &config).await,

        Some("once") => {
            let report = run_cycle(&client, &store, &config, Utc::now()).await?;
            info!(
                succeeded = report.succeeded,
                failed = report.failed,
                skipped = report.skipped,
                positions = report.positions_written,
                trips_created = report.trips_created,
                trips_skipped = report.trips_skipped,
                "single cycle finished"
            );
            Ok(())
        }

        Some("backfill") => {
            let (Some(device_id), Some(from_raw), Some(to_raw)) =
                (args.get(1), args.get(2), args.get(3))
            else {
                bail!("usage: ingestd backfill <device> <from-rfc3339> <to-rfc3339>");
            };
            let from = parse_time(from_raw)?;
            let to = parse_time(to_raw)?;
            if to <= from {
                bail!("backfill range is empty: {from} .. {to}");
            }

            let report =
                run_backfill(&client, &store, &config, device_id, from, to, Utc::now()).await?;
            info!(
                chunks = report.chunks_processed,
                positions = report.positions_written,
                trips_created = report.trips_created,
                completed = report.completed,
                "backfill finished"
            );
            if !report.completed {
                info!("budget ran out; rerun the same command to continue");
            }
            Ok(())
        }

        Some("reconcile") => {
            let report = run_reconcile(&store, &config).await?;
            info!(
                examined = report.examined,
                repaired = report.repaired,
                "reconciliation finished"
            );
            Ok(())
        }

        Some(other) => {
            bail!("unknown mode {other}; expected once | backfill <device> <from> <to> | reconcile")
        }
    }
}
