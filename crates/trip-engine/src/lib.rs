//! Trip Segmentation Engine
//!
//! Partitions an ordered stream of normalized positions for one device into
//! discrete trips: ignition-on to ignition-off, with idle-timeout and
//! data-gap closure rules, and a movement-onset fallback for devices whose
//! reports never carry a usable ignition signal.
//!
//! Segmentation is a pure fold over the input stream: the same positions
//! always produce the same trips, whether fed incrementally or as a single
//! backfill range.

mod config;
mod corroborate;
mod geo;
mod reconcile;
mod segmenter;
mod types;

pub use config::TripConfig;
pub use corroborate::{corroborate, Corroboration, CorroborationConfig};
pub use geo::haversine_km;
pub use reconcile::backfill_coordinates;
pub use segmenter::{segment, SegmentationOutcome, TripSegmenter};
pub use types::Trip;
