//! GPS51 Platform API Client
//!
//! Async HTTP client for the GPS51 tracking platform: session login with
//! transparent token refresh, serialized outbound rate limiting, and bounded
//! retry with exponential backoff. Device reports are deserialized
//! permissively: the platform mixes numeric and string encodings across
//! firmware generations.

mod client;
mod error;
mod throttle;
mod types;

pub use client::{ClientConfig, Gps51Client, VendorApi};
pub use error::ClientError;
pub use throttle::{OutboundThrottle, RateLimitConfig};
pub use types::{AccState, AccStateInterval, RawDeviceReport};
