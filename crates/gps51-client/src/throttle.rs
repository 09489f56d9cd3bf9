//! Outbound Rate Limiting
//!
//! The platform enforces per-account and per-IP request quotas. All outbound
//! calls pass through a single GCRA limiter so concurrent tasks cannot burst
//! past the quota.

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use std::num::NonZeroU32;
use tracing::debug;

/// Outbound rate limit configuration
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Sustained requests allowed per minute
    pub requests_per_minute: u32,
    /// Burst size (requests that may be made back-to-back)
    pub burst_size: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: 60,
            burst_size: 5,
        }
    }
}

impl RateLimitConfig {
    /// Conservative config for shared-IP deployments
    pub fn strict() -> Self {
        Self {
            requests_per_minute: 20,
            burst_size: 2,
        }
    }

    /// Relaxed config for dedicated proxy egress
    pub fn lenient() -> Self {
        Self {
            requests_per_minute: 120,
            burst_size: 10,
        }
    }
}

/// Serializes outbound vendor calls behind a GCRA rate limiter
pub struct OutboundThrottle {
    limiter: DefaultDirectRateLimiter,
}

impl OutboundThrottle {
    /// Create a throttle from the given config (zero values are bumped to 1)
    pub fn new(config: &RateLimitConfig) -> Self {
        let per_minute =
            NonZeroU32::new(config.requests_per_minute.max(1)).unwrap_or(NonZeroU32::MIN);
        let burst = NonZeroU32::new(config.burst_size.max(1)).unwrap_or(NonZeroU32::MIN);

        Self {
            limiter: RateLimiter::direct(Quota::per_minute(per_minute).allow_burst(burst)),
        }
    }

    /// Wait until the next outbound call is permitted
    pub async fn acquire(&self) {
        if self.limiter.check().is_err() {
            debug!("outbound call throttled, waiting for quota");
            self.limiter.until_ready().await;
        }
    }
}
