//! GPS51 HTTP Client
//!
//! Action-based JSON protocol over a single `/webapi` endpoint. Every call
//! carries a session token obtained via the login action; the platform
//! invalidates tokens server-side, so expiry is handled both proactively
//! (local TTL) and reactively (token-rejected status triggers exactly one
//! re-login and retry).

use crate::error::ClientError;
use crate::throttle::{OutboundThrottle, RateLimitConfig};
use crate::types::{AccStateInterval, ApiResponse, RawDeviceReport};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Platform status code for a successful call
const STATUS_OK: i32 = 0;
/// Platform status code for an expired or invalid session token
const STATUS_TOKEN_INVALID: i32 = 8902;
/// Platform status code for per-account rate limiting
const STATUS_RATE_LIMITED: i32 = 8903;

/// Client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Platform base URL, e.g. "https://api.gps51.example"
    pub base_url: String,
    /// Account username
    pub username: String,
    /// Account password
    pub password: String,
    /// Outbound rate limit
    pub rate_limit: RateLimitConfig,
    /// Maximum retry attempts for transient failures
    pub max_retries: u32,
    /// Base backoff delay, doubled per attempt
    pub retry_backoff_ms: u64,
    /// Local session token lifetime; refreshed proactively after this
    pub token_ttl_minutes: i64,
    /// Per-request timeout
    pub request_timeout_secs: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            username: String::new(),
            password: String::new(),
            rate_limit: RateLimitConfig::default(),
            max_retries: 3,
            retry_backoff_ms: 500,
            token_ttl_minutes: 55,
            request_timeout_secs: 30,
        }
    }
}

/// Decode a response body into the platform envelope.
///
/// Transport failures surface as `ClientError::Http` upstream; a body that
/// arrives intact but is not the envelope shape (proxy error pages, partial
/// JSON) is `MalformedResponse` and is not worth retrying.
fn decode_envelope<T>(body: &str) -> Result<ApiResponse<T>, ClientError>
where
    T: DeserializeOwned,
{
    serde_json::from_str(body).map_err(|e| ClientError::MalformedResponse(e.to_string()))
}

/// Cached session token with its acquisition time
#[derive(Debug, Clone)]
struct SessionToken {
    value: String,
    acquired_at: DateTime<Utc>,
}

impl SessionToken {
    fn is_stale(&self, ttl_minutes: i64) -> bool {
        Utc::now() - self.acquired_at >= ChronoDuration::minutes(ttl_minutes)
    }
}

/// The position/ACC endpoints the ingestion pipeline depends on.
///
/// Split out as a trait so the pipeline can be exercised against a scripted
/// vendor in tests.
#[async_trait]
pub trait VendorApi: Send + Sync {
    /// Latest report for each of the given devices
    async fn last_positions(
        &self,
        device_ids: &[String],
    ) -> Result<Vec<RawDeviceReport>, ClientError>;

    /// Historical reports for one device, ascending by report time
    async fn position_history(
        &self,
        device_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<RawDeviceReport>, ClientError>;

    /// Vendor-authoritative ACC on/off intervals for one device
    async fn acc_intervals(
        &self,
        device_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<AccStateInterval>, ClientError>;
}

/// GPS51 platform client
pub struct Gps51Client {
    http: reqwest::Client,
    config: ClientConfig,
    throttle: OutboundThrottle,
    token: RwLock<Option<SessionToken>>,
}

impl Gps51Client {
    /// Create a client; no network traffic until the first call
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        let throttle = OutboundThrottle::new(&config.rate_limit);

        Ok(Self {
            http,
            config,
            throttle,
            token: RwLock::new(None),
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/webapi", self.config.base_url.trim_end_matches('/'))
    }

    /// Authenticate and cache the session token
    async fn login(&self) -> Result<String, ClientError> {
        self.throttle.acquire().await;

        let body = json!({
            "username": self.config.username,
            "password": self.config.password,
        });

        let response = self
            .http
            .post(self.endpoint())
            .query(&[("action", "login")])
            .json(&body)
            .send()
            .await?;

        if response.status() == StatusCode::TOO_MANY_REQUESTS {
            return Err(ClientError::RateLimited);
        }

        let body = response.text().await?;
        let envelope: ApiResponse<serde_json::Value> = decode_envelope(&body)?;
        if envelope.status != STATUS_OK {
            return Err(ClientError::Auth(
                envelope.message.unwrap_or_else(|| "login rejected".into()),
            ));
        }

        let token = envelope
            .token
            .ok_or_else(|| ClientError::Auth("login response missing token".into()))?;

        *self.token.write().await = Some(SessionToken {
            value: token.clone(),
            acquired_at: Utc::now(),
        });

        info!("authenticated with GPS51 platform");
        Ok(token)
    }

    /// Return the cached token, logging in if absent or past its TTL
    async fn ensure_token(&self) -> Result<String, ClientError> {
        {
            let guard = self.token.read().await;
            if let Some(token) = guard.as_ref() {
                if !token.is_stale(self.config.token_ttl_minutes) {
                    return Ok(token.value.clone());
                }
                debug!("session token past TTL, refreshing");
            }
        }
        self.login().await
    }

    fn backoff_delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(6);
        Duration::from_millis(self.config.retry_backoff_ms.saturating_mul(1 << exp))
    }

    /// One request/response exchange, no retry
    async fn call_once<T>(&self, action: &str, params: &serde_json::Value) -> Result<T, ClientError>
    where
        T: DeserializeOwned + Default,
    {
        self.throttle.acquire().await;
        let token = self.ensure_token().await?;

        let response = self
            .http
            .post(self.endpoint())
            .query(&[("action", action), ("token", token.as_str())])
            .json(params)
            .send()
            .await?;

        if response.status() == StatusCode::TOO_MANY_REQUESTS {
            return Err(ClientError::RateLimited);
        }

        let body = response.text().await?;
        let envelope: ApiResponse<T> = decode_envelope(&body)?;
        match envelope.status {
            STATUS_OK => Ok(envelope.records.unwrap_or_default()),
            STATUS_TOKEN_INVALID => Err(ClientError::TokenExpired),
            STATUS_RATE_LIMITED => Err(ClientError::RateLimited),
            status => Err(ClientError::Api {
                status,
                message: envelope.message.unwrap_or_default(),
            }),
        }
    }

    /// Call with bounded retry: transport errors and rate limits back off
    /// exponentially; a rejected token triggers one transparent re-login.
    async fn call<T>(&self, action: &str, params: serde_json::Value) -> Result<T, ClientError>
    where
        T: DeserializeOwned + Default,
    {
        let mut reauthenticated = false;
        let mut attempt: u32 = 0;

        loop {
            let err = match self.call_once::<T>(action, &params).await {
                Ok(records) => return Ok(records),
                Err(e) => e,
            };

            match err {
                ClientError::TokenExpired if !reauthenticated => {
                    warn!(action, "session token rejected, re-authenticating");
                    self.token.write().await.take();
                    reauthenticated = true;
                }
                e @ (ClientError::Http(_) | ClientError::RateLimited) => {
                    attempt += 1;
                    if attempt > self.config.max_retries {
                        return Err(ClientError::RetriesExhausted {
                            attempts: attempt,
                            last_error: e.to_string(),
                        });
                    }
                    let delay = self.backoff_delay(attempt);
                    warn!(
                        action,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "vendor call failed, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
                fatal => return Err(fatal),
            }
        }
    }
}

#[async_trait]
impl VendorApi for Gps51Client {
    async fn last_positions(
        &self,
        device_ids: &[String],
    ) -> Result<Vec<RawDeviceReport>, ClientError> {
        if device_ids.is_empty() {
            return Ok(Vec::new());
        }
        let params = json!({
            "deviceids": device_ids.join(","),
            "lastquerypositiontime": 0,
        });
        self.call("lastposition", params).await
    }

    async fn position_history(
        &self,
        device_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<RawDeviceReport>, ClientError> {
        let params = json!({
            "deviceid": device_id,
            "begintime": from.timestamp_millis(),
            "endtime": to.timestamp_millis(),
        });
        let mut records: Vec<RawDeviceReport> = self.call("querytracks", params).await?;
        // Downstream segmentation requires ascending time order
        records.sort_by_key(|r| r.reported_at);
        Ok(records)
    }

    async fn acc_intervals(
        &self,
        device_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<AccStateInterval>, ClientError> {
        let params = json!({
            "deviceid": device_id,
            "begintime": from.timestamp_millis(),
            "endtime": to.timestamp_millis(),
        });
        let mut records: Vec<AccStateInterval> = self.call("queryaccstatus", params).await?;
        records.sort_by_key(|r| r.begin_time);
        Ok(records)
    }
}
