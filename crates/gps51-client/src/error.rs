//! Vendor API Error Types

use thiserror::Error;

/// Errors that can occur while talking to the GPS51 platform
#[derive(Debug, Error)]
pub enum ClientError {
    /// Transport-level failure (connect, TLS, timeout)
    #[error("HTTP transport error: {0}")]
    Http(#[from] reqwest::Error),

    /// Platform rejected the call with a non-zero status
    #[error("API error {status}: {message}")]
    Api { status: i32, message: String },

    /// Login failed or the platform returned no token
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Platform signalled the session token is no longer valid
    #[error("Session token expired")]
    TokenExpired,

    /// Platform or proxy rejected the call for rate limiting
    #[error("Rate limited by upstream")]
    RateLimited,

    /// Response body parsed as JSON but not as the expected envelope shape
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// All retry attempts exhausted
    #[error("Retries exhausted after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },
}
