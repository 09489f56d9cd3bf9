//! GPS51 Wire Types
//!
//! Payload shapes for the platform's JSON protocol. Numeric fields tolerate
//! string encodings ("12.5") and missing keys: older firmware revisions are
//! inconsistent about both.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// One telemetry sample as received from the platform.
///
/// Ephemeral: consumed by the normalizer immediately, never persisted
/// verbatim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawDeviceReport {
    /// Device identifier (IMEI-style string)
    #[serde(alias = "deviceid")]
    pub device_id: String,

    /// 32-bit status word; low 16 bits follow the JT808 base protocol,
    /// high 16 bits are a vendor extension
    #[serde(default, deserialize_with = "lenient_u32")]
    pub status: Option<u32>,

    /// Human-readable status string, e.g. "ACC ON, GPS fixed"
    #[serde(default, alias = "strstatus", alias = "statusText")]
    pub status_text: Option<String>,

    /// Latitude in degrees
    #[serde(default, alias = "callat", deserialize_with = "lenient_f64")]
    pub latitude: Option<f64>,

    /// Longitude in degrees
    #[serde(default, alias = "callon", deserialize_with = "lenient_f64")]
    pub longitude: Option<f64>,

    /// Speed in the device's native unit (km/h or m/h depending on firmware)
    #[serde(default, deserialize_with = "lenient_f64")]
    pub speed: Option<f64>,

    /// Heading in degrees
    #[serde(default, alias = "course", deserialize_with = "lenient_f64")]
    pub heading: Option<f64>,

    /// Battery charge percentage
    #[serde(default, alias = "battery", deserialize_with = "lenient_f64")]
    pub battery_percent: Option<f64>,

    /// Cumulative odometer in km, when the device reports one
    #[serde(default, alias = "totaldistance", deserialize_with = "lenient_f64")]
    pub odometer_km: Option<f64>,

    /// GPS fix timestamp (epoch milliseconds on the wire)
    #[serde(alias = "updatetime", with = "chrono::serde::ts_milliseconds")]
    pub reported_at: DateTime<Utc>,
}

/// ACC line state as reported by the platform's interval endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccState {
    On,
    Off,
}

impl AccState {
    pub fn is_on(&self) -> bool {
        matches!(self, AccState::On)
    }
}

/// Vendor-authoritative ACC on/off interval.
///
/// Fetched from a dedicated endpoint and used to corroborate locally
/// inferred ignition transitions. Append-only once stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccStateInterval {
    #[serde(alias = "deviceid")]
    pub device_id: String,

    #[serde(deserialize_with = "lenient_acc_state")]
    pub state: AccState,

    #[serde(alias = "begintime", with = "chrono::serde::ts_milliseconds")]
    pub begin_time: DateTime<Utc>,

    #[serde(alias = "endtime", with = "chrono::serde::ts_milliseconds")]
    pub end_time: DateTime<Utc>,

    #[serde(default, alias = "beginlat", deserialize_with = "lenient_f64")]
    pub begin_latitude: Option<f64>,

    #[serde(default, alias = "beginlon", deserialize_with = "lenient_f64")]
    pub begin_longitude: Option<f64>,

    #[serde(default, alias = "endlat", deserialize_with = "lenient_f64")]
    pub end_latitude: Option<f64>,

    #[serde(default, alias = "endlon", deserialize_with = "lenient_f64")]
    pub end_longitude: Option<f64>,

    /// Which platform report produced this interval
    #[serde(default)]
    pub source: Option<String>,
}

/// Generic response envelope for platform calls
#[derive(Debug, Deserialize)]
pub(crate) struct ApiResponse<T> {
    pub status: i32,
    #[serde(default, alias = "cause")]
    pub message: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub records: Option<T>,
}

/// Number-or-string tolerant f64 field
fn lenient_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Num(f64),
        Text(String),
    }

    Ok(match Option::<Raw>::deserialize(deserializer)? {
        Some(Raw::Num(n)) if n.is_finite() => Some(n),
        Some(Raw::Text(s)) => s.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
        _ => None,
    })
}

/// Number-or-string tolerant u32 field
fn lenient_u32<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Num(u64),
        Text(String),
    }

    Ok(match Option::<Raw>::deserialize(deserializer)? {
        Some(Raw::Num(n)) => u32::try_from(n).ok(),
        Some(Raw::Text(s)) => s.trim().parse::<u32>().ok(),
        None => None,
    })
}

/// ACC state arrives as "ON"/"OFF", "1"/"0", or a bare integer
fn lenient_acc_state<'de, D>(deserializer: D) -> Result<AccState, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Num(i64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Num(n) => Ok(if n != 0 { AccState::On } else { AccState::Off }),
        Raw::Text(s) => match s.trim().to_ascii_uppercase().as_str() {
            "ON" | "1" => Ok(AccState::On),
            "OFF" | "0" => Ok(AccState::Off),
            other => Err(serde::de::Error::custom(format!(
                "unrecognized ACC state: {other}"
            ))),
        },
    }
}
