//! Timestamp parsing for backend payloads.
//!
//! The backend serializes local wall-clock times without an offset
//! (`2025-03-04T09:15:02.123456`), but older records carry RFC 3339 strings.

use chrono::{DateTime, NaiveDateTime};
use serde::{Deserialize, Deserializer};

/// Parse a backend timestamp. Accepts naive ISO 8601 or RFC 3339.
pub fn parse_timestamp(ts: &str) -> Option<NaiveDateTime> {
    let ts = ts.trim();
    if ts.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(ts) {
        return Some(dt.naive_local());
    }
    ts.parse::<NaiveDateTime>()
        .ok()
        .or_else(|| NaiveDateTime::parse_from_str(ts, "%Y-%m-%d %H:%M:%S%.f").ok())
}

/// Serde helper: optional timestamp, unparseable values become `None`.
pub fn deserialize_opt_timestamp<'de, D>(deserializer: D) -> Result<Option<NaiveDateTime>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.as_deref().and_then(parse_timestamp))
}
