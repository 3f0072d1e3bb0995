//! Record timestamps.
//!
//! All comparisons use epoch milliseconds. Records carry RFC 3339 strings
//! with millisecond precision and a `Z` suffix.

use chrono::{DateTime, SecondsFormat, Utc};

/// Current time as epoch milliseconds.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Current time as a record timestamp string.
pub fn now_string() -> String {
    format_millis(now_millis())
}

/// Formats epoch milliseconds as a record timestamp string.
///
/// Out-of-range values format as the epoch.
pub fn format_millis(millis: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(millis)
        .unwrap_or_default()
        .to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parses a record timestamp string into epoch milliseconds.
///
/// Missing or unparsable values yield `0`.
pub fn parse_millis(value: Option<&str>) -> i64 {
    value
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map_or(0, |dt| dt.timestamp_millis())
}
