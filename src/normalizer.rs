//! Temporal normalization
//!
//! This module converts the timestamps of every input stream into one comparable
//! unit: milliseconds since the Unix epoch.
//! - Integer epoch values pass through (milliseconds) or are scaled (seconds)
//! - Human-readable values are parsed with a chrono pattern and shifted by the
//!   recording clock's UTC offset

use crate::error::SyncError;
use chrono::{DateTime, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;

const MS_PER_SECOND: i64 = 1_000;
const MS_PER_MINUTE: i64 = 60_000;

/// Expected layout of a timestamp cell
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TimestampFormat {
    /// Integer milliseconds since the epoch (already normalized)
    EpochMillis,
    /// Integer seconds since the epoch
    EpochSeconds,
    /// chrono strftime pattern, e.g. `%Y-%m-%d %H:%M:%S`
    Pattern(String),
}

impl TimestampFormat {
    pub fn pattern(pattern: impl Into<String>) -> Self {
        TimestampFormat::Pattern(pattern.into())
    }
}

impl From<String> for TimestampFormat {
    fn from(value: String) -> Self {
        match value.as_str() {
            "epoch_millis" => TimestampFormat::EpochMillis,
            "epoch_seconds" => TimestampFormat::EpochSeconds,
            _ => TimestampFormat::Pattern(value),
        }
    }
}

impl From<TimestampFormat> for String {
    fn from(format: TimestampFormat) -> Self {
        format.to_string()
    }
}

impl fmt::Display for TimestampFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimestampFormat::EpochMillis => f.write_str("epoch_millis"),
            TimestampFormat::EpochSeconds => f.write_str("epoch_seconds"),
            TimestampFormat::Pattern(pattern) => f.write_str(pattern),
        }
    }
}

/// Normalize a textual timestamp to milliseconds since the epoch.
///
/// `utc_offset_minutes` is the offset of the recording clock from UTC. It only
/// applies to [`TimestampFormat::Pattern`]; epoch values are absolute instants, so
/// normalizing an already-normalized millisecond value is a no-op.
///
/// # Example
/// ```
/// use confluence::normalizer::{normalize_timestamp, TimestampFormat};
///
/// let ms = normalize_timestamp("1970-01-01 01:00:00", &TimestampFormat::pattern("%Y-%m-%d %H:%M:%S"), 60)?;
/// assert_eq!(ms, 0);
/// # Ok::<(), confluence::SyncError>(())
/// ```
pub fn normalize_timestamp(
    text: &str,
    format: &TimestampFormat,
    utc_offset_minutes: i32,
) -> Result<i64, SyncError> {
    let trimmed = text.trim();
    let malformed = || SyncError::MalformedTimestamp {
        value: text.to_string(),
        format: format.to_string(),
    };

    let ms = match format {
        TimestampFormat::EpochMillis => trimmed.parse::<i64>().ok(),
        TimestampFormat::EpochSeconds => trimmed
            .parse::<i64>()
            .ok()
            .and_then(|secs| secs.checked_mul(MS_PER_SECOND)),
        TimestampFormat::Pattern(pattern) => {
            let wall_clock =
                NaiveDateTime::parse_from_str(trimmed, pattern).map_err(|_| malformed())?;
            wall_clock
                .and_utc()
                .timestamp_millis()
                .checked_sub(i64::from(utc_offset_minutes) * MS_PER_MINUTE)
        }
    };

    // Outside chrono's calendar range is not a real instant
    ms.filter(|ms| DateTime::from_timestamp_millis(*ms).is_some())
        .ok_or_else(malformed)
}
