//! Small helpers shared by the hookmq crates
//!
//! - **Duration Conversion**: `"1h30m15s"`-style strings to [`Duration`], with serde helpers
//! - **Timestamp Utilities**: millisecond timestamps and their formatting
//!
//! ```rust
//! use hookmq_utils::{to_duration, timestamp_millis};
//!
//! assert_eq!(to_duration("1m30s").as_secs(), 90);
//! assert!(timestamp_millis() > 0);
//! ```

#![deny(unsafe_code)]

use std::time::Duration;

use serde::de::{self, Deserialize, Deserializer};

/// Timestamp representation in seconds since Unix epoch
pub type Timestamp = i64;

/// Timestamp representation in milliseconds since Unix epoch
pub type TimestampMillis = i64;

/// Deserialize Duration from human-readable string format
///
/// Unknown units, malformed numbers and durations that overflow are errors.
#[inline]
pub fn deserialize_duration<'de, D>(deserializer: D) -> std::result::Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let v = String::deserialize(deserializer)?;
    try_to_duration(&v).ok_or_else(|| de::Error::custom(format!("invalid duration, {v:?}")))
}

/// Convert human-readable duration string to Duration
///
/// # Supported units:
/// - ms: milliseconds
/// - s: seconds
/// - m: minutes
/// - h: hours
/// - d: days
///
/// Text that [`try_to_duration`] rejects counts as zero.
///
/// # Example:
/// ```
/// let duration = hookmq_utils::to_duration("1h30m15s");
/// assert_eq!(duration.as_secs(), 5415);
///
/// let slow = hookmq_utils::to_duration("250ms");
/// assert_eq!(slow.as_millis(), 250);
/// ```
#[inline]
pub fn to_duration(text: &str) -> Duration {
    try_to_duration(text).unwrap_or_default()
}

/// Like [`to_duration`], but `None` for empty text, an unknown unit, a malformed number
/// or a total beyond `u64` milliseconds.
pub fn try_to_duration(text: &str) -> Option<Duration> {
    let text = text.trim().to_lowercase().replace("ms", "Y");
    if text.is_empty() {
        return None;
    }
    let mut ms: u64 = 0;
    for x in text.split_inclusive(['s', 'm', 'h', 'd', 'Y']) {
        let mut chars = x.chars();
        let u = chars.next_back()?;
        let v = chars.as_str().trim().parse::<u64>().ok()?;
        let unit = match u {
            'Y' => 1,
            's' => 1000,
            'm' => 60_000,
            'h' => 3_600_000,
            'd' => 86_400_000,
            _ => return None,
        };
        ms = ms.checked_add(v.checked_mul(unit)?)?;
    }
    Some(Duration::from_millis(ms))
}

/// Get current timestamp in milliseconds
///
/// # Example:
/// ```
/// let ts = hookmq_utils::timestamp_millis();
/// assert!(ts > 0);
/// ```
#[inline]
pub fn timestamp_millis() -> TimestampMillis {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|t| t.as_millis() as i64)
        .unwrap_or_else(|_| chrono::Local::now().timestamp_millis())
}

/// Format millisecond timestamp to string
#[inline]
pub fn format_timestamp_millis(t: TimestampMillis) -> String {
    if t <= 0 {
        "".into()
    } else {
        use chrono::TimeZone;
        if let chrono::LocalResult::Single(t) = chrono::Local.timestamp_millis_opt(t) {
            t.format("%Y-%m-%d %H:%M:%S%.3f").to_string()
        } else {
            "".into()
        }
    }
}
