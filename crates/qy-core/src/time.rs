//! Time expression parsing and epoch-millisecond helpers.
//!
//! All timestamps handled by Quarry are UTC epoch milliseconds. Date-only
//! expressions used as an *end* bound mean "through the end of that day",
//! i.e. the exclusive midnight of the following day.

use crate::error::{CoreError, CoreResult};
use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, TimeZone, Utc};

/// UTC epoch milliseconds.
pub type Timestamp = i64;

/// Milliseconds in one hour.
pub const HOUR_MS: i64 = 60 * 60 * 1000;

/// Milliseconds in one day.
pub const DAY_MS: i64 = 24 * HOUR_MS;

/// Current wall-clock time as epoch milliseconds.
pub fn now_ms() -> Timestamp {
    Utc::now().timestamp_millis()
}

/// Convert epoch milliseconds to a UTC datetime.
pub fn to_datetime(ts: Timestamp) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ts)
        .single()
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

/// Format as `YYYY-MM-DD`.
pub fn to_ds(ts: Timestamp) -> String {
    to_datetime(ts).format("%Y-%m-%d").to_string()
}

/// Format as `YYYY-MM-DD HH:MM:SS`.
pub fn to_ts(ts: Timestamp) -> String {
    to_datetime(ts).format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Midnight (UTC) of the day containing `ts`.
pub fn day_start(ts: Timestamp) -> Timestamp {
    ts.div_euclid(DAY_MS) * DAY_MS
}

/// Midnight of the previous day, relative to `now`.
pub fn yesterday(now: Timestamp) -> Timestamp {
    day_start(now) - DAY_MS
}

/// How a parsed expression should be anchored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Bound {
    Start,
    End,
}

/// Parse a start-bound time expression.
///
/// Accepts `YYYY-MM-DD`, `YYYY-MM-DD HH:MM:SS`, `YYYY-MM-DDTHH:MM:SS`,
/// raw epoch milliseconds, `now`, `today`, and `yesterday`.
pub fn parse_start(value: &str, now: Timestamp) -> CoreResult<Timestamp> {
    parse(value, now, Bound::Start)
}

/// Parse an end-bound time expression (date-only values are end-of-day).
pub fn parse_end(value: &str, now: Timestamp) -> CoreResult<Timestamp> {
    parse(value, now, Bound::End)
}

/// Parse a point-in-time expression (`latest`); dates resolve like ends.
pub fn parse_latest(value: &str, now: Timestamp) -> CoreResult<Timestamp> {
    parse(value, now, Bound::End)
}

fn parse(value: &str, now: Timestamp, bound: Bound) -> CoreResult<Timestamp> {
    let trimmed = value.trim();
    let invalid = || CoreError::InvalidTime {
        value: value.to_string(),
    };

    let date_like = |midnight: Timestamp| match bound {
        Bound::Start => midnight,
        Bound::End => midnight + DAY_MS,
    };

    match trimmed.to_ascii_lowercase().as_str() {
        "now" => return Ok(now),
        "today" => return Ok(date_like(day_start(now))),
        "yesterday" => return Ok(date_like(yesterday(now))),
        _ => {}
    }

    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        let midnight = date
            .and_hms_opt(0, 0, 0)
            .ok_or_else(invalid)?
            .and_utc()
            .timestamp_millis();
        return Ok(date_like(midnight));
    }

    for fmt in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(trimmed, fmt) {
            return Ok(dt.and_utc().timestamp_millis());
        }
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(dt.with_timezone(&Utc).timestamp_millis());
    }

    trimmed.parse::<i64>().map_err(|_| invalid())
}

/// Convert a number of days into milliseconds.
pub fn days_to_ms(days: u32) -> i64 {
    Duration::days(i64::from(days)).num_milliseconds()
}

#[cfg(test)]
#[path = "time_test.rs"]
mod tests;
