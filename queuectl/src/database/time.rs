//! Timestamp helpers for the database layer.
//!
//! Every timestamp column (`created_at`, `updated_at`, `run_at`, log
//! `timestamp`) is an `INTEGER` holding Unix epoch milliseconds (UTC), so
//! ordering and eligibility checks are plain integer comparisons.

use chrono::{DateTime, SecondsFormat, TimeZone, Utc};

/// Current wall-clock time as Unix epoch milliseconds (UTC).
#[inline]
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Convert Unix epoch milliseconds to `DateTime<Utc>`.
///
/// Values outside chrono's supported range clamp to the nearest representable timestamp.
pub fn ms_to_datetime(ms: i64) -> DateTime<Utc> {
    match Utc.timestamp_millis_opt(ms) {
        chrono::LocalResult::Single(dt) => dt,
        chrono::LocalResult::Ambiguous(dt, _) => dt,
        chrono::LocalResult::None => {
            if ms.is_negative() {
                DateTime::<Utc>::MIN_UTC
            } else {
                DateTime::<Utc>::MAX_UTC
            }
        }
    }
}

/// Render epoch milliseconds as RFC 3339 with millisecond precision.
pub fn ms_to_rfc3339(ms: i64) -> String {
    ms_to_datetime(ms).to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse an RFC 3339 timestamp into epoch milliseconds.
pub fn rfc3339_to_ms(s: &str) -> Option<i64> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc).timestamp_millis())
}

/// `ms` shifted forward by `secs` seconds, saturating at the integer bounds.
#[inline]
pub fn add_secs(ms: i64, secs: u64) -> i64 {
    let delta = i64::try_from(secs).unwrap_or(i64::MAX).saturating_mul(1000);
    ms.saturating_add(delta)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rfc3339_round_trip() {
        let ms = 1_700_000_000_123;
        assert_eq!(rfc3339_to_ms(&ms_to_rfc3339(ms)), Some(ms));
        assert_eq!(ms_to_rfc3339(0), "1970-01-01T00:00:00.000Z");
    }

    #[test]
    fn test_add_secs_saturates() {
        assert_eq!(add_secs(1_000, 2), 3_000);
        assert_eq!(add_secs(i64::MAX - 10, 5), i64::MAX);
        assert_eq!(add_secs(0, u64::MAX), i64::MAX);
    }

    #[test]
    fn test_out_of_range_clamps() {
        assert_eq!(ms_to_datetime(i64::MAX), DateTime::<Utc>::MAX_UTC);
        assert_eq!(ms_to_datetime(i64::MIN), DateTime::<Utc>::MIN_UTC);
    }

    #[test]
    fn test_invalid_rfc3339() {
        assert_eq!(rfc3339_to_ms("yesterday"), None);
    }
}
