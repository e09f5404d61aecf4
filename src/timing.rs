//! # Arrival Timing Math
//!
//! Converts the timestamps reported by the transit API into the two durations
//! the board cares about: how long until the vehicle arrives, and how far it
//! deviates from its timetable.
//!
//! The API reports naive local timestamps (`2024-06-16T12:34:56`). They are
//! interpreted in a fixed civil time zone so the result does not depend on the
//! host clock's zone. Timestamps that carry an explicit offset are honored
//! as-is.

use chrono::{DateTime, Duration, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use thiserror::Error;

use crate::Timing;

/// Failure to interpret a single timestamp. Fatal only to the entry it belongs to.
#[derive(Error, Debug, PartialEq)]
pub enum TimingError {
    /// Not an ISO-8601 timestamp in any accepted form
    #[error("malformed timestamp {0:?}")]
    Malformed(String),

    /// Falls into a daylight-saving gap of the civil zone
    #[error("timestamp {0:?} does not exist in {1}")]
    Nonexistent(String, Tz),
}

const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// Parse an ISO-8601 timestamp, interpreting naive values in `zone`.
///
/// Ambiguous local times (the repeated hour when clocks go back) resolve to
/// the earlier instant.
pub fn parse_instant(raw: &str, zone: Tz) -> Result<DateTime<Utc>, TimingError> {
    let raw = raw.trim();

    if let Ok(with_offset) = DateTime::parse_from_rfc3339(raw) {
        return Ok(with_offset.with_timezone(&Utc));
    }

    let naive = NAIVE_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
        .ok_or_else(|| TimingError::Malformed(raw.to_string()))?;

    zone.from_local_datetime(&naive)
        .earliest()
        .map(|local| local.with_timezone(&Utc))
        .ok_or_else(|| TimingError::Nonexistent(raw.to_string(), zone))
}

/// Derive arrival timing for one pass relative to `now`.
///
/// Returns `expected − now` and `expected − target`, both signed.
pub fn derive(
    now: DateTime<Utc>,
    expected: &str,
    target: &str,
    zone: Tz,
) -> Result<Timing, TimingError> {
    let expected_at = parse_instant(expected, zone)?;
    let target_at = parse_instant(target, zone)?;

    Ok(Timing {
        expected_at,
        duration_to_arrival: expected_at - now,
        delay: expected_at - target_at,
    })
}

/// Whole-second rendering of a signed duration, e.g. `+30s` or `-75s`.
pub fn format_signed_seconds(delta: Duration) -> String {
    let secs = delta.num_seconds();
    format!("{}{}s", if secs < 0 { "-" } else { "+" }, secs.abs())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono_tz::Europe::Amsterdam;

    fn noon_summer() -> DateTime<Utc> {
        // 12:00 CEST
        Utc.with_ymd_and_hms(2024, 6, 16, 10, 0, 0).unwrap()
    }

    #[test]
    fn naive_timestamps_use_the_civil_zone() {
        let parsed = parse_instant("2024-06-16T12:00:00", Amsterdam).unwrap();
        assert_eq!(parsed, noon_summer());

        // Winter time is one hour closer to UTC
        let winter = parse_instant("2024-01-16T12:00:00", Amsterdam).unwrap();
        assert_eq!(winter, Utc.with_ymd_and_hms(2024, 1, 16, 11, 0, 0).unwrap());
    }

    #[test]
    fn explicit_offsets_are_honored() {
        let parsed = parse_instant("2024-06-16T12:00:00+00:00", Amsterdam).unwrap();
        assert_eq!(parsed, Utc.with_ymd_and_hms(2024, 6, 16, 12, 0, 0).unwrap());
    }

    #[test]
    fn fractional_seconds_are_accepted() {
        let parsed = parse_instant("2024-06-16T12:00:00.500", Amsterdam).unwrap();
        assert_eq!(parsed - noon_summer(), Duration::milliseconds(500));
    }

    #[test]
    fn derive_reports_signed_durations() {
        let timing = derive(
            noon_summer(),
            "2024-06-16T12:08:30",
            "2024-06-16T12:10:00",
            Amsterdam,
        )
        .unwrap();
        assert_eq!(timing.duration_to_arrival, Duration::seconds(510));
        assert_eq!(timing.delay, Duration::seconds(-90));

        let overdue = derive(
            noon_summer(),
            "2024-06-16T11:59:00",
            "2024-06-16T11:55:00",
            Amsterdam,
        )
        .unwrap();
        assert_eq!(overdue.duration_to_arrival, Duration::seconds(-60));
        assert_eq!(overdue.delay, Duration::seconds(240));
    }

    #[test]
    fn malformed_timestamps_are_rejected() {
        let err = derive(noon_summer(), "tomorrow-ish", "2024-06-16T12:00:00", Amsterdam)
            .unwrap_err();
        assert_eq!(err, TimingError::Malformed("tomorrow-ish".to_string()));
    }

    #[test]
    fn dst_gap_is_rejected_and_overlap_takes_earliest() {
        // Clocks jump from 02:00 to 03:00 on 2024-03-31
        assert!(matches!(
            parse_instant("2024-03-31T02:30:00", Amsterdam),
            Err(TimingError::Nonexistent(_, _))
        ));

        // 02:30 happens twice on 2024-10-27; the first one is still CEST
        let ambiguous = parse_instant("2024-10-27T02:30:00", Amsterdam).unwrap();
        assert_eq!(ambiguous, Utc.with_ymd_and_hms(2024, 10, 27, 0, 30, 0).unwrap());
    }

    #[test]
    fn signed_seconds_formatting() {
        assert_eq!(format_signed_seconds(Duration::seconds(30)), "+30s");
        assert_eq!(format_signed_seconds(Duration::seconds(-75)), "-75s");
        assert_eq!(format_signed_seconds(Duration::zero()), "+0s");
    }
}
