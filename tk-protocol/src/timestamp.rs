use std::ops::RangeInclusive;

use chrono::{DateTime, NaiveDate, Utc};

use crate::error::TimeParseError;

/// Two-digit years are offset from this year unless configured otherwise.
pub const DEFAULT_CENTURY_BASE: i32 = 2000;

/// Century bases accepted by configuration.
pub const CENTURY_BASE_RANGE: RangeInclusive<i32> = 1900..=9900;

/// Convert a compact `YYMMDDHHMMSS` device timestamp to UTC.
///
/// The year is `century_base + YY`. Every field is range-checked; an
/// impossible date such as `150230...` is an error rather than a rollover.
pub fn to_utc_timestamp(raw: &str, century_base: i32) -> Result<DateTime<Utc>, TimeParseError> {
    let raw = raw.trim();
    if raw.len() != 12 || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return Err(TimeParseError::Format(raw.to_string()));
    }

    let field = |i: usize| -> u32 {
        let b = raw.as_bytes();
        u32::from(b[i] - b'0') * 10 + u32::from(b[i + 1] - b'0')
    };

    let year = century_base
        .checked_add(field(0) as i32)
        .ok_or(TimeParseError::OutOfRange { field: "year", value: field(0) })?;
    let month = check("month", field(2), 1, 12)?;
    let day = check("day", field(4), 1, 31)?;
    let hour = check("hour", field(6), 0, 23)?;
    let minute = check("minute", field(8), 0, 59)?;
    let second = check("second", field(10), 0, 59)?;

    let date = NaiveDate::from_ymd_opt(year, month, day)
        .ok_or(TimeParseError::InvalidDate { year, month, day })?;
    let datetime = date
        .and_hms_opt(hour, minute, second)
        .ok_or(TimeParseError::OutOfRange { field: "time", value: hour })?;

    Ok(datetime.and_utc())
}

fn check(field: &'static str, value: u32, min: u32, max: u32) -> Result<u32, TimeParseError> {
    if (min..=max).contains(&value) {
        Ok(value)
    } else {
        Err(TimeParseError::OutOfRange { field, value })
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn test_sample_timestamp() {
        let ts = to_utc_timestamp("151006012336", DEFAULT_CENTURY_BASE).unwrap();
        assert_eq!(ts, Utc.with_ymd_and_hms(2015, 10, 6, 1, 23, 36).unwrap());
        assert_eq!(ts.to_rfc3339(), "2015-10-06T01:23:36+00:00");
    }

    #[test]
    fn test_century_base_overflow_is_error() {
        assert_eq!(
            to_utc_timestamp("151006012336", i32::MAX),
            Err(TimeParseError::OutOfRange { field: "year", value: 15 })
        );
    }

    #[test]
    fn test_century_base() {
        let ts = to_utc_timestamp("000101000000", 2100).unwrap();
        assert_eq!(ts, Utc.with_ymd_and_hms(2100, 1, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_leap_day() {
        assert!(to_utc_timestamp("160229120000", DEFAULT_CENTURY_BASE).is_ok());
        assert_eq!(
            to_utc_timestamp("150229120000", DEFAULT_CENTURY_BASE),
            Err(TimeParseError::InvalidDate { year: 2015, month: 2, day: 29 })
        );
    }

    #[test]
    fn test_field_out_of_range() {
        assert_eq!(
            to_utc_timestamp("151306012336", DEFAULT_CENTURY_BASE),
            Err(TimeParseError::OutOfRange { field: "month", value: 13 })
        );
        assert_eq!(
            to_utc_timestamp("151000012336", DEFAULT_CENTURY_BASE),
            Err(TimeParseError::OutOfRange { field: "day", value: 0 })
        );
        assert_eq!(
            to_utc_timestamp("151006242336", DEFAULT_CENTURY_BASE),
            Err(TimeParseError::OutOfRange { field: "hour", value: 24 })
        );
        assert_eq!(
            to_utc_timestamp("151006016036", DEFAULT_CENTURY_BASE),
            Err(TimeParseError::OutOfRange { field: "minute", value: 60 })
        );
        assert_eq!(
            to_utc_timestamp("151006012360", DEFAULT_CENTURY_BASE),
            Err(TimeParseError::OutOfRange { field: "second", value: 60 })
        );
    }

    #[test]
    fn test_bad_format() {
        assert!(matches!(
            to_utc_timestamp("15100601233", DEFAULT_CENTURY_BASE),
            Err(TimeParseError::Format(_))
        ));
        assert!(matches!(
            to_utc_timestamp("15100601233x", DEFAULT_CENTURY_BASE),
            Err(TimeParseError::Format(_))
        ));
        assert!(matches!(
            to_utc_timestamp("", DEFAULT_CENTURY_BASE),
            Err(TimeParseError::Format(_))
        ));
    }
}
