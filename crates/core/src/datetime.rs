//! Timestamp parsing and arithmetic helpers.
//!
//! All timestamps handled by the core are `DateTime<Utc>`. Text supplied from configuration or
//! the command line must carry an explicit offset; naive text is rejected rather than guessed.

use crate::{ConsentError, ConsentResult};
use chrono::{DateTime, NaiveDate, NaiveDateTime, SubsecRound, Utc};

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

/// Parse a timezone-aware timestamp and normalise it to UTC.
///
/// Accepts RFC 3339 (`2024-01-01T00:00:00Z`, `2024-01-01T08:00:00+03:00`) and the same form
/// with a space separator.
///
/// # Errors
///
/// - [`ConsentError::NaiveDatetime`] if the text is a valid date or datetime without an offset.
/// - [`ConsentError::InvalidDatetime`] if the text is not a datetime at all.
pub fn parse_aware_datetime(input: &str) -> ConsentResult<DateTime<Utc>> {
    let text = input.trim();

    if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
        return Ok(parsed.with_timezone(&Utc));
    }
    if let Ok(parsed) = DateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f%:z") {
        return Ok(parsed.with_timezone(&Utc));
    }

    let is_naive = NAIVE_FORMATS
        .iter()
        .any(|fmt| NaiveDateTime::parse_from_str(text, fmt).is_ok())
        || NaiveDate::parse_from_str(text, "%Y-%m-%d").is_ok();

    if is_naive {
        Err(ConsentError::NaiveDatetime(text.to_owned()))
    } else {
        Err(ConsentError::InvalidDatetime(text.to_owned()))
    }
}

/// Drop sub-second precision so boundary comparisons are made at second resolution.
pub fn truncate_to_seconds(value: DateTime<Utc>) -> DateTime<Utc> {
    value.trunc_subsecs(0)
}

/// Age in completed years on the date of `at`.
///
/// Returns `None` if `dob` is after `at`.
pub fn age_in_years(dob: NaiveDate, at: DateTime<Utc>) -> Option<u32> {
    at.date_naive().years_since(dob)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn parses_rfc3339_with_offset_into_utc() {
        let parsed = parse_aware_datetime("2024-03-01T08:00:00+03:00").expect("aware");
        assert_eq!(parsed, Utc.with_ymd_and_hms(2024, 3, 1, 5, 0, 0).unwrap());
    }

    #[test]
    fn parses_space_separated_with_offset() {
        let parsed = parse_aware_datetime("2024-03-01 08:00:00+00:00").expect("aware");
        assert_eq!(parsed, Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap());
    }

    #[test]
    fn rejects_naive_datetime_text() {
        for text in ["2024-03-01T08:00:00", "2024-03-01 08:00", "2024-03-01"] {
            let err = parse_aware_datetime(text).expect_err("naive should fail");
            assert!(
                matches!(err, ConsentError::NaiveDatetime(ref t) if t == text),
                "unexpected error for {text}: {err:?}"
            );
        }
    }

    #[test]
    fn rejects_garbage_as_invalid_datetime() {
        let err = parse_aware_datetime("next tuesday").expect_err("should fail");
        assert!(matches!(err, ConsentError::InvalidDatetime(_)));
    }

    #[test]
    fn truncation_drops_subseconds() {
        let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let with_millis = base + Duration::milliseconds(999);
        assert_eq!(truncate_to_seconds(with_millis), base);
    }

    #[test]
    fn age_counts_completed_years() {
        let dob = NaiveDate::from_ymd_opt(2000, 6, 15).unwrap();
        let day_before = Utc.with_ymd_and_hms(2018, 6, 14, 12, 0, 0).unwrap();
        let birthday = Utc.with_ymd_and_hms(2018, 6, 15, 0, 0, 0).unwrap();

        assert_eq!(age_in_years(dob, day_before), Some(17));
        assert_eq!(age_in_years(dob, birthday), Some(18));
        assert_eq!(
            age_in_years(dob, Utc.with_ymd_and_hms(1999, 1, 1, 0, 0, 0).unwrap()),
            None
        );
    }
}
