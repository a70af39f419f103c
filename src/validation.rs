//! Input normalization and validation shared by the workflows.
//!
//! Everything here runs before a store call, so a failure never leaves a
//! partial write behind.

use chrono::{DateTime, Duration, NaiveDate, Utc};

use crate::error::ValidationError;

pub type ValidationResult<T> = Result<T, ValidationError>;

/// Uppercase the plate and drop every whitespace character, so
/// `"34 abc 123"` and `"34ABC123"` are the same key.
pub fn normalize_plate(raw: &str, max_len: usize) -> ValidationResult<String> {
    let plate: String = raw
        .chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_uppercase)
        .collect();

    if plate.is_empty() {
        return Err(ValidationError::EmptyPlate);
    }

    let len = plate.chars().count();
    if len > max_len {
        return Err(ValidationError::PlateTooLong { len, max: max_len });
    }

    Ok(plate)
}

/// Discount rates live in the closed interval [0, 100] and are kept to one
/// decimal place.
pub fn validate_rate(field: &'static str, value: f64) -> ValidationResult<f64> {
    if !value.is_finite() || !(0.0..=100.0).contains(&value) {
        return Err(ValidationError::InvalidRate { field, value });
    }
    Ok((value * 10.0).round() / 10.0)
}

/// Trim free text; blank becomes `None`.
pub fn clean_note(note: Option<&str>) -> Option<String> {
    note.map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

pub fn require_text(field: &'static str, value: &str) -> ValidationResult<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::EmptyField(field));
    }
    Ok(trimmed.to_string())
}

pub fn parse_date(value: &str) -> ValidationResult<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
        .map_err(|_| ValidationError::InvalidDate(value.to_string()))
}

/// An RFC 3339 timestamp no later than `now` and no earlier than
/// `max_age` before it.
pub fn parse_recent_timestamp(
    value: &str,
    now: DateTime<Utc>,
    max_age: Duration,
) -> ValidationResult<DateTime<Utc>> {
    let at = DateTime::parse_from_rfc3339(value.trim())
        .map_err(|_| ValidationError::InvalidTimestamp(value.to_string()))?
        .with_timezone(&Utc);

    if at > now || at < now - max_age {
        return Err(ValidationError::TimestampOutOfRange(value.to_string()));
    }
    Ok(at)
}

/// Two decimal places for money.
pub fn round_money(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plates_normalize_to_one_identity() {
        assert_eq!(normalize_plate("34 abc 123", 10).unwrap(), "34ABC123");
        assert_eq!(normalize_plate("34ABC123", 10).unwrap(), "34ABC123");
        assert_eq!(normalize_plate("\t06 xyz\n99 ", 10).unwrap(), "06XYZ99");
    }

    #[test]
    fn blank_and_long_plates_fail() {
        assert_eq!(normalize_plate("   ", 10), Err(ValidationError::EmptyPlate));
        assert_eq!(
            normalize_plate("34 ABC 123456", 10),
            Err(ValidationError::PlateTooLong { len: 11, max: 10 })
        );
        assert_eq!(normalize_plate("34 ABC 12345", 10).unwrap(), "34ABC12345");
    }

    #[test]
    fn rates_are_bounded_and_rounded() {
        assert_eq!(validate_rate("cash_rate", 0.0).unwrap(), 0.0);
        assert_eq!(validate_rate("cash_rate", 100.0).unwrap(), 100.0);
        assert_eq!(validate_rate("cash_rate", 4.46).unwrap(), 4.5);
        assert!(validate_rate("card_rate", -0.1).is_err());
        assert!(validate_rate("card_rate", 100.01).is_err());
        assert!(validate_rate("card_rate", f64::NAN).is_err());
        assert!(validate_rate("card_rate", f64::INFINITY).is_err());
    }

    #[test]
    fn notes_and_required_text() {
        assert_eq!(clean_note(Some("  fleet car ")), Some("fleet car".to_string()));
        assert_eq!(clean_note(Some("   ")), None);
        assert_eq!(clean_note(None), None);
        assert_eq!(require_text("name", "  "), Err(ValidationError::EmptyField("name")));
    }

    #[test]
    fn dates_and_money() {
        assert!(parse_date("2024-03-01").is_ok());
        assert!(parse_date("01.03.2024").is_err());
        assert_eq!(round_money(12.345_6), 12.35);
    }

    #[test]
    fn recent_timestamps_only() {
        let now = Utc::now();
        let week = Duration::days(7);

        let hour_ago = (now - Duration::hours(1)).to_rfc3339();
        assert!(parse_recent_timestamp(&hour_ago, now, week).is_ok());

        let tomorrow = (now + Duration::days(1)).to_rfc3339();
        assert!(matches!(
            parse_recent_timestamp(&tomorrow, now, week),
            Err(ValidationError::TimestampOutOfRange(_))
        ));

        let last_month = (now - Duration::days(30)).to_rfc3339();
        assert!(matches!(
            parse_recent_timestamp(&last_month, now, week),
            Err(ValidationError::TimestampOutOfRange(_))
        ));

        assert!(matches!(
            parse_recent_timestamp("2024-03-01 10:00", now, week),
            Err(ValidationError::InvalidTimestamp(_))
        ));
    }
}
