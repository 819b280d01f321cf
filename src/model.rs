//! Domain records produced by the scraper
//!
//! A [`BankRate`] is one observation of a bank's USD quote taken from the
//! rates table. Numeric cells that do not hold a finite number are kept as
//! `None` rather than a parse artifact, so consumers can tell "no quote"
//! apart from a real value.

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::Serialize;

/// One bank's buy/sell quote as listed on the source page
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BankRate {
    pub bank: String,
    /// Cash desk quotes
    pub buy: Option<f64>,
    pub sell: Option<f64>,
    /// Online channel quotes
    pub buy_online: Option<f64>,
    pub sell_online: Option<f64>,
    pub site_url: Option<String>,
    /// `None` when the source timestamp could not be parsed
    pub update_at: Option<DateTime<Utc>>,
    /// Page the batch was scraped from, identical for every record of a run
    pub source_url: String,
}

/// Parse a rate cell: trimmed text, strict float syntax, finite values only.
///
/// No locale handling is done here, so `"27,5"` is not a number.
pub fn parse_rate(text: &str) -> Option<f64> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    trimmed.parse::<f64>().ok().filter(|v| v.is_finite())
}

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%d.%m.%Y %H:%M",
    "%d.%m.%Y %H:%M:%S",
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d.%m.%Y"];

/// Parse the "updated at" cell.
///
/// Accepts RFC 3339 timestamps as-is; naive date/times are taken as UTC.
pub fn parse_update_time(text: &str) -> Option<DateTime<Utc>> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt.with_timezone(&Utc));
    }

    for fmt in DATETIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, fmt) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }

    for fmt in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(trimmed, fmt) {
            return date.and_hms_opt(0, 0, 0).map(|naive| Utc.from_utc_datetime(&naive));
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_parses_plain_decimal() {
        assert_eq!(parse_rate(" 27.5 "), Some(27.5));
        assert_eq!(parse_rate("41"), Some(41.0));
    }

    #[test]
    fn rate_rejects_non_numbers_without_zeroing() {
        assert_eq!(parse_rate("n/a"), None);
        assert_eq!(parse_rate(""), None);
        assert_eq!(parse_rate("   "), None);
        assert_eq!(parse_rate("27,5"), None);
        assert_eq!(parse_rate("27.5 грн"), None);
    }

    #[test]
    fn rate_rejects_non_finite() {
        assert_eq!(parse_rate("NaN"), None);
        assert_eq!(parse_rate("inf"), None);
        assert_eq!(parse_rate("-infinity"), None);
    }

    #[test]
    fn update_time_accepts_site_formats() {
        let expected = Utc.with_ymd_and_hms(2024, 1, 15, 10, 0, 0).unwrap();
        assert_eq!(parse_update_time("2024-01-15 10:00"), Some(expected));
        assert_eq!(parse_update_time("15.01.2024 10:00"), Some(expected));
        assert_eq!(parse_update_time("2024-01-15T10:00:00Z"), Some(expected));
        assert_eq!(
            parse_update_time("2024-01-15T12:00:00+02:00"),
            Some(expected)
        );
    }

    #[test]
    fn update_time_date_only_is_midnight() {
        let expected = Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).unwrap();
        assert_eq!(parse_update_time("2024-01-15"), Some(expected));
    }

    #[test]
    fn update_time_invalid_is_none() {
        assert_eq!(parse_update_time("вчора"), None);
        assert_eq!(parse_update_time("2024-13-45 99:00"), None);
        assert_eq!(parse_update_time(""), None);
    }
}
