//! Timestamp helpers.
//!
//! Every timestamp is stored as `YYYY-MM-DDTHH:MM:SSZ` so that SQL string ordering
//! matches chronological ordering.

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};

use crate::errors::AppError;

const NAIVE_FORMATS: [&str; 3] = ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S"];

/// Parse an RFC 3339 timestamp; naive values are treated as UTC.
pub fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, AppError> {
    let trimmed = value.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(parsed.with_timezone(&Utc));
    }
    NAIVE_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(trimmed, format).ok())
        .map(|naive| naive.and_utc())
        .ok_or_else(|| AppError::Validation(format!("Invalid datetime format: {}", value)))
}

pub fn format_timestamp(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Parse and re-emit in the canonical stored form.
pub fn normalize_timestamp(value: &str) -> Result<String, AppError> {
    parse_timestamp(value).map(format_timestamp)
}

pub fn now_timestamp() -> String {
    format_timestamp(Utc::now())
}
