//! Literal parsing and normalization per [`ValueType`].
//!
//! Normalized literals are what the client-side filter compares, so a row
//! value `100.0` and a filter literal `100` of a decimal property are equal.

use serde_json::Value;
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{Date, OffsetDateTime, PrimitiveDateTime, UtcOffset};

use crate::error::{CoreError, Result};
use crate::predicate::ValueType;

const DATE: &[time::format_description::BorrowedFormatItem<'static>] =
    format_description!("[year]-[month]-[day]");
const DATE_TIME: &[time::format_description::BorrowedFormatItem<'static>] = format_description!(
    "[year]-[month]-[day]T[hour]:[minute]:[second][optional [.[subsecond]]]"
);
const DATE_TIME_OUT: &[time::format_description::BorrowedFormatItem<'static>] =
    format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]");

impl ValueType {
    /// Validate a literal and return its canonical text form.
    pub fn normalize(&self, raw: &str) -> Result<String> {
        let trimmed = raw.trim();
        let invalid = || CoreError::invalid_literal(self, raw);

        match self {
            Self::String | Self::Enum => Ok(raw.to_string()),
            Self::Integer => trimmed
                .parse::<i64>()
                .map(|n| n.to_string())
                .map_err(|_| invalid()),
            Self::Decimal => match trimmed.parse::<f64>() {
                Ok(n) if n.is_finite() => Ok(format_decimal(n)),
                _ => Err(invalid()),
            },
            Self::Boolean => match trimmed.to_ascii_lowercase().as_str() {
                "true" | "1" => Ok("true".to_string()),
                "false" | "0" => Ok("false".to_string()),
                _ => Err(invalid()),
            },
            Self::Date => parse_date(trimmed)
                .and_then(|d| d.format(DATE).ok())
                .ok_or_else(invalid),
            Self::DateTime => parse_date_time(trimmed)
                .and_then(|dt| dt.format(DATE_TIME_OUT).ok())
                .ok_or_else(invalid),
        }
    }

    /// Canonical text form of a JSON value returned by the remote API.
    ///
    /// Returns `None` for nulls, containers and values that do not fit the type.
    pub fn normalize_json(&self, value: &Value) -> Option<String> {
        match value {
            Value::String(s) => match self {
                Self::String | Self::Enum => Some(s.clone()),
                _ => self.normalize(s).ok(),
            },
            Value::Number(n) => match self {
                Self::Integer => n
                    .as_i64()
                    .map(|i| i.to_string())
                    .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(format_decimal)),
                Self::Decimal => n.as_f64().map(format_decimal),
                Self::String | Self::Enum => Some(n.to_string()),
                Self::Boolean => n.as_i64().and_then(|i| match i {
                    0 => Some("false".to_string()),
                    1 => Some("true".to_string()),
                    _ => None,
                }),
                Self::Date | Self::DateTime => None,
            },
            Value::Bool(b) => match self {
                Self::Boolean | Self::String => Some(b.to_string()),
                _ => None,
            },
            Value::Null | Value::Array(_) | Value::Object(_) => None,
        }
    }
}

fn format_decimal(n: f64) -> String {
    // f64's Display drops a trailing ".0"
    format!("{n}")
}

fn parse_date(s: &str) -> Option<Date> {
    if let Ok(date) = Date::parse(s, DATE) {
        return Some(date);
    }
    parse_date_time(s).map(|dt| dt.date())
}

fn parse_date_time(s: &str) -> Option<PrimitiveDateTime> {
    if let Ok(dt) = OffsetDateTime::parse(s, &Rfc3339) {
        let utc = dt.to_offset(UtcOffset::UTC);
        return Some(PrimitiveDateTime::new(utc.date(), utc.time()));
    }
    if let Ok(dt) = PrimitiveDateTime::parse(s, DATE_TIME) {
        return Some(dt);
    }
    Date::parse(s, DATE).ok().map(|d| d.midnight())
}
