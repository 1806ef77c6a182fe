//! Time Conversions (C1).
//!
//! PostgreSQL `timestamp without time zone` columns are used for performance; UTC
//! is imposed at this boundary rather than carried in the column type. Every
//! `UtcTimestamp` in this crate is, by construction, UTC — there is no naive/local
//! variant to confuse it with.

use chrono::{NaiveDateTime, Timelike};

use crate::error::{Result, TemporalError};

/// A point in time known to be UTC, truncated to microsecond precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UtcTimestamp(NaiveDateTime);

/// `valid_to` default for an open-ended history row.
pub const END_OF_TIME: &str = "9999-12-31 00:00:00.000000";

impl UtcTimestamp {
    /// Wraps a `NaiveDateTime` the caller has already established is UTC,
    /// truncating to microsecond precision.
    pub fn from_naive_utc(naive: NaiveDateTime) -> Self {
        let micros = naive.nanosecond() / 1_000;
        Self(naive.with_nanosecond(micros * 1_000).unwrap_or(naive))
    }

    pub fn naive(&self) -> NaiveDateTime {
        self.0
    }
}

/// Parses `YYYY-MM-DD HH:MM:SS[.ffffff]`, always interpreted as UTC.
///
/// Microseconds are derived from the fractional part by truncation, not rounding,
/// matching how PostgreSQL itself truncates `timestamp` literals beyond 6 digits.
pub fn parse(s: &str) -> Result<UtcTimestamp> {
    let s = s.trim();
    let (head, frac) = match s.split_once('.') {
        Some((h, f)) => (h, Some(f)),
        None => (s, None),
    };

    let naive = NaiveDateTime::parse_from_str(head, "%Y-%m-%d %H:%M:%S")
        .map_err(|_| TemporalError::MalformedTimestamp(s.to_string()))?;

    let naive = match frac {
        Some(f) => {
            if f.is_empty() || !f.chars().all(|c| c.is_ascii_digit()) {
                return Err(TemporalError::MalformedTimestamp(s.to_string()));
            }
            let truncated: String = f.chars().take(6).collect();
            let micros: u32 = format!("{truncated:0<6}")
                .parse()
                .map_err(|_| TemporalError::MalformedTimestamp(s.to_string()))?;
            naive
                .with_nanosecond(micros * 1_000)
                .ok_or_else(|| TemporalError::MalformedTimestamp(s.to_string()))?
        }
        None => naive,
    };

    Ok(UtcTimestamp(naive))
}

/// Emits `YYYY-MM-DD HH:MM:SS.uuuuuu`, zero-padding microseconds to six digits.
pub fn format(t: &UtcTimestamp) -> String {
    format!(
        "{}.{:06}",
        t.0.format("%Y-%m-%d %H:%M:%S"),
        t.0.nanosecond() / 1_000
    )
}
