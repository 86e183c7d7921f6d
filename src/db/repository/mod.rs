//! Repository layer: table-scoped database operations over the local cache.
//!
//! Each sub-module owns one table (or one parent/child pair). All public
//! functions are re-exported here.

mod alarm;
mod appointment;
mod job_run;
mod medication;
mod notification;

use chrono::{DateTime, NaiveTime, SecondsFormat, Utc};

use super::DatabaseError;

pub use alarm::*;
pub use appointment::*;
pub use job_run::*;
pub use medication::*;
pub use notification::*;

/// Timestamps are stored as fixed-width RFC 3339 (UTC, millis) so they sort as text.
pub(crate) fn format_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(crate) fn parse_ts(field: &str, raw: &str) -> Result<DateTime<Utc>, DatabaseError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| DatabaseError::InvalidValue {
            field: field.into(),
            value: raw.into(),
        })
}

pub(crate) fn format_time(time: &NaiveTime) -> String {
    time.format("%H:%M").to_string()
}

pub(crate) fn parse_time(field: &str, raw: &str) -> Result<NaiveTime, DatabaseError> {
    crate::models::hhmm_option::parse(raw).map_err(|_| DatabaseError::InvalidValue {
        field: field.into(),
        value: raw.into(),
    })
}
