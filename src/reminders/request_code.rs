//! Deterministic alarm identifiers.
//!
//! An alarm is keyed by a 32-bit request code. Registering under a code that
//! is already armed replaces the earlier alarm, so codes must be stable across
//! runs for re-scheduling and cancellation to find their target.

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};

use crate::models::enums::Weekday;
use crate::models::hhmm_option;

pub const DAY_BEFORE_OFFSET: i32 = 1;
pub const DAY_OF_OFFSET: i32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestCode(pub i32);

impl RequestCode {
    pub fn appointment_day_before(appointment_id: &str) -> Self {
        Self(string_hash(appointment_id).wrapping_add(DAY_BEFORE_OFFSET))
    }

    pub fn appointment_day_of(appointment_id: &str) -> Self {
        Self(string_hash(appointment_id).wrapping_add(DAY_OF_OFFSET))
    }

    /// Both appointment codes, day-before first.
    pub fn appointment_pair(appointment_id: &str) -> [Self; 2] {
        [
            Self::appointment_day_before(appointment_id),
            Self::appointment_day_of(appointment_id),
        ]
    }

    /// One weekly dose slot of a medication.
    pub fn medication_slot(medication_id: &str, day: Weekday, time: NaiveTime) -> Self {
        Self(string_hash(&format!(
            "{medication_id}|{day}|{}",
            time.format(hhmm_option::FORMAT)
        )))
    }

    /// Where a snoozed weekly reminder is parked, leaving the weekly alarm armed.
    pub fn snooze_slot(self) -> Self {
        Self(string_hash(&format!("snooze|{}", self.0)))
    }

    pub fn value(self) -> i32 {
        self.0
    }
}

impl std::fmt::Display for RequestCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 31-polynomial hash over UTF-16 code units with wrapping 32-bit arithmetic.
/// Stable across platforms and releases, unlike `std::hash`.
pub fn string_hash(s: &str) -> i32 {
    s.encode_utf16()
        .fold(0i32, |h, unit| h.wrapping_mul(31).wrapping_add(i32::from(unit)))
}
