pub mod appointment;
pub mod enums;
pub mod medication;
pub mod notification;

pub use appointment::*;
pub use medication::*;
pub use notification::*;

use chrono::{DateTime, SubsecRound, Utc};

/// Cut a timestamp to the millisecond precision every store keeps, so a
/// record reads back equal to what was written.
pub fn stored_precision(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.trunc_subsecs(3)
}
