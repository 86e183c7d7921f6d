use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};

use super::medication::hhmm_option;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: String,
    pub user_id: String,
    pub name: String,
    /// Required before reminders can be scheduled.
    pub date: Option<NaiveDate>,
    #[serde(default, with = "hhmm_option")]
    pub time: Option<NaiveTime>,
    pub location: String,
    pub note: Option<String>,
    pub done: Option<bool>,
}

impl Appointment {
    /// "10:00 at Chest Clinic", or just the location when no time is set.
    pub fn when_and_where(&self) -> String {
        match self.time {
            Some(t) => format!("{} at {}", t.format(hhmm_option::FORMAT), self.location),
            None => self.location.clone(),
        }
    }
}
