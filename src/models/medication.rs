use std::collections::BTreeMap;

use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use super::enums::Weekday;

/// One scheduled dose slot on a given weekday.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChecklistEntry {
    #[serde(default, with = "hhmm_option")]
    pub time: Option<NaiveTime>,
    /// Tri-state: never set, taken, or reset.
    pub checked: Option<bool>,
    /// When `checked` was last set to true.
    pub timestamp: Option<DateTime<Utc>>,
}

impl ChecklistEntry {
    /// A fresh, never-checked slot.
    pub fn at(time: NaiveTime) -> Self {
        Self {
            time: Some(time),
            checked: None,
            timestamp: None,
        }
    }

    pub fn is_checked(&self) -> bool {
        self.checked == Some(true)
    }
}

/// Weekday → ordered checklist entries. Order within a day is insertion order.
pub type WeeklySchedule = BTreeMap<Weekday, Vec<ChecklistEntry>>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Medication {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub schedule: WeeklySchedule,
    pub frequency: String,
    pub instruction: String,
    pub remaining_doses: i32,
    pub dosage: String,
    pub note: String,
    pub image_url: Option<String>,
}

impl Medication {
    /// Distinct (weekday, time) slots, in calendar then insertion order.
    pub fn dose_slots(&self) -> Vec<(Weekday, NaiveTime)> {
        let mut slots = Vec::new();
        for (day, entries) in &self.schedule {
            for time in entries.iter().filter_map(|e| e.time) {
                if !slots.contains(&(*day, time)) {
                    slots.push((*day, time));
                }
            }
        }
        slots
    }
}

/// Serialize checklist times as `HH:MM`, the format the apps write.
pub mod hhmm_option {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub const FORMAT: &str = "%H:%M";

    pub fn serialize<S: Serializer>(time: &Option<NaiveTime>, s: S) -> Result<S::Ok, S::Error> {
        match time {
            Some(t) => s.serialize_str(&t.format(FORMAT).to_string()),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<NaiveTime>, D::Error> {
        let raw: Option<String> = Option::deserialize(d)?;
        raw.filter(|s| !s.is_empty())
            .map(|s| parse(&s).map_err(serde::de::Error::custom))
            .transpose()
    }

    /// Accepts `HH:MM` and `HH:MM:SS`.
    pub fn parse(s: &str) -> Result<NaiveTime, chrono::ParseError> {
        NaiveTime::parse_from_str(s, FORMAT).or_else(|_| NaiveTime::parse_from_str(s, "%H:%M:%S"))
    }
}
