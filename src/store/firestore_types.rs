//! Firestore REST typed-value encoding for medication and appointment documents.
//!
//! Every field value is a single-key object naming its type, e.g.
//! `{"stringValue": "Rifampicin"}` or `{"integerValue": "42"}`.

use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveTime, SecondsFormat, Utc};
use serde::Deserialize;
use serde_json::{json, Map, Value};

use super::StoreError;
use crate::models::enums::Weekday;
use crate::models::hhmm_option;
use crate::models::*;

pub const MEDICATIONS: &str = "medications";
pub const APPOINTMENTS: &str = "appointments";
pub const USER_ID_FIELD: &str = "userId";

/// A document as returned by GET or inside a runQuery row.
#[derive(Debug, Deserialize)]
pub struct Document {
    pub name: String,
    #[serde(default)]
    pub fields: Map<String, Value>,
}

impl Document {
    /// Last path segment of `projects/.../documents/{collection}/{id}`.
    pub fn id(&self) -> &str {
        self.name.rsplit('/').next().unwrap_or(&self.name)
    }
}

#[derive(Debug, Deserialize)]
pub struct QueryRow {
    pub document: Option<Document>,
}

/// `SELECT * FROM {collection} WHERE userId == {user_id}`
pub fn user_query(collection: &str, user_id: &str) -> Value {
    json!({
        "structuredQuery": {
            "from": [{ "collectionId": collection }],
            "where": {
                "fieldFilter": {
                    "field": { "fieldPath": USER_ID_FIELD },
                    "op": "EQUAL",
                    "value": string(user_id),
                }
            }
        }
    })
}

// ── Encoding ────────────────────────────────────────────────────────────

fn string(s: &str) -> Value {
    json!({ "stringValue": s })
}

fn null() -> Value {
    json!({ "nullValue": null })
}

fn opt_string(s: Option<&str>) -> Value {
    s.map(string).unwrap_or_else(null)
}

fn opt_bool(b: Option<bool>) -> Value {
    b.map(|b| json!({ "booleanValue": b })).unwrap_or_else(null)
}

/// Firestore carries 64-bit integers as decimal strings.
fn integer(n: i64) -> Value {
    json!({ "integerValue": n.to_string() })
}

fn opt_timestamp(ts: Option<&DateTime<Utc>>) -> Value {
    ts.map(|t| json!({ "timestampValue": t.to_rfc3339_opts(SecondsFormat::Millis, true) }))
        .unwrap_or_else(null)
}

fn array(values: Vec<Value>) -> Value {
    json!({ "arrayValue": { "values": values } })
}

fn map(fields: Map<String, Value>) -> Value {
    json!({ "mapValue": { "fields": fields } })
}

fn checklist_entry(entry: &ChecklistEntry) -> Value {
    let time = entry.time.map(|t| t.format(hhmm_option::FORMAT).to_string());
    let mut fields = Map::new();
    fields.insert("time".into(), opt_string(time.as_deref()));
    fields.insert("checked".into(), opt_bool(entry.checked));
    fields.insert("timestamp".into(), opt_timestamp(entry.timestamp.as_ref()));
    map(fields)
}

/// Encoded value of one weekday's checklist, for field-scoped updates.
pub fn schedule_day(entries: &[ChecklistEntry]) -> Value {
    array(entries.iter().map(checklist_entry).collect())
}

pub fn medication_fields(med: &Medication) -> Map<String, Value> {
    let mut schedule = Map::new();
    for (day, entries) in &med.schedule {
        schedule.insert(day.as_str().into(), schedule_day(entries));
    }

    let mut fields = Map::new();
    fields.insert(USER_ID_FIELD.into(), string(&med.user_id));
    fields.insert("name".into(), string(&med.name));
    fields.insert("schedule".into(), map(schedule));
    fields.insert("frequency".into(), string(&med.frequency));
    fields.insert("instruction".into(), string(&med.instruction));
    fields.insert("remainingDoses".into(), integer(med.remaining_doses.into()));
    fields.insert("dosage".into(), string(&med.dosage));
    fields.insert("note".into(), string(&med.note));
    fields.insert("imageUrl".into(), opt_string(med.image_url.as_deref()));
    fields
}

/// Fields for a `schedule.<Weekday>` masked PATCH.
pub fn schedule_day_fields(day: Weekday, entries: &[ChecklistEntry]) -> Map<String, Value> {
    let mut days = Map::new();
    days.insert(day.as_str().into(), schedule_day(entries));
    let mut fields = Map::new();
    fields.insert("schedule".into(), map(days));
    fields
}

pub fn appointment_fields(appt: &Appointment) -> Map<String, Value> {
    let date = appt.date.map(|d| d.format("%Y-%m-%d").to_string());
    let time = appt.time.map(|t| t.format(hhmm_option::FORMAT).to_string());

    let mut fields = Map::new();
    fields.insert(USER_ID_FIELD.into(), string(&appt.user_id));
    fields.insert("name".into(), string(&appt.name));
    fields.insert("date".into(), opt_string(date.as_deref()));
    fields.insert("time".into(), opt_string(time.as_deref()));
    fields.insert("location".into(), string(&appt.location));
    fields.insert("note".into(), opt_string(appt.note.as_deref()));
    fields.insert("done".into(), opt_bool(appt.done));
    fields
}

pub fn done_fields(done: bool) -> Map<String, Value> {
    let mut fields = Map::new();
    fields.insert("done".into(), opt_bool(Some(done)));
    fields
}

// ── Decoding ────────────────────────────────────────────────────────────

/// Read-side view over a document's `fields` map.
struct Fields<'a> {
    entity: &'static str,
    map: &'a Map<String, Value>,
}

impl<'a> Fields<'a> {
    fn new(entity: &'static str, map: &'a Map<String, Value>) -> Self {
        Self { entity, map }
    }

    fn error(&self, key: &str, reason: impl std::fmt::Display) -> StoreError {
        StoreError::Decode {
            entity_type: self.entity.into(),
            reason: format!("field `{key}`: {reason}"),
        }
    }

    /// The typed payload of `key`, or None when absent or `nullValue`.
    fn typed(&self, key: &str) -> Result<Option<(&'a str, &'a Value)>, StoreError> {
        let Some(value) = self.map.get(key) else {
            return Ok(None);
        };
        let obj = value.as_object().ok_or_else(|| self.error(key, "not a typed value"))?;
        match obj.iter().next() {
            Some((kind, _)) if kind == "nullValue" => Ok(None),
            Some((kind, inner)) => Ok(Some((kind.as_str(), inner))),
            None => Ok(None),
        }
    }

    fn opt_string(&self, key: &str) -> Result<Option<String>, StoreError> {
        match self.typed(key)? {
            None => Ok(None),
            Some(("stringValue", Value::String(s))) => Ok(Some(s.clone())),
            Some((kind, _)) => Err(self.error(key, format!("expected string, got {kind}"))),
        }
    }

    /// Missing strings decode as empty.
    fn string(&self, key: &str) -> Result<String, StoreError> {
        Ok(self.opt_string(key)?.unwrap_or_default())
    }

    fn opt_bool(&self, key: &str) -> Result<Option<bool>, StoreError> {
        match self.typed(key)? {
            None => Ok(None),
            Some(("booleanValue", Value::Bool(b))) => Ok(Some(*b)),
            Some((kind, _)) => Err(self.error(key, format!("expected boolean, got {kind}"))),
        }
    }

    fn integer(&self, key: &str) -> Result<i64, StoreError> {
        match self.typed(key)? {
            None => Ok(0),
            Some(("integerValue", Value::String(s))) => s.parse().map_err(|e| self.error(key, e)),
            Some(("integerValue", Value::Number(n))) => {
                n.as_i64().ok_or_else(|| self.error(key, "integer out of range"))
            }
            Some(("doubleValue", Value::Number(n))) => n
                .as_f64()
                .map(|f| f as i64)
                .ok_or_else(|| self.error(key, "not a number")),
            Some((kind, _)) => Err(self.error(key, format!("expected integer, got {kind}"))),
        }
    }

    fn opt_timestamp(&self, key: &str) -> Result<Option<DateTime<Utc>>, StoreError> {
        match self.typed(key)? {
            None => Ok(None),
            Some(("timestampValue", Value::String(s))) => DateTime::parse_from_rfc3339(s)
                .map(|dt| Some(dt.with_timezone(&Utc)))
                .map_err(|e| self.error(key, e)),
            Some((kind, _)) => Err(self.error(key, format!("expected timestamp, got {kind}"))),
        }
    }

    fn opt_time(&self, key: &str) -> Result<Option<NaiveTime>, StoreError> {
        self.opt_string(key)?
            .filter(|s| !s.is_empty())
            .map(|s| hhmm_option::parse(&s).map_err(|e| self.error(key, e)))
            .transpose()
    }

    fn opt_date(&self, key: &str) -> Result<Option<NaiveDate>, StoreError> {
        self.opt_string(key)?
            .filter(|s| !s.is_empty())
            .map(|s| NaiveDate::parse_from_str(&s, "%Y-%m-%d").map_err(|e| self.error(key, e)))
            .transpose()
    }

    fn map(&self, key: &str) -> Result<Option<Fields<'a>>, StoreError> {
        match self.typed(key)? {
            None => Ok(None),
            Some(("mapValue", inner)) => Ok(Some(Fields::new(self.entity, map_fields(inner)))),
            Some((kind, _)) => Err(self.error(key, format!("expected map, got {kind}"))),
        }
    }

    fn array(&self, key: &str) -> Result<Vec<Fields<'a>>, StoreError> {
        let values = match self.typed(key)? {
            None => return Ok(Vec::new()),
            Some(("arrayValue", inner)) => inner.get("values").and_then(Value::as_array),
            Some((kind, _)) => return Err(self.error(key, format!("expected array, got {kind}"))),
        };

        let mut out = Vec::new();
        for value in values.into_iter().flatten() {
            match value.get("mapValue") {
                Some(inner) => out.push(Fields::new(self.entity, map_fields(inner))),
                None => return Err(self.error(key, "array element is not a map")),
            }
        }
        Ok(out)
    }
}

/// `{"fields": {...}}` inside a mapValue; an empty map omits `fields` entirely.
fn map_fields(inner: &Value) -> &Map<String, Value> {
    static EMPTY: std::sync::OnceLock<Map<String, Value>> = std::sync::OnceLock::new();
    inner
        .get("fields")
        .and_then(Value::as_object)
        .unwrap_or_else(|| EMPTY.get_or_init(Map::new))
}

fn checklist_entry_from(fields: &Fields<'_>) -> Result<ChecklistEntry, StoreError> {
    Ok(ChecklistEntry {
        time: fields.opt_time("time")?,
        checked: fields.opt_bool("checked")?,
        timestamp: fields.opt_timestamp("timestamp")?,
    })
}

pub fn medication_from_document(doc: &Document) -> Result<Medication, StoreError> {
    let fields = Fields::new("Medication", &doc.fields);

    let mut schedule = WeeklySchedule::new();
    if let Some(days) = fields.map("schedule")? {
        for key in days.map.keys() {
            let day = Weekday::from_str(key).map_err(|e| days.error(key, e))?;
            let entries = days
                .array(key)?
                .iter()
                .map(checklist_entry_from)
                .collect::<Result<Vec<_>, _>>()?;
            schedule.insert(day, entries);
        }
    }

    let remaining = fields.integer("remainingDoses")?;
    Ok(Medication {
        id: doc.id().to_string(),
        user_id: fields.string(USER_ID_FIELD)?,
        name: fields.string("name")?,
        schedule,
        frequency: fields.string("frequency")?,
        instruction: fields.string("instruction")?,
        remaining_doses: i32::try_from(remaining)
            .map_err(|_| fields.error("remainingDoses", "out of range"))?,
        dosage: fields.string("dosage")?,
        note: fields.string("note")?,
        image_url: fields.opt_string("imageUrl")?,
    })
}

pub fn appointment_from_document(doc: &Document) -> Result<Appointment, StoreError> {
    let fields = Fields::new("Appointment", &doc.fields);
    Ok(Appointment {
        id: doc.id().to_string(),
        user_id: fields.string(USER_ID_FIELD)?,
        name: fields.string("name")?,
        date: fields.opt_date("date")?,
        time: fields.opt_time("time")?,
        location: fields.string("location")?,
        note: fields.opt_string("note")?,
        done: fields.opt_bool("done")?,
    })
}
