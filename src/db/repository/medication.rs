use std::str::FromStr;

use rusqlite::{params, Connection, OptionalExtension};

use super::{format_time, format_ts, parse_time, parse_ts};
use crate::db::DatabaseError;
use crate::models::enums::Weekday;
use crate::models::*;

/// Insert or fully replace a medication and its checklist.
pub fn upsert_medication(conn: &Connection, med: &Medication) -> Result<(), DatabaseError> {
    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "INSERT INTO medications (id, user_id, name, frequency, instruction, remaining_doses,
         dosage, note, image_url)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
         ON CONFLICT(id) DO UPDATE SET
            user_id = excluded.user_id,
            name = excluded.name,
            frequency = excluded.frequency,
            instruction = excluded.instruction,
            remaining_doses = excluded.remaining_doses,
            dosage = excluded.dosage,
            note = excluded.note,
            image_url = excluded.image_url,
            updated_at = datetime('now')",
        params![
            med.id,
            med.user_id,
            med.name,
            med.frequency,
            med.instruction,
            med.remaining_doses,
            med.dosage,
            med.note,
            med.image_url,
        ],
    )?;
    tx.execute(
        "DELETE FROM checklist_entries WHERE medication_id = ?1",
        params![med.id],
    )?;
    for (day, entries) in &med.schedule {
        insert_day_entries(&tx, &med.id, *day, entries)?;
    }
    tx.commit()?;
    Ok(())
}

/// Replace one weekday's checklist without touching the rest of the record.
pub fn replace_schedule_day(
    conn: &Connection,
    medication_id: &str,
    day: Weekday,
    entries: &[ChecklistEntry],
) -> Result<(), DatabaseError> {
    let tx = conn.unchecked_transaction()?;
    let touched = tx.execute(
        "UPDATE medications SET updated_at = datetime('now') WHERE id = ?1",
        params![medication_id],
    )?;
    if touched == 0 {
        return Err(DatabaseError::NotFound {
            entity_type: "Medication".into(),
            id: medication_id.into(),
        });
    }
    tx.execute(
        "DELETE FROM checklist_entries WHERE medication_id = ?1 AND weekday = ?2",
        params![medication_id, day.as_str()],
    )?;
    insert_day_entries(&tx, medication_id, day, entries)?;
    tx.commit()?;
    Ok(())
}

fn insert_day_entries(
    conn: &Connection,
    medication_id: &str,
    day: Weekday,
    entries: &[ChecklistEntry],
) -> Result<(), DatabaseError> {
    let mut stmt = conn.prepare_cached(
        "INSERT INTO checklist_entries (medication_id, weekday, position, time, checked, checked_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
    )?;
    for (position, entry) in entries.iter().enumerate() {
        stmt.execute(params![
            medication_id,
            day.as_str(),
            position as i64,
            entry.time.as_ref().map(format_time),
            entry.checked,
            entry.timestamp.as_ref().map(format_ts),
        ])?;
    }
    Ok(())
}

pub fn get_medication(conn: &Connection, id: &str) -> Result<Option<Medication>, DatabaseError> {
    let row = conn
        .query_row(
            "SELECT id, user_id, name, frequency, instruction, remaining_doses, dosage, note, image_url
             FROM medications WHERE id = ?1",
            params![id],
            medication_row,
        )
        .optional()?;

    match row {
        Some(mut med) => {
            med.schedule = load_schedule(conn, &med.id)?;
            Ok(Some(med))
        }
        None => Ok(None),
    }
}

pub fn list_medications(conn: &Connection, user_id: &str) -> Result<Vec<Medication>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT id, user_id, name, frequency, instruction, remaining_doses, dosage, note, image_url
         FROM medications WHERE user_id = ?1 ORDER BY name COLLATE NOCASE, id",
    )?;
    let rows = stmt.query_map(params![user_id], medication_row)?;

    let mut meds = Vec::new();
    for row in rows {
        let mut med = row?;
        med.schedule = load_schedule(conn, &med.id)?;
        meds.push(med);
    }
    Ok(meds)
}

/// Returns true when a row was removed. Checklist rows cascade.
pub fn delete_medication(conn: &Connection, id: &str) -> Result<bool, DatabaseError> {
    let removed = conn.execute("DELETE FROM medications WHERE id = ?1", params![id])?;
    Ok(removed > 0)
}

pub fn load_schedule(conn: &Connection, medication_id: &str) -> Result<WeeklySchedule, DatabaseError> {
    let mut stmt = conn.prepare_cached(
        "SELECT weekday, time, checked, checked_at FROM checklist_entries
         WHERE medication_id = ?1 ORDER BY weekday, position",
    )?;
    let rows = stmt.query_map(params![medication_id], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, Option<String>>(1)?,
            row.get::<_, Option<bool>>(2)?,
            row.get::<_, Option<String>>(3)?,
        ))
    })?;

    let mut schedule = WeeklySchedule::new();
    for row in rows {
        let (weekday, time, checked, checked_at) = row?;
        let entry = ChecklistEntry {
            time: time.as_deref().map(|t| parse_time("checklist_entries.time", t)).transpose()?,
            checked,
            timestamp: checked_at
                .as_deref()
                .map(|ts| parse_ts("checklist_entries.checked_at", ts))
                .transpose()?,
        };
        schedule.entry(Weekday::from_str(&weekday)?).or_default().push(entry);
    }
    Ok(schedule)
}

fn medication_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Medication> {
    Ok(Medication {
        id: row.get(0)?,
        user_id: row.get(1)?,
        name: row.get(2)?,
        schedule: WeeklySchedule::new(),
        frequency: row.get(3)?,
        instruction: row.get(4)?,
        remaining_doses: row.get(5)?,
        dosage: row.get(6)?,
        note: row.get(7)?,
        image_url: row.get(8)?,
    })
}
