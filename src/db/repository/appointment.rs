use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension};

use super::{format_time, parse_time};
use crate::db::DatabaseError;
use crate::models::*;

pub fn upsert_appointment(conn: &Connection, appt: &Appointment) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO appointments (id, user_id, name, date, time, location, note, done)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
         ON CONFLICT(id) DO UPDATE SET
            user_id = excluded.user_id,
            name = excluded.name,
            date = excluded.date,
            time = excluded.time,
            location = excluded.location,
            note = excluded.note,
            done = excluded.done,
            updated_at = datetime('now')",
        params![
            appt.id,
            appt.user_id,
            appt.name,
            appt.date.map(|d| d.to_string()),
            appt.time.as_ref().map(format_time),
            appt.location,
            appt.note,
            appt.done,
        ],
    )?;
    Ok(())
}

pub fn get_appointment(conn: &Connection, id: &str) -> Result<Option<Appointment>, DatabaseError> {
    let row = conn
        .query_row(
            "SELECT id, user_id, name, date, time, location, note, done
             FROM appointments WHERE id = ?1",
            params![id],
            appointment_columns,
        )
        .optional()?;
    row.map(appointment_from_columns).transpose()
}

/// Upcoming first; undated appointments sort last.
pub fn list_appointments(conn: &Connection, user_id: &str) -> Result<Vec<Appointment>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT id, user_id, name, date, time, location, note, done
         FROM appointments WHERE user_id = ?1
         ORDER BY date IS NULL, date, time, id",
    )?;
    let rows = stmt.query_map(params![user_id], appointment_columns)?;

    let mut appts = Vec::new();
    for row in rows {
        appts.push(appointment_from_columns(row?)?);
    }
    Ok(appts)
}

pub fn delete_appointment(conn: &Connection, id: &str) -> Result<bool, DatabaseError> {
    let removed = conn.execute("DELETE FROM appointments WHERE id = ?1", params![id])?;
    Ok(removed > 0)
}

pub fn set_appointment_done(conn: &Connection, id: &str, done: bool) -> Result<(), DatabaseError> {
    let changed = conn.execute(
        "UPDATE appointments SET done = ?1, updated_at = datetime('now') WHERE id = ?2",
        params![done, id],
    )?;
    if changed == 0 {
        return Err(DatabaseError::NotFound {
            entity_type: "Appointment".into(),
            id: id.into(),
        });
    }
    Ok(())
}

type AppointmentColumns = (
    String,
    String,
    String,
    Option<String>,
    Option<String>,
    String,
    Option<String>,
    Option<bool>,
);

fn appointment_columns(row: &rusqlite::Row<'_>) -> rusqlite::Result<AppointmentColumns> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
    ))
}

fn appointment_from_columns(cols: AppointmentColumns) -> Result<Appointment, DatabaseError> {
    let (id, user_id, name, date, time, location, note, done) = cols;
    let date = date
        .map(|d| {
            NaiveDate::parse_from_str(&d, "%Y-%m-%d").map_err(|_| DatabaseError::InvalidValue {
                field: "appointments.date".into(),
                value: d.clone(),
            })
        })
        .transpose()?;
    let time = time.as_deref().map(|t| parse_time("appointments.time", t)).transpose()?;

    Ok(Appointment {
        id,
        user_id,
        name,
        date,
        time,
        location,
        note,
        done,
    })
}
