use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};

use super::{format_ts, parse_ts};
use crate::db::DatabaseError;

/// Ledger row mirroring one armed alarm. The payload is opaque JSON.
#[derive(Debug, Clone, PartialEq)]
pub struct AlarmRow {
    pub request_code: i32,
    pub trigger_at: DateTime<Utc>,
    pub repeat_secs: Option<i64>,
    pub payload: String,
}

pub fn upsert_alarm(conn: &Connection, alarm: &AlarmRow) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO scheduled_alarms (request_code, trigger_at, repeat_secs, payload)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(request_code) DO UPDATE SET
            trigger_at = excluded.trigger_at,
            repeat_secs = excluded.repeat_secs,
            payload = excluded.payload",
        params![
            alarm.request_code,
            format_ts(&alarm.trigger_at),
            alarm.repeat_secs,
            alarm.payload,
        ],
    )?;
    Ok(())
}

pub fn delete_alarm(conn: &Connection, request_code: i32) -> Result<bool, DatabaseError> {
    let removed = conn.execute(
        "DELETE FROM scheduled_alarms WHERE request_code = ?1",
        params![request_code],
    )?;
    Ok(removed > 0)
}

/// All armed alarms, soonest first.
pub fn list_alarms(conn: &Connection) -> Result<Vec<AlarmRow>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT request_code, trigger_at, repeat_secs, payload
         FROM scheduled_alarms ORDER BY trigger_at, request_code",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok((
            row.get::<_, i32>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, Option<i64>>(2)?,
            row.get::<_, String>(3)?,
        ))
    })?;

    let mut alarms = Vec::new();
    for row in rows {
        let (request_code, trigger_at, repeat_secs, payload) = row?;
        alarms.push(AlarmRow {
            request_code,
            trigger_at: parse_ts("scheduled_alarms.trigger_at", &trigger_at)?,
            repeat_secs,
            payload,
        });
    }
    Ok(alarms)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::sqlite::open_memory_database;
    use chrono::TimeZone;

    fn row(code: i32, hour: u32) -> AlarmRow {
        AlarmRow {
            request_code: code,
            trigger_at: Utc.with_ymd_and_hms(2025, 3, 10, hour, 0, 0).unwrap(),
            repeat_secs: None,
            payload: "{}".into(),
        }
    }

    #[test]
    fn same_code_replaces_row() {
        let conn = open_memory_database().unwrap();
        upsert_alarm(&conn, &row(7, 6)).unwrap();
        upsert_alarm(&conn, &row(7, 9)).unwrap();

        let alarms = list_alarms(&conn).unwrap();
        assert_eq!(alarms, vec![row(7, 9)]);
    }

    #[test]
    fn negative_codes_are_valid_keys() {
        let conn = open_memory_database().unwrap();
        upsert_alarm(&conn, &row(-1_234_567, 6)).unwrap();
        assert!(delete_alarm(&conn, -1_234_567).unwrap());
        assert!(!delete_alarm(&conn, -1_234_567).unwrap());
    }

    #[test]
    fn list_is_soonest_first() {
        let conn = open_memory_database().unwrap();
        upsert_alarm(&conn, &row(1, 13)).unwrap();
        upsert_alarm(&conn, &row(2, 6)).unwrap();
        let codes: Vec<_> = list_alarms(&conn).unwrap().into_iter().map(|a| a.request_code).collect();
        assert_eq!(codes, vec![2, 1]);
    }
}
