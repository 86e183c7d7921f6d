use rusqlite::{params, Connection};

use super::{format_ts, parse_ts};
use crate::db::DatabaseError;
use crate::models::*;

/// Append one record. A single INSERT, so concurrent firings never lose entries.
pub fn append_notification(conn: &Connection, record: &NotificationRecord) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO notifications (id, user_id, title, description, timestamp)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            record.id,
            record.user_id,
            record.title,
            record.description,
            format_ts(&record.timestamp),
        ],
    )?;
    Ok(())
}

/// Newest first.
pub fn list_notifications(conn: &Connection, user_id: &str) -> Result<Vec<NotificationRecord>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT id, user_id, title, description, timestamp
         FROM notifications WHERE user_id = ?1
         ORDER BY timestamp DESC, rowid DESC",
    )?;
    let rows = stmt.query_map(params![user_id], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, String>(3)?,
            row.get::<_, String>(4)?,
        ))
    })?;

    let mut records = Vec::new();
    for row in rows {
        let (id, user_id, title, description, timestamp) = row?;
        records.push(NotificationRecord {
            id,
            user_id,
            title,
            description,
            timestamp: parse_ts("notifications.timestamp", &timestamp)?,
        });
    }
    Ok(records)
}

/// Returns the number of records removed.
pub fn clear_notifications(conn: &Connection, user_id: &str) -> Result<usize, DatabaseError> {
    let removed = conn.execute("DELETE FROM notifications WHERE user_id = ?1", params![user_id])?;
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::sqlite::open_memory_database;
    use chrono::{Duration, TimeZone, Utc};

    fn record(id: &str, user: &str, minutes: i64) -> NotificationRecord {
        NotificationRecord {
            id: id.into(),
            user_id: user.into(),
            title: "Medication reminder".into(),
            description: format!("Dose {id}"),
            timestamp: Utc.with_ymd_and_hms(2025, 3, 10, 8, 0, 0).unwrap() + Duration::minutes(minutes),
        }
    }

    #[test]
    fn list_is_newest_first_and_user_scoped() {
        let conn = open_memory_database().unwrap();
        append_notification(&conn, &record("n1", "u1", 0)).unwrap();
        append_notification(&conn, &record("n2", "u1", 5)).unwrap();
        append_notification(&conn, &record("n3", "u2", 10)).unwrap();

        let ids: Vec<_> = list_notifications(&conn, "u1").unwrap().into_iter().map(|n| n.id).collect();
        assert_eq!(ids, vec!["n2", "n1"]);
    }

    #[test]
    fn clear_only_touches_one_user() {
        let conn = open_memory_database().unwrap();
        append_notification(&conn, &record("n1", "u1", 0)).unwrap();
        append_notification(&conn, &record("n2", "u2", 0)).unwrap();

        assert_eq!(clear_notifications(&conn, "u1").unwrap(), 1);
        assert!(list_notifications(&conn, "u1").unwrap().is_empty());
        assert_eq!(list_notifications(&conn, "u2").unwrap().len(), 1);
        assert_eq!(clear_notifications(&conn, "u1").unwrap(), 0);
    }

    #[test]
    fn same_timestamp_keeps_append_order() {
        let conn = open_memory_database().unwrap();
        append_notification(&conn, &record("first", "u1", 0)).unwrap();
        append_notification(&conn, &record("second", "u1", 0)).unwrap();

        let ids: Vec<_> = list_notifications(&conn, "u1").unwrap().into_iter().map(|n| n.id).collect();
        assert_eq!(ids, vec!["second", "first"]);
    }
}
