use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use super::{format_ts, parse_ts};
use crate::db::DatabaseError;

/// Bookkeeping for a periodic job, so cadence survives restarts.
#[derive(Debug, Clone, PartialEq)]
pub struct JobRun {
    pub job_name: String,
    pub last_started_at: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_status: String,
    pub last_error: Option<String>,
}

pub fn record_job_started(conn: &Connection, job_name: &str, at: &DateTime<Utc>) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO job_runs (job_name, last_started_at, last_status)
         VALUES (?1, ?2, 'running')
         ON CONFLICT(job_name) DO UPDATE SET
            last_started_at = excluded.last_started_at,
            last_status = 'running'",
        params![job_name, format_ts(at)],
    )?;
    Ok(())
}

pub fn record_job_succeeded(conn: &Connection, job_name: &str, at: &DateTime<Utc>) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO job_runs (job_name, last_success_at, last_status)
         VALUES (?1, ?2, 'succeeded')
         ON CONFLICT(job_name) DO UPDATE SET
            last_success_at = excluded.last_success_at,
            last_status = 'succeeded',
            last_error = NULL",
        params![job_name, format_ts(at)],
    )?;
    Ok(())
}

pub fn record_job_failed(conn: &Connection, job_name: &str, error: &str) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO job_runs (job_name, last_status, last_error)
         VALUES (?1, 'failed', ?2)
         ON CONFLICT(job_name) DO UPDATE SET
            last_status = 'failed',
            last_error = excluded.last_error",
        params![job_name, error],
    )?;
    Ok(())
}

pub fn get_job_run(conn: &Connection, job_name: &str) -> Result<Option<JobRun>, DatabaseError> {
    let row = conn
        .query_row(
            "SELECT job_name, last_started_at, last_success_at, last_status, last_error
             FROM job_runs WHERE job_name = ?1",
            params![job_name],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Option<String>>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, Option<String>>(4)?,
                ))
            },
        )
        .optional()?;

    let Some((job_name, started, success, last_status, last_error)) = row else {
        return Ok(None);
    };
    Ok(Some(JobRun {
        job_name,
        last_started_at: started.as_deref().map(|s| parse_ts("job_runs.last_started_at", s)).transpose()?,
        last_success_at: success.as_deref().map(|s| parse_ts("job_runs.last_success_at", s)).transpose()?,
        last_status,
        last_error,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::sqlite::open_memory_database;
    use chrono::TimeZone;

    #[test]
    fn lifecycle_keeps_last_success_across_failure() {
        let conn = open_memory_database().unwrap();
        let t1 = Utc.with_ymd_and_hms(2025, 3, 3, 3, 0, 0).unwrap();
        let t2 = Utc.with_ymd_and_hms(2025, 3, 10, 3, 0, 0).unwrap();

        record_job_started(&conn, "reconcile", &t1).unwrap();
        record_job_succeeded(&conn, "reconcile", &t1).unwrap();
        record_job_started(&conn, "reconcile", &t2).unwrap();
        record_job_failed(&conn, "reconcile", "network down").unwrap();

        let run = get_job_run(&conn, "reconcile").unwrap().unwrap();
        assert_eq!(run.last_status, "failed");
        assert_eq!(run.last_started_at, Some(t2));
        assert_eq!(run.last_success_at, Some(t1));
        assert_eq!(run.last_error.as_deref(), Some("network down"));
    }

    #[test]
    fn success_clears_error() {
        let conn = open_memory_database().unwrap();
        let t = Utc.with_ymd_and_hms(2025, 3, 3, 3, 0, 0).unwrap();
        record_job_failed(&conn, "reconcile", "boom").unwrap();
        record_job_succeeded(&conn, "reconcile", &t).unwrap();

        let run = get_job_run(&conn, "reconcile").unwrap().unwrap();
        assert_eq!(run.last_status, "succeeded");
        assert!(run.last_error.is_none());
    }

    #[test]
    fn unknown_job_is_none() {
        let conn = open_memory_database().unwrap();
        assert!(get_job_run(&conn, "nope").unwrap().is_none());
    }
}
