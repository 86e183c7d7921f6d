use crate::db::{self, repository, DatabaseError, SharedConnection};
use crate::models::enums::Weekday;
use crate::models::*;

use super::{AppointmentStore, MedicationStore, NotificationLog, StoreError};

/// Store backed by the embedded SQLite cache.
#[derive(Clone)]
pub struct SqliteStore {
    conn: SharedConnection,
}

impl SqliteStore {
    pub fn new(conn: SharedConnection) -> Self {
        Self { conn }
    }

    pub fn connection(&self) -> &SharedConnection {
        &self.conn
    }

    fn with_conn<T>(
        &self,
        f: impl FnOnce(&rusqlite::Connection) -> Result<T, DatabaseError>,
    ) -> Result<T, StoreError> {
        let guard = db::lock(&self.conn)?;
        f(&guard).map_err(|e| match e {
            DatabaseError::NotFound { entity_type, id } => StoreError::NotFound { entity_type, id },
            other => StoreError::Database(other),
        })
    }
}

impl MedicationStore for SqliteStore {
    fn list_medications(&self, user_id: &str) -> Result<Vec<Medication>, StoreError> {
        self.with_conn(|conn| repository::list_medications(conn, user_id))
    }

    fn get_medication(&self, id: &str) -> Result<Option<Medication>, StoreError> {
        self.with_conn(|conn| repository::get_medication(conn, id))
    }

    fn upsert_medication(&self, med: &Medication) -> Result<(), StoreError> {
        self.with_conn(|conn| repository::upsert_medication(conn, med))
    }

    fn delete_medication(&self, id: &str) -> Result<bool, StoreError> {
        self.with_conn(|conn| repository::delete_medication(conn, id))
    }

    fn update_schedule_day(
        &self,
        medication_id: &str,
        day: Weekday,
        entries: &[ChecklistEntry],
    ) -> Result<(), StoreError> {
        self.with_conn(|conn| repository::replace_schedule_day(conn, medication_id, day, entries))
    }
}

impl AppointmentStore for SqliteStore {
    fn list_appointments(&self, user_id: &str) -> Result<Vec<Appointment>, StoreError> {
        self.with_conn(|conn| repository::list_appointments(conn, user_id))
    }

    fn get_appointment(&self, id: &str) -> Result<Option<Appointment>, StoreError> {
        self.with_conn(|conn| repository::get_appointment(conn, id))
    }

    fn upsert_appointment(&self, appt: &Appointment) -> Result<(), StoreError> {
        self.with_conn(|conn| repository::upsert_appointment(conn, appt))
    }

    fn delete_appointment(&self, id: &str) -> Result<bool, StoreError> {
        self.with_conn(|conn| repository::delete_appointment(conn, id))
    }

    fn set_appointment_done(&self, id: &str, done: bool) -> Result<(), StoreError> {
        self.with_conn(|conn| repository::set_appointment_done(conn, id, done))
    }
}

impl NotificationLog for SqliteStore {
    fn append_notification(&self, record: &NotificationRecord) -> Result<(), StoreError> {
        self.with_conn(|conn| repository::append_notification(conn, record))
    }

    fn list_notifications(&self, user_id: &str) -> Result<Vec<NotificationRecord>, StoreError> {
        self.with_conn(|conn| repository::list_notifications(conn, user_id))
    }

    fn clear_notifications(&self, user_id: &str) -> Result<usize, StoreError> {
        self.with_conn(|conn| repository::clear_notifications(conn, user_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{open_memory_database, shared};

    fn store() -> SqliteStore {
        SqliteStore::new(shared(open_memory_database().unwrap()))
    }

    #[test]
    fn missing_medication_day_update_maps_to_not_found() {
        let err = store()
            .update_schedule_day("ghost", Weekday::Friday, &[])
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[test]
    fn missing_appointment_done_maps_to_not_found() {
        let err = store().set_appointment_done("ghost", true).unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[test]
    fn clones_share_one_connection() {
        let a = store();
        let b = a.clone();
        a.append_notification(&NotificationRecord {
            id: "n1".into(),
            user_id: "u1".into(),
            title: "t".into(),
            description: "d".into(),
            timestamp: chrono::Utc::now(),
        })
        .unwrap();
        assert_eq!(b.list_notifications("u1").unwrap().len(), 1);
    }
}
