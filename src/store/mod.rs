//! Record stores for medications, appointments and the notification log.
//!
//! Three implementations sit behind the same traits:
//! - `SqliteStore`: the embedded local cache, usable on its own offline
//! - `FirestoreStore`: the cloud document store over its REST API
//! - `CachedStore`: remote-of-record with a write-through local cache and a change feed

pub mod cached;
pub mod firestore;
pub mod firestore_types;
pub mod local;

pub use cached::CachedStore;
pub use firestore::FirestoreStore;
pub use local::SqliteStore;

use serde::Serialize;
use thiserror::Error;

use crate::db::DatabaseError;
use crate::models::enums::Weekday;
use crate::models::*;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    /// The remote could not be reached. Callers may fall back to cached data.
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Remote store returned {status}: {body}")]
    Remote { status: u16, body: String },

    #[error("Could not decode {entity_type}: {reason}")]
    Decode { entity_type: String, reason: String },

    #[error("{entity_type} not found: {id}")]
    NotFound { entity_type: String, id: String },
}

impl StoreError {
    pub fn is_transport(&self) -> bool {
        matches!(self, StoreError::Transport(_))
    }
}

/// Medication records and their weekly checklists.
pub trait MedicationStore: Send + Sync {
    fn list_medications(&self, user_id: &str) -> Result<Vec<Medication>, StoreError>;

    fn get_medication(&self, id: &str) -> Result<Option<Medication>, StoreError>;

    /// Insert or replace the whole record.
    fn upsert_medication(&self, med: &Medication) -> Result<(), StoreError>;

    /// Returns false when nothing was stored under `id`.
    fn delete_medication(&self, id: &str) -> Result<bool, StoreError>;

    /// Replace one weekday's checklist. Other fields and days are untouched,
    /// so concurrent edits elsewhere in the record are not overwritten.
    fn update_schedule_day(
        &self,
        medication_id: &str,
        day: Weekday,
        entries: &[ChecklistEntry],
    ) -> Result<(), StoreError>;
}

pub trait AppointmentStore: Send + Sync {
    fn list_appointments(&self, user_id: &str) -> Result<Vec<Appointment>, StoreError>;

    fn get_appointment(&self, id: &str) -> Result<Option<Appointment>, StoreError>;

    fn upsert_appointment(&self, appt: &Appointment) -> Result<(), StoreError>;

    fn delete_appointment(&self, id: &str) -> Result<bool, StoreError>;

    fn set_appointment_done(&self, id: &str, done: bool) -> Result<(), StoreError>;
}

/// Per-user log of fired reminders. Appends are atomic single inserts.
pub trait NotificationLog: Send + Sync {
    fn append_notification(&self, record: &NotificationRecord) -> Result<(), StoreError>;

    /// Newest first.
    fn list_notifications(&self, user_id: &str) -> Result<Vec<NotificationRecord>, StoreError>;

    /// Returns how many records were removed.
    fn clear_notifications(&self, user_id: &str) -> Result<usize, StoreError>;
}

/// Published on the change feed after every successful cached write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StoreChange {
    MedicationSaved { id: String, user_id: String },
    MedicationDeleted { id: String },
    ScheduleDayUpdated { medication_id: String, weekday: Weekday },
    AppointmentSaved { id: String, user_id: String },
    AppointmentDeleted { id: String },
    AppointmentDone { id: String, done: bool },
}
