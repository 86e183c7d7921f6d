use std::collections::HashSet;

use tokio::sync::broadcast;

use super::{AppointmentStore, MedicationStore, NotificationLog, SqliteStore, StoreChange, StoreError};
use crate::models::enums::Weekday;
use crate::models::*;

/// Change feed buffer. Slow subscribers lag and skip, they never block writers.
const CHANGE_FEED_CAPACITY: usize = 64;

/// Remote store of record with a write-through local cache.
///
/// Writes hit the remote first and then the cache. Reads go to the remote and
/// refresh the cache; only a transport failure falls back to cached data.
pub struct CachedStore<R> {
    remote: R,
    cache: SqliteStore,
    changes: broadcast::Sender<StoreChange>,
}

impl<R> CachedStore<R> {
    pub fn new(remote: R, cache: SqliteStore) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        Self {
            remote,
            cache,
            changes,
        }
    }

    /// Subscribe to changes made through this store.
    pub fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
        self.changes.subscribe()
    }

    pub fn cache(&self) -> &SqliteStore {
        &self.cache
    }

    fn publish(&self, change: StoreChange) {
        // No subscribers is fine
        let _ = self.changes.send(change);
    }

    fn cache_write(&self, what: &str, result: Result<(), StoreError>) {
        if let Err(e) = result {
            tracing::warn!(error = %e, what, "Cache write failed; remote remains authoritative");
        }
    }
}

fn fallback<T>(what: &str, remote: Result<T, StoreError>) -> Result<Result<T, StoreError>, StoreError> {
    match remote {
        Err(e) if e.is_transport() => {
            tracing::warn!(error = %e, what, "Remote unreachable, serving cached data");
            Ok(Err(e))
        }
        Err(e) => Err(e),
        Ok(v) => Ok(Ok(v)),
    }
}

impl<R: MedicationStore> MedicationStore for CachedStore<R> {
    fn list_medications(&self, user_id: &str) -> Result<Vec<Medication>, StoreError> {
        let meds = match fallback("list_medications", self.remote.list_medications(user_id))? {
            Ok(meds) => meds,
            Err(_) => return self.cache.list_medications(user_id),
        };

        let live: HashSet<&str> = meds.iter().map(|m| m.id.as_str()).collect();
        for med in &meds {
            self.cache_write("medication", self.cache.upsert_medication(med));
        }
        // Drop records deleted elsewhere
        for stale in self.cache.list_medications(user_id)? {
            if !live.contains(stale.id.as_str()) {
                self.cache_write("medication", self.cache.delete_medication(&stale.id).map(|_| ()));
            }
        }
        Ok(meds)
    }

    fn get_medication(&self, id: &str) -> Result<Option<Medication>, StoreError> {
        match fallback("get_medication", self.remote.get_medication(id))? {
            Ok(Some(med)) => {
                self.cache_write("medication", self.cache.upsert_medication(&med));
                Ok(Some(med))
            }
            Ok(None) => {
                self.cache_write("medication", self.cache.delete_medication(id).map(|_| ()));
                Ok(None)
            }
            Err(_) => self.cache.get_medication(id),
        }
    }

    fn upsert_medication(&self, med: &Medication) -> Result<(), StoreError> {
        self.remote.upsert_medication(med)?;
        self.cache_write("medication", self.cache.upsert_medication(med));
        self.publish(StoreChange::MedicationSaved {
            id: med.id.clone(),
            user_id: med.user_id.clone(),
        });
        Ok(())
    }

    fn delete_medication(&self, id: &str) -> Result<bool, StoreError> {
        let removed = self.remote.delete_medication(id)?;
        self.cache_write("medication", self.cache.delete_medication(id).map(|_| ()));
        if removed {
            self.publish(StoreChange::MedicationDeleted { id: id.into() });
        }
        Ok(removed)
    }

    fn update_schedule_day(
        &self,
        medication_id: &str,
        day: Weekday,
        entries: &[ChecklistEntry],
    ) -> Result<(), StoreError> {
        self.remote.update_schedule_day(medication_id, day, entries)?;
        match self.cache.update_schedule_day(medication_id, day, entries) {
            // Not cached yet; the next read fills it in
            Err(StoreError::NotFound { .. }) => {}
            other => self.cache_write("checklist", other),
        }
        self.publish(StoreChange::ScheduleDayUpdated {
            medication_id: medication_id.into(),
            weekday: day,
        });
        Ok(())
    }
}

impl<R: AppointmentStore> AppointmentStore for CachedStore<R> {
    fn list_appointments(&self, user_id: &str) -> Result<Vec<Appointment>, StoreError> {
        let appts = match fallback("list_appointments", self.remote.list_appointments(user_id))? {
            Ok(appts) => appts,
            Err(_) => return self.cache.list_appointments(user_id),
        };

        let live: HashSet<&str> = appts.iter().map(|a| a.id.as_str()).collect();
        for appt in &appts {
            self.cache_write("appointment", self.cache.upsert_appointment(appt));
        }
        for stale in self.cache.list_appointments(user_id)? {
            if !live.contains(stale.id.as_str()) {
                self.cache_write("appointment", self.cache.delete_appointment(&stale.id).map(|_| ()));
            }
        }
        Ok(appts)
    }

    fn get_appointment(&self, id: &str) -> Result<Option<Appointment>, StoreError> {
        match fallback("get_appointment", self.remote.get_appointment(id))? {
            Ok(Some(appt)) => {
                self.cache_write("appointment", self.cache.upsert_appointment(&appt));
                Ok(Some(appt))
            }
            Ok(None) => {
                self.cache_write("appointment", self.cache.delete_appointment(id).map(|_| ()));
                Ok(None)
            }
            Err(_) => self.cache.get_appointment(id),
        }
    }

    fn upsert_appointment(&self, appt: &Appointment) -> Result<(), StoreError> {
        self.remote.upsert_appointment(appt)?;
        self.cache_write("appointment", self.cache.upsert_appointment(appt));
        self.publish(StoreChange::AppointmentSaved {
            id: appt.id.clone(),
            user_id: appt.user_id.clone(),
        });
        Ok(())
    }

    fn delete_appointment(&self, id: &str) -> Result<bool, StoreError> {
        let removed = self.remote.delete_appointment(id)?;
        self.cache_write("appointment", self.cache.delete_appointment(id).map(|_| ()));
        if removed {
            self.publish(StoreChange::AppointmentDeleted { id: id.into() });
        }
        Ok(removed)
    }

    fn set_appointment_done(&self, id: &str, done: bool) -> Result<(), StoreError> {
        self.remote.set_appointment_done(id, done)?;
        match self.cache.set_appointment_done(id, done) {
            Err(StoreError::NotFound { .. }) => {}
            other => self.cache_write("appointment", other),
        }
        self.publish(StoreChange::AppointmentDone { id: id.into(), done });
        Ok(())
    }
}

/// The notification log is device-local.
impl<R: Send + Sync> NotificationLog for CachedStore<R> {
    fn append_notification(&self, record: &NotificationRecord) -> Result<(), StoreError> {
        self.cache.append_notification(record)
    }

    fn list_notifications(&self, user_id: &str) -> Result<Vec<NotificationRecord>, StoreError> {
        self.cache.list_notifications(user_id)
    }

    fn clear_notifications(&self, user_id: &str) -> Result<usize, StoreError> {
        self.cache.clear_notifications(user_id)
    }
}
