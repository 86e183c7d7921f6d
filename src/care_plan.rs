//! Care plan: the operations screens call.
//!
//! Saving or deleting a medication or appointment keeps the store and the
//! reminder alarms in step. Checklist ticks are written one weekday at a time.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::checklist;
use crate::models::enums::Weekday;
use crate::models::*;
use crate::reconcile::{self, ReconcileError, ReconcileReport};
use crate::reminders::{ReminderError, ReminderScheduler, ScheduleOutcome};
use crate::store::{AppointmentStore, MedicationStore, NotificationLog, StoreError};

#[derive(Error, Debug)]
pub enum CarePlanError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// The record was saved; only its reminders are affected.
    #[error("Reminder error: {0}")]
    Reminder(#[from] ReminderError),

    #[error("Reconciliation error: {0}")]
    Reconcile(#[from] ReconcileError),

    #[error("{entity_type} not found: {id}")]
    NotFound { entity_type: String, id: String },

    #[error("Invalid {field}: {reason}")]
    Validation { field: String, reason: String },
}

fn required(field: &str, value: &str) -> Result<(), CarePlanError> {
    if value.trim().is_empty() {
        return Err(CarePlanError::Validation {
            field: field.into(),
            reason: "must not be empty".into(),
        });
    }
    Ok(())
}

pub struct CarePlan {
    medications: Arc<dyn MedicationStore>,
    appointments: Arc<dyn AppointmentStore>,
    notifications: Arc<dyn NotificationLog>,
    reminders: Arc<ReminderScheduler>,
}

impl CarePlan {
    pub fn new(
        medications: Arc<dyn MedicationStore>,
        appointments: Arc<dyn AppointmentStore>,
        notifications: Arc<dyn NotificationLog>,
        reminders: Arc<ReminderScheduler>,
    ) -> Self {
        Self {
            medications,
            appointments,
            notifications,
            reminders,
        }
    }

    // ── Medications ─────────────────────────────────────────

    pub fn list_medications(&self, user_id: &str) -> Result<Vec<Medication>, CarePlanError> {
        Ok(self.medications.list_medications(user_id)?)
    }

    /// Persist the medication, then re-arm its dose reminders from the new schedule.
    pub fn save_medication(&self, med: &Medication) -> Result<ScheduleOutcome, CarePlanError> {
        required("id", &med.id)?;
        required("user_id", &med.user_id)?;
        required("name", &med.name)?;

        let previous = self.medications.get_medication(&med.id)?;
        self.medications.upsert_medication(med)?;

        if let Some(old) = &previous {
            self.reminders.cancel_medication_reminders(old);
        }
        Ok(self.reminders.schedule_medication_reminders(med)?)
    }

    pub fn delete_medication(&self, id: &str) -> Result<bool, CarePlanError> {
        let previous = self.medications.get_medication(id)?;
        let removed = self.medications.delete_medication(id)?;
        if let Some(old) = &previous {
            self.reminders.cancel_medication_reminders(old);
        }
        Ok(removed)
    }

    /// Tick or un-tick one dose slot. Returns the updated entry.
    pub fn set_dose_taken(
        &self,
        medication_id: &str,
        day: Weekday,
        index: usize,
        taken: bool,
        now: DateTime<Utc>,
    ) -> Result<ChecklistEntry, CarePlanError> {
        let med = self
            .medications
            .get_medication(medication_id)?
            .ok_or_else(|| CarePlanError::NotFound {
                entity_type: "Medication".into(),
                id: medication_id.into(),
            })?;

        let mut entries = med.schedule.get(&day).cloned().unwrap_or_default();
        let entry = entries.get_mut(index).ok_or_else(|| CarePlanError::Validation {
            field: "index".into(),
            reason: format!("{day} has no checklist entry {index}"),
        })?;
        if taken {
            checklist::mark_taken(entry, now);
        } else {
            checklist::mark_not_taken(entry);
        }
        let updated = entry.clone();

        self.medications.update_schedule_day(medication_id, day, &entries)?;
        Ok(updated)
    }

    /// On-demand sweep, same rules as the weekly job.
    pub fn reconcile_checklists(&self, user_id: &str, now: DateTime<Utc>) -> Result<ReconcileReport, CarePlanError> {
        Ok(reconcile::reconcile(self.medications.as_ref(), user_id, now)?)
    }

    // ── Appointments ────────────────────────────────────────

    pub fn list_appointments(&self, user_id: &str) -> Result<Vec<Appointment>, CarePlanError> {
        Ok(self.appointments.list_appointments(user_id)?)
    }

    /// Persist the appointment, then schedule its reminders.
    ///
    /// A missing date still saves the record but returns
    /// `ReminderError::MissingAppointmentDate`, with any old alarms cancelled.
    /// Completed appointments get no reminders.
    pub fn save_appointment(&self, appt: &Appointment) -> Result<ScheduleOutcome, CarePlanError> {
        required("id", &appt.id)?;
        required("user_id", &appt.user_id)?;
        required("name", &appt.name)?;

        self.appointments.upsert_appointment(appt)?;

        if appt.done == Some(true) || appt.date.is_none() {
            self.reminders.cancel_appointment_reminder(&appt.id);
        }
        if appt.done == Some(true) {
            return Ok(ScheduleOutcome::default());
        }
        Ok(self.reminders.schedule_appointment_reminders(appt)?)
    }

    pub fn delete_appointment(&self, id: &str) -> Result<bool, CarePlanError> {
        let removed = self.appointments.delete_appointment(id)?;
        self.reminders.cancel_appointment_reminder(id);
        Ok(removed)
    }

    /// Marking done silences the reminders; reopening re-arms them.
    pub fn set_appointment_done(&self, id: &str, done: bool) -> Result<ScheduleOutcome, CarePlanError> {
        self.appointments.set_appointment_done(id, done)?;
        if done {
            self.reminders.cancel_appointment_reminder(id);
            return Ok(ScheduleOutcome::default());
        }

        let appt = self
            .appointments
            .get_appointment(id)?
            .ok_or_else(|| CarePlanError::NotFound {
                entity_type: "Appointment".into(),
                id: id.into(),
            })?;
        Ok(self.reminders.schedule_appointment_reminders(&appt)?)
    }

    // ── Notification log ────────────────────────────────────

    pub fn notifications(&self, user_id: &str) -> Result<Vec<NotificationRecord>, CarePlanError> {
        Ok(self.notifications.list_notifications(user_id)?)
    }

    pub fn clear_notifications(&self, user_id: &str) -> Result<usize, CarePlanError> {
        Ok(self.notifications.clear_notifications(user_id)?)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, NaiveDate, NaiveTime, TimeZone};
    use tokio::runtime::Handle;
    use tokio::sync::mpsc;

    use super::*;
    use crate::db::{open_memory_database, shared};
    use crate::reminders::{AlarmService, FiredAlarm, RequestCode, ReminderTimes, TokioAlarmService, TracingPresenter};
    use crate::store::SqliteStore;

    struct Fixture {
        plan: CarePlan,
        store: SqliteStore,
        alarms: Arc<TokioAlarmService>,
        _fired: mpsc::UnboundedReceiver<FiredAlarm>,
    }

    fn fixture() -> Fixture {
        let store = SqliteStore::new(shared(open_memory_database().unwrap()));
        let (tx, rx) = mpsc::unbounded_channel();
        let alarms = Arc::new(TokioAlarmService::new(Handle::current(), tx, None));
        let scheduler = Arc::new(ReminderScheduler::new(
            alarms.clone(),
            Arc::new(TracingPresenter::new()),
            Arc::new(store.clone()),
            ReminderTimes::default(),
        ));
        let plan = CarePlan::new(
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            scheduler,
        );
        Fixture {
            plan,
            store,
            alarms,
            _fired: rx,
        }
    }

    fn t(h: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, 0, 0).unwrap()
    }

    fn medication(times: &[u32]) -> Medication {
        let mut schedule = WeeklySchedule::new();
        schedule.insert(Weekday::Monday, times.iter().map(|h| ChecklistEntry::at(t(*h))).collect());
        Medication {
            id: "m1".into(),
            user_id: "u1".into(),
            name: "Isoniazid".into(),
            schedule,
            frequency: "Daily".into(),
            instruction: String::new(),
            remaining_doses: 60,
            dosage: "300 mg".into(),
            note: String::new(),
            image_url: None,
        }
    }

    fn appointment(date: Option<NaiveDate>) -> Appointment {
        Appointment {
            id: "a1".into(),
            user_id: "u1".into(),
            name: "Chest X-ray".into(),
            date,
            time: Some(t(10)),
            location: "Radiology".into(),
            note: None,
            done: None,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn editing_schedule_moves_alarms() {
        let f = fixture();
        let outcome = f.plan.save_medication(&medication(&[8, 20])).unwrap();
        assert_eq!(outcome.armed.len(), 2);

        f.plan.save_medication(&medication(&[9])).unwrap();
        let pending = f.alarms.pending();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].request_code, RequestCode::medication_slot("m1", Weekday::Monday, t(9)));

        assert!(f.plan.delete_medication("m1").unwrap());
        assert!(f.alarms.pending().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn blank_name_rejected_before_saving() {
        let f = fixture();
        let mut med = medication(&[8]);
        med.name = "  ".into();
        assert!(matches!(
            f.plan.save_medication(&med),
            Err(CarePlanError::Validation { .. })
        ));
        assert!(f.store.get_medication("m1").unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn ticking_a_dose_writes_only_that_day() {
        let f = fixture();
        f.plan.save_medication(&medication(&[8, 20])).unwrap();
        let now = Utc.with_ymd_and_hms(2025, 3, 10, 8, 5, 0).unwrap();

        let entry = f.plan.set_dose_taken("m1", Weekday::Monday, 1, true, now).unwrap();
        assert_eq!(entry.checked, Some(true));
        assert_eq!(entry.timestamp, Some(now));

        let stored = f.store.get_medication("m1").unwrap().unwrap();
        assert_eq!(stored.schedule[&Weekday::Monday][1], entry);
        assert_eq!(stored.schedule[&Weekday::Monday][0].checked, None);

        let entry = f.plan.set_dose_taken("m1", Weekday::Monday, 1, false, now).unwrap();
        assert_eq!(entry.checked, Some(false));
        assert_eq!(entry.timestamp, None);
    }

    #[tokio::test(start_paused = true)]
    async fn ticking_unknown_slot_is_rejected() {
        let f = fixture();
        f.plan.save_medication(&medication(&[8])).unwrap();
        let now = Utc::now();
        assert!(matches!(
            f.plan.set_dose_taken("m1", Weekday::Friday, 0, true, now),
            Err(CarePlanError::Validation { .. })
        ));
        assert!(matches!(
            f.plan.set_dose_taken("ghost", Weekday::Monday, 0, true, now),
            Err(CarePlanError::NotFound { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn on_demand_reconcile_resets_stale_ticks() {
        let f = fixture();
        f.plan.save_medication(&medication(&[8])).unwrap();
        let then = Utc.with_ymd_and_hms(2025, 3, 1, 8, 0, 0).unwrap();
        f.plan.set_dose_taken("m1", Weekday::Monday, 0, true, then).unwrap();

        let report = f.plan.reconcile_checklists("u1", then + Duration::days(8)).unwrap();
        assert_eq!(report.entries_reset, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn undated_appointment_saves_but_reports() {
        let f = fixture();
        let err = f.plan.save_appointment(&appointment(None)).unwrap_err();
        assert!(matches!(
            err,
            CarePlanError::Reminder(ReminderError::MissingAppointmentDate { .. })
        ));
        assert!(f.store.get_appointment("a1").unwrap().is_some());
        assert!(f.alarms.pending().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn done_silences_and_reopen_rearms() {
        let f = fixture();
        f.plan.save_appointment(&appointment(NaiveDate::from_ymd_opt(2099, 1, 15))).unwrap();
        assert_eq!(f.alarms.pending().len(), 2);

        f.plan.set_appointment_done("a1", true).unwrap();
        assert!(f.alarms.pending().is_empty());

        let outcome = f.plan.set_appointment_done("a1", false).unwrap();
        assert_eq!(outcome.armed.len(), 2);

        assert!(f.plan.delete_appointment("a1").unwrap());
        assert!(f.alarms.pending().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn notification_log_read_and_clear() {
        let f = fixture();
        f.store
            .append_notification(&NotificationRecord {
                id: "n1".into(),
                user_id: "u1".into(),
                title: "Time to take Isoniazid".into(),
                description: "300 mg".into(),
                timestamp: Utc::now(),
            })
            .unwrap();
        assert_eq!(f.plan.notifications("u1").unwrap().len(), 1);
        assert_eq!(f.plan.clear_notifications("u1").unwrap(), 1);
        assert!(f.plan.notifications("u1").unwrap().is_empty());
    }
}
