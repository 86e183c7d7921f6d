use std::sync::Arc;

use chrono::{DateTime, Duration, Local, Utc};
use uuid::Uuid;

use super::alarm::{AlarmRegistration, AlarmService, ReminderPayload};
use super::presenter::{ActionEvent, Notification, NotificationPresenter};
use super::triggers::{appointment_triggers, next_weekly_occurrence, ReminderTimes};
use super::{ReminderError, RequestCode};
use crate::models::enums::{NotificationAction, ReminderKind};
use crate::models::*;
use crate::store::NotificationLog;

/// What happened to each alarm of one scheduling call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScheduleOutcome {
    pub armed: Vec<RequestCode>,
    /// Trigger already in the past. An earlier alarm under the code was cancelled
    /// unless it is a pending snooze.
    pub skipped: Vec<RequestCode>,
    /// Registration failed; logged and not retried.
    pub failed: Vec<RequestCode>,
}

/// Turns appointments and medications into alarms, and fired alarms into
/// logged, visible notifications.
pub struct ReminderScheduler {
    alarms: Arc<dyn AlarmService>,
    presenter: Arc<dyn NotificationPresenter>,
    log: Arc<dyn NotificationLog>,
    times: ReminderTimes,
}

impl ReminderScheduler {
    pub fn new(
        alarms: Arc<dyn AlarmService>,
        presenter: Arc<dyn NotificationPresenter>,
        log: Arc<dyn NotificationLog>,
        times: ReminderTimes,
    ) -> Self {
        Self {
            alarms,
            presenter,
            log,
            times,
        }
    }

    pub fn alarms(&self) -> &Arc<dyn AlarmService> {
        &self.alarms
    }

    fn ensure_exact(&self) -> Result<(), ReminderError> {
        if self.alarms.can_schedule_exact() {
            Ok(())
        } else {
            Err(ReminderError::AlarmsUnavailable)
        }
    }

    fn arm(&self, outcome: &mut ScheduleOutcome, registration: AlarmRegistration) {
        let code = registration.request_code;
        match self.alarms.register(registration) {
            Ok(()) => outcome.armed.push(code),
            Err(e) => {
                tracing::warn!(request_code = %code, error = %e, "Alarm registration failed");
                outcome.failed.push(code);
            }
        }
    }

    /// A one-shot alarm under `code` due within one snooze delay of `now`.
    fn snoozed(&self, code: RequestCode, now: DateTime<Utc>) -> bool {
        self.alarms.pending().iter().any(|r| {
            r.request_code == code && r.repeat_every.is_none() && r.trigger_at <= now + self.times.snooze
        })
    }

    fn cancel_code(&self, code: RequestCode) -> bool {
        match self.alarms.cancel(code) {
            Ok(was_armed) => was_armed,
            Err(e) => {
                tracing::warn!(request_code = %code, error = %e, "Alarm cancellation failed");
                false
            }
        }
    }

    /// Arm the day-before and day-of reminders. Scheduling again replaces both.
    pub fn schedule_appointment_reminders(&self, appt: &Appointment) -> Result<ScheduleOutcome, ReminderError> {
        self.schedule_appointment_reminders_at(appt, Utc::now())
    }

    pub fn schedule_appointment_reminders_at(
        &self,
        appt: &Appointment,
        now: DateTime<Utc>,
    ) -> Result<ScheduleOutcome, ReminderError> {
        let date = appt.date.ok_or_else(|| ReminderError::MissingAppointmentDate {
            appointment_id: appt.id.clone(),
        })?;
        self.ensure_exact()?;

        let triggers = appointment_triggers(&Local, date, &self.times);
        let reminders = [
            (
                ReminderKind::AppointmentDayBefore,
                RequestCode::appointment_day_before(&appt.id),
                triggers.day_before,
                format!("Appointment tomorrow: {}", appt.name),
            ),
            (
                ReminderKind::AppointmentDayOf,
                RequestCode::appointment_day_of(&appt.id),
                triggers.day_of,
                format!("Appointment today: {}", appt.name),
            ),
        ];

        let mut outcome = ScheduleOutcome::default();
        for (kind, code, trigger_at, title) in reminders {
            if trigger_at <= now {
                tracing::debug!(appointment_id = %appt.id, %kind, %trigger_at, "Reminder time already passed");
                if self.snoozed(code, now) {
                    tracing::debug!(request_code = %code, "Keeping snoozed reminder");
                } else {
                    self.cancel_code(code);
                }
                outcome.skipped.push(code);
                continue;
            }
            let payload = ReminderPayload {
                kind,
                request_code: code,
                user_id: appt.user_id.clone(),
                entity_id: appt.id.clone(),
                title,
                body: appt.when_and_where(),
            };
            self.arm(
                &mut outcome,
                AlarmRegistration {
                    request_code: code,
                    trigger_at,
                    repeat_every: None,
                    payload,
                },
            );
        }

        tracing::info!(
            appointment_id = %appt.id,
            armed = outcome.armed.len(),
            skipped = outcome.skipped.len(),
            failed = outcome.failed.len(),
            "Appointment reminders scheduled"
        );
        Ok(outcome)
    }

    /// Cancel both appointment alarms. Nothing armed is not an error.
    /// Returns how many were armed.
    pub fn cancel_appointment_reminder(&self, appointment_id: &str) -> usize {
        let cancelled = RequestCode::appointment_pair(appointment_id)
            .into_iter()
            .filter(|code| self.cancel_code(*code))
            .count();
        tracing::debug!(appointment_id, cancelled, "Appointment reminders cancelled");
        cancelled
    }

    /// One weekly alarm per distinct dose slot.
    pub fn schedule_medication_reminders(&self, med: &Medication) -> Result<ScheduleOutcome, ReminderError> {
        self.schedule_medication_reminders_at(med, Utc::now())
    }

    pub fn schedule_medication_reminders_at(
        &self,
        med: &Medication,
        now: DateTime<Utc>,
    ) -> Result<ScheduleOutcome, ReminderError> {
        let slots = med.dose_slots();
        if slots.is_empty() {
            return Ok(ScheduleOutcome::default());
        }
        self.ensure_exact()?;

        let body = if med.instruction.is_empty() {
            med.dosage.clone()
        } else {
            format!("{}, {}", med.dosage, med.instruction)
        };

        let mut outcome = ScheduleOutcome::default();
        for (day, time) in slots {
            let code = RequestCode::medication_slot(&med.id, day, time);
            let payload = ReminderPayload {
                kind: ReminderKind::MedicationDose,
                request_code: code,
                user_id: med.user_id.clone(),
                entity_id: med.id.clone(),
                title: format!("Time to take {}", med.name),
                body: body.clone(),
            };
            self.arm(
                &mut outcome,
                AlarmRegistration {
                    request_code: code,
                    trigger_at: next_weekly_occurrence(&Local, day, time, now),
                    repeat_every: Some(Duration::weeks(1)),
                    payload,
                },
            );
        }

        tracing::info!(
            medication_id = %med.id,
            armed = outcome.armed.len(),
            failed = outcome.failed.len(),
            "Medication reminders scheduled"
        );
        Ok(outcome)
    }

    /// Cancel every slot alarm (and any parked snooze) derived from `med`'s schedule.
    pub fn cancel_medication_reminders(&self, med: &Medication) -> usize {
        let mut cancelled = 0;
        for (day, time) in med.dose_slots() {
            let code = RequestCode::medication_slot(&med.id, day, time);
            for c in [code, code.snooze_slot()] {
                if self.cancel_code(c) {
                    cancelled += 1;
                }
            }
        }
        tracing::debug!(medication_id = %med.id, cancelled, "Medication reminders cancelled");
        cancelled
    }

    /// Log the reminder for its user, then show it.
    pub fn on_reminder_fired(&self, payload: &ReminderPayload) -> Result<NotificationRecord, ReminderError> {
        self.on_reminder_fired_at(payload, Utc::now())
    }

    pub fn on_reminder_fired_at(
        &self,
        payload: &ReminderPayload,
        now: DateTime<Utc>,
    ) -> Result<NotificationRecord, ReminderError> {
        let record = NotificationRecord {
            id: Uuid::new_v4().to_string(),
            user_id: payload.user_id.clone(),
            title: payload.title.clone(),
            description: payload.body.clone(),
            timestamp: stored_precision(now),
        };
        self.log.append_notification(&record)?;
        self.presenter.display(&Notification::for_reminder(payload))?;
        Ok(record)
    }

    pub fn handle_action(&self, event: &ActionEvent) -> Result<(), ReminderError> {
        match event.action {
            NotificationAction::Acknowledge => {
                self.presenter.dismiss(event.payload.request_code)?;
                Ok(())
            }
            NotificationAction::Snooze => self.snooze(&event.payload).map(|_| ()),
        }
    }

    /// Re-fire the same reminder after the snooze delay. A second snooze
    /// replaces the first. Returns the code the snooze is armed under.
    pub fn snooze(&self, payload: &ReminderPayload) -> Result<RequestCode, ReminderError> {
        self.snooze_at(payload, Utc::now())
    }

    pub fn snooze_at(&self, payload: &ReminderPayload, now: DateTime<Utc>) -> Result<RequestCode, ReminderError> {
        self.ensure_exact()?;

        // Weekly alarms must stay armed, so their snooze is parked next to them
        let code = if payload.kind.is_recurring() {
            payload.request_code.snooze_slot()
        } else {
            payload.request_code
        };
        self.alarms.register(AlarmRegistration {
            request_code: code,
            trigger_at: now + self.times.snooze,
            repeat_every: None,
            payload: payload.clone(),
        })?;

        if let Err(e) = self.presenter.dismiss(payload.request_code) {
            tracing::warn!(request_code = %payload.request_code, error = %e, "Failed to dismiss snoozed notification");
        }
        tracing::info!(request_code = %code, "Reminder snoozed");
        Ok(code)
    }
}
