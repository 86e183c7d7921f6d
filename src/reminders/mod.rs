//! Reminder scheduling: appointment and dose alarms, firing, and snooze.
//!
//! Flow: `ReminderScheduler` registers alarms with an `AlarmService`; when one
//! fires, the service sends a `FiredAlarm` to the dispatcher task, which calls
//! back into the scheduler to log the reminder and show it through the
//! `NotificationPresenter`. User actions on the notification travel back the
//! same way as `ActionEvent`s; the binary reads them from the console.

pub mod alarm;
pub mod dispatch;
pub mod presenter;
pub mod request_code;
pub mod scheduler;
pub mod triggers;

pub use alarm::{AlarmError, AlarmRegistration, AlarmService, FiredAlarm, ReminderPayload, TokioAlarmService};
pub use dispatch::{forward_console_actions, spawn_dispatcher, DispatcherHandle};
pub use presenter::{ActionEvent, Notification, NotificationPresenter, PresenterError, TracingPresenter};
pub use request_code::RequestCode;
pub use scheduler::{ReminderScheduler, ScheduleOutcome};
pub use triggers::ReminderTimes;

use thiserror::Error;

use crate::store::StoreError;

#[derive(Error, Debug)]
pub enum ReminderError {
    #[error("Appointment {appointment_id} has no date; reminders not scheduled")]
    MissingAppointmentDate { appointment_id: String },

    #[error("Exact alarms are unavailable; grant the alarm permission to receive reminders")]
    AlarmsUnavailable,

    #[error("Alarm error: {0}")]
    Alarm(#[from] AlarmError),

    #[error("Notification log error: {0}")]
    Log(#[from] StoreError),

    #[error("Presenter error: {0}")]
    Presenter(#[from] PresenterError),
}
