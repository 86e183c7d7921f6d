//! User-visible notifications.

use std::collections::BTreeMap;
use std::sync::Mutex;

use thiserror::Error;

use super::{ReminderPayload, RequestCode};
use crate::models::enums::NotificationAction;

/// A notification as shown to the user, keyed by the reminder's request code.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub request_code: RequestCode,
    pub title: String,
    pub body: String,
    pub actions: Vec<NotificationAction>,
    pub payload: ReminderPayload,
}

impl Notification {
    pub fn for_reminder(payload: &ReminderPayload) -> Self {
        Self {
            request_code: payload.request_code,
            title: payload.title.clone(),
            body: payload.body.clone(),
            actions: vec![NotificationAction::Acknowledge, NotificationAction::Snooze],
            payload: payload.clone(),
        }
    }
}

/// The user tapped an action on a notification.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionEvent {
    pub action: NotificationAction,
    pub payload: ReminderPayload,
}

#[derive(Error, Debug)]
pub enum PresenterError {
    #[error("Notifications unavailable: {0}")]
    Unavailable(String),

    #[error("Presenter state lock poisoned")]
    LockPoisoned,
}

pub trait NotificationPresenter: Send + Sync {
    fn display(&self, notification: &Notification) -> Result<(), PresenterError>;

    /// Dismissing something not shown is a no-op.
    fn dismiss(&self, code: RequestCode) -> Result<(), PresenterError>;
}

/// Renders notifications into the structured log and tracks what is visible.
#[derive(Default)]
pub struct TracingPresenter {
    visible: Mutex<BTreeMap<RequestCode, Notification>>,
}

impl TracingPresenter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn visible(&self) -> Vec<Notification> {
        self.visible
            .lock()
            .map(|v| v.values().cloned().collect())
            .unwrap_or_default()
    }

    /// The event a tap on `action` would produce, if a notification is shown under `code`.
    pub fn action_for(&self, action: NotificationAction, code: RequestCode) -> Option<ActionEvent> {
        let visible = self.visible.lock().ok()?;
        let shown = visible.get(&code)?;
        if !shown.actions.contains(&action) {
            return None;
        }
        let event = ActionEvent {
            action,
            payload: shown.payload.clone(),
        };
        Some(event)
    }
}

impl NotificationPresenter for TracingPresenter {
    fn display(&self, notification: &Notification) -> Result<(), PresenterError> {
        tracing::info!(
            request_code = %notification.request_code,
            title = %notification.title,
            body = %notification.body,
            "Notification shown"
        );
        self.visible
            .lock()
            .map_err(|_| PresenterError::LockPoisoned)?
            .insert(notification.request_code, notification.clone());
        Ok(())
    }

    fn dismiss(&self, code: RequestCode) -> Result<(), PresenterError> {
        let removed = self
            .visible
            .lock()
            .map_err(|_| PresenterError::LockPoisoned)?
            .remove(&code);
        if removed.is_some() {
            tracing::info!(request_code = %code, "Notification dismissed");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::enums::ReminderKind;

    fn payload(code: i32) -> ReminderPayload {
        ReminderPayload {
            kind: ReminderKind::MedicationDose,
            request_code: RequestCode(code),
            user_id: "u1".into(),
            entity_id: "m1".into(),
            title: "Time to take Rifampicin".into(),
            body: "600 mg".into(),
        }
    }

    #[test]
    fn reminder_notification_offers_both_actions() {
        let n = Notification::for_reminder(&payload(1));
        assert_eq!(n.actions, vec![NotificationAction::Acknowledge, NotificationAction::Snooze]);
        assert_eq!(n.title, "Time to take Rifampicin");
    }

    #[test]
    fn display_replaces_same_code_and_dismiss_is_idempotent() {
        let presenter = TracingPresenter::new();
        presenter.display(&Notification::for_reminder(&payload(1))).unwrap();
        presenter.display(&Notification::for_reminder(&payload(1))).unwrap();
        presenter.display(&Notification::for_reminder(&payload(2))).unwrap();
        assert_eq!(presenter.visible().len(), 2);

        presenter.dismiss(RequestCode(1)).unwrap();
        presenter.dismiss(RequestCode(1)).unwrap();
        assert_eq!(presenter.visible().len(), 1);
    }

    #[test]
    fn action_for_shown_notification_only() {
        let presenter = TracingPresenter::new();
        presenter.display(&Notification::for_reminder(&payload(4))).unwrap();

        let event = presenter.action_for(NotificationAction::Snooze, RequestCode(4)).unwrap();
        assert_eq!(event.payload, payload(4));
        assert!(presenter.action_for(NotificationAction::Snooze, RequestCode(5)).is_none());
    }
}
