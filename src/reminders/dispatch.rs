//! Dispatcher task: routes fired alarms and notification actions to the scheduler,
//! plus the console reader that turns typed commands into actions.
//!
//! Scheduler callbacks touch SQLite, so they run on the blocking pool.
//! Their errors are logged here and go no further.

use std::sync::Arc;

use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use super::alarm::FiredAlarm;
use super::presenter::{ActionEvent, TracingPresenter};
use super::scheduler::ReminderScheduler;
use super::RequestCode;
use crate::models::enums::NotificationAction;

pub struct DispatcherHandle {
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl DispatcherHandle {
    /// Stop after the event in progress, if any.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Err(e) = self.task.await {
            tracing::warn!(error = %e, "Reminder dispatcher ended abnormally");
        }
    }
}

/// Runs until `shutdown()` or until both the alarm and action channels close.
pub fn spawn_dispatcher(
    scheduler: Arc<ReminderScheduler>,
    mut fired: mpsc::UnboundedReceiver<FiredAlarm>,
    mut actions: mpsc::UnboundedReceiver<ActionEvent>,
) -> DispatcherHandle {
    let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

    let task = tokio::spawn(async move {
        tracing::info!("Reminder dispatcher started");
        let (mut fired_open, mut actions_open) = (true, true);
        while fired_open || actions_open {
            tokio::select! {
                _ = &mut shutdown_rx => break,
                alarm = fired.recv(), if fired_open => match alarm {
                    Some(alarm) => on_fired(&scheduler, alarm).await,
                    None => fired_open = false,
                },
                event = actions.recv(), if actions_open => match event {
                    Some(event) => on_action(&scheduler, event).await,
                    None => actions_open = false,
                },
            }
        }
        tracing::info!("Reminder dispatcher stopped");
    });

    DispatcherHandle {
        shutdown: Some(shutdown_tx),
        task,
    }
}

/// Turn console lines like `snooze 31` or `acknowledge 31` into action events
/// for the notification currently shown under that code. Returns when input ends
/// or the dispatcher is gone.
pub async fn forward_console_actions<R>(
    input: R,
    presenter: Arc<TracingPresenter>,
    actions: mpsc::UnboundedSender<ActionEvent>,
) where
    R: AsyncBufRead + Unpin,
{
    let mut lines = input.lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(error = %e, "Console input failed");
                break;
            }
        };
        let Some((action, code)) = parse_action_command(&line) else {
            if !line.trim().is_empty() {
                tracing::warn!(input = %line.trim(), "Expected `acknowledge <code>` or `snooze <code>`");
            }
            continue;
        };
        let Some(event) = presenter.action_for(action, code) else {
            tracing::warn!(request_code = %code, "No notification shown under that code");
            continue;
        };
        if actions.send(event).is_err() {
            break;
        }
    }
}

fn parse_action_command(line: &str) -> Option<(NotificationAction, RequestCode)> {
    let mut words = line.split_whitespace();
    let action = match words.next()? {
        "ack" => NotificationAction::Acknowledge,
        word => word.parse().ok()?,
    };
    let code = words.next()?.parse().ok().map(RequestCode)?;
    words.next().is_none().then_some((action, code))
}

async fn on_fired(scheduler: &Arc<ReminderScheduler>, alarm: FiredAlarm) {
    let scheduler = scheduler.clone();
    let code = alarm.payload.request_code;
    let result = tokio::task::spawn_blocking(move || scheduler.on_reminder_fired(&alarm.payload)).await;
    match result {
        Ok(Ok(record)) => tracing::debug!(request_code = %code, record_id = %record.id, "Reminder delivered"),
        Ok(Err(e)) => tracing::error!(request_code = %code, error = %e, "Reminder delivery failed"),
        Err(e) => tracing::error!(request_code = %code, error = %e, "Reminder delivery panicked"),
    }
}

async fn on_action(scheduler: &Arc<ReminderScheduler>, event: ActionEvent) {
    let scheduler = scheduler.clone();
    let (code, action) = (event.payload.request_code, event.action);
    let result = tokio::task::spawn_blocking(move || scheduler.handle_action(&event)).await;
    match result {
        Ok(Ok(())) => tracing::debug!(request_code = %code, %action, "Notification action handled"),
        Ok(Err(e)) => tracing::error!(request_code = %code, %action, error = %e, "Notification action failed"),
        Err(e) => tracing::error!(request_code = %code, %action, error = %e, "Notification action panicked"),
    }
}
