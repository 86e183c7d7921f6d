//! Exact-alarm service.
//!
//! `TokioAlarmService` keeps one timer task per request code. Re-registering
//! a code aborts and replaces its task. Fired alarms are delivered as
//! `FiredAlarm` events over an mpsc channel. When a ledger connection is
//! given, every armed alarm is mirrored in `scheduled_alarms` so `restore()`
//! can re-arm them after a restart.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::RequestCode;
use crate::db::{self, repository, AlarmRow, DatabaseError, SharedConnection};
use crate::models::enums::ReminderKind;

/// What a reminder carries from registration to firing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReminderPayload {
    pub kind: ReminderKind,
    pub request_code: RequestCode,
    pub user_id: String,
    pub entity_id: String,
    pub title: String,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AlarmRegistration {
    pub request_code: RequestCode,
    pub trigger_at: DateTime<Utc>,
    pub repeat_every: Option<Duration>,
    pub payload: ReminderPayload,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FiredAlarm {
    pub payload: ReminderPayload,
    pub fired_at: DateTime<Utc>,
}

#[derive(Error, Debug)]
pub enum AlarmError {
    #[error("Exact alarms are not permitted")]
    PermissionDenied,

    #[error("Repeat interval must be positive, got {0}")]
    InvalidRepeat(Duration),

    #[error("Alarm ledger error: {0}")]
    Ledger(#[from] DatabaseError),

    #[error("Alarm payload error: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("Alarm state lock poisoned")]
    LockPoisoned,
}

pub trait AlarmService: Send + Sync {
    /// Whether exact alarms may be registered right now.
    fn can_schedule_exact(&self) -> bool;

    /// Arm an alarm. An alarm already armed under the same code is replaced.
    fn register(&self, registration: AlarmRegistration) -> Result<(), AlarmError>;

    /// Returns whether anything was armed under `code`.
    fn cancel(&self, code: RequestCode) -> Result<bool, AlarmError>;

    /// Armed alarms, soonest first.
    fn pending(&self) -> Vec<AlarmRegistration>;
}

struct Armed {
    registration: AlarmRegistration,
    generation: u64,
    task: JoinHandle<()>,
}

struct Inner {
    runtime: Handle,
    fired: mpsc::UnboundedSender<FiredAlarm>,
    ledger: Option<SharedConnection>,
    armed: Mutex<HashMap<RequestCode, Armed>>,
    generation: AtomicU64,
    exact_allowed: AtomicBool,
}

pub struct TokioAlarmService {
    inner: Arc<Inner>,
}

/// Pairs a wall-clock reading with the tokio clock, so timers follow the
/// runtime's notion of time.
#[derive(Clone, Copy)]
struct Clock {
    wall: DateTime<Utc>,
    instant: Instant,
}

impl Clock {
    fn now() -> Self {
        Self {
            wall: Utc::now(),
            instant: Instant::now(),
        }
    }

    fn instant_for(&self, at: DateTime<Utc>) -> Instant {
        match (at - self.wall).to_std() {
            Ok(ahead) => self.instant + ahead,
            Err(_) => self.instant,
        }
    }

    fn wall_now(&self) -> DateTime<Utc> {
        let elapsed = Duration::from_std(self.instant.elapsed()).unwrap_or_else(|_| Duration::zero());
        self.wall + elapsed
    }
}

impl TokioAlarmService {
    pub fn new(
        runtime: Handle,
        fired: mpsc::UnboundedSender<FiredAlarm>,
        ledger: Option<SharedConnection>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                runtime,
                fired,
                ledger,
                armed: Mutex::new(HashMap::new()),
                generation: AtomicU64::new(0),
                exact_allowed: AtomicBool::new(true),
            }),
        }
    }

    /// Models the user granting or revoking the exact-alarm permission.
    pub fn set_exact_allowed(&self, allowed: bool) {
        self.inner.exact_allowed.store(allowed, Ordering::Relaxed);
    }

    /// Re-arm everything in the ledger. Overdue one-shot alarms fire at once.
    /// Rows that no longer decode or arm are dropped.
    pub fn restore(&self) -> Result<usize, AlarmError> {
        let Some(ledger) = &self.inner.ledger else {
            return Ok(0);
        };
        let rows = {
            let conn = db::lock(ledger)?;
            repository::list_alarms(&conn)?
        };

        let mut restored = 0;
        for row in rows {
            let payload: ReminderPayload = match serde_json::from_str(&row.payload) {
                Ok(p) => p,
                Err(e) => {
                    tracing::warn!(request_code = row.request_code, error = %e, "Dropping undecodable alarm");
                    let conn = db::lock(ledger)?;
                    repository::delete_alarm(&conn, row.request_code)?;
                    continue;
                }
            };
            let armed = self.inner.arm(AlarmRegistration {
                request_code: RequestCode(row.request_code),
                trigger_at: row.trigger_at,
                repeat_every: row.repeat_secs.map(Duration::seconds),
                payload,
            });
            if let Err(e) = armed {
                tracing::warn!(request_code = row.request_code, error = %e, "Dropping alarm that cannot be re-armed");
                let conn = db::lock(ledger)?;
                repository::delete_alarm(&conn, row.request_code)?;
                continue;
            }
            restored += 1;
        }
        tracing::info!(restored, "Alarm ledger restored");
        Ok(restored)
    }
}

impl Inner {
    fn lock_armed(&self) -> Result<std::sync::MutexGuard<'_, HashMap<RequestCode, Armed>>, AlarmError> {
        self.armed.lock().map_err(|_| AlarmError::LockPoisoned)
    }

    fn write_ledger(&self, registration: &AlarmRegistration) -> Result<(), AlarmError> {
        if let Some(ledger) = &self.ledger {
            let row = AlarmRow {
                request_code: registration.request_code.value(),
                trigger_at: registration.trigger_at,
                repeat_secs: registration.repeat_every.map(|d| d.num_seconds()),
                payload: serde_json::to_string(&registration.payload)?,
            };
            let conn = db::lock(ledger)?;
            repository::upsert_alarm(&conn, &row)?;
        }
        Ok(())
    }

    fn erase_ledger(&self, code: RequestCode) -> Result<(), AlarmError> {
        if let Some(ledger) = &self.ledger {
            let conn = db::lock(ledger)?;
            repository::delete_alarm(&conn, code.value())?;
        }
        Ok(())
    }

    /// Spawn the timer task and record it, replacing any previous one.
    fn arm(self: &Arc<Self>, registration: AlarmRegistration) -> Result<(), AlarmError> {
        check_repeat(&registration)?;

        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let mut armed = self.lock_armed()?;
        let task = self
            .runtime
            .spawn(run_timer(self.clone(), generation, Clock::now(), registration.clone()));
        if let Some(previous) = armed.insert(
            registration.request_code,
            Armed {
                registration,
                generation,
                task,
            },
        ) {
            previous.task.abort();
        }
        Ok(())
    }

    /// A one-shot alarm fired. Forget it unless it was replaced meanwhile.
    fn finished(&self, code: RequestCode, generation: u64) {
        let Ok(mut armed) = self.lock_armed() else {
            return;
        };
        if armed.get(&code).is_some_and(|a| a.generation == generation) {
            armed.remove(&code);
            drop(armed);
            if let Err(e) = self.erase_ledger(code) {
                tracing::warn!(request_code = %code, error = %e, "Failed to clear fired alarm from ledger");
            }
        }
    }

    /// A repeating alarm fired and moved on to `next`.
    fn rearmed(&self, code: RequestCode, generation: u64, next: DateTime<Utc>) {
        let Ok(mut armed) = self.lock_armed() else {
            return;
        };
        let Some(entry) = armed.get_mut(&code).filter(|a| a.generation == generation) else {
            return;
        };
        entry.registration.trigger_at = next;
        let registration = entry.registration.clone();
        drop(armed);
        if let Err(e) = self.write_ledger(&registration) {
            tracing::warn!(request_code = %code, error = %e, "Failed to advance repeating alarm in ledger");
        }
    }
}

fn check_repeat(registration: &AlarmRegistration) -> Result<(), AlarmError> {
    match registration.repeat_every {
        Some(every) if every <= Duration::zero() => Err(AlarmError::InvalidRepeat(every)),
        _ => Ok(()),
    }
}

async fn run_timer(inner: Arc<Inner>, generation: u64, clock: Clock, registration: AlarmRegistration) {
    let AlarmRegistration {
        request_code,
        mut trigger_at,
        repeat_every,
        payload,
    } = registration;

    loop {
        tokio::time::sleep_until(clock.instant_for(trigger_at)).await;

        let fired_at = clock.wall_now();
        tracing::debug!(request_code = %request_code, kind = %payload.kind, "Alarm fired");
        if inner
            .fired
            .send(FiredAlarm {
                payload: payload.clone(),
                fired_at,
            })
            .is_err()
        {
            tracing::warn!(request_code = %request_code, "Alarm fired with no dispatcher listening");
        }

        let Some(every) = repeat_every else {
            inner.finished(request_code, generation);
            return;
        };
        // Skip occurrences missed while the process was down
        while trigger_at <= fired_at {
            trigger_at += every;
        }
        inner.rearmed(request_code, generation, trigger_at);
    }
}

impl AlarmService for TokioAlarmService {
    fn can_schedule_exact(&self) -> bool {
        self.inner.exact_allowed.load(Ordering::Relaxed)
    }

    fn register(&self, registration: AlarmRegistration) -> Result<(), AlarmError> {
        if !self.can_schedule_exact() {
            return Err(AlarmError::PermissionDenied);
        }
        // Nothing reaches the ledger that restore could not re-arm
        check_repeat(&registration)?;
        self.inner.write_ledger(&registration)?;
        tracing::debug!(
            request_code = %registration.request_code,
            trigger_at = %registration.trigger_at,
            repeating = registration.repeat_every.is_some(),
            "Alarm registered"
        );
        self.inner.arm(registration)
    }

    fn cancel(&self, code: RequestCode) -> Result<bool, AlarmError> {
        let previous = self.inner.lock_armed()?.remove(&code);
        self.inner.erase_ledger(code)?;
        match previous {
            Some(armed) => {
                armed.task.abort();
                tracing::debug!(request_code = %code, "Alarm cancelled");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn pending(&self) -> Vec<AlarmRegistration> {
        let Ok(armed) = self.inner.lock_armed() else {
            return Vec::new();
        };
        let mut pending: Vec<_> = armed.values().map(|a| a.registration.clone()).collect();
        pending.sort_by_key(|r| (r.trigger_at, r.request_code));
        pending
    }
}

impl Drop for TokioAlarmService {
    fn drop(&mut self) {
        if let Ok(armed) = self.inner.armed.lock() {
            for a in armed.values() {
                a.task.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{open_memory_database, shared};

    fn payload(code: RequestCode) -> ReminderPayload {
        ReminderPayload {
            kind: ReminderKind::AppointmentDayOf,
            request_code: code,
            user_id: "u1".into(),
            entity_id: "a1".into(),
            title: "Appointment today: Review".into(),
            body: "10:00 at Clinic".into(),
        }
    }

    fn registration(code: i32, in_secs: i64, repeat: Option<Duration>) -> AlarmRegistration {
        AlarmRegistration {
            request_code: RequestCode(code),
            trigger_at: Utc::now() + Duration::seconds(in_secs),
            repeat_every: repeat,
            payload: payload(RequestCode(code)),
        }
    }

    fn service(ledger: Option<SharedConnection>) -> (TokioAlarmService, mpsc::UnboundedReceiver<FiredAlarm>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (TokioAlarmService::new(Handle::current(), tx, ledger), rx)
    }

    #[tokio::test(start_paused = true)]
    async fn one_shot_fires_once_then_disarms() {
        let (alarms, mut rx) = service(None);
        alarms.register(registration(1, 60, None)).unwrap();
        assert_eq!(alarms.pending().len(), 1);

        let fired = rx.recv().await.unwrap();
        assert_eq!(fired.payload.request_code, RequestCode(1));
        tokio::task::yield_now().await;
        assert!(alarms.pending().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn same_code_replaces_earlier_registration() {
        let (alarms, mut rx) = service(None);
        alarms.register(registration(7, 60, None)).unwrap();
        let mut later = registration(7, 600, None);
        later.payload.title = "replacement".into();
        alarms.register(later).unwrap();
        assert_eq!(alarms.pending().len(), 1);

        let fired = rx.recv().await.unwrap();
        assert_eq!(fired.payload.title, "replacement");
        tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_prevents_firing_and_is_idempotent() {
        let (alarms, mut rx) = service(None);
        alarms.register(registration(3, 60, None)).unwrap();
        assert!(alarms.cancel(RequestCode(3)).unwrap());
        assert!(!alarms.cancel(RequestCode(3)).unwrap());

        tokio::time::sleep(std::time::Duration::from_secs(120)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn repeating_alarm_rearms() {
        let (alarms, mut rx) = service(None);
        let every = Duration::days(7);
        let reg = registration(9, 60, Some(every));
        let first_trigger = reg.trigger_at;
        alarms.register(reg).unwrap();

        rx.recv().await.unwrap();
        tokio::task::yield_now().await;
        let pending = alarms.pending();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].trigger_at, first_trigger + every);

        let second = rx.recv().await.unwrap();
        assert_eq!(second.payload.request_code, RequestCode(9));
    }

    #[tokio::test(start_paused = true)]
    async fn denied_permission_rejects_registration() {
        let (alarms, _rx) = service(None);
        alarms.set_exact_allowed(false);
        assert!(!alarms.can_schedule_exact());
        assert!(matches!(
            alarms.register(registration(1, 60, None)),
            Err(AlarmError::PermissionDenied)
        ));
        assert!(alarms.pending().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn non_positive_repeat_rejected() {
        let (alarms, _rx) = service(None);
        let err = alarms
            .register(registration(1, 60, Some(Duration::zero())))
            .unwrap_err();
        assert!(matches!(err, AlarmError::InvalidRepeat(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn ledger_mirrors_and_restores() {
        let ledger = shared(open_memory_database().unwrap());
        {
            let (alarms, _rx) = service(Some(ledger.clone()));
            alarms.register(registration(11, 600, None)).unwrap();
            alarms.register(registration(12, 900, Some(Duration::days(7)))).unwrap();
            alarms.register(registration(13, 60, None)).unwrap();
            alarms.cancel(RequestCode(13)).unwrap();
        }
        let rows = repository::list_alarms(&db::lock(&ledger).unwrap()).unwrap();
        assert_eq!(rows.len(), 2);

        let (restored, mut rx) = service(Some(ledger.clone()));
        assert_eq!(restored.restore().unwrap(), 2);
        assert_eq!(restored.pending().len(), 2);

        let fired = rx.recv().await.unwrap();
        assert_eq!(fired.payload.request_code, RequestCode(11));
        tokio::task::yield_now().await;
        let rows = repository::list_alarms(&db::lock(&ledger).unwrap()).unwrap();
        assert_eq!(rows.iter().map(|r| r.request_code).collect::<Vec<_>>(), vec![12]);
    }

    #[tokio::test(start_paused = true)]
    async fn overdue_alarm_fires_on_restore() {
        let ledger = shared(open_memory_database().unwrap());
        let row = AlarmRow {
            request_code: 21,
            trigger_at: Utc::now() - Duration::hours(2),
            repeat_secs: None,
            payload: serde_json::to_string(&payload(RequestCode(21))).unwrap(),
        };
        repository::upsert_alarm(&db::lock(&ledger).unwrap(), &row).unwrap();

        let (alarms, mut rx) = service(Some(ledger));
        alarms.restore().unwrap();
        let fired = rx.recv().await.unwrap();
        assert_eq!(fired.payload.request_code, RequestCode(21));
    }

    #[tokio::test(start_paused = true)]
    async fn undecodable_ledger_rows_are_dropped() {
        let ledger = shared(open_memory_database().unwrap());
        let row = AlarmRow {
            request_code: 5,
            trigger_at: Utc::now(),
            repeat_secs: None,
            payload: "not json".into(),
        };
        repository::upsert_alarm(&db::lock(&ledger).unwrap(), &row).unwrap();

        let (alarms, _rx) = service(Some(ledger.clone()));
        assert_eq!(alarms.restore().unwrap(), 0);
        assert!(repository::list_alarms(&db::lock(&ledger).unwrap()).unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_registration_leaves_no_ledger_row() {
        let ledger = shared(open_memory_database().unwrap());
        let (alarms, _rx) = service(Some(ledger.clone()));
        assert!(alarms.register(registration(1, 60, Some(Duration::zero()))).is_err());
        alarms.register(registration(2, 60, None)).unwrap();

        let rows = repository::list_alarms(&db::lock(&ledger).unwrap()).unwrap();
        assert_eq!(rows.iter().map(|r| r.request_code).collect::<Vec<_>>(), vec![2]);
    }

    #[tokio::test(start_paused = true)]
    async fn unarmable_ledger_row_does_not_block_restore() {
        let ledger = shared(open_memory_database().unwrap());
        {
            let conn = db::lock(&ledger).unwrap();
            for (code, repeat_secs) in [(1, Some(0)), (2, None)] {
                let row = AlarmRow {
                    request_code: code,
                    trigger_at: Utc::now() + Duration::seconds(60 * code as i64),
                    repeat_secs,
                    payload: serde_json::to_string(&payload(RequestCode(code))).unwrap(),
                };
                repository::upsert_alarm(&conn, &row).unwrap();
            }
        }

        let (alarms, mut rx) = service(Some(ledger.clone()));
        assert_eq!(alarms.restore().unwrap(), 1);
        assert_eq!(alarms.pending().len(), 1);
        let rows = repository::list_alarms(&db::lock(&ledger).unwrap()).unwrap();
        assert_eq!(rows.iter().map(|r| r.request_code).collect::<Vec<_>>(), vec![2]);

        let fired = rx.recv().await.unwrap();
        assert_eq!(fired.payload.request_code, RequestCode(2));
    }
}
