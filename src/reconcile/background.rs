//! Background reconciler: periodic checklist sweep.
//!
//! Spawns a thread that wakes on a check interval and runs the sweep when
//! the cadence (default 7 days) has elapsed since the last successful run.
//! Run times live in the `job_runs` table, so the cadence survives restarts.
//! `run_now()` forces a sweep on the next tick.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use super::{reconcile_with_threshold, ReconcileError, ReconcileReport};
use crate::config::{ReconcileSettings, MAX_DAYS};
use crate::db::{self, repository, JobRun, SharedConnection};
use crate::store::MedicationStore;

pub const JOB_NAME: &str = "checklist_reconcile";

/// Sleep granularity for shutdown and run-now responsiveness.
const TICK: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    pub user_id: String,
    pub cadence: chrono::Duration,
    pub stale_after_days: i64,
    pub check_interval: Duration,
    pub tick: Duration,
}

impl ReconcilerConfig {
    pub fn from_settings(user_id: &str, settings: &ReconcileSettings) -> Self {
        Self {
            user_id: user_id.into(),
            cadence: chrono::Duration::days(settings.cadence_days.clamp(1, MAX_DAYS)),
            stale_after_days: settings.stale_after_days.clamp(1, MAX_DAYS),
            check_interval: Duration::from_secs(settings.check_interval_secs),
            tick: TICK,
        }
    }
}

/// Handle for the background reconciler thread.
///
/// Shuts down gracefully via `shutdown()` or on `Drop`. A sweep already in
/// progress completes first.
pub struct ReconcilerHandle {
    shutdown: Arc<AtomicBool>,
    run_now: Arc<AtomicBool>,
    handle: Option<std::thread::JoinHandle<()>>,
}

impl ReconcilerHandle {
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }

    /// Sweep on the next tick regardless of cadence.
    pub fn run_now(&self) {
        self.run_now.store(true, Ordering::Relaxed);
    }
}

impl Drop for ReconcilerHandle {
    fn drop(&mut self) {
        self.shutdown();
        if let Some(h) = self.handle.take() {
            let _ = h.join();
        }
    }
}

pub fn start_background_reconciler(
    store: Arc<dyn MedicationStore>,
    ledger: SharedConnection,
    config: ReconcilerConfig,
) -> ReconcilerHandle {
    let shutdown = Arc::new(AtomicBool::new(false));
    let run_now = Arc::new(AtomicBool::new(false));
    let (stop, force) = (shutdown.clone(), run_now.clone());

    let handle = std::thread::spawn(move || {
        tracing::info!(
            user_id = %config.user_id,
            check_interval_secs = config.check_interval.as_secs(),
            "Background reconciler started"
        );
        reconciler_loop(store.as_ref(), &ledger, &config, &stop, &force);
        tracing::info!("Background reconciler shutting down");
    });

    ReconcilerHandle {
        shutdown,
        run_now,
        handle: Some(handle),
    }
}

fn reconciler_loop(
    store: &dyn MedicationStore,
    ledger: &SharedConnection,
    config: &ReconcilerConfig,
    shutdown: &AtomicBool,
    run_now: &AtomicBool,
) {
    // Check once at startup, then every check_interval
    let mut since_check = config.check_interval;
    while !shutdown.load(Ordering::Relaxed) {
        let forced = run_now.swap(false, Ordering::Relaxed);
        if forced || since_check >= config.check_interval {
            since_check = Duration::ZERO;
            match run_if_due(store, ledger, config, Utc::now(), forced) {
                Ok(Some(_)) => {}
                Ok(None) => tracing::debug!("Reconciliation not due"),
                Err(e) => tracing::error!(error = %e, "Background reconciliation failed"),
            }
        }
        std::thread::sleep(config.tick);
        since_check += config.tick;
    }
}

/// Due when there is no successful run on record, or the last one is at least `cadence` old.
pub fn is_due(last: Option<&JobRun>, now: DateTime<Utc>, cadence: chrono::Duration) -> bool {
    match last.and_then(|run| run.last_success_at) {
        Some(at) => now - at >= cadence,
        None => true,
    }
}

/// Run one sweep if due (or `forced`), recording the outcome in `job_runs`.
/// Returns None when skipped.
pub fn run_if_due(
    store: &dyn MedicationStore,
    ledger: &SharedConnection,
    config: &ReconcilerConfig,
    now: DateTime<Utc>,
    forced: bool,
) -> Result<Option<ReconcileReport>, ReconcileError> {
    {
        // The store may share this connection; release it before sweeping
        let conn = db::lock(ledger)?;
        let last = repository::get_job_run(&conn, JOB_NAME)?;
        if !forced && !is_due(last.as_ref(), now, config.cadence) {
            return Ok(None);
        }
        repository::record_job_started(&conn, JOB_NAME, &now)?;
    }

    let outcome = reconcile_with_threshold(store, &config.user_id, now, config.stale_after_days);

    let conn = db::lock(ledger)?;
    match outcome {
        Ok(report) => {
            repository::record_job_succeeded(&conn, JOB_NAME, &now)?;
            Ok(Some(report))
        }
        Err(e) => {
            repository::record_job_failed(&conn, JOB_NAME, &e.to_string())?;
            Err(e)
        }
    }
}
