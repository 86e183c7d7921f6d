pub mod care_plan;
pub mod checklist;
pub mod config;
pub mod db;
pub mod models;
pub mod reconcile;
pub mod reminders;
pub mod store;

use std::sync::Arc;

use thiserror::Error;
use tokio::io::BufReader;
use tokio::sync::{broadcast, mpsc};
use tracing_subscriber::EnvFilter;

use config::{ConfigError, Settings};
use db::DatabaseError;
use reconcile::background::{start_background_reconciler, ReconcilerConfig};
use reminders::{forward_console_actions, spawn_dispatcher, ReminderScheduler, ReminderTimes, TokioAlarmService, TracingPresenter};
use store::{CachedStore, FirestoreStore, MedicationStore, SqliteStore, StoreError};

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("No user id configured; set user_id in settings.json or {}", config::ENV_USER_ID)]
    MissingUserId,
}

/// Host the background services until interrupted: restored alarms, the
/// reminder dispatcher, and the weekly checklist reconciler.
pub fn run() -> Result<(), AppError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .init();

    tracing::info!("TBCare starting v{}", config::APP_VERSION);

    let settings = Settings::load()?;
    let user_id = settings
        .user_id
        .clone()
        .filter(|id| !id.trim().is_empty())
        .ok_or(AppError::MissingUserId)?;

    std::fs::create_dir_all(config::app_data_dir())?;
    let conn = db::shared(db::open_database(&config::database_path())?);
    let local = SqliteStore::new(conn.clone());

    // The blocking HTTP client must be built (and dropped) outside the runtime
    let medications: Arc<dyn MedicationStore> = match &settings.firestore {
        Some(fs) => {
            tracing::info!(project_id = %fs.project_id, "Using cloud store with local cache");
            let cached = CachedStore::new(FirestoreStore::new(fs)?, local.clone());
            let mut changes = cached.subscribe();
            std::thread::spawn(move || loop {
                match changes.blocking_recv() {
                    Ok(change) => tracing::debug!(?change, "Store change"),
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        tracing::debug!(missed, "Store change feed lagged")
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            });
            Arc::new(cached)
        }
        None => {
            tracing::info!("No cloud store configured, running on the local cache");
            Arc::new(local.clone())
        }
    };

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("tbcare-worker")
        .build()?;

    let (fired_tx, fired_rx) = mpsc::unbounded_channel();
    let (actions_tx, actions_rx) = mpsc::unbounded_channel();
    let alarms = Arc::new(TokioAlarmService::new(
        runtime.handle().clone(),
        fired_tx,
        Some(conn.clone()),
    ));
    match alarms.restore() {
        Ok(count) => tracing::info!(count, "Alarms restored"),
        Err(e) => tracing::warn!(error = %e, "Alarm restore failed; reminders re-arm on next save"),
    }

    let presenter = Arc::new(TracingPresenter::new());
    let scheduler = Arc::new(ReminderScheduler::new(
        alarms.clone(),
        presenter.clone(),
        Arc::new(local),
        ReminderTimes::from_settings(&settings.reminders),
    ));

    let reconciler = start_background_reconciler(
        medications.clone(),
        conn,
        ReconcilerConfig::from_settings(&user_id, &settings.reconcile),
    );

    runtime.block_on(async move {
        let dispatcher = spawn_dispatcher(scheduler, fired_rx, actions_rx);
        // Notification actions are typed on stdin, e.g. `snooze <code>`
        let console = tokio::spawn(forward_console_actions(
            BufReader::new(tokio::io::stdin()),
            presenter,
            actions_tx,
        ));
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Cannot listen for shutdown signal");
        }
        tracing::info!("Shutting down");
        console.abort();
        dispatcher.shutdown().await;
    });

    reconciler.shutdown();
    drop(reconciler);
    drop(alarms);
    runtime.shutdown_timeout(std::time::Duration::from_secs(5));
    drop(medications);

    tracing::info!("TBCare stopped");
    Ok(())
}
