//! Checklist reconciliation: the weekly sweep that un-ticks stale doses.
//!
//! For every medication of a user, every checked entry whose timestamp is
//! older than the threshold is reset to `checked = false, timestamp = None`.
//! Only weekdays that actually changed are written, one field-scoped update
//! per weekday. The first failure aborts the run; earlier writes stay.

pub mod background;

pub use background::{start_background_reconciler, ReconcilerConfig, ReconcilerHandle};

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::checklist;
use crate::db::DatabaseError;
use crate::models::enums::Weekday;
use crate::store::{MedicationStore, StoreError};

/// Entries checked longer ago than this are reset.
pub const STALE_AFTER_DAYS: i64 = 7;

#[derive(Error, Debug)]
pub enum ReconcileError {
    #[error("Failed to fetch medications for user {user_id}: {source}")]
    Fetch {
        user_id: String,
        #[source]
        source: StoreError,
    },

    #[error("Failed to persist {weekday} checklist of medication {medication_id}: {source}")]
    Persist {
        medication_id: String,
        weekday: Weekday,
        #[source]
        source: StoreError,
    },

    #[error("Job ledger error: {0}")]
    Ledger(#[from] DatabaseError),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub medications_scanned: usize,
    pub medications_updated: usize,
    pub entries_reset: usize,
}

/// Reset entries checked more than a week before `now`.
pub fn reconcile(
    store: &dyn MedicationStore,
    user_id: &str,
    now: DateTime<Utc>,
) -> Result<ReconcileReport, ReconcileError> {
    reconcile_with_threshold(store, user_id, now, STALE_AFTER_DAYS)
}

pub fn reconcile_with_threshold(
    store: &dyn MedicationStore,
    user_id: &str,
    now: DateTime<Utc>,
    stale_after_days: i64,
) -> Result<ReconcileReport, ReconcileError> {
    let cutoff = checklist::stale_cutoff(now, stale_after_days);
    let medications = store
        .list_medications(user_id)
        .map_err(|source| ReconcileError::Fetch {
            user_id: user_id.into(),
            source,
        })?;

    let mut report = ReconcileReport {
        medications_scanned: medications.len(),
        ..Default::default()
    };

    for mut med in medications {
        let mut touched = false;
        for (day, entries) in med.schedule.iter_mut() {
            let reset = checklist::reset_stale(entries, cutoff);
            if reset == 0 {
                continue;
            }
            store
                .update_schedule_day(&med.id, *day, entries)
                .map_err(|source| ReconcileError::Persist {
                    medication_id: med.id.clone(),
                    weekday: *day,
                    source,
                })?;
            tracing::debug!(medication_id = %med.id, weekday = %day, reset, "Reset stale checklist entries");
            report.entries_reset += reset;
            touched = true;
        }
        if touched {
            report.medications_updated += 1;
        }
    }

    tracing::info!(
        user_id,
        scanned = report.medications_scanned,
        updated = report.medications_updated,
        entries_reset = report.entries_reset,
        "Checklist reconciliation finished"
    );
    Ok(report)
}
