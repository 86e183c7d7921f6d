use std::path::{Path, PathBuf};

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Application-level constants
pub const APP_NAME: &str = "TBCare";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Environment overrides applied on top of `settings.json`.
pub const ENV_USER_ID: &str = "TBCARE_USER_ID";
pub const ENV_FIRESTORE_PROJECT: &str = "TBCARE_FIRESTORE_PROJECT";
pub const ENV_FIRESTORE_TOKEN: &str = "TBCARE_FIRESTORE_TOKEN";

/// Get the application data directory.
/// Platform data dir (e.g. ~/.local/share/TBCare), falling back to ~/TBCare.
pub fn app_data_dir() -> PathBuf {
    dirs::data_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_NAME)
}

/// Local cache database (medications, appointments, notification log, alarm ledger).
pub fn database_path() -> PathBuf {
    app_data_dir().join("tbcare.db")
}

/// Optional settings file.
pub fn settings_path() -> PathBuf {
    app_data_dir().join("settings.json")
}

/// Default tracing filter when `RUST_LOG` is not set.
pub fn default_log_filter() -> &'static str {
    "info,tbcare_lib=debug"
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Cannot read settings file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid settings file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Invalid setting {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

// ═══════════════════════════════════════════
// Settings
// ═══════════════════════════════════════════

/// Runtime settings. Every section has defaults, so an absent or partial
/// `settings.json` is valid.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Signed-in user, issued by the external identity provider.
    pub user_id: Option<String>,
    /// Cloud document store. `None` runs against the local cache only.
    pub firestore: Option<FirestoreSettings>,
    pub reminders: ReminderSettings,
    pub reconcile: ReconcileSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FirestoreSettings {
    pub project_id: String,
    pub database: String,
    /// Bearer token (ID token from the identity provider).
    pub token: Option<String>,
    pub timeout_secs: u64,
}

impl Default for FirestoreSettings {
    fn default() -> Self {
        Self {
            project_id: String::new(),
            database: "(default)".into(),
            token: None,
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReminderSettings {
    /// Local time of the reminder fired the day before an appointment.
    pub day_before_time: NaiveTime,
    /// Local time of the reminder fired on the appointment day.
    pub day_of_time: NaiveTime,
    pub snooze_minutes: i64,
}

impl Default for ReminderSettings {
    fn default() -> Self {
        Self {
            day_before_time: NaiveTime::from_hms_opt(13, 20, 0).unwrap_or_default(),
            day_of_time: NaiveTime::from_hms_opt(6, 0, 0).unwrap_or_default(),
            snooze_minutes: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileSettings {
    /// Minimum days between two scheduled runs.
    pub cadence_days: i64,
    /// A checked entry older than this is reset.
    pub stale_after_days: i64,
    /// How often the background thread wakes to check whether a run is due.
    pub check_interval_secs: u64,
}

impl Default for ReconcileSettings {
    fn default() -> Self {
        Self {
            cadence_days: 7,
            stale_after_days: 7,
            check_interval_secs: 15 * 60,
        }
    }
}

/// Upper bound for `reminders.snooze_minutes` (one day).
pub const MAX_SNOOZE_MINUTES: i64 = 24 * 60;
/// Upper bound for the reconcile cadence and staleness threshold.
pub const MAX_DAYS: i64 = 366;

fn in_range(field: &'static str, value: i64, max: i64) -> Result<(), ConfigError> {
    if (1..=max).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::Invalid {
            field,
            reason: format!("must be between 1 and {max}, got {value}"),
        })
    }
}

impl Settings {
    /// Load settings from the default location, then apply environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut settings = Self::load_from(&settings_path())?;
        settings.apply_env(|key| std::env::var(key).ok());
        settings.validate()?;
        Ok(settings)
    }

    /// Read a settings file. A missing file yields defaults.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "No settings file, using defaults");
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Apply overrides from a variable lookup (`std::env::var` in production).
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(user_id) = lookup(ENV_USER_ID).filter(|v| !v.trim().is_empty()) {
            self.user_id = Some(user_id);
        }
        if let Some(project) = lookup(ENV_FIRESTORE_PROJECT).filter(|v| !v.trim().is_empty()) {
            self.firestore.get_or_insert_with(FirestoreSettings::default).project_id = project;
        }
        if let Some(token) = lookup(ENV_FIRESTORE_TOKEN).filter(|v| !v.trim().is_empty()) {
            self.firestore.get_or_insert_with(FirestoreSettings::default).token = Some(token);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(fs) = &self.firestore {
            if fs.project_id.trim().is_empty() {
                return Err(ConfigError::Invalid {
                    field: "firestore.project_id",
                    reason: "must not be empty".into(),
                });
            }
        }
        in_range("reminders.snooze_minutes", self.reminders.snooze_minutes, MAX_SNOOZE_MINUTES)?;
        in_range("reconcile.cadence_days", self.reconcile.cadence_days, MAX_DAYS)?;
        in_range("reconcile.stale_after_days", self.reconcile.stale_after_days, MAX_DAYS)?;
        if self.reconcile.check_interval_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "reconcile.check_interval_secs",
                reason: "must be positive".into(),
            });
        }
        Ok(())
    }
}
