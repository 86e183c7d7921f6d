use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One fired reminder in the per-user notification log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationRecord {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub description: String,
    pub timestamp: DateTime<Utc>,
}
