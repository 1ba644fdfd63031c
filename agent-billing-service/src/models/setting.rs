//! System settings and their audit trail.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Key/value setting. `value` holds ciphertext when `is_sensitive`.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct SystemSetting {
    pub key: String,
    pub value: String,
    pub is_sensitive: bool,
    pub version: i64,
    pub updated_by: String,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewSystemSetting {
    pub key: String,
    /// Already encrypted when the setting is sensitive.
    pub stored_value: String,
    pub is_sensitive: bool,
}

/// Append-only settings change record. Values are masked for sensitive keys.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct SettingsAuditLog {
    pub id: Uuid,
    pub setting_key: String,
    pub old_value: Option<String>,
    pub new_value: String,
    pub changed_by: String,
    pub changed_at: DateTime<Utc>,
}
