//! Generic forensic audit trail.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// One row per repository mutation. Never updated or deleted.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct AuditLog {
    pub id: Uuid,
    pub entity_type: String,
    pub entity_id: String,
    pub action: String,
    pub actor_user_id: String,
    pub correlation_id: String,
    pub payload: serde_json::Value,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewAuditLog {
    pub entity_type: &'static str,
    pub entity_id: String,
    pub action: &'static str,
    pub payload: serde_json::Value,
}

impl AuditLog {
    pub fn from_new(
        entry: NewAuditLog,
        actor_user_id: &str,
        correlation_id: &str,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            entity_type: entry.entity_type.to_string(),
            entity_id: entry.entity_id,
            action: entry.action.to_string(),
            actor_user_id: actor_user_id.to_string(),
            correlation_id: correlation_id.to_string(),
            payload: entry.payload,
            at: Utc::now(),
        }
    }
}
