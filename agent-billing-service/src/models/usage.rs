//! Ingested usage row fingerprints.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// SHA-256 of a usage row payload that has already been ingested.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct ProcessedUsageHash {
    pub hash: String,
    pub processed_at: DateTime<Utc>,
}
