use super::RepositoryContext;
use crate::error::Result;
use crate::models::{NewAuditLog, ProcessedUsageHash};
use chrono::Utc;

pub struct UsageHashRepository {
    ctx: RepositoryContext,
}

impl UsageHashRepository {
    pub(crate) fn new(ctx: RepositoryContext) -> Self {
        Self { ctx }
    }

    pub async fn is_processed(&self, hash: &str) -> Result<bool> {
        self.ctx.conn().await?.has_usage_hash(hash).await
    }

    pub async fn mark_processed(&self, hash: &str) -> Result<ProcessedUsageHash> {
        let entry = ProcessedUsageHash {
            hash: hash.to_string(),
            processed_at: Utc::now(),
        };

        let mut conn = self.ctx.conn().await?;
        conn.insert_usage_hash(&entry).await?;
        self.ctx
            .audit(
                &mut conn,
                NewAuditLog {
                    entity_type: "processed_usage_hash",
                    entity_id: entry.hash.clone(),
                    action: "create",
                    payload: serde_json::json!({ "processed_at": entry.processed_at }),
                },
            )
            .await?;
        Ok(entry)
    }
}
