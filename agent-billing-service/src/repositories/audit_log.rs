use super::RepositoryContext;
use crate::error::Result;
use crate::models::AuditLog;
use crate::store::AuditFilter;

/// Read access to the audit trail. Audit rows are written by the other
/// repositories, never through this one.
pub struct AuditLogRepository {
    ctx: RepositoryContext,
}

impl AuditLogRepository {
    pub(crate) fn new(ctx: RepositoryContext) -> Self {
        Self { ctx }
    }

    pub async fn list_for_entity(&self, entity_type: &str, entity_id: &str) -> Result<Vec<AuditLog>> {
        let filter = AuditFilter {
            entity_type: Some(entity_type.to_string()),
            entity_id: Some(entity_id.to_string()),
            ..Default::default()
        };
        self.ctx.conn().await?.list_audit_logs(&filter).await
    }

    pub async fn list_for_correlation(&self, correlation_id: &str) -> Result<Vec<AuditLog>> {
        let filter = AuditFilter {
            correlation_id: Some(correlation_id.to_string()),
            ..Default::default()
        };
        self.ctx.conn().await?.list_audit_logs(&filter).await
    }
}
