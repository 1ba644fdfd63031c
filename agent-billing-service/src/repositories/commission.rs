use super::{payload, RepositoryContext};
use crate::error::{BillingError, Result};
use crate::models::{
    AdjustmentStatus, CommissionAdjustment, CommissionReport, NewAuditLog,
    NewCommissionAdjustment, NewCommissionReport, ReportStatus,
};
use chrono::Utc;
use uuid::Uuid;

const REPORT: &str = "commission_report";
const ADJUSTMENT: &str = "commission_adjustment";

pub struct CommissionRepository {
    ctx: RepositoryContext,
}

impl CommissionRepository {
    pub(crate) fn new(ctx: RepositoryContext) -> Self {
        Self { ctx }
    }

    pub async fn create_report(&self, input: NewCommissionReport) -> Result<CommissionReport> {
        let now = Utc::now();
        let report = CommissionReport {
            id: Uuid::new_v4(),
            partner_id: input.partner_id,
            period_start: input.period_start,
            period_end: input.period_end,
            total_commission: input.total_commission,
            status: ReportStatus::Draft,
            created_by: self.ctx.actor().user_id().to_string(),
            created_at: now,
            updated_at: now,
        };

        let mut conn = self.ctx.conn().await?;
        conn.insert_commission_report(&report).await?;
        self.ctx
            .audit(
                &mut conn,
                NewAuditLog {
                    entity_type: REPORT,
                    entity_id: report.id.to_string(),
                    action: "create",
                    payload: payload(&report)?,
                },
            )
            .await?;
        Ok(report)
    }

    pub async fn get_report(&self, id: Uuid) -> Result<Option<CommissionReport>> {
        self.ctx.conn().await?.get_commission_report(id).await
    }

    pub async fn require_report(&self, id: Uuid) -> Result<CommissionReport> {
        self.get_report(id)
            .await?
            .ok_or_else(|| BillingError::not_found(REPORT, id))
    }

    pub async fn list_reports(&self, partner_id: Uuid) -> Result<Vec<CommissionReport>> {
        self.ctx
            .conn()
            .await?
            .list_commission_reports(partner_id)
            .await
    }

    pub async fn update_report_status(
        &self,
        id: Uuid,
        status: ReportStatus,
    ) -> Result<CommissionReport> {
        let mut conn = self.ctx.conn().await?;
        let report = conn
            .update_commission_report_status(id, status, Utc::now())
            .await?
            .ok_or_else(|| BillingError::not_found(REPORT, id))?;
        self.ctx
            .audit(
                &mut conn,
                NewAuditLog {
                    entity_type: REPORT,
                    entity_id: id.to_string(),
                    action: "update_status",
                    payload: serde_json::json!({ "status": status }),
                },
            )
            .await?;
        Ok(report)
    }

    pub async fn delete_report(&self, id: Uuid) -> Result<()> {
        let mut conn = self.ctx.conn().await?;
        if !conn.delete_commission_report(id).await? {
            return Err(BillingError::not_found(REPORT, id));
        }
        self.ctx
            .audit(
                &mut conn,
                NewAuditLog {
                    entity_type: REPORT,
                    entity_id: id.to_string(),
                    action: "delete",
                    payload: serde_json::Value::Null,
                },
            )
            .await
    }

    pub async fn create_adjustment(
        &self,
        input: NewCommissionAdjustment,
    ) -> Result<CommissionAdjustment> {
        let adjustment = CommissionAdjustment {
            id: Uuid::new_v4(),
            agent_id: input.agent_id,
            amount: input.amount,
            reason: input.reason,
            status: AdjustmentStatus::Unapplied,
            applied_report_id: None,
            created_by: self.ctx.actor().user_id().to_string(),
            created_at: Utc::now(),
        };

        let mut conn = self.ctx.conn().await?;
        conn.insert_commission_adjustment(&adjustment).await?;
        self.ctx
            .audit(
                &mut conn,
                NewAuditLog {
                    entity_type: ADJUSTMENT,
                    entity_id: adjustment.id.to_string(),
                    action: "create",
                    payload: payload(&adjustment)?,
                },
            )
            .await?;
        Ok(adjustment)
    }

    pub async fn list_unapplied(&self, agent_ids: &[Uuid]) -> Result<Vec<CommissionAdjustment>> {
        self.ctx
            .conn()
            .await?
            .list_commission_adjustments(agent_ids, Some(AdjustmentStatus::Unapplied))
            .await
    }

    pub async fn list_report_adjustments(
        &self,
        report_id: Uuid,
    ) -> Result<Vec<CommissionAdjustment>> {
        self.ctx
            .conn()
            .await?
            .list_report_adjustments(report_id)
            .await
    }

    pub async fn mark_applied(&self, adjustment_ids: &[Uuid], report_id: Uuid) -> Result<()> {
        self.set_status(adjustment_ids, AdjustmentStatus::Applied, Some(report_id))
            .await
    }

    pub async fn mark_unapplied(&self, adjustment_ids: &[Uuid]) -> Result<()> {
        self.set_status(adjustment_ids, AdjustmentStatus::Unapplied, None)
            .await
    }

    async fn set_status(
        &self,
        adjustment_ids: &[Uuid],
        status: AdjustmentStatus,
        report_id: Option<Uuid>,
    ) -> Result<()> {
        let mut conn = self.ctx.conn().await?;
        for id in adjustment_ids {
            conn.set_adjustment_status(*id, status, report_id)
                .await?
                .ok_or_else(|| BillingError::not_found(ADJUSTMENT, id))?;
            self.ctx
                .audit(
                    &mut conn,
                    NewAuditLog {
                        entity_type: ADJUSTMENT,
                        entity_id: id.to_string(),
                        action: "update_status",
                        payload: serde_json::json!({
                            "status": status,
                            "applied_report_id": report_id,
                        }),
                    },
                )
                .await?;
        }
        Ok(())
    }
}
