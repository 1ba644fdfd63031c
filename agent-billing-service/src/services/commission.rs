//! Partner commission reports.

use crate::audit::RequestContext;
use crate::error::{BillingError, OperationFailure, Result};
use crate::models::{
    CommissionAdjustment, CommissionReport, InvoiceFilter, InvoiceStatus,
    NewCommissionAdjustment, NewCommissionReport, ReportStatus,
};
use crate::unit_of_work::UnitOfWorkFactory;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use tracing::{info, instrument, warn};
use uuid::Uuid;

#[derive(Clone)]
pub struct CommissionService {
    uow: UnitOfWorkFactory,
}

impl CommissionService {
    pub fn new(uow: UnitOfWorkFactory) -> Self {
        Self { uow }
    }

    pub async fn create_adjustment(
        &self,
        ctx: &RequestContext,
        agent_id: Uuid,
        amount: Decimal,
        reason: &str,
    ) -> Result<CommissionAdjustment> {
        if amount.is_zero() {
            return Err(BillingError::Validation(
                "Adjustment amount must not be zero".to_string(),
            ));
        }
        let reason = reason.to_string();
        self.uow
            .run(ctx, |uow| async move {
                uow.agents().require(agent_id).await?;
                uow.commissions()
                    .create_adjustment(NewCommissionAdjustment {
                        agent_id,
                        amount,
                        reason,
                    })
                    .await
            })
            .await
    }

    /// Builds a DRAFT report over PAID invoices issued within the period and
    /// folds in every unapplied adjustment of the partner's agents.
    #[instrument(skip(self, ctx), fields(actor = %ctx.actor().user_id()))]
    pub async fn generate_report(
        &self,
        ctx: &RequestContext,
        partner_id: Uuid,
        period_start: NaiveDate,
        period_end: NaiveDate,
    ) -> Result<CommissionReport> {
        if period_end < period_start {
            return Err(BillingError::Validation(
                "Report period end must not precede its start".to_string(),
            ));
        }

        let report = self
            .uow
            .run(ctx, |uow| async move {
                uow.partners().require(partner_id).await?;
                let agents = uow.partners().list_agents(partner_id).await?;

                let mut total = Decimal::ZERO;
                for agent in &agents {
                    let filter = InvoiceFilter {
                        agent_id: Some(agent.id),
                        statuses: vec![InvoiceStatus::Paid],
                        issued_from: Some(period_start),
                        issued_to: Some(period_end),
                        ..Default::default()
                    };
                    let paid: Decimal = uow
                        .invoices()
                        .list(&filter)
                        .await?
                        .iter()
                        .map(|i| i.amount)
                        .sum();
                    total += paid * agent.commission_rate / Decimal::ONE_HUNDRED;
                }

                let agent_ids: Vec<Uuid> = agents.iter().map(|a| a.id).collect();
                let adjustments = uow.commissions().list_unapplied(&agent_ids).await?;
                total += adjustments.iter().map(|a| a.amount).sum::<Decimal>();

                let report = uow
                    .commissions()
                    .create_report(NewCommissionReport {
                        partner_id,
                        period_start,
                        period_end,
                        total_commission: total.round_dp(2),
                    })
                    .await?;

                let adjustment_ids: Vec<Uuid> = adjustments.iter().map(|a| a.id).collect();
                uow.commissions()
                    .mark_applied(&adjustment_ids, report.id)
                    .await?;
                Ok(report)
            })
            .await?;

        info!(
            report_id = %report.id,
            total_commission = %report.total_commission,
            "Commission report generated"
        );
        Ok(report)
    }

    pub async fn change_report_status(
        &self,
        ctx: &RequestContext,
        report_id: Uuid,
        to: ReportStatus,
    ) -> std::result::Result<CommissionReport, OperationFailure> {
        self.uow
            .run(ctx, |uow| async move {
                let report = uow.commissions().require_report(report_id).await?;
                if report.status == to {
                    return Ok(report);
                }
                if !report.status.can_transition_to(to) {
                    return Err(BillingError::InvalidStateTransition(format!(
                        "commission report {} is {} and cannot move to {}",
                        report.id, report.status, to
                    )));
                }
                uow.commissions().update_report_status(report_id, to).await
            })
            .await
            .map_err(|err| {
                warn!(report_id = %report_id, error = %err, "Commission report status change failed");
                err.into()
            })
    }

    /// Deletes a DRAFT report and releases its adjustments.
    pub async fn delete_draft_report(&self, ctx: &RequestContext, report_id: Uuid) -> Result<()> {
        self.uow
            .run(ctx, |uow| async move {
                let report = uow.commissions().require_report(report_id).await?;
                if report.status != ReportStatus::Draft {
                    return Err(BillingError::InvalidStateTransition(format!(
                        "only DRAFT reports can be deleted, report {} is {}",
                        report.id, report.status
                    )));
                }
                let ids: Vec<Uuid> = uow
                    .commissions()
                    .list_report_adjustments(report_id)
                    .await?
                    .iter()
                    .map(|a| a.id)
                    .collect();
                uow.commissions().mark_unapplied(&ids).await?;
                uow.commissions().delete_report(report_id).await
            })
            .await
    }

    pub async fn list_reports(
        &self,
        ctx: &RequestContext,
        partner_id: Uuid,
    ) -> Result<Vec<CommissionReport>> {
        self.uow
            .run(ctx, |uow| async move {
                uow.commissions().list_reports(partner_id).await
            })
            .await
    }
}
