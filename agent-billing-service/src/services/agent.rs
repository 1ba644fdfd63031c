//! Agent and partner registration, status and financial summary.

use crate::audit::RequestContext;
use crate::error::{BillingError, Result};
use crate::models::{
    Agent, AgentFilter, AgentStatus, AgentSummary, Invoice, InvoiceFilter, InvoiceStatus, NewAgent,
    NewPartner, Partner, Wallet, WalletTransaction,
};
use crate::unit_of_work::{UnitOfWork, UnitOfWorkFactory};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{info, instrument};
use uuid::Uuid;

/// Wallet with its full ledger.
#[derive(Debug, Clone, Serialize)]
pub struct WalletStatement {
    pub wallet: Wallet,
    pub transactions: Vec<WalletTransaction>,
}

#[derive(Clone)]
pub struct AgentService {
    uow: UnitOfWorkFactory,
    default_currency: String,
}

impl AgentService {
    pub fn new(uow: UnitOfWorkFactory, default_currency: impl Into<String>) -> Self {
        Self {
            uow,
            default_currency: default_currency.into(),
        }
    }

    #[instrument(skip(self, ctx, input), fields(code = %input.code))]
    pub async fn register_partner(&self, ctx: &RequestContext, input: NewPartner) -> Result<Partner> {
        if input.code.trim().is_empty() || input.name.trim().is_empty() {
            return Err(BillingError::Validation(
                "Partner code and name are required".to_string(),
            ));
        }

        let partner = self
            .uow
            .run(ctx, |uow| async move {
                if uow.partners().find_by_code(&input.code).await?.is_some() {
                    return Err(BillingError::Conflict(format!(
                        "partner code '{}' already exists",
                        input.code
                    )));
                }
                uow.partners().create(input).await
            })
            .await?;

        info!(partner_id = %partner.id, "Partner registered");
        Ok(partner)
    }

    /// Creates the agent together with its empty wallet.
    #[instrument(skip(self, ctx, input), fields(code = %input.code))]
    pub async fn register_agent(&self, ctx: &RequestContext, input: NewAgent) -> Result<Agent> {
        if input.code.trim().is_empty() || input.name.trim().is_empty() {
            return Err(BillingError::Validation(
                "Agent code and name are required".to_string(),
            ));
        }
        if input.commission_rate < Decimal::ZERO || input.commission_rate > Decimal::ONE_HUNDRED {
            return Err(BillingError::Validation(
                "Commission rate must be between 0 and 100".to_string(),
            ));
        }

        let currency = self.default_currency.clone();
        let agent = self
            .uow
            .run(ctx, |uow| async move {
                if uow.agents().find_by_code(&input.code).await?.is_some() {
                    return Err(BillingError::Conflict(format!(
                        "agent code '{}' already exists",
                        input.code
                    )));
                }
                if let Some(partner_id) = input.partner_id {
                    uow.partners().require(partner_id).await?;
                }
                let agent = uow.agents().create(input).await?;
                uow.wallets().get_or_create(agent.id, &currency).await?;
                Ok(agent)
            })
            .await?;

        info!(agent_id = %agent.id, "Agent registered");
        Ok(agent)
    }

    pub async fn change_agent_status(
        &self,
        ctx: &RequestContext,
        agent_id: Uuid,
        status: AgentStatus,
    ) -> Result<Agent> {
        self.uow
            .run(ctx, |uow| async move {
                let agent = uow.agents().require(agent_id).await?;
                if agent.status == status {
                    return Ok(agent);
                }
                uow.agents().update_status(agent_id, status).await
            })
            .await
    }

    pub async fn recompute_summary(&self, ctx: &RequestContext, agent_id: Uuid) -> Result<Agent> {
        self.uow
            .run(ctx, |uow| async move {
                recompute_summary_within(&uow, agent_id).await
            })
            .await
    }

    pub async fn list_agents(&self, ctx: &RequestContext, filter: AgentFilter) -> Result<Vec<Agent>> {
        self.uow
            .run(ctx, |uow| async move { uow.agents().list(&filter).await })
            .await
    }

    pub async fn wallet_statement(
        &self,
        ctx: &RequestContext,
        agent_id: Uuid,
    ) -> Result<WalletStatement> {
        self.uow
            .run(ctx, |uow| async move {
                let wallet = uow
                    .wallets()
                    .find_by_agent(agent_id)
                    .await?
                    .ok_or_else(|| BillingError::not_found("wallet", agent_id))?;
                let transactions = uow.wallet_transactions().list_for_wallet(wallet.id).await?;
                Ok(WalletStatement {
                    wallet,
                    transactions,
                })
            })
            .await
    }
}

/// Totals over the agent's invoices: invoiced excludes CANCELLED,
/// outstanding covers UNPAID, PARTIAL and OVERDUE.
pub fn summarize<'a>(invoices: impl IntoIterator<Item = &'a Invoice>) -> AgentSummary {
    invoices
        .into_iter()
        .fold(AgentSummary::default(), |mut summary, invoice| {
            if invoice.status != InvoiceStatus::Cancelled {
                summary.total_invoiced += invoice.amount;
            }
            if invoice.status.is_outstanding() {
                summary.total_outstanding += invoice.amount;
            }
            summary
        })
}

pub(crate) async fn recompute_summary_within(uow: &UnitOfWork, agent_id: Uuid) -> Result<Agent> {
    let invoices = uow
        .invoices()
        .list(&InvoiceFilter::for_agent(agent_id))
        .await?;
    let summary = summarize(&invoices);
    uow.agents().update_summary(agent_id, summary).await
}
