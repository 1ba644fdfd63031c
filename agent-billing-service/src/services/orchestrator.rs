//! Payment orchestration: record, deposit, settle, link.
//!
//! All four steps share one unit of work. On stores without atomic rollback the
//! wallet balance is read before the call, and a second unit of work reverses
//! whatever the failed call left on top of it.

use super::agent::recompute_summary_within;
use super::metrics;
use super::settlement::{settle_within, SettlementSummary};
use crate::audit::RequestContext;
use crate::error::{BillingError, OperationFailure, Result};
use crate::models::{NewPayment, NewWalletTransaction, PaymentMethod, WalletTransactionType};
use crate::unit_of_work::{UnitOfWork, UnitOfWorkFactory};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentRequest {
    pub agent_id: Uuid,
    pub amount: Decimal,
    #[serde(default)]
    pub reference_id: Option<String>,
    #[serde(default)]
    pub invoice_id: Option<Uuid>,
    #[serde(default)]
    pub method: Option<PaymentMethod>,
    #[serde(default)]
    pub settle_batch_size: Option<usize>,
}

impl PaymentRequest {
    pub fn new(agent_id: Uuid, amount: Decimal) -> Self {
        Self {
            agent_id,
            amount,
            reference_id: None,
            invoice_id: None,
            method: None,
            settle_batch_size: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PaymentOutcome {
    pub payment_id: Uuid,
    pub wallet_transaction_id: Uuid,
    pub reference_id: String,
    pub settlement: SettlementSummary,
}

#[derive(Clone)]
pub struct FinancialOrchestrator {
    uow: UnitOfWorkFactory,
    settle_batch_size: usize,
    default_currency: String,
}

impl FinancialOrchestrator {
    pub fn new(
        uow: UnitOfWorkFactory,
        settle_batch_size: usize,
        default_currency: impl Into<String>,
    ) -> Self {
        Self {
            uow,
            settle_batch_size,
            default_currency: default_currency.into(),
        }
    }

    pub async fn process_payment(
        &self,
        ctx: &RequestContext,
        request: PaymentRequest,
    ) -> std::result::Result<PaymentOutcome, OperationFailure> {
        if request.amount <= Decimal::ZERO {
            metrics::record_payment("failure");
            warn!(agent_id = %request.agent_id, "Rejected non-positive payment amount");
            return Err(BillingError::Validation(
                "Payment amount must be greater than zero".to_string(),
            )
            .into());
        }

        let reference_id = request
            .reference_id
            .clone()
            .filter(|r| !r.trim().is_empty())
            .unwrap_or_else(|| format!("payment:{}", Uuid::new_v4()));
        // Primary and compensating units of work share one correlation id.
        let ctx = match ctx.correlation_id() {
            Some(_) => ctx.clone(),
            None => ctx.clone().with_correlation_id(Uuid::new_v4().to_string()),
        };

        let span = info_span!(
            "financial.process_payment",
            agent_id = %request.agent_id,
            amount = %request.amount,
            reference_id = %reference_id,
            actor = %ctx.actor().user_id(),
            correlation_id = ctx.correlation_id().unwrap_or_default(),
        );

        self.process(&ctx, request, reference_id)
            .instrument(span)
            .await
    }

    async fn process(
        &self,
        ctx: &RequestContext,
        request: PaymentRequest,
        reference_id: String,
    ) -> std::result::Result<PaymentOutcome, OperationFailure> {
        let agent_id = request.agent_id;
        let opening_balance = if self.uow.supports_atomic_transactions() {
            None
        } else {
            match self.opening_balance(ctx, agent_id).await {
                Ok(balance) => Some(balance),
                Err(err) => {
                    warn!(error = %err, "Could not read wallet balance before payment");
                    metrics::record_payment("failure");
                    return Err(err.into());
                }
            }
        };

        let result = self
            .uow
            .run(ctx, |uow| {
                let reference_id = reference_id.clone();
                async move { self.execute(&uow, &request, reference_id).await }
            })
            .await;

        match result {
            Ok(outcome) => {
                metrics::record_payment("success");
                metrics::record_settlements(outcome.settlement.settled_count);
                info!(
                    payment_id = %outcome.payment_id,
                    wallet_transaction_id = %outcome.wallet_transaction_id,
                    settled_count = outcome.settlement.settled_count,
                    used_balance = %outcome.settlement.used_balance,
                    "Payment processed"
                );
                Ok(outcome)
            }
            Err(err) => {
                warn!(error = %err, reason = err.reason(), "Payment processing failed");
                if let Some(opening_balance) = opening_balance {
                    match self
                        .compensate(ctx, agent_id, opening_balance, &reference_id)
                        .await
                    {
                        Ok(Some(reversed)) => {
                            info!(amount = %reversed, "Compensating reversal applied")
                        }
                        Ok(None) => info!("No deposit to compensate"),
                        Err(comp_err) => {
                            error!(error = %comp_err, "Compensating reversal failed")
                        }
                    }
                }
                metrics::record_rollback();
                metrics::record_payment("failure");
                Err(err.into())
            }
        }
    }

    async fn execute(
        &self,
        uow: &UnitOfWork,
        request: &PaymentRequest,
        reference_id: String,
    ) -> Result<PaymentOutcome> {
        let agent = uow.agents().require(request.agent_id).await?;
        if let Some(invoice_id) = request.invoice_id {
            let invoice = uow.invoices().require(invoice_id).await?;
            if invoice.agent_id != agent.id {
                return Err(BillingError::Validation(format!(
                    "invoice {} does not belong to agent {}",
                    invoice.invoice_number, agent.code
                )));
            }
        }

        let payment = uow
            .payments()
            .record(NewPayment {
                agent_id: agent.id,
                invoice_id: request.invoice_id,
                amount: request.amount,
                method: request.method.unwrap_or(PaymentMethod::External),
                reference: reference_id.clone(),
            })
            .await?;

        let wallet = uow
            .wallets()
            .get_or_create(agent.id, &self.default_currency)
            .await?;
        let (_, deposit) = uow
            .wallets()
            .apply(
                &wallet,
                NewWalletTransaction::new(
                    WalletTransactionType::Deposit,
                    request.amount,
                    reference_id.clone(),
                )
                .for_payment(payment.id),
            )
            .await?;

        let batch_size = request.settle_batch_size.unwrap_or(self.settle_batch_size);
        let settlement = settle_within(uow, agent.id, batch_size).await?;
        if settlement.settled_count > 0 {
            recompute_summary_within(uow, agent.id).await?;
        }

        uow.payments()
            .link_wallet_transaction(payment.id, deposit.id)
            .await?;

        Ok(PaymentOutcome {
            payment_id: payment.id,
            wallet_transaction_id: deposit.id,
            reference_id,
            settlement,
        })
    }

    async fn opening_balance(&self, ctx: &RequestContext, agent_id: Uuid) -> Result<Decimal> {
        self.uow
            .run(ctx, |uow| async move {
                Ok(uow
                    .wallets()
                    .find_by_agent(agent_id)
                    .await?
                    .map_or(Decimal::ZERO, |wallet| wallet.balance))
            })
            .await
    }

    /// Brings the wallet back to `opening_balance` when the failed call left a
    /// deposit behind. Returns the reversed amount, if any.
    ///
    /// Assumes nothing else wrote to the wallet since `opening_balance` was
    /// read.
    async fn compensate(
        &self,
        ctx: &RequestContext,
        agent_id: Uuid,
        opening_balance: Decimal,
        reference_id: &str,
    ) -> Result<Option<Decimal>> {
        let rollback_reference = format!("rollback:{}", reference_id);
        self.uow
            .run(ctx, |uow| async move {
                let Some(wallet) = uow.wallets().find_by_agent(agent_id).await? else {
                    return Ok(None);
                };

                let deposited = uow
                    .wallet_transactions()
                    .find_by_reference(wallet.id, reference_id)
                    .await?
                    .iter()
                    .any(|t| t.transaction_type == WalletTransactionType::Deposit);
                if !deposited {
                    return Ok(None);
                }

                let already_reversed = uow
                    .wallet_transactions()
                    .find_by_reference(wallet.id, &rollback_reference)
                    .await?
                    .iter()
                    .any(|t| t.transaction_type == WalletTransactionType::Reversal);
                if already_reversed {
                    return Ok(None);
                }

                let excess = wallet.balance - opening_balance;
                if excess <= Decimal::ZERO {
                    warn!(
                        balance = %wallet.balance,
                        opening_balance = %opening_balance,
                        "Deposit left no excess on the wallet, skipping reversal"
                    );
                    return Ok(None);
                }

                uow.wallets()
                    .apply(
                        &wallet,
                        NewWalletTransaction::new(
                            WalletTransactionType::Reversal,
                            excess,
                            rollback_reference,
                        ),
                    )
                    .await?;
                Ok(Some(excess))
            })
            .await
    }
}
