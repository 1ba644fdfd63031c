//! Wallet settlement: applies an agent's wallet balance against their
//! oldest outstanding invoices in bounded batches.
//!
//! Only callable with an open [`UnitOfWork`], so the balance read and every
//! decrement commit or roll back together.

use super::invoice::apply_status_change;
use crate::error::Result;
use crate::models::{InvoiceFilter, InvoiceStatus, NewWalletTransaction, WalletTransactionType};
use crate::unit_of_work::UnitOfWork;
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{debug, instrument};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SettlementSummary {
    pub settled_count: u64,
    pub used_balance: Decimal,
    pub batches_processed: u64,
}

/// Settles UNPAID and OVERDUE invoices, earliest due date first.
///
/// Each settled invoice is marked PAID, including when the remaining balance
/// covers only part of its amount.
#[instrument(skip(uow), fields(correlation_id = %uow.correlation_id()))]
pub async fn settle_within(
    uow: &UnitOfWork,
    agent_id: Uuid,
    batch_size: usize,
) -> Result<SettlementSummary> {
    let batch_size = batch_size.max(1);
    let mut summary = SettlementSummary::default();

    let Some(mut wallet) = uow.wallets().find_by_agent(agent_id).await? else {
        debug!(agent_id = %agent_id, "No wallet for agent, nothing to settle");
        return Ok(summary);
    };
    if wallet.balance <= Decimal::ZERO {
        debug!(
            agent_id = %agent_id,
            balance = %wallet.balance,
            "Wallet has no positive balance, nothing to settle"
        );
        return Ok(summary);
    }

    let filter = InvoiceFilter::for_agent(agent_id)
        .with_statuses(&InvoiceStatus::SETTLEABLE)
        .with_limit(batch_size as i64);

    loop {
        if wallet.balance <= Decimal::ZERO {
            break;
        }
        let batch = uow.invoices().list(&filter).await?;
        if batch.is_empty() {
            break;
        }
        summary.batches_processed += 1;

        for invoice in &batch {
            if wallet.balance <= Decimal::ZERO {
                break;
            }
            let amount_to_settle = wallet.balance.min(invoice.amount);

            let (updated, entry) = uow
                .wallets()
                .apply(
                    &wallet,
                    NewWalletTransaction::new(
                        WalletTransactionType::Settlement,
                        amount_to_settle,
                        format!("settlement:{}", invoice.id),
                    )
                    .for_invoice(invoice.id),
                )
                .await?;
            wallet = updated;

            apply_status_change(
                uow,
                invoice,
                InvoiceStatus::Paid,
                Some(format!(
                    "Settled {} from wallet {}",
                    amount_to_settle, wallet.id
                )),
            )
            .await?;

            debug!(
                invoice_id = %invoice.id,
                wallet_transaction_id = %entry.id,
                amount = %amount_to_settle,
                "Invoice settled from wallet"
            );
            summary.settled_count += 1;
            summary.used_balance += amount_to_settle;
        }
    }

    if summary.settled_count > 0 {
        uow.wallets().touch(wallet.id).await?;
    }

    Ok(summary)
}
