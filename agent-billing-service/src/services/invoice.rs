//! Invoice status state machine and idempotent invoice creation.

use super::agent::recompute_summary_within;
use crate::audit::RequestContext;
use crate::error::{BillingError, OperationFailure, Result};
use crate::models::{Invoice, InvoiceFilter, InvoiceStatus, NewInvoice};
use crate::unit_of_work::{UnitOfWork, UnitOfWorkFactory};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Result of a status change request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusChange {
    pub invoice: Invoice,
    /// `false` when the invoice was already in the requested state.
    pub changed: bool,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CreatedInvoice {
    pub invoice: Invoice,
    /// `false` when an invoice with the same number already existed.
    pub created: bool,
}

#[derive(Clone)]
pub struct InvoiceService {
    uow: UnitOfWorkFactory,
}

impl InvoiceService {
    pub fn new(uow: UnitOfWorkFactory) -> Self {
        Self { uow }
    }

    #[instrument(skip(self, ctx, notes), fields(actor = %ctx.actor().user_id()))]
    pub async fn change_status(
        &self,
        ctx: &RequestContext,
        invoice_id: Uuid,
        to: InvoiceStatus,
        notes: Option<String>,
    ) -> std::result::Result<StatusChange, OperationFailure> {
        let result = self
            .uow
            .run(ctx, |uow| async move {
                let invoice = uow.invoices().require(invoice_id).await?;
                let change = apply_status_change(&uow, &invoice, to, notes).await?;
                if change.changed {
                    recompute_summary_within(&uow, invoice.agent_id).await?;
                }
                Ok(change)
            })
            .await;

        match result {
            Ok(change) => {
                info!(changed = change.changed, status = %change.invoice.status, "Invoice status request handled");
                Ok(change)
            }
            Err(err) => {
                warn!(error = %err, reason = err.reason(), "Invoice status change failed");
                Err(err.into())
            }
        }
    }

    /// Moves every UNPAID invoice due before `as_of` to OVERDUE.
    #[instrument(skip(self, ctx), fields(actor = %ctx.actor().user_id()))]
    pub async fn mark_overdue(
        &self,
        ctx: &RequestContext,
        as_of: NaiveDate,
    ) -> std::result::Result<usize, OperationFailure> {
        let result = self
            .uow
            .run(ctx, |uow| async move {
                let filter = InvoiceFilter {
                    statuses: vec![InvoiceStatus::Unpaid],
                    due_before: Some(as_of),
                    ..Default::default()
                };
                let due = uow.invoices().list(&filter).await?;
                let mut count = 0;
                for invoice in &due {
                    let change = apply_status_change(
                        &uow,
                        invoice,
                        InvoiceStatus::Overdue,
                        Some(format!("Past due as of {}", as_of)),
                    )
                    .await?;
                    if change.changed {
                        count += 1;
                    }
                }
                Ok(count)
            })
            .await;

        result
            .inspect(|count| info!(count = count, "Overdue invoices marked"))
            .map_err(|err| {
                warn!(error = %err, "Marking overdue invoices failed");
                err.into()
            })
    }

    /// Creates the invoice unless one with the same number exists.
    #[instrument(skip(self, ctx, input), fields(invoice_number = %input.invoice_number))]
    pub async fn create_idempotent_invoice(
        &self,
        ctx: &RequestContext,
        input: NewInvoice,
    ) -> Result<CreatedInvoice> {
        validate_new_invoice(&input)?;
        let invoice_number = input.invoice_number.clone();

        let attempt = self
            .uow
            .run(ctx, |uow| async move { create_within(&uow, input).await })
            .await;

        match attempt {
            Err(BillingError::Conflict(message)) => {
                // Lost the insert race; the winner is committed by now.
                info!(conflict = %message, "Invoice number taken concurrently, re-reading");
                let existing = self
                    .uow
                    .run(ctx, |uow| async move {
                        uow.invoices().find_by_number(&invoice_number).await
                    })
                    .await?;
                existing
                    .map(|invoice| CreatedInvoice {
                        invoice,
                        created: false,
                    })
                    .ok_or(BillingError::Conflict(message))
            }
            other => other,
        }
    }

    pub async fn get_invoice(&self, ctx: &RequestContext, invoice_id: Uuid) -> Result<Invoice> {
        self.uow
            .run(ctx, |uow| async move { uow.invoices().require(invoice_id).await })
            .await
    }

    pub async fn list_invoices(
        &self,
        ctx: &RequestContext,
        filter: InvoiceFilter,
    ) -> Result<Vec<Invoice>> {
        self.uow
            .run(ctx, |uow| async move { uow.invoices().list(&filter).await })
            .await
    }
}

/// State machine step inside an open unit of work.
pub async fn apply_status_change(
    uow: &UnitOfWork,
    invoice: &Invoice,
    to: InvoiceStatus,
    notes: Option<String>,
) -> Result<StatusChange> {
    let from = invoice.status;
    if from == to {
        return Ok(StatusChange {
            invoice: invoice.clone(),
            changed: false,
            message: format!("Invoice already in {} state", to),
        });
    }
    if from.is_terminal() {
        return Err(BillingError::InvalidStateTransition(format!(
            "invoice {} is {} and cannot move to {}",
            invoice.invoice_number, from, to
        )));
    }

    let (updated, _) = uow
        .invoices()
        .transition(invoice.id, from, to, notes)
        .await?;

    Ok(StatusChange {
        invoice: updated,
        changed: true,
        message: format!("Invoice moved from {} to {}", from, to),
    })
}

/// Lookup-or-create inside an open unit of work.
pub(crate) async fn create_within(uow: &UnitOfWork, input: NewInvoice) -> Result<CreatedInvoice> {
    if let Some(invoice) = uow.invoices().find_by_number(&input.invoice_number).await? {
        return Ok(CreatedInvoice {
            invoice,
            created: false,
        });
    }

    uow.agents().require(input.agent_id).await?;
    let invoice = uow.invoices().create(input).await?;
    uow.invoices()
        .append_history(invoice.id, None, invoice.status, Some("Invoice created".to_string()))
        .await?;
    recompute_summary_within(uow, invoice.agent_id).await?;

    Ok(CreatedInvoice {
        invoice,
        created: true,
    })
}

pub(crate) fn validate_new_invoice(input: &NewInvoice) -> Result<()> {
    if input.invoice_number.trim().is_empty() {
        return Err(BillingError::Validation(
            "Invoice number must not be empty".to_string(),
        ));
    }
    if input.amount < Decimal::ZERO {
        return Err(BillingError::Validation(
            "Invoice amount must not be negative".to_string(),
        ));
    }
    if input.currency.trim().is_empty() {
        return Err(BillingError::Validation(
            "Invoice currency must not be empty".to_string(),
        ));
    }
    if input.due_date < input.issue_date {
        return Err(BillingError::Validation(
            "Invoice due date must not precede its issue date".to_string(),
        ));
    }
    Ok(())
}
