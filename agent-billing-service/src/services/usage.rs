//! Usage row ingestion, deduplicated by payload fingerprint.

use super::invoice::create_within;
use crate::audit::RequestContext;
use crate::error::{BillingError, Result};
use crate::models::{Invoice, InvoiceSource, InvoiceStatus, NewInvoice};
use crate::unit_of_work::UnitOfWorkFactory;
use chrono::{Days, NaiveDate};
use rust_decimal::Decimal;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use tracing::{info, instrument};

/// Payment terms for usage invoices.
const USAGE_DUE_DAYS: u64 = 30;

#[derive(Debug, Clone, Deserialize)]
pub struct UsageRow {
    pub agent_code: String,
    pub usage_date: NaiveDate,
    pub amount: Decimal,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum IngestOutcome {
    Ingested { hash: String, invoice: Invoice },
    Duplicate { hash: String },
}

#[derive(Clone)]
pub struct UsageIngestor {
    uow: UnitOfWorkFactory,
    default_currency: String,
}

impl UsageIngestor {
    pub fn new(uow: UnitOfWorkFactory, default_currency: impl Into<String>) -> Self {
        Self {
            uow,
            default_currency: default_currency.into(),
        }
    }

    #[instrument(skip_all, fields(actor = %ctx.actor().user_id()))]
    pub async fn ingest(&self, ctx: &RequestContext, raw: &serde_json::Value) -> Result<IngestOutcome> {
        let row: UsageRow = serde_json::from_value(raw.clone())
            .map_err(|e| BillingError::Validation(format!("malformed usage row: {}", e)))?;
        if row.amount <= Decimal::ZERO {
            return Err(BillingError::Validation(
                "Usage amount must be greater than zero".to_string(),
            ));
        }
        let hash = fingerprint(raw)?;
        let currency = row
            .currency
            .clone()
            .unwrap_or_else(|| self.default_currency.clone());

        let hash_for_uow = hash.clone();
        let result = self
            .uow
            .run(ctx, |uow| async move {
                if uow.usage_hashes().is_processed(&hash_for_uow).await? {
                    return Ok(None);
                }

                let agent = uow
                    .agents()
                    .find_by_code(&row.agent_code)
                    .await?
                    .ok_or_else(|| BillingError::not_found("agent", &row.agent_code))?;
                let due_date = row
                    .usage_date
                    .checked_add_days(Days::new(USAGE_DUE_DAYS))
                    .unwrap_or(row.usage_date);

                let created = create_within(
                    &uow,
                    NewInvoice {
                        agent_id: agent.id,
                        invoice_number: format!("USG-{}", &hash_for_uow[..16]),
                        amount: row.amount,
                        currency,
                        issue_date: row.usage_date,
                        due_date,
                        status: InvoiceStatus::Unpaid,
                        source: InvoiceSource::System,
                        metadata: Some(serde_json::json!({
                            "usage_hash": hash_for_uow,
                            "description": row.description,
                        })),
                    },
                )
                .await?;
                uow.usage_hashes().mark_processed(&hash_for_uow).await?;
                Ok(Some(created.invoice))
            })
            .await;

        match result {
            Ok(Some(invoice)) => {
                info!(usage_hash = %hash, invoice_id = %invoice.id, "Usage row ingested");
                Ok(IngestOutcome::Ingested { hash, invoice })
            }
            Ok(None) | Err(BillingError::Conflict(_)) => {
                info!(usage_hash = %hash, "Duplicate usage row ignored");
                Ok(IngestOutcome::Duplicate { hash })
            }
            Err(err) => Err(err),
        }
    }
}

/// Hex SHA-256 over the row serialised with sorted object keys.
pub fn fingerprint(raw: &serde_json::Value) -> Result<String> {
    let canonical = serde_json::to_vec(&canonicalize(raw))
        .map_err(|e| BillingError::Validation(format!("unserialisable usage row: {}", e)))?;
    Ok(hex::encode(Sha256::digest(&canonical)))
}

fn canonicalize(value: &serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => {
            let sorted: BTreeMap<&String, serde_json::Value> =
                map.iter().map(|(k, v)| (k, canonicalize(v))).collect();
            serde_json::to_value(sorted).unwrap_or(serde_json::Value::Null)
        }
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.iter().map(canonicalize).collect())
        }
        other => other.clone(),
    }
}
