//! Batch import with per-row retry and a dead-letter list.

use super::invoice::InvoiceService;
use super::metrics;
use crate::audit::RequestContext;
use crate::error::{BillingError, Result};
use crate::models::{InvoiceSource, InvoiceStatus, NewInvoice};
use crate::unit_of_work::UnitOfWorkFactory;
use async_trait::async_trait;
use backoff::future::retry;
use backoff::ExponentialBackoff;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowOutcome {
    Processed,
    /// The row was already applied earlier.
    Skipped,
}

/// Source-specific row handling plugged into [`Importer`].
///
/// Row futures are awaited in place and never spawned, so they need not be
/// `Send`.
#[async_trait(?Send)]
pub trait RowProcessor: Send + Sync {
    type Row: Send + Sync;

    fn parse_row(&self, raw: &serde_json::Value) -> Result<Self::Row>;

    fn validate_row(&self, row: &Self::Row) -> Result<()>;

    async fn process_row(&self, ctx: &RequestContext, row: &Self::Row) -> Result<RowOutcome>;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeadLetter {
    pub row_index: usize,
    /// Zero when the row never reached processing.
    pub attempts: u32,
    pub reason: &'static str,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ImportReport {
    pub processed: usize,
    pub skipped: usize,
    pub dead_letters: Vec<DeadLetter>,
}

#[derive(Debug, Clone)]
pub struct ImporterConfig {
    /// Total attempts per row, including the first.
    pub max_attempts: u32,
    pub initial_interval: Duration,
    pub max_interval: Duration,
}

impl Default for ImporterConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_interval: Duration::from_millis(100),
            max_interval: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Importer {
    config: ImporterConfig,
}

impl Importer {
    pub fn new(config: ImporterConfig) -> Self {
        Self { config }
    }

    #[instrument(skip_all, fields(rows = rows.len()))]
    pub async fn run<P: RowProcessor>(
        &self,
        ctx: &RequestContext,
        processor: &P,
        rows: &[serde_json::Value],
    ) -> ImportReport {
        let mut report = ImportReport::default();

        for (row_index, raw) in rows.iter().enumerate() {
            let row = match processor
                .parse_row(raw)
                .and_then(|row| processor.validate_row(&row).map(|_| row))
            {
                Ok(row) => row,
                Err(err) => {
                    report.dead_letter(row_index, 0, err);
                    continue;
                }
            };

            match self.process_with_retry(ctx, processor, &row).await {
                (Ok(RowOutcome::Processed), _) => {
                    metrics::record_import_row("processed");
                    report.processed += 1;
                }
                (Ok(RowOutcome::Skipped), _) => {
                    metrics::record_import_row("skipped");
                    report.skipped += 1;
                }
                (Err(err), attempts) => report.dead_letter(row_index, attempts, err),
            }
        }

        info!(
            processed = report.processed,
            skipped = report.skipped,
            dead_letters = report.dead_letters.len(),
            "Import finished"
        );
        report
    }

    async fn process_with_retry<P: RowProcessor>(
        &self,
        ctx: &RequestContext,
        processor: &P,
        row: &P::Row,
    ) -> (Result<RowOutcome>, u32) {
        let max_attempts = self.config.max_attempts.max(1);
        let attempts = AtomicU32::new(0);
        let backoff = ExponentialBackoff {
            initial_interval: self.config.initial_interval,
            max_interval: self.config.max_interval,
            max_elapsed_time: None,
            ..Default::default()
        };

        let result = retry(backoff, || async {
            let attempt = attempts.fetch_add(1, Ordering::SeqCst) + 1;
            processor.process_row(ctx, row).await.map_err(|err| {
                if err.is_transient() && attempt < max_attempts {
                    debug!(attempt, error = %err, "Transient row failure, retrying");
                    backoff::Error::transient(err)
                } else {
                    backoff::Error::permanent(err)
                }
            })
        })
        .await;

        (result, attempts.load(Ordering::SeqCst))
    }
}

impl ImportReport {
    fn dead_letter(&mut self, row_index: usize, attempts: u32, err: BillingError) {
        warn!(row_index, attempts, error = %err, "Row moved to dead letters");
        metrics::record_import_row("dead_letter");
        self.dead_letters.push(DeadLetter {
            row_index,
            attempts,
            reason: err.reason(),
            error: err.to_string(),
        });
    }
}

/// Invoice row as uploaded in a batch file.
#[derive(Debug, Clone, Deserialize)]
pub struct InvoiceRow {
    pub agent_code: String,
    pub invoice_number: String,
    pub amount: Decimal,
    #[serde(default)]
    pub currency: Option<String>,
    pub issue_date: NaiveDate,
    pub due_date: NaiveDate,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

/// Imports invoices through the idempotent creation path.
#[derive(Clone)]
pub struct InvoiceRowProcessor {
    uow: UnitOfWorkFactory,
    invoices: InvoiceService,
    default_currency: String,
}

impl InvoiceRowProcessor {
    pub fn new(uow: UnitOfWorkFactory, default_currency: impl Into<String>) -> Self {
        Self {
            invoices: InvoiceService::new(uow.clone()),
            uow,
            default_currency: default_currency.into(),
        }
    }
}

#[async_trait(?Send)]
impl RowProcessor for InvoiceRowProcessor {
    type Row = InvoiceRow;

    fn parse_row(&self, raw: &serde_json::Value) -> Result<InvoiceRow> {
        serde_json::from_value(raw.clone())
            .map_err(|e| BillingError::Validation(format!("malformed invoice row: {}", e)))
    }

    fn validate_row(&self, row: &InvoiceRow) -> Result<()> {
        if row.agent_code.trim().is_empty() {
            return Err(BillingError::Validation(
                "Agent code must not be empty".to_string(),
            ));
        }
        if row.amount <= Decimal::ZERO {
            return Err(BillingError::Validation(
                "Invoice amount must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    async fn process_row(&self, ctx: &RequestContext, row: &InvoiceRow) -> Result<RowOutcome> {
        let agent_code = row.agent_code.clone();
        let agent = self
            .uow
            .run(ctx, |uow| async move {
                uow.agents()
                    .find_by_code(&agent_code)
                    .await?
                    .ok_or_else(|| BillingError::not_found("agent", &agent_code))
            })
            .await?;

        let created = self
            .invoices
            .create_idempotent_invoice(
                ctx,
                NewInvoice {
                    agent_id: agent.id,
                    invoice_number: row.invoice_number.clone(),
                    amount: row.amount,
                    currency: row
                        .currency
                        .clone()
                        .unwrap_or_else(|| self.default_currency.clone()),
                    issue_date: row.issue_date,
                    due_date: row.due_date,
                    status: InvoiceStatus::Unpaid,
                    source: InvoiceSource::BatchUpload,
                    metadata: row.metadata.clone(),
                },
            )
            .await?;

        Ok(if created.created {
            RowOutcome::Processed
        } else {
            RowOutcome::Skipped
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{Actor, Role};
    use std::sync::Mutex;

    /// Fails each row a scripted number of times before succeeding.
    struct ScriptedProcessor {
        failures: Mutex<Option<BillingError>>,
        transient_failures: u32,
        calls: AtomicU32,
    }

    #[async_trait(?Send)]
    impl RowProcessor for ScriptedProcessor {
        type Row = i64;

        fn parse_row(&self, raw: &serde_json::Value) -> Result<i64> {
            raw.as_i64()
                .ok_or_else(|| BillingError::Validation("not a number".to_string()))
        }

        fn validate_row(&self, row: &i64) -> Result<()> {
            if *row < 0 {
                return Err(BillingError::Validation("negative".to_string()));
            }
            Ok(())
        }

        async fn process_row(&self, _ctx: &RequestContext, row: &i64) -> Result<RowOutcome> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if *row == 99 {
                return Err(BillingError::TransientStore("always down".to_string()));
            }
            if *row == 13 {
                if let Some(err) = self.failures.lock().unwrap().take() {
                    return Err(err);
                }
            }
            if *row == 7 && call < self.transient_failures {
                return Err(BillingError::TransientStore("flaky".to_string()));
            }
            Ok(RowOutcome::Processed)
        }
    }

    fn importer(max_attempts: u32) -> Importer {
        Importer::new(ImporterConfig {
            max_attempts,
            initial_interval: Duration::from_millis(1),
            max_interval: Duration::from_millis(5),
        })
    }

    fn ctx() -> RequestContext {
        RequestContext::new(Actor::new("importer", Role::System).unwrap())
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let processor = ScriptedProcessor {
            failures: Mutex::new(None),
            transient_failures: 2,
            calls: AtomicU32::new(0),
        };
        let report = importer(3)
            .run(&ctx(), &processor, &[serde_json::json!(7)])
            .await;

        assert_eq!(report.processed, 1);
        assert!(report.dead_letters.is_empty());
        assert_eq!(processor.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausted_and_permanent_failures_are_dead_lettered() {
        let processor = ScriptedProcessor {
            failures: Mutex::new(Some(BillingError::Validation("bad agent".to_string()))),
            transient_failures: 0,
            calls: AtomicU32::new(0),
        };
        let rows = [
            serde_json::json!(1),
            serde_json::json!("x"),
            serde_json::json!(-5),
            serde_json::json!(99),
            serde_json::json!(13),
        ];
        let report = importer(3).run(&ctx(), &processor, &rows).await;

        assert_eq!(report.processed, 1);
        let letters: Vec<(usize, u32, &str)> = report
            .dead_letters
            .iter()
            .map(|d| (d.row_index, d.attempts, d.reason))
            .collect();
        assert_eq!(
            letters,
            vec![
                (1, 0, "validation"),
                (2, 0, "validation"),
                (3, 3, "transient_store"),
                (4, 1, "validation"),
            ]
        );
    }
}
