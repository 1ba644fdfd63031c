//! PostgreSQL store backed by sqlx.

use super::{AuditFilter, Store, StoreTransaction};
use crate::error::{BillingError, Result};
use crate::models::{
    AdjustmentStatus, Agent, AgentFilter, AgentStatus, AgentSummary, AuditLog,
    CommissionAdjustment, CommissionReport, Invoice, InvoiceFilter,
    InvoiceStatusHistory, Partner, Payment, ProcessedUsageHash, ReportStatus, SettingsAuditLog,
    SystemSetting, Wallet, WalletTransaction,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{FromRow, Postgres, Row, Transaction};
use std::time::Duration;
use tracing::{info, instrument};
use uuid::Uuid;

macro_rules! agent_columns {
    () => {
        "id, code, name, partner_id, commission_rate, status, email, phone, total_invoiced, \
         total_outstanding, summary_updated_at, created_at, updated_at"
    };
}

macro_rules! invoice_columns {
    () => {
        "id, agent_id, invoice_number, amount, currency, issue_date, due_date, status, source, \
         metadata, created_by, created_at, updated_at"
    };
}

macro_rules! payment_columns {
    () => {
        "id, agent_id, invoice_id, amount, method, reference, wallet_transaction_id, recorded_by, \
         recorded_at"
    };
}

macro_rules! wallet_columns {
    () => {
        "id, agent_id, balance, currency, version, last_transaction_at, created_at, updated_at"
    };
}

macro_rules! wallet_transaction_columns {
    () => {
        "id, wallet_id, type, amount, balance_after, reference_id, invoice_id, payment_id, \
         created_by, created_at"
    };
}

macro_rules! report_columns {
    () => {
        "id, partner_id, period_start, period_end, total_commission, status, created_by, \
         created_at, updated_at"
    };
}

macro_rules! adjustment_columns {
    () => {
        "id, agent_id, amount, reason, status, applied_report_id, created_by, created_at"
    };
}

macro_rules! setting_columns {
    () => {
        "key, value, is_sensitive, version, updated_by, updated_at"
    };
}

impl<'r> FromRow<'r, PgRow> for InvoiceStatusHistory {
    fn from_row(row: &'r PgRow) -> std::result::Result<Self, sqlx::Error> {
        let decode = |e: BillingError| sqlx::Error::Decode(Box::new(e));
        let from_status: Option<String> = row.try_get("from_status")?;
        let to_status: String = row.try_get("to_status")?;
        Ok(Self {
            id: row.try_get("id")?,
            invoice_id: row.try_get("invoice_id")?,
            from_status: from_status
                .map(|s| s.parse())
                .transpose()
                .map_err(decode)?,
            to_status: to_status.parse().map_err(decode)?,
            actor_user_id: row.try_get("actor_user_id")?,
            notes: row.try_get("notes")?,
            changed_at: row.try_get("changed_at")?,
        })
    }
}

/// Connection pool wrapper. Every transaction it opens is atomic.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    #[instrument(skip(database_url))]
    pub async fn connect(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await?;

        info!("PostgreSQL connection pool established");
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<()> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("Database migrations completed");
        Ok(())
    }
}

#[async_trait]
impl Store for PgStore {
    fn supports_atomic_transactions(&self) -> bool {
        true
    }

    async fn begin(&self) -> Result<Box<dyn StoreTransaction>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgTransaction { tx }))
    }

    #[instrument(skip(self))]
    async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

struct PgTransaction {
    tx: Transaction<'static, Postgres>,
}

impl PgTransaction {
    async fn insert_wallet_transaction(&mut self, entry: &WalletTransaction) -> Result<()> {
        sqlx::query(concat!(
            "INSERT INTO wallet_transactions (",
            wallet_transaction_columns!(),
            ") VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)"
        ))
        .bind(entry.id)
        .bind(entry.wallet_id)
        .bind(entry.transaction_type.as_str())
        .bind(entry.amount)
        .bind(entry.balance_after)
        .bind(&entry.reference_id)
        .bind(entry.invoice_id)
        .bind(entry.payment_id)
        .bind(&entry.created_by)
        .bind(entry.created_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl StoreTransaction for PgTransaction {
    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Audit trail
    // -------------------------------------------------------------------------

    async fn insert_audit_log(&mut self, entry: &AuditLog) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO audit_logs (id, entity_type, entity_id, action, actor_user_id, correlation_id, payload, at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(entry.id)
        .bind(&entry.entity_type)
        .bind(&entry.entity_id)
        .bind(&entry.action)
        .bind(&entry.actor_user_id)
        .bind(&entry.correlation_id)
        .bind(&entry.payload)
        .bind(entry.at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn list_audit_logs(&mut self, filter: &AuditFilter) -> Result<Vec<AuditLog>> {
        let rows = sqlx::query_as::<_, AuditLog>(
            r#"
            SELECT id, entity_type, entity_id, action, actor_user_id, correlation_id, payload, at
            FROM audit_logs
            WHERE ($1::text IS NULL OR entity_type = $1)
              AND ($2::text IS NULL OR entity_id = $2)
              AND ($3::text IS NULL OR correlation_id = $3)
            ORDER BY at ASC
            "#,
        )
        .bind(&filter.entity_type)
        .bind(&filter.entity_id)
        .bind(&filter.correlation_id)
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(rows)
    }

    // -------------------------------------------------------------------------
    // Partners and agents
    // -------------------------------------------------------------------------

    async fn insert_partner(&mut self, partner: &Partner) -> Result<()> {
        sqlx::query(
            "INSERT INTO partners (id, code, name, email, created_at) VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(partner.id)
        .bind(&partner.code)
        .bind(&partner.name)
        .bind(&partner.email)
        .bind(partner.created_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn get_partner(&mut self, id: Uuid) -> Result<Option<Partner>> {
        let row = sqlx::query_as::<_, Partner>(
            "SELECT id, code, name, email, created_at FROM partners WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(row)
    }

    async fn find_partner_by_code(&mut self, code: &str) -> Result<Option<Partner>> {
        let row = sqlx::query_as::<_, Partner>(
            "SELECT id, code, name, email, created_at FROM partners WHERE code = $1",
        )
        .bind(code)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(row)
    }

    async fn insert_agent(&mut self, agent: &Agent) -> Result<()> {
        sqlx::query(concat!(
            "INSERT INTO agents (",
            agent_columns!(),
            ") VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)"
        ))
        .bind(agent.id)
        .bind(&agent.code)
        .bind(&agent.name)
        .bind(agent.partner_id)
        .bind(agent.commission_rate)
        .bind(agent.status.as_str())
        .bind(&agent.email)
        .bind(&agent.phone)
        .bind(agent.total_invoiced)
        .bind(agent.total_outstanding)
        .bind(agent.summary_updated_at)
        .bind(agent.created_at)
        .bind(agent.updated_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn get_agent(&mut self, id: Uuid) -> Result<Option<Agent>> {
        let row = sqlx::query_as::<_, Agent>(concat!(
            "SELECT ",
            agent_columns!(),
            " FROM agents WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(row)
    }

    async fn find_agent_by_code(&mut self, code: &str) -> Result<Option<Agent>> {
        let row = sqlx::query_as::<_, Agent>(concat!(
            "SELECT ",
            agent_columns!(),
            " FROM agents WHERE code = $1"
        ))
        .bind(code)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(row)
    }

    async fn list_agents(&mut self, filter: &AgentFilter) -> Result<Vec<Agent>> {
        let rows = sqlx::query_as::<_, Agent>(concat!(
            "SELECT ",
            agent_columns!(),
            " FROM agents \
             WHERE ($1::uuid IS NULL OR partner_id = $1) \
               AND ($2::text IS NULL OR status = $2) \
             ORDER BY created_at ASC, id ASC \
             LIMIT $3"
        ))
        .bind(filter.partner_id)
        .bind(filter.status.map(|s| s.as_str()))
        .bind(filter.limit)
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(rows)
    }

    async fn update_agent_status(
        &mut self,
        id: Uuid,
        status: AgentStatus,
        at: DateTime<Utc>,
    ) -> Result<Option<Agent>> {
        let row = sqlx::query_as::<_, Agent>(concat!(
            "UPDATE agents SET status = $2, updated_at = $3 WHERE id = $1 RETURNING ",
            agent_columns!()
        ))
        .bind(id)
        .bind(status.as_str())
        .bind(at)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(row)
    }

    async fn update_agent_summary(
        &mut self,
        id: Uuid,
        summary: AgentSummary,
        at: DateTime<Utc>,
    ) -> Result<Option<Agent>> {
        let row = sqlx::query_as::<_, Agent>(concat!(
            "UPDATE agents SET total_invoiced = $2, total_outstanding = $3, \
             summary_updated_at = $4, updated_at = $4 WHERE id = $1 RETURNING ",
            agent_columns!()
        ))
        .bind(id)
        .bind(summary.total_invoiced)
        .bind(summary.total_outstanding)
        .bind(at)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(row)
    }

    // -------------------------------------------------------------------------
    // Invoices
    // -------------------------------------------------------------------------

    #[instrument(skip(self, invoice), fields(invoice_number = %invoice.invoice_number))]
    async fn insert_invoice(&mut self, invoice: &Invoice) -> Result<()> {
        sqlx::query(concat!(
            "INSERT INTO invoices (",
            invoice_columns!(),
            ") VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)"
        ))
        .bind(invoice.id)
        .bind(invoice.agent_id)
        .bind(&invoice.invoice_number)
        .bind(invoice.amount)
        .bind(&invoice.currency)
        .bind(invoice.issue_date)
        .bind(invoice.due_date)
        .bind(invoice.status.as_str())
        .bind(invoice.source.as_str())
        .bind(&invoice.metadata)
        .bind(&invoice.created_by)
        .bind(invoice.created_at)
        .bind(invoice.updated_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn get_invoice(&mut self, id: Uuid) -> Result<Option<Invoice>> {
        let row = sqlx::query_as::<_, Invoice>(concat!(
            "SELECT ",
            invoice_columns!(),
            " FROM invoices WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(row)
    }

    async fn find_invoice_by_number(&mut self, invoice_number: &str) -> Result<Option<Invoice>> {
        let row = sqlx::query_as::<_, Invoice>(concat!(
            "SELECT ",
            invoice_columns!(),
            " FROM invoices WHERE invoice_number = $1"
        ))
        .bind(invoice_number)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(row)
    }

    #[instrument(skip(self, filter), fields(agent_id = ?filter.agent_id))]
    async fn list_invoices(&mut self, filter: &InvoiceFilter) -> Result<Vec<Invoice>> {
        let rows = sqlx::query_as::<_, Invoice>(concat!(
            "SELECT ",
            invoice_columns!(),
            " FROM invoices \
             WHERE ($1::uuid IS NULL OR agent_id = $1) \
               AND (cardinality($2::text[]) = 0 OR status = ANY($2)) \
               AND ($3::date IS NULL OR issue_date >= $3) \
               AND ($4::date IS NULL OR issue_date <= $4) \
               AND ($5::date IS NULL OR due_date < $5) \
             ORDER BY due_date ASC, created_at ASC, id ASC \
             LIMIT $6"
        ))
        .bind(filter.agent_id)
        .bind(filter.status_strings())
        .bind(filter.issued_from)
        .bind(filter.issued_to)
        .bind(filter.due_before)
        .bind(filter.limit)
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(rows)
    }

    async fn transition_invoice(
        &mut self,
        entry: &InvoiceStatusHistory,
    ) -> Result<Option<Invoice>> {
        let row = sqlx::query_as::<_, Invoice>(concat!(
            "UPDATE invoices SET status = $2, updated_at = $3 WHERE id = $1 RETURNING ",
            invoice_columns!()
        ))
        .bind(entry.invoice_id)
        .bind(entry.to_status.as_str())
        .bind(entry.changed_at)
        .fetch_optional(&mut *self.tx)
        .await?;

        if row.is_some() {
            self.insert_invoice_status_history(entry).await?;
        }
        Ok(row)
    }

    async fn insert_invoice_status_history(&mut self, entry: &InvoiceStatusHistory) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO invoice_status_history (id, invoice_id, from_status, to_status, actor_user_id, notes, changed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(entry.id)
        .bind(entry.invoice_id)
        .bind(entry.from_status.map(|s| s.as_str()))
        .bind(entry.to_status.as_str())
        .bind(&entry.actor_user_id)
        .bind(&entry.notes)
        .bind(entry.changed_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn list_invoice_status_history(
        &mut self,
        invoice_id: Uuid,
    ) -> Result<Vec<InvoiceStatusHistory>> {
        let rows = sqlx::query_as::<_, InvoiceStatusHistory>(
            r#"
            SELECT id, invoice_id, from_status, to_status, actor_user_id, notes, changed_at
            FROM invoice_status_history
            WHERE invoice_id = $1
            ORDER BY changed_at ASC
            "#,
        )
        .bind(invoice_id)
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(rows)
    }

    // -------------------------------------------------------------------------
    // Payments
    // -------------------------------------------------------------------------

    async fn insert_payment(&mut self, payment: &Payment) -> Result<()> {
        sqlx::query(concat!(
            "INSERT INTO payments (",
            payment_columns!(),
            ") VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)"
        ))
        .bind(payment.id)
        .bind(payment.agent_id)
        .bind(payment.invoice_id)
        .bind(payment.amount)
        .bind(payment.method.as_str())
        .bind(&payment.reference)
        .bind(payment.wallet_transaction_id)
        .bind(&payment.recorded_by)
        .bind(payment.recorded_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn get_payment(&mut self, id: Uuid) -> Result<Option<Payment>> {
        let row = sqlx::query_as::<_, Payment>(concat!(
            "SELECT ",
            payment_columns!(),
            " FROM payments WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(row)
    }

    async fn link_payment_wallet_transaction(
        &mut self,
        payment_id: Uuid,
        wallet_transaction_id: Uuid,
    ) -> Result<Option<Payment>> {
        let row = sqlx::query_as::<_, Payment>(concat!(
            "UPDATE payments SET wallet_transaction_id = $2 WHERE id = $1 RETURNING ",
            payment_columns!()
        ))
        .bind(payment_id)
        .bind(wallet_transaction_id)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(row)
    }

    async fn list_payments_for_agent(&mut self, agent_id: Uuid) -> Result<Vec<Payment>> {
        let rows = sqlx::query_as::<_, Payment>(concat!(
            "SELECT ",
            payment_columns!(),
            " FROM payments WHERE agent_id = $1 ORDER BY recorded_at ASC"
        ))
        .bind(agent_id)
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(rows)
    }

    // -------------------------------------------------------------------------
    // Wallets
    // -------------------------------------------------------------------------

    async fn insert_wallet(&mut self, wallet: &Wallet) -> Result<()> {
        sqlx::query(concat!(
            "INSERT INTO wallets (",
            wallet_columns!(),
            ") VALUES ($1, $2, $3, $4, $5, $6, $7, $8)"
        ))
        .bind(wallet.id)
        .bind(wallet.agent_id)
        .bind(wallet.balance)
        .bind(&wallet.currency)
        .bind(wallet.version)
        .bind(wallet.last_transaction_at)
        .bind(wallet.created_at)
        .bind(wallet.updated_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn find_wallet_by_agent(&mut self, agent_id: Uuid) -> Result<Option<Wallet>> {
        let row = sqlx::query_as::<_, Wallet>(concat!(
            "SELECT ",
            wallet_columns!(),
            " FROM wallets WHERE agent_id = $1 FOR UPDATE"
        ))
        .bind(agent_id)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(row)
    }

    #[instrument(skip(self, entry), fields(wallet_id = %entry.wallet_id))]
    async fn apply_wallet_transaction(
        &mut self,
        entry: &WalletTransaction,
        expected_version: i64,
    ) -> Result<Wallet> {
        let id = entry.wallet_id;
        let row = sqlx::query_as::<_, Wallet>(concat!(
            "UPDATE wallets SET balance = $3, version = version + 1, updated_at = $4 \
             WHERE id = $1 AND version = $2 RETURNING ",
            wallet_columns!()
        ))
        .bind(id)
        .bind(expected_version)
        .bind(entry.balance_after)
        .bind(entry.created_at)
        .fetch_optional(&mut *self.tx)
        .await?;

        match row {
            Some(wallet) => {
                self.insert_wallet_transaction(entry).await?;
                Ok(wallet)
            }
            None => {
                let exists: Option<(i64,)> =
                    sqlx::query_as("SELECT version FROM wallets WHERE id = $1")
                        .bind(id)
                        .fetch_optional(&mut *self.tx)
                        .await?;
                match exists {
                    Some(_) => Err(BillingError::ConcurrencyConflict {
                        entity: "wallet",
                        id: id.to_string(),
                        expected: expected_version,
                    }),
                    None => Err(BillingError::not_found("wallet", id)),
                }
            }
        }
    }

    async fn set_wallet_last_transaction_at(
        &mut self,
        id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<Option<Wallet>> {
        let row = sqlx::query_as::<_, Wallet>(concat!(
            "UPDATE wallets SET last_transaction_at = $2 WHERE id = $1 RETURNING ",
            wallet_columns!()
        ))
        .bind(id)
        .bind(at)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(row)
    }

    async fn list_wallet_transactions(&mut self, wallet_id: Uuid) -> Result<Vec<WalletTransaction>> {
        let rows = sqlx::query_as::<_, WalletTransaction>(concat!(
            "SELECT ",
            wallet_transaction_columns!(),
            " FROM wallet_transactions WHERE wallet_id = $1 ORDER BY created_at ASC, id ASC"
        ))
        .bind(wallet_id)
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(rows)
    }

    async fn find_wallet_transactions_by_reference(
        &mut self,
        wallet_id: Uuid,
        reference_id: &str,
    ) -> Result<Vec<WalletTransaction>> {
        let rows = sqlx::query_as::<_, WalletTransaction>(concat!(
            "SELECT ",
            wallet_transaction_columns!(),
            " FROM wallet_transactions WHERE wallet_id = $1 AND reference_id = $2 \
             ORDER BY created_at ASC"
        ))
        .bind(wallet_id)
        .bind(reference_id)
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(rows)
    }

    // -------------------------------------------------------------------------
    // Commissions
    // -------------------------------------------------------------------------

    async fn insert_commission_report(&mut self, report: &CommissionReport) -> Result<()> {
        sqlx::query(concat!(
            "INSERT INTO commission_reports (",
            report_columns!(),
            ") VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)"
        ))
        .bind(report.id)
        .bind(report.partner_id)
        .bind(report.period_start)
        .bind(report.period_end)
        .bind(report.total_commission)
        .bind(report.status.as_str())
        .bind(&report.created_by)
        .bind(report.created_at)
        .bind(report.updated_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn get_commission_report(&mut self, id: Uuid) -> Result<Option<CommissionReport>> {
        let row = sqlx::query_as::<_, CommissionReport>(concat!(
            "SELECT ",
            report_columns!(),
            " FROM commission_reports WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(row)
    }

    async fn list_commission_reports(
        &mut self,
        partner_id: Uuid,
    ) -> Result<Vec<CommissionReport>> {
        let rows = sqlx::query_as::<_, CommissionReport>(concat!(
            "SELECT ",
            report_columns!(),
            " FROM commission_reports WHERE partner_id = $1 ORDER BY period_start ASC"
        ))
        .bind(partner_id)
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(rows)
    }

    async fn update_commission_report_status(
        &mut self,
        id: Uuid,
        status: ReportStatus,
        at: DateTime<Utc>,
    ) -> Result<Option<CommissionReport>> {
        let row = sqlx::query_as::<_, CommissionReport>(concat!(
            "UPDATE commission_reports SET status = $2, updated_at = $3 WHERE id = $1 RETURNING ",
            report_columns!()
        ))
        .bind(id)
        .bind(status.as_str())
        .bind(at)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(row)
    }

    async fn delete_commission_report(&mut self, id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM commission_reports WHERE id = $1")
            .bind(id)
            .execute(&mut *self.tx)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn insert_commission_adjustment(&mut self, entry: &CommissionAdjustment) -> Result<()> {
        sqlx::query(concat!(
            "INSERT INTO commission_adjustments (",
            adjustment_columns!(),
            ") VALUES ($1, $2, $3, $4, $5, $6, $7, $8)"
        ))
        .bind(entry.id)
        .bind(entry.agent_id)
        .bind(entry.amount)
        .bind(&entry.reason)
        .bind(entry.status.as_str())
        .bind(entry.applied_report_id)
        .bind(&entry.created_by)
        .bind(entry.created_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn list_commission_adjustments(
        &mut self,
        agent_ids: &[Uuid],
        status: Option<AdjustmentStatus>,
    ) -> Result<Vec<CommissionAdjustment>> {
        let rows = sqlx::query_as::<_, CommissionAdjustment>(concat!(
            "SELECT ",
            adjustment_columns!(),
            " FROM commission_adjustments \
             WHERE agent_id = ANY($1) AND ($2::text IS NULL OR status = $2) \
             ORDER BY created_at ASC"
        ))
        .bind(agent_ids)
        .bind(status.map(|s| s.as_str()))
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(rows)
    }

    async fn list_report_adjustments(
        &mut self,
        report_id: Uuid,
    ) -> Result<Vec<CommissionAdjustment>> {
        let rows = sqlx::query_as::<_, CommissionAdjustment>(concat!(
            "SELECT ",
            adjustment_columns!(),
            " FROM commission_adjustments WHERE applied_report_id = $1 ORDER BY created_at ASC"
        ))
        .bind(report_id)
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(rows)
    }

    async fn set_adjustment_status(
        &mut self,
        id: Uuid,
        status: AdjustmentStatus,
        applied_report_id: Option<Uuid>,
    ) -> Result<Option<CommissionAdjustment>> {
        let row = sqlx::query_as::<_, CommissionAdjustment>(concat!(
            "UPDATE commission_adjustments SET status = $2, applied_report_id = $3 \
             WHERE id = $1 RETURNING ",
            adjustment_columns!()
        ))
        .bind(id)
        .bind(status.as_str())
        .bind(applied_report_id)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(row)
    }

    // -------------------------------------------------------------------------
    // Settings
    // -------------------------------------------------------------------------

    async fn insert_setting(&mut self, setting: &SystemSetting) -> Result<()> {
        sqlx::query(concat!(
            "INSERT INTO system_settings (",
            setting_columns!(),
            ") VALUES ($1, $2, $3, $4, $5, $6)"
        ))
        .bind(&setting.key)
        .bind(&setting.value)
        .bind(setting.is_sensitive)
        .bind(setting.version)
        .bind(&setting.updated_by)
        .bind(setting.updated_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn get_setting(&mut self, key: &str) -> Result<Option<SystemSetting>> {
        let row = sqlx::query_as::<_, SystemSetting>(concat!(
            "SELECT ",
            setting_columns!(),
            " FROM system_settings WHERE key = $1"
        ))
        .bind(key)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(row)
    }

    async fn update_setting(
        &mut self,
        key: &str,
        value: &str,
        expected_version: i64,
        updated_by: &str,
        at: DateTime<Utc>,
    ) -> Result<SystemSetting> {
        let row = sqlx::query_as::<_, SystemSetting>(concat!(
            "UPDATE system_settings SET value = $2, version = version + 1, updated_by = $4, \
             updated_at = $5 WHERE key = $1 AND version = $3 RETURNING ",
            setting_columns!()
        ))
        .bind(key)
        .bind(value)
        .bind(expected_version)
        .bind(updated_by)
        .bind(at)
        .fetch_optional(&mut *self.tx)
        .await?;

        row.ok_or_else(|| BillingError::ConcurrencyConflict {
            entity: "setting",
            id: key.to_string(),
            expected: expected_version,
        })
    }

    async fn insert_settings_audit_log(&mut self, entry: &SettingsAuditLog) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO settings_audit_logs (id, setting_key, old_value, new_value, changed_by, changed_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(entry.id)
        .bind(&entry.setting_key)
        .bind(&entry.old_value)
        .bind(&entry.new_value)
        .bind(&entry.changed_by)
        .bind(entry.changed_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn list_settings_audit_logs(&mut self, key: &str) -> Result<Vec<SettingsAuditLog>> {
        let rows = sqlx::query_as::<_, SettingsAuditLog>(
            r#"
            SELECT id, setting_key, old_value, new_value, changed_by, changed_at
            FROM settings_audit_logs
            WHERE setting_key = $1
            ORDER BY changed_at ASC
            "#,
        )
        .bind(key)
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(rows)
    }

    // -------------------------------------------------------------------------
    // Usage fingerprints
    // -------------------------------------------------------------------------

    async fn has_usage_hash(&mut self, hash: &str) -> Result<bool> {
        let found: Option<(String,)> =
            sqlx::query_as("SELECT hash FROM processed_usage_hashes WHERE hash = $1")
                .bind(hash)
                .fetch_optional(&mut *self.tx)
                .await?;
        Ok(found.is_some())
    }

    async fn insert_usage_hash(&mut self, entry: &ProcessedUsageHash) -> Result<()> {
        sqlx::query("INSERT INTO processed_usage_hashes (hash, processed_at) VALUES ($1, $2)")
            .bind(&entry.hash)
            .bind(entry.processed_at)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }
}
