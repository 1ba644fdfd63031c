//! Backing store contract.
//!
//! A [`Store`] hands out [`StoreTransaction`]s; every row operation the core
//! performs goes through one. Implementations that cannot roll back report
//! `supports_atomic_transactions() == false`, which makes the payment
//! orchestrator run its explicit compensation path.

mod memory;
mod postgres;

pub use memory::{FailPoint, InMemoryStore, MemoryTables};
pub use postgres::PgStore;

use crate::error::Result;
use crate::models::{
    Agent, AgentFilter, AgentStatus, AgentSummary, AdjustmentStatus, AuditLog, CommissionAdjustment,
    CommissionReport, Invoice, InvoiceFilter, InvoiceStatusHistory, Partner,
    Payment, ProcessedUsageHash, ReportStatus, SettingsAuditLog, SystemSetting, Wallet,
    WalletTransaction,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Filter for reading the audit trail back.
#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    pub entity_type: Option<String>,
    pub entity_id: Option<String>,
    pub correlation_id: Option<String>,
}

impl AuditFilter {
    pub fn matches(&self, log: &AuditLog) -> bool {
        self.entity_type.as_ref().map_or(true, |t| &log.entity_type == t)
            && self.entity_id.as_ref().map_or(true, |i| &log.entity_id == i)
            && self
                .correlation_id
                .as_ref()
                .map_or(true, |c| &log.correlation_id == c)
    }
}

#[async_trait]
pub trait Store: Send + Sync {
    /// Whether a rolled-back transaction leaves no trace of its writes.
    fn supports_atomic_transactions(&self) -> bool;

    async fn begin(&self) -> Result<Box<dyn StoreTransaction>>;

    async fn health_check(&self) -> Result<()>;
}

/// One open transaction. Operations observe the transaction's own writes.
///
/// Update operations return `None` when the target row does not exist.
#[async_trait]
pub trait StoreTransaction: Send {
    async fn commit(self: Box<Self>) -> Result<()>;
    async fn rollback(self: Box<Self>) -> Result<()>;

    // Audit trail
    async fn insert_audit_log(&mut self, entry: &AuditLog) -> Result<()>;
    async fn list_audit_logs(&mut self, filter: &AuditFilter) -> Result<Vec<AuditLog>>;

    // Partners
    async fn insert_partner(&mut self, partner: &Partner) -> Result<()>;
    async fn get_partner(&mut self, id: Uuid) -> Result<Option<Partner>>;
    async fn find_partner_by_code(&mut self, code: &str) -> Result<Option<Partner>>;

    // Agents
    async fn insert_agent(&mut self, agent: &Agent) -> Result<()>;
    async fn get_agent(&mut self, id: Uuid) -> Result<Option<Agent>>;
    async fn find_agent_by_code(&mut self, code: &str) -> Result<Option<Agent>>;
    async fn list_agents(&mut self, filter: &AgentFilter) -> Result<Vec<Agent>>;
    async fn update_agent_status(
        &mut self,
        id: Uuid,
        status: AgentStatus,
        at: DateTime<Utc>,
    ) -> Result<Option<Agent>>;
    async fn update_agent_summary(
        &mut self,
        id: Uuid,
        summary: AgentSummary,
        at: DateTime<Utc>,
    ) -> Result<Option<Agent>>;

    // Invoices
    async fn insert_invoice(&mut self, invoice: &Invoice) -> Result<()>;
    async fn get_invoice(&mut self, id: Uuid) -> Result<Option<Invoice>>;
    async fn find_invoice_by_number(&mut self, invoice_number: &str) -> Result<Option<Invoice>>;
    /// Ordered by due date ascending; ties keep creation order.
    async fn list_invoices(&mut self, filter: &InvoiceFilter) -> Result<Vec<Invoice>>;
    /// Moves the invoice to `entry.to_status` and records `entry` in one step.
    /// Neither write happens when the invoice is missing or the call fails.
    async fn transition_invoice(
        &mut self,
        entry: &InvoiceStatusHistory,
    ) -> Result<Option<Invoice>>;
    async fn insert_invoice_status_history(&mut self, entry: &InvoiceStatusHistory) -> Result<()>;
    async fn list_invoice_status_history(
        &mut self,
        invoice_id: Uuid,
    ) -> Result<Vec<InvoiceStatusHistory>>;

    // Payments
    async fn insert_payment(&mut self, payment: &Payment) -> Result<()>;
    async fn get_payment(&mut self, id: Uuid) -> Result<Option<Payment>>;
    async fn link_payment_wallet_transaction(
        &mut self,
        payment_id: Uuid,
        wallet_transaction_id: Uuid,
    ) -> Result<Option<Payment>>;
    async fn list_payments_for_agent(&mut self, agent_id: Uuid) -> Result<Vec<Payment>>;

    // Wallets
    async fn insert_wallet(&mut self, wallet: &Wallet) -> Result<()>;
    async fn find_wallet_by_agent(&mut self, agent_id: Uuid) -> Result<Option<Wallet>>;
    /// Appends `entry` to the ledger and sets the balance to
    /// `entry.balance_after`, bumping the version, provided the stored version
    /// still equals `expected_version`. The two writes land together or not
    /// at all.
    async fn apply_wallet_transaction(
        &mut self,
        entry: &WalletTransaction,
        expected_version: i64,
    ) -> Result<Wallet>;
    async fn set_wallet_last_transaction_at(
        &mut self,
        id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<Option<Wallet>>;

    // Wallet transactions
    async fn list_wallet_transactions(&mut self, wallet_id: Uuid) -> Result<Vec<WalletTransaction>>;
    async fn find_wallet_transactions_by_reference(
        &mut self,
        wallet_id: Uuid,
        reference_id: &str,
    ) -> Result<Vec<WalletTransaction>>;

    // Commissions
    async fn insert_commission_report(&mut self, report: &CommissionReport) -> Result<()>;
    async fn get_commission_report(&mut self, id: Uuid) -> Result<Option<CommissionReport>>;
    async fn list_commission_reports(&mut self, partner_id: Uuid)
        -> Result<Vec<CommissionReport>>;
    async fn update_commission_report_status(
        &mut self,
        id: Uuid,
        status: ReportStatus,
        at: DateTime<Utc>,
    ) -> Result<Option<CommissionReport>>;
    async fn delete_commission_report(&mut self, id: Uuid) -> Result<bool>;
    async fn insert_commission_adjustment(&mut self, entry: &CommissionAdjustment) -> Result<()>;
    async fn list_commission_adjustments(
        &mut self,
        agent_ids: &[Uuid],
        status: Option<AdjustmentStatus>,
    ) -> Result<Vec<CommissionAdjustment>>;
    async fn list_report_adjustments(&mut self, report_id: Uuid)
        -> Result<Vec<CommissionAdjustment>>;
    async fn set_adjustment_status(
        &mut self,
        id: Uuid,
        status: AdjustmentStatus,
        applied_report_id: Option<Uuid>,
    ) -> Result<Option<CommissionAdjustment>>;

    // Settings
    async fn insert_setting(&mut self, setting: &SystemSetting) -> Result<()>;
    async fn get_setting(&mut self, key: &str) -> Result<Option<SystemSetting>>;
    /// Replaces the value and bumps the version if it still equals
    /// `expected_version`.
    async fn update_setting(
        &mut self,
        key: &str,
        value: &str,
        expected_version: i64,
        updated_by: &str,
        at: DateTime<Utc>,
    ) -> Result<SystemSetting>;
    async fn insert_settings_audit_log(&mut self, entry: &SettingsAuditLog) -> Result<()>;
    async fn list_settings_audit_logs(&mut self, key: &str) -> Result<Vec<SettingsAuditLog>>;

    // Usage fingerprints
    async fn has_usage_hash(&mut self, hash: &str) -> Result<bool>;
    async fn insert_usage_hash(&mut self, entry: &ProcessedUsageHash) -> Result<()>;
}
