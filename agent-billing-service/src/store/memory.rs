//! In-process store used by tests and the `memory` storage backend.
//!
//! By default the store is atomic: a transaction works on a private copy of
//! every table and publishes it on commit, holding the table lock for its
//! whole lifetime. [`InMemoryStore::write_through`] builds the degraded
//! variant where each operation hits the shared tables immediately and
//! rollback is a no-op.

use super::{AuditFilter, Store, StoreTransaction};
use crate::error::{BillingError, Result};
use crate::models::{
    AdjustmentStatus, Agent, AgentFilter, AgentStatus, AgentSummary, AuditLog,
    CommissionAdjustment, CommissionReport, Invoice, InvoiceFilter, InvoiceStatusHistory,
    Partner, Payment, ProcessedUsageHash, ReportStatus, SettingsAuditLog,
    SystemSetting, Wallet, WalletTransaction, WalletTransactionType,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

/// Every table the core writes, in insertion order.
#[derive(Debug, Clone, Default)]
pub struct MemoryTables {
    pub partners: Vec<Partner>,
    pub agents: Vec<Agent>,
    pub invoices: Vec<Invoice>,
    pub invoice_status_history: Vec<InvoiceStatusHistory>,
    pub payments: Vec<Payment>,
    pub wallets: Vec<Wallet>,
    pub wallet_transactions: Vec<WalletTransaction>,
    pub commission_reports: Vec<CommissionReport>,
    pub commission_adjustments: Vec<CommissionAdjustment>,
    pub settings: Vec<SystemSetting>,
    pub settings_audit_logs: Vec<SettingsAuditLog>,
    pub audit_logs: Vec<AuditLog>,
    pub usage_hashes: Vec<ProcessedUsageHash>,
}

impl MemoryTables {
    pub fn wallet_for(&self, agent_id: Uuid) -> Option<&Wallet> {
        self.wallets.iter().find(|w| w.agent_id == agent_id)
    }

    pub fn invoice(&self, id: Uuid) -> Option<&Invoice> {
        self.invoices.iter().find(|i| i.id == id)
    }

    pub fn transactions_for(&self, wallet_id: Uuid) -> Vec<&WalletTransaction> {
        self.wallet_transactions
            .iter()
            .filter(|t| t.wallet_id == wallet_id)
            .collect()
    }
}

/// Operation that can be told to fail with a transient store error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailPoint {
    InsertInvoice,
    UpdateInvoiceStatus,
    InsertPayment,
    InsertWalletTransaction(WalletTransactionType),
    UpdateWalletBalance,
    InsertAuditLog,
    UpdateSetting,
    Commit,
}

type FailPlan = Arc<std::sync::Mutex<HashMap<FailPoint, u32>>>;

fn trip(plan: &FailPlan, point: FailPoint) -> Result<()> {
    let mut plan = plan.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    match plan.get_mut(&point) {
        Some(remaining) if *remaining > 0 => {
            if *remaining != u32::MAX {
                *remaining -= 1;
            }
            Err(BillingError::TransientStore(format!(
                "injected failure at {:?}",
                point
            )))
        }
        _ => Ok(()),
    }
}

#[derive(Clone)]
pub struct InMemoryStore {
    tables: Arc<Mutex<MemoryTables>>,
    atomic: bool,
    fail_plan: FailPlan,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    /// Atomic store: rolled back transactions leave nothing behind.
    pub fn new() -> Self {
        Self {
            tables: Arc::new(Mutex::new(MemoryTables::default())),
            atomic: true,
            fail_plan: FailPlan::default(),
        }
    }

    /// Non-atomic store: writes are visible immediately and survive rollback.
    pub fn write_through() -> Self {
        Self {
            atomic: false,
            ..Self::new()
        }
    }

    /// Makes the next `times` hits of `point` fail.
    pub fn fail_on(&self, point: FailPoint, times: u32) {
        let mut plan = self
            .fail_plan
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        plan.insert(point, times);
    }

    pub fn fail_always(&self, point: FailPoint) {
        self.fail_on(point, u32::MAX);
    }

    pub fn clear_fail_points(&self) {
        let mut plan = self
            .fail_plan
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        plan.clear();
    }

    /// Copy of the committed tables.
    pub async fn snapshot(&self) -> MemoryTables {
        self.tables.lock().await.clone()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    fn supports_atomic_transactions(&self) -> bool {
        self.atomic
    }

    async fn begin(&self) -> Result<Box<dyn StoreTransaction>> {
        let mode = if self.atomic {
            let guard = self.tables.clone().lock_owned().await;
            let working = guard.clone();
            Mode::Staged { guard, working }
        } else {
            Mode::Direct(self.tables.clone())
        };
        Ok(Box::new(MemoryTransaction {
            mode,
            fail_plan: self.fail_plan.clone(),
        }))
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}

enum Mode {
    Staged {
        guard: OwnedMutexGuard<MemoryTables>,
        working: MemoryTables,
    },
    Direct(Arc<Mutex<MemoryTables>>),
}

struct MemoryTransaction {
    mode: Mode,
    fail_plan: FailPlan,
}

impl MemoryTransaction {
    async fn with<R, F>(&mut self, f: F) -> R
    where
        F: FnOnce(&mut MemoryTables) -> R + Send,
        R: Send,
    {
        match &mut self.mode {
            Mode::Staged { working, .. } => f(working),
            Mode::Direct(shared) => f(&mut *shared.lock().await),
        }
    }

    fn trip(&self, point: FailPoint) -> Result<()> {
        trip(&self.fail_plan, point)
    }
}

fn conflict(what: &str, key: impl std::fmt::Display) -> BillingError {
    BillingError::Conflict(format!("duplicate {} '{}'", what, key))
}

#[async_trait]
impl StoreTransaction for MemoryTransaction {
    async fn commit(self: Box<Self>) -> Result<()> {
        let this = *self;
        this.trip(FailPoint::Commit)?;
        if let Mode::Staged { mut guard, working } = this.mode {
            *guard = working;
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        // Staged copies are dropped; write-through changes stay.
        Ok(())
    }

    async fn insert_audit_log(&mut self, entry: &AuditLog) -> Result<()> {
        self.trip(FailPoint::InsertAuditLog)?;
        self.with(|t| t.audit_logs.push(entry.clone())).await;
        Ok(())
    }

    async fn list_audit_logs(&mut self, filter: &AuditFilter) -> Result<Vec<AuditLog>> {
        Ok(self
            .with(|t| {
                t.audit_logs
                    .iter()
                    .filter(|l| filter.matches(l))
                    .cloned()
                    .collect()
            })
            .await)
    }

    async fn insert_partner(&mut self, partner: &Partner) -> Result<()> {
        self.with(|t| {
            if t.partners.iter().any(|p| p.code == partner.code) {
                return Err(conflict("partner code", &partner.code));
            }
            t.partners.push(partner.clone());
            Ok(())
        })
        .await
    }

    async fn get_partner(&mut self, id: Uuid) -> Result<Option<Partner>> {
        Ok(self
            .with(|t| t.partners.iter().find(|p| p.id == id).cloned())
            .await)
    }

    async fn find_partner_by_code(&mut self, code: &str) -> Result<Option<Partner>> {
        Ok(self
            .with(|t| t.partners.iter().find(|p| p.code == code).cloned())
            .await)
    }

    async fn insert_agent(&mut self, agent: &Agent) -> Result<()> {
        self.with(|t| {
            if t.agents.iter().any(|a| a.code == agent.code) {
                return Err(conflict("agent code", &agent.code));
            }
            t.agents.push(agent.clone());
            Ok(())
        })
        .await
    }

    async fn get_agent(&mut self, id: Uuid) -> Result<Option<Agent>> {
        Ok(self
            .with(|t| t.agents.iter().find(|a| a.id == id).cloned())
            .await)
    }

    async fn find_agent_by_code(&mut self, code: &str) -> Result<Option<Agent>> {
        Ok(self
            .with(|t| t.agents.iter().find(|a| a.code == code).cloned())
            .await)
    }

    async fn list_agents(&mut self, filter: &AgentFilter) -> Result<Vec<Agent>> {
        let limit = filter.limit.map_or(usize::MAX, |l| l.max(0) as usize);
        Ok(self
            .with(|t| {
                t.agents
                    .iter()
                    .filter(|a| filter.matches(a))
                    .take(limit)
                    .cloned()
                    .collect()
            })
            .await)
    }

    async fn update_agent_status(
        &mut self,
        id: Uuid,
        status: AgentStatus,
        at: DateTime<Utc>,
    ) -> Result<Option<Agent>> {
        Ok(self
            .with(|t| {
                t.agents.iter_mut().find(|a| a.id == id).map(|agent| {
                    agent.status = status;
                    agent.updated_at = at;
                    agent.clone()
                })
            })
            .await)
    }

    async fn update_agent_summary(
        &mut self,
        id: Uuid,
        summary: AgentSummary,
        at: DateTime<Utc>,
    ) -> Result<Option<Agent>> {
        Ok(self
            .with(|t| {
                t.agents.iter_mut().find(|a| a.id == id).map(|agent| {
                    agent.total_invoiced = summary.total_invoiced;
                    agent.total_outstanding = summary.total_outstanding;
                    agent.summary_updated_at = Some(at);
                    agent.updated_at = at;
                    agent.clone()
                })
            })
            .await)
    }

    async fn insert_invoice(&mut self, invoice: &Invoice) -> Result<()> {
        self.trip(FailPoint::InsertInvoice)?;
        self.with(|t| {
            if t
                .invoices
                .iter()
                .any(|i| i.invoice_number == invoice.invoice_number)
            {
                return Err(conflict("invoice number", &invoice.invoice_number));
            }
            t.invoices.push(invoice.clone());
            Ok(())
        })
        .await
    }

    async fn get_invoice(&mut self, id: Uuid) -> Result<Option<Invoice>> {
        Ok(self.with(|t| t.invoice(id).cloned()).await)
    }

    async fn find_invoice_by_number(&mut self, invoice_number: &str) -> Result<Option<Invoice>> {
        Ok(self
            .with(|t| {
                t.invoices
                    .iter()
                    .find(|i| i.invoice_number == invoice_number)
                    .cloned()
            })
            .await)
    }

    async fn list_invoices(&mut self, filter: &InvoiceFilter) -> Result<Vec<Invoice>> {
        let mut rows: Vec<Invoice> = self
            .with(|t| {
                t.invoices
                    .iter()
                    .filter(|i| filter.matches(i))
                    .cloned()
                    .collect()
            })
            .await;
        // Stable sort keeps insertion order among equal due dates.
        rows.sort_by_key(|i| i.due_date);
        if let Some(limit) = filter.limit {
            rows.truncate(limit.max(0) as usize);
        }
        Ok(rows)
    }

    async fn transition_invoice(
        &mut self,
        entry: &InvoiceStatusHistory,
    ) -> Result<Option<Invoice>> {
        self.trip(FailPoint::UpdateInvoiceStatus)?;
        Ok(self
            .with(|t| {
                let invoice = t.invoices.iter_mut().find(|i| i.id == entry.invoice_id)?;
                invoice.status = entry.to_status;
                invoice.updated_at = entry.changed_at;
                let updated = invoice.clone();
                t.invoice_status_history.push(entry.clone());
                Some(updated)
            })
            .await)
    }

    async fn insert_invoice_status_history(&mut self, entry: &InvoiceStatusHistory) -> Result<()> {
        self.with(|t| t.invoice_status_history.push(entry.clone()))
            .await;
        Ok(())
    }

    async fn list_invoice_status_history(
        &mut self,
        invoice_id: Uuid,
    ) -> Result<Vec<InvoiceStatusHistory>> {
        Ok(self
            .with(|t| {
                t.invoice_status_history
                    .iter()
                    .filter(|h| h.invoice_id == invoice_id)
                    .cloned()
                    .collect()
            })
            .await)
    }

    async fn insert_payment(&mut self, payment: &Payment) -> Result<()> {
        self.trip(FailPoint::InsertPayment)?;
        self.with(|t| t.payments.push(payment.clone())).await;
        Ok(())
    }

    async fn get_payment(&mut self, id: Uuid) -> Result<Option<Payment>> {
        Ok(self
            .with(|t| t.payments.iter().find(|p| p.id == id).cloned())
            .await)
    }

    async fn link_payment_wallet_transaction(
        &mut self,
        payment_id: Uuid,
        wallet_transaction_id: Uuid,
    ) -> Result<Option<Payment>> {
        Ok(self
            .with(|t| {
                t.payments
                    .iter_mut()
                    .find(|p| p.id == payment_id)
                    .map(|payment| {
                        payment.wallet_transaction_id = Some(wallet_transaction_id);
                        payment.clone()
                    })
            })
            .await)
    }

    async fn list_payments_for_agent(&mut self, agent_id: Uuid) -> Result<Vec<Payment>> {
        Ok(self
            .with(|t| {
                t.payments
                    .iter()
                    .filter(|p| p.agent_id == agent_id)
                    .cloned()
                    .collect()
            })
            .await)
    }

    async fn insert_wallet(&mut self, wallet: &Wallet) -> Result<()> {
        self.with(|t| {
            if t.wallet_for(wallet.agent_id).is_some() {
                return Err(conflict("wallet for agent", wallet.agent_id));
            }
            t.wallets.push(wallet.clone());
            Ok(())
        })
        .await
    }

    async fn find_wallet_by_agent(&mut self, agent_id: Uuid) -> Result<Option<Wallet>> {
        Ok(self.with(|t| t.wallet_for(agent_id).cloned()).await)
    }

    async fn apply_wallet_transaction(
        &mut self,
        entry: &WalletTransaction,
        expected_version: i64,
    ) -> Result<Wallet> {
        self.trip(FailPoint::InsertWalletTransaction(entry.transaction_type))?;
        self.trip(FailPoint::UpdateWalletBalance)?;
        self.with(|t| {
            let wallet = t
                .wallets
                .iter_mut()
                .find(|w| w.id == entry.wallet_id)
                .ok_or_else(|| BillingError::not_found("wallet", entry.wallet_id))?;
            if wallet.version != expected_version {
                return Err(BillingError::ConcurrencyConflict {
                    entity: "wallet",
                    id: entry.wallet_id.to_string(),
                    expected: expected_version,
                });
            }
            wallet.balance = entry.balance_after;
            wallet.version += 1;
            wallet.updated_at = entry.created_at;
            let updated = wallet.clone();
            t.wallet_transactions.push(entry.clone());
            Ok(updated)
        })
        .await
    }

    async fn set_wallet_last_transaction_at(
        &mut self,
        id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<Option<Wallet>> {
        Ok(self
            .with(|t| {
                t.wallets.iter_mut().find(|w| w.id == id).map(|wallet| {
                    wallet.last_transaction_at = Some(at);
                    wallet.clone()
                })
            })
            .await)
    }

    async fn list_wallet_transactions(&mut self, wallet_id: Uuid) -> Result<Vec<WalletTransaction>> {
        Ok(self
            .with(|t| t.transactions_for(wallet_id).into_iter().cloned().collect())
            .await)
    }

    async fn find_wallet_transactions_by_reference(
        &mut self,
        wallet_id: Uuid,
        reference_id: &str,
    ) -> Result<Vec<WalletTransaction>> {
        Ok(self
            .with(|t| {
                t.transactions_for(wallet_id)
                    .into_iter()
                    .filter(|tx| tx.reference_id == reference_id)
                    .cloned()
                    .collect()
            })
            .await)
    }

    async fn insert_commission_report(&mut self, report: &CommissionReport) -> Result<()> {
        self.with(|t| t.commission_reports.push(report.clone()))
            .await;
        Ok(())
    }

    async fn get_commission_report(&mut self, id: Uuid) -> Result<Option<CommissionReport>> {
        Ok(self
            .with(|t| t.commission_reports.iter().find(|r| r.id == id).cloned())
            .await)
    }

    async fn list_commission_reports(
        &mut self,
        partner_id: Uuid,
    ) -> Result<Vec<CommissionReport>> {
        Ok(self
            .with(|t| {
                t.commission_reports
                    .iter()
                    .filter(|r| r.partner_id == partner_id)
                    .cloned()
                    .collect()
            })
            .await)
    }

    async fn update_commission_report_status(
        &mut self,
        id: Uuid,
        status: ReportStatus,
        at: DateTime<Utc>,
    ) -> Result<Option<CommissionReport>> {
        Ok(self
            .with(|t| {
                t.commission_reports
                    .iter_mut()
                    .find(|r| r.id == id)
                    .map(|report| {
                        report.status = status;
                        report.updated_at = at;
                        report.clone()
                    })
            })
            .await)
    }

    async fn delete_commission_report(&mut self, id: Uuid) -> Result<bool> {
        Ok(self
            .with(|t| {
                let before = t.commission_reports.len();
                t.commission_reports.retain(|r| r.id != id);
                t.commission_reports.len() != before
            })
            .await)
    }

    async fn insert_commission_adjustment(&mut self, entry: &CommissionAdjustment) -> Result<()> {
        self.with(|t| t.commission_adjustments.push(entry.clone()))
            .await;
        Ok(())
    }

    async fn list_commission_adjustments(
        &mut self,
        agent_ids: &[Uuid],
        status: Option<AdjustmentStatus>,
    ) -> Result<Vec<CommissionAdjustment>> {
        Ok(self
            .with(|t| {
                t.commission_adjustments
                    .iter()
                    .filter(|a| agent_ids.contains(&a.agent_id))
                    .filter(|a| status.map_or(true, |s| a.status == s))
                    .cloned()
                    .collect()
            })
            .await)
    }

    async fn list_report_adjustments(
        &mut self,
        report_id: Uuid,
    ) -> Result<Vec<CommissionAdjustment>> {
        Ok(self
            .with(|t| {
                t.commission_adjustments
                    .iter()
                    .filter(|a| a.applied_report_id == Some(report_id))
                    .cloned()
                    .collect()
            })
            .await)
    }

    async fn set_adjustment_status(
        &mut self,
        id: Uuid,
        status: AdjustmentStatus,
        applied_report_id: Option<Uuid>,
    ) -> Result<Option<CommissionAdjustment>> {
        Ok(self
            .with(|t| {
                t.commission_adjustments
                    .iter_mut()
                    .find(|a| a.id == id)
                    .map(|adjustment| {
                        adjustment.status = status;
                        adjustment.applied_report_id = applied_report_id;
                        adjustment.clone()
                    })
            })
            .await)
    }

    async fn insert_setting(&mut self, setting: &SystemSetting) -> Result<()> {
        self.with(|t| {
            if t.settings.iter().any(|s| s.key == setting.key) {
                return Err(conflict("setting", &setting.key));
            }
            t.settings.push(setting.clone());
            Ok(())
        })
        .await
    }

    async fn get_setting(&mut self, key: &str) -> Result<Option<SystemSetting>> {
        Ok(self
            .with(|t| t.settings.iter().find(|s| s.key == key).cloned())
            .await)
    }

    async fn update_setting(
        &mut self,
        key: &str,
        value: &str,
        expected_version: i64,
        updated_by: &str,
        at: DateTime<Utc>,
    ) -> Result<SystemSetting> {
        self.trip(FailPoint::UpdateSetting)?;
        self.with(|t| {
            let setting = t
                .settings
                .iter_mut()
                .find(|s| s.key == key)
                .ok_or_else(|| BillingError::not_found("setting", key))?;
            if setting.version != expected_version {
                return Err(BillingError::ConcurrencyConflict {
                    entity: "setting",
                    id: key.to_string(),
                    expected: expected_version,
                });
            }
            setting.value = value.to_string();
            setting.version += 1;
            setting.updated_by = updated_by.to_string();
            setting.updated_at = at;
            Ok(setting.clone())
        })
        .await
    }

    async fn insert_settings_audit_log(&mut self, entry: &SettingsAuditLog) -> Result<()> {
        self.with(|t| t.settings_audit_logs.push(entry.clone()))
            .await;
        Ok(())
    }

    async fn list_settings_audit_logs(&mut self, key: &str) -> Result<Vec<SettingsAuditLog>> {
        Ok(self
            .with(|t| {
                t.settings_audit_logs
                    .iter()
                    .filter(|l| l.setting_key == key)
                    .cloned()
                    .collect()
            })
            .await)
    }

    async fn has_usage_hash(&mut self, hash: &str) -> Result<bool> {
        Ok(self
            .with(|t| t.usage_hashes.iter().any(|h| h.hash == hash))
            .await)
    }

    async fn insert_usage_hash(&mut self, entry: &ProcessedUsageHash) -> Result<()> {
        self.with(|t| {
            if t.usage_hashes.iter().any(|h| h.hash == entry.hash) {
                return Err(conflict("usage hash", &entry.hash));
            }
            t.usage_hashes.push(entry.clone());
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    fn wallet() -> Wallet {
        Wallet::new(Uuid::new_v4(), "IDR")
    }

    fn deposit(wallet: &Wallet, amount: Decimal) -> WalletTransaction {
        WalletTransaction {
            id: Uuid::new_v4(),
            wallet_id: wallet.id,
            transaction_type: WalletTransactionType::Deposit,
            amount,
            balance_after: wallet.balance + amount,
            reference_id: format!("ref-{}", Uuid::new_v4()),
            invoice_id: None,
            payment_id: None,
            created_by: "tester".to_string(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn rollback_discards_staged_writes() {
        let store = InMemoryStore::new();
        let w = wallet();

        let mut tx = store.begin().await.unwrap();
        tx.insert_wallet(&w).await.unwrap();
        assert!(tx.find_wallet_by_agent(w.agent_id).await.unwrap().is_some());
        tx.rollback().await.unwrap();

        assert!(store.snapshot().await.wallets.is_empty());
    }

    #[tokio::test]
    async fn write_through_keeps_writes_after_rollback() {
        let store = InMemoryStore::write_through();
        assert!(!store.supports_atomic_transactions());
        let w = wallet();

        let mut tx = store.begin().await.unwrap();
        tx.insert_wallet(&w).await.unwrap();
        tx.rollback().await.unwrap();

        assert_eq!(store.snapshot().await.wallets.len(), 1);
    }

    #[tokio::test]
    async fn stale_wallet_version_is_rejected() {
        let store = InMemoryStore::new();
        let w = wallet();
        let mut tx = store.begin().await.unwrap();
        tx.insert_wallet(&w).await.unwrap();

        let updated = tx
            .apply_wallet_transaction(&deposit(&w, Decimal::ONE_HUNDRED), 0)
            .await
            .unwrap();
        assert_eq!(updated.version, 1);
        assert_eq!(updated.balance, Decimal::ONE_HUNDRED);

        let stale = tx
            .apply_wallet_transaction(&deposit(&w, Decimal::ONE), 0)
            .await;
        assert!(matches!(
            stale,
            Err(BillingError::ConcurrencyConflict { expected: 0, .. })
        ));
        assert_eq!(tx.list_wallet_transactions(w.id).await.unwrap().len(), 1);
        tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn failed_apply_writes_neither_row_nor_balance() {
        let store = InMemoryStore::write_through();
        store.fail_on(FailPoint::UpdateWalletBalance, 1);
        let w = wallet();
        let mut tx = store.begin().await.unwrap();
        tx.insert_wallet(&w).await.unwrap();

        let first = tx
            .apply_wallet_transaction(&deposit(&w, Decimal::ONE), 0)
            .await;
        assert!(matches!(first, Err(BillingError::TransientStore(_))));
        let tables = store.snapshot().await;
        assert!(tables.wallet_transactions.is_empty());
        assert_eq!(tables.wallets[0].balance, Decimal::ZERO);

        assert!(tx
            .apply_wallet_transaction(&deposit(&w, Decimal::ONE), 0)
            .await
            .is_ok());
        assert_eq!(store.snapshot().await.wallet_transactions.len(), 1);
    }
}
