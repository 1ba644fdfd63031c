//! Repository set bound to one open transaction.
//!
//! Repositories are thin: they translate calls into store operations and
//! write exactly one [`AuditLog`] row per mutation through [`RepositoryContext::audit`].
//! They are only reachable through a [`crate::unit_of_work::UnitOfWork`].

mod agent;
mod audit_log;
mod commission;
mod invoice;
mod partner;
mod payment;
mod setting;
mod usage;
mod wallet;

pub use agent::AgentRepository;
pub use audit_log::AuditLogRepository;
pub use commission::CommissionRepository;
pub use invoice::InvoiceRepository;
pub use partner::PartnerRepository;
pub use payment::PaymentRepository;
pub use setting::SettingRepository;
pub use usage::UsageHashRepository;
pub use wallet::{WalletRepository, WalletTransactionRepository};

use crate::audit::Actor;
use crate::error::{BillingError, Result};
use crate::models::{AuditLog, NewAuditLog};
use crate::store::StoreTransaction;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{MappedMutexGuard, Mutex, MutexGuard};

pub(crate) type Connection = Box<dyn StoreTransaction>;

/// Slot holding the transaction; emptied when the unit of work finishes.
pub(crate) type TxSlot = Arc<Mutex<Option<Connection>>>;

/// Shared state every repository of one unit of work carries.
#[derive(Clone)]
pub struct RepositoryContext {
    tx: TxSlot,
    actor: Actor,
    correlation_id: Arc<str>,
}

impl RepositoryContext {
    pub(crate) fn new(tx: TxSlot, actor: Actor, correlation_id: &str) -> Self {
        Self {
            tx,
            actor,
            correlation_id: Arc::from(correlation_id),
        }
    }

    pub fn actor(&self) -> &Actor {
        &self.actor
    }

    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    /// Locks the transaction for one repository call.
    pub(crate) async fn conn(&self) -> Result<MappedMutexGuard<'_, Connection>> {
        let guard = self.tx.lock().await;
        MutexGuard::try_map(guard, |slot| slot.as_mut()).map_err(|_| BillingError::UnitOfWorkClosed)
    }

    pub(crate) async fn audit(&self, conn: &mut Connection, entry: NewAuditLog) -> Result<()> {
        let log = AuditLog::from_new(entry, self.actor.user_id(), &self.correlation_id);
        conn.insert_audit_log(&log).await
    }
}

pub(crate) fn payload<T: Serialize>(value: &T) -> Result<serde_json::Value> {
    serde_json::to_value(value)
        .map_err(|e| BillingError::Store(format!("Failed to serialize audit payload: {}", e)))
}
