//! Unit of Work: one store transaction, one actor, one correlation id.
//!
//! ```ignore
//! let invoice = factory
//!     .run(&ctx, |uow| async move { uow.invoices().require(id).await })
//!     .await?;
//! ```
//!
//! The closure's `Ok` commits, its `Err` rolls back and is returned unchanged.

use crate::audit::{Actor, RequestContext};
use crate::error::{BillingError, Result};
use crate::repositories::{
    AgentRepository, AuditLogRepository, CommissionRepository, InvoiceRepository,
    PartnerRepository, PaymentRepository, RepositoryContext, SettingRepository, TxSlot,
    UsageHashRepository, WalletRepository, WalletTransactionRepository,
};
use crate::services::metrics;
use crate::store::Store;
use once_cell::sync::OnceCell;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{debug, field, info_span, warn, Instrument, Span};
use uuid::Uuid;

/// Opens units of work against one store.
#[derive(Clone)]
pub struct UnitOfWorkFactory {
    store: Arc<dyn Store>,
}

impl UnitOfWorkFactory {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn supports_atomic_transactions(&self) -> bool {
        self.store.supports_atomic_transactions()
    }

    /// Runs `work` inside a fresh transaction.
    pub async fn run<T, F, Fut>(&self, ctx: &RequestContext, work: F) -> Result<T>
    where
        F: FnOnce(UnitOfWork) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let correlation_id = ctx
            .correlation_id()
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let actor = ctx.actor();
        let span = info_span!(
            "unit_of_work",
            actor = %actor.user_id(),
            role = %actor.role(),
            correlation_id = %correlation_id,
            outcome = field::Empty,
        );

        self.execute(ctx, correlation_id, work).instrument(span).await
    }

    async fn execute<T, F, Fut>(
        &self,
        ctx: &RequestContext,
        correlation_id: String,
        work: F,
    ) -> Result<T>
    where
        F: FnOnce(UnitOfWork) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let started = Instant::now();
        let tx = self.store.begin().await?;
        let slot: TxSlot = Arc::new(Mutex::new(Some(tx)));
        let uow = UnitOfWork::new(RepositoryContext::new(
            slot.clone(),
            ctx.actor().clone(),
            &correlation_id,
        ));

        let result = match ctx.deadline() {
            Some(limit) => tokio::time::timeout(limit, work(uow))
                .await
                .unwrap_or_else(|_| Err(BillingError::DeadlineExceeded(limit))),
            None => work(uow).await,
        };

        // Emptying the slot closes every clone of the unit of work.
        let tx = slot
            .lock()
            .await
            .take()
            .ok_or(BillingError::UnitOfWorkClosed)?;
        let span = Span::current();

        match result {
            Ok(value) => match tx.commit().await {
                Ok(()) => {
                    span.record("outcome", "commit");
                    metrics::record_unit_of_work("commit", started.elapsed().as_secs_f64());
                    Ok(value)
                }
                Err(err) => {
                    span.record("outcome", "commit_failed");
                    warn!(error = %err, "Unit of work commit failed");
                    metrics::record_unit_of_work(
                        "commit_failed",
                        started.elapsed().as_secs_f64(),
                    );
                    Err(err)
                }
            },
            Err(err) => {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!(
                        error = %rollback_err,
                        original_error = %err,
                        "Unit of work rollback failed"
                    );
                }
                span.record("outcome", "rollback");
                debug!(error = %err, "Unit of work rolled back");
                metrics::record_unit_of_work("rollback", started.elapsed().as_secs_f64());
                Err(err)
            }
        }
    }
}

/// Handle to an open transaction and its repositories.
///
/// Clones share the same transaction. Repositories are built on first use.
#[derive(Clone)]
pub struct UnitOfWork {
    inner: Arc<Repositories>,
}

struct Repositories {
    ctx: RepositoryContext,
    agents: OnceCell<AgentRepository>,
    partners: OnceCell<PartnerRepository>,
    invoices: OnceCell<InvoiceRepository>,
    payments: OnceCell<PaymentRepository>,
    wallets: OnceCell<WalletRepository>,
    wallet_transactions: OnceCell<WalletTransactionRepository>,
    commissions: OnceCell<CommissionRepository>,
    usage_hashes: OnceCell<UsageHashRepository>,
    settings: OnceCell<SettingRepository>,
    audit_logs: OnceCell<AuditLogRepository>,
}

impl UnitOfWork {
    fn new(ctx: RepositoryContext) -> Self {
        Self {
            inner: Arc::new(Repositories {
                ctx,
                agents: OnceCell::new(),
                partners: OnceCell::new(),
                invoices: OnceCell::new(),
                payments: OnceCell::new(),
                wallets: OnceCell::new(),
                wallet_transactions: OnceCell::new(),
                commissions: OnceCell::new(),
                usage_hashes: OnceCell::new(),
                settings: OnceCell::new(),
                audit_logs: OnceCell::new(),
            }),
        }
    }

    pub fn actor(&self) -> &Actor {
        self.inner.ctx.actor()
    }

    pub fn correlation_id(&self) -> &str {
        self.inner.ctx.correlation_id()
    }

    fn ctx(&self) -> RepositoryContext {
        self.inner.ctx.clone()
    }

    pub fn agents(&self) -> &AgentRepository {
        self.inner
            .agents
            .get_or_init(|| AgentRepository::new(self.ctx()))
    }

    pub fn partners(&self) -> &PartnerRepository {
        self.inner
            .partners
            .get_or_init(|| PartnerRepository::new(self.ctx()))
    }

    pub fn invoices(&self) -> &InvoiceRepository {
        self.inner
            .invoices
            .get_or_init(|| InvoiceRepository::new(self.ctx()))
    }

    pub fn payments(&self) -> &PaymentRepository {
        self.inner
            .payments
            .get_or_init(|| PaymentRepository::new(self.ctx()))
    }

    pub fn wallets(&self) -> &WalletRepository {
        self.inner
            .wallets
            .get_or_init(|| WalletRepository::new(self.ctx()))
    }

    pub fn wallet_transactions(&self) -> &WalletTransactionRepository {
        self.inner
            .wallet_transactions
            .get_or_init(|| WalletTransactionRepository::new(self.ctx()))
    }

    pub fn commissions(&self) -> &CommissionRepository {
        self.inner
            .commissions
            .get_or_init(|| CommissionRepository::new(self.ctx()))
    }

    pub fn usage_hashes(&self) -> &UsageHashRepository {
        self.inner
            .usage_hashes
            .get_or_init(|| UsageHashRepository::new(self.ctx()))
    }

    pub fn settings(&self) -> &SettingRepository {
        self.inner
            .settings
            .get_or_init(|| SettingRepository::new(self.ctx()))
    }

    pub fn audit_logs(&self) -> &AuditLogRepository {
        self.inner
            .audit_logs
            .get_or_init(|| AuditLogRepository::new(self.ctx()))
    }
}
