use super::{payload, RepositoryContext};
use crate::error::{BillingError, Result};
use crate::models::{NewAuditLog, NewWalletTransaction, Wallet, WalletTransaction};
use chrono::Utc;
use rust_decimal::Decimal;
use tracing::debug;
use uuid::Uuid;

const ENTITY: &str = "wallet";

pub struct WalletRepository {
    ctx: RepositoryContext,
}

impl WalletRepository {
    pub(crate) fn new(ctx: RepositoryContext) -> Self {
        Self { ctx }
    }

    pub async fn find_by_agent(&self, agent_id: Uuid) -> Result<Option<Wallet>> {
        self.ctx.conn().await?.find_wallet_by_agent(agent_id).await
    }

    pub async fn get_or_create(&self, agent_id: Uuid, currency: &str) -> Result<Wallet> {
        let mut conn = self.ctx.conn().await?;
        if let Some(wallet) = conn.find_wallet_by_agent(agent_id).await? {
            return Ok(wallet);
        }

        let wallet = Wallet::new(agent_id, currency);
        conn.insert_wallet(&wallet).await?;
        self.ctx
            .audit(
                &mut conn,
                NewAuditLog {
                    entity_type: ENTITY,
                    entity_id: wallet.id.to_string(),
                    action: "create",
                    payload: payload(&wallet)?,
                },
            )
            .await?;
        debug!(wallet_id = %wallet.id, agent_id = %agent_id, "Wallet created");
        Ok(wallet)
    }

    /// Writes the ledger row and moves the balance under the wallet's current
    /// version as one store call. Returns the updated wallet and the new row.
    pub async fn apply(
        &self,
        wallet: &Wallet,
        input: NewWalletTransaction,
    ) -> Result<(Wallet, WalletTransaction)> {
        if input.amount < Decimal::ZERO {
            return Err(BillingError::Validation(
                "Wallet transaction amount must not be negative".to_string(),
            ));
        }

        let balance_after = wallet.balance + input.transaction_type.signed(input.amount);
        let now = Utc::now();
        let entry = WalletTransaction {
            id: Uuid::new_v4(),
            wallet_id: wallet.id,
            transaction_type: input.transaction_type,
            amount: input.amount,
            balance_after,
            reference_id: input.reference_id,
            invoice_id: input.invoice_id,
            payment_id: input.payment_id,
            created_by: self.ctx.actor().user_id().to_string(),
            created_at: now,
        };

        let mut conn = self.ctx.conn().await?;
        let updated = conn.apply_wallet_transaction(&entry, wallet.version).await?;
        self.ctx
            .audit(
                &mut conn,
                NewAuditLog {
                    entity_type: "wallet_transaction",
                    entity_id: entry.id.to_string(),
                    action: "create",
                    payload: payload(&entry)?,
                },
            )
            .await?;
        self.ctx
            .audit(
                &mut conn,
                NewAuditLog {
                    entity_type: ENTITY,
                    entity_id: wallet.id.to_string(),
                    action: "update_balance",
                    payload: serde_json::json!({
                        "balance": updated.balance,
                        "version": updated.version,
                        "wallet_transaction_id": entry.id,
                    }),
                },
            )
            .await?;

        Ok((updated, entry))
    }

    pub async fn touch(&self, wallet_id: Uuid) -> Result<Wallet> {
        let at = Utc::now();
        let mut conn = self.ctx.conn().await?;
        let wallet = conn
            .set_wallet_last_transaction_at(wallet_id, at)
            .await?
            .ok_or_else(|| BillingError::not_found(ENTITY, wallet_id))?;
        self.ctx
            .audit(
                &mut conn,
                NewAuditLog {
                    entity_type: ENTITY,
                    entity_id: wallet_id.to_string(),
                    action: "touch",
                    payload: serde_json::json!({ "last_transaction_at": at }),
                },
            )
            .await?;
        Ok(wallet)
    }
}

/// Read side of the wallet ledger.
pub struct WalletTransactionRepository {
    ctx: RepositoryContext,
}

impl WalletTransactionRepository {
    pub(crate) fn new(ctx: RepositoryContext) -> Self {
        Self { ctx }
    }

    pub async fn list_for_wallet(&self, wallet_id: Uuid) -> Result<Vec<WalletTransaction>> {
        self.ctx
            .conn()
            .await?
            .list_wallet_transactions(wallet_id)
            .await
    }

    pub async fn find_by_reference(
        &self,
        wallet_id: Uuid,
        reference_id: &str,
    ) -> Result<Vec<WalletTransaction>> {
        self.ctx
            .conn()
            .await?
            .find_wallet_transactions_by_reference(wallet_id, reference_id)
            .await
    }
}
