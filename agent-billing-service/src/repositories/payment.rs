use super::{payload, RepositoryContext};
use crate::error::{BillingError, Result};
use crate::models::{NewAuditLog, NewPayment, Payment};
use chrono::Utc;
use uuid::Uuid;

const ENTITY: &str = "payment";

pub struct PaymentRepository {
    ctx: RepositoryContext,
}

impl PaymentRepository {
    pub(crate) fn new(ctx: RepositoryContext) -> Self {
        Self { ctx }
    }

    pub async fn record(&self, input: NewPayment) -> Result<Payment> {
        let payment = Payment {
            id: Uuid::new_v4(),
            agent_id: input.agent_id,
            invoice_id: input.invoice_id,
            amount: input.amount,
            method: input.method,
            reference: input.reference,
            wallet_transaction_id: None,
            recorded_by: self.ctx.actor().user_id().to_string(),
            recorded_at: Utc::now(),
        };

        let mut conn = self.ctx.conn().await?;
        conn.insert_payment(&payment).await?;
        self.ctx
            .audit(
                &mut conn,
                NewAuditLog {
                    entity_type: ENTITY,
                    entity_id: payment.id.to_string(),
                    action: "create",
                    payload: payload(&payment)?,
                },
            )
            .await?;
        Ok(payment)
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<Payment>> {
        self.ctx.conn().await?.get_payment(id).await
    }

    pub async fn link_wallet_transaction(
        &self,
        payment_id: Uuid,
        wallet_transaction_id: Uuid,
    ) -> Result<Payment> {
        let mut conn = self.ctx.conn().await?;
        let payment = conn
            .link_payment_wallet_transaction(payment_id, wallet_transaction_id)
            .await?
            .ok_or_else(|| BillingError::not_found(ENTITY, payment_id))?;
        self.ctx
            .audit(
                &mut conn,
                NewAuditLog {
                    entity_type: ENTITY,
                    entity_id: payment_id.to_string(),
                    action: "link_wallet_transaction",
                    payload: serde_json::json!({ "wallet_transaction_id": wallet_transaction_id }),
                },
            )
            .await?;
        Ok(payment)
    }

    pub async fn list_for_agent(&self, agent_id: Uuid) -> Result<Vec<Payment>> {
        self.ctx.conn().await?.list_payments_for_agent(agent_id).await
    }
}
