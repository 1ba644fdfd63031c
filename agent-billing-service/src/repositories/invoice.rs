use super::{payload, Connection, RepositoryContext};
use crate::error::{BillingError, Result};
use crate::models::{
    Invoice, InvoiceFilter, InvoiceStatus, InvoiceStatusHistory, NewAuditLog, NewInvoice,
};
use chrono::Utc;
use uuid::Uuid;

const ENTITY: &str = "invoice";

pub struct InvoiceRepository {
    ctx: RepositoryContext,
}

impl InvoiceRepository {
    pub(crate) fn new(ctx: RepositoryContext) -> Self {
        Self { ctx }
    }

    /// Inserts the invoice row only; history and summaries are the caller's job.
    pub async fn create(&self, input: NewInvoice) -> Result<Invoice> {
        let now = Utc::now();
        let invoice = Invoice {
            id: Uuid::new_v4(),
            agent_id: input.agent_id,
            invoice_number: input.invoice_number,
            amount: input.amount,
            currency: input.currency,
            issue_date: input.issue_date,
            due_date: input.due_date,
            status: input.status,
            source: input.source,
            metadata: input
                .metadata
                .unwrap_or_else(|| serde_json::Value::Object(Default::default())),
            created_by: self.ctx.actor().user_id().to_string(),
            created_at: now,
            updated_at: now,
        };

        let mut conn = self.ctx.conn().await?;
        conn.insert_invoice(&invoice).await?;
        self.ctx
            .audit(
                &mut conn,
                NewAuditLog {
                    entity_type: ENTITY,
                    entity_id: invoice.id.to_string(),
                    action: "create",
                    payload: payload(&invoice)?,
                },
            )
            .await?;
        Ok(invoice)
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<Invoice>> {
        self.ctx.conn().await?.get_invoice(id).await
    }

    pub async fn require(&self, id: Uuid) -> Result<Invoice> {
        self.get(id)
            .await?
            .ok_or_else(|| BillingError::not_found(ENTITY, id))
    }

    pub async fn find_by_number(&self, invoice_number: &str) -> Result<Option<Invoice>> {
        self.ctx
            .conn()
            .await?
            .find_invoice_by_number(invoice_number)
            .await
    }

    pub async fn list(&self, filter: &InvoiceFilter) -> Result<Vec<Invoice>> {
        self.ctx.conn().await?.list_invoices(filter).await
    }

    /// Moves the invoice to `to_status` and records the history row in one
    /// store call.
    pub async fn transition(
        &self,
        invoice_id: Uuid,
        from_status: InvoiceStatus,
        to_status: InvoiceStatus,
        notes: Option<String>,
    ) -> Result<(Invoice, InvoiceStatusHistory)> {
        let entry = self.history_entry(invoice_id, Some(from_status), to_status, notes);

        let mut conn = self.ctx.conn().await?;
        let invoice = conn
            .transition_invoice(&entry)
            .await?
            .ok_or_else(|| BillingError::not_found(ENTITY, invoice_id))?;
        self.ctx
            .audit(
                &mut conn,
                NewAuditLog {
                    entity_type: ENTITY,
                    entity_id: invoice_id.to_string(),
                    action: "update_status",
                    payload: serde_json::json!({ "status": to_status }),
                },
            )
            .await?;
        self.audit_history(&mut conn, &entry).await?;
        Ok((invoice, entry))
    }

    /// Records a history row without touching the invoice, as on creation.
    pub async fn append_history(
        &self,
        invoice_id: Uuid,
        from_status: Option<InvoiceStatus>,
        to_status: InvoiceStatus,
        notes: Option<String>,
    ) -> Result<InvoiceStatusHistory> {
        let entry = self.history_entry(invoice_id, from_status, to_status, notes);

        let mut conn = self.ctx.conn().await?;
        conn.insert_invoice_status_history(&entry).await?;
        self.audit_history(&mut conn, &entry).await?;
        Ok(entry)
    }

    fn history_entry(
        &self,
        invoice_id: Uuid,
        from_status: Option<InvoiceStatus>,
        to_status: InvoiceStatus,
        notes: Option<String>,
    ) -> InvoiceStatusHistory {
        InvoiceStatusHistory {
            id: Uuid::new_v4(),
            invoice_id,
            from_status,
            to_status,
            actor_user_id: self.ctx.actor().user_id().to_string(),
            notes,
            changed_at: Utc::now(),
        }
    }

    async fn audit_history(
        &self,
        conn: &mut Connection,
        entry: &InvoiceStatusHistory,
    ) -> Result<()> {
        self.ctx
            .audit(
                conn,
                NewAuditLog {
                    entity_type: "invoice_status_history",
                    entity_id: entry.id.to_string(),
                    action: "create",
                    payload: payload(entry)?,
                },
            )
            .await
    }

    pub async fn list_history(&self, invoice_id: Uuid) -> Result<Vec<InvoiceStatusHistory>> {
        self.ctx
            .conn()
            .await?
            .list_invoice_status_history(invoice_id)
            .await
    }
}
