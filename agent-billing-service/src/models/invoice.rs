//! Invoice model and its status state machine.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

string_enum! {
    /// Invoice status. `Paid` and `Cancelled` are terminal.
    InvoiceStatus {
        Draft => "DRAFT",
        Unpaid => "UNPAID",
        Partial => "PARTIAL",
        Paid => "PAID",
        Overdue => "OVERDUE",
        Cancelled => "CANCELLED",
    }
}

impl InvoiceStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Paid | Self::Cancelled)
    }

    /// Statuses that still carry debt for the agent summary.
    pub fn is_outstanding(&self) -> bool {
        matches!(self, Self::Unpaid | Self::Partial | Self::Overdue)
    }

    /// Statuses the settlement engine may apply wallet balance to.
    pub const SETTLEABLE: [InvoiceStatus; 2] = [InvoiceStatus::Unpaid, InvoiceStatus::Overdue];
}

string_enum! {
    /// Where an invoice entered the system from.
    InvoiceSource {
        Manual => "MANUAL",
        System => "SYSTEM",
        BatchUpload => "BATCH_UPLOAD",
    }
}

/// Invoice issued to an agent.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct Invoice {
    pub id: Uuid,
    pub agent_id: Uuid,
    pub invoice_number: String,
    pub amount: Decimal,
    pub currency: String,
    pub issue_date: NaiveDate,
    pub due_date: NaiveDate,
    #[sqlx(try_from = "String")]
    pub status: InvoiceStatus,
    #[sqlx(try_from = "String")]
    pub source: InvoiceSource,
    pub metadata: serde_json::Value,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Append-only record of one invoice status change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceStatusHistory {
    pub id: Uuid,
    pub invoice_id: Uuid,
    /// `None` for the row written when the invoice is created.
    pub from_status: Option<InvoiceStatus>,
    pub to_status: InvoiceStatus,
    pub actor_user_id: String,
    pub notes: Option<String>,
    pub changed_at: DateTime<Utc>,
}

/// Input for creating an invoice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewInvoice {
    pub agent_id: Uuid,
    pub invoice_number: String,
    pub amount: Decimal,
    pub currency: String,
    pub issue_date: NaiveDate,
    pub due_date: NaiveDate,
    #[serde(default = "default_status")]
    pub status: InvoiceStatus,
    #[serde(default = "default_source")]
    pub source: InvoiceSource,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

fn default_status() -> InvoiceStatus {
    InvoiceStatus::Unpaid
}

fn default_source() -> InvoiceSource {
    InvoiceSource::Manual
}

/// Filter parameters for listing invoices. Results are ordered by due date.
#[derive(Debug, Clone, Default)]
pub struct InvoiceFilter {
    pub agent_id: Option<Uuid>,
    /// Empty means any status.
    pub statuses: Vec<InvoiceStatus>,
    pub issued_from: Option<NaiveDate>,
    pub issued_to: Option<NaiveDate>,
    pub due_before: Option<NaiveDate>,
    pub limit: Option<i64>,
}

impl InvoiceFilter {
    pub fn for_agent(agent_id: Uuid) -> Self {
        Self {
            agent_id: Some(agent_id),
            ..Default::default()
        }
    }

    pub fn with_statuses(mut self, statuses: &[InvoiceStatus]) -> Self {
        self.statuses = statuses.to_vec();
        self
    }

    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, invoice: &Invoice) -> bool {
        self.agent_id.map_or(true, |a| invoice.agent_id == a)
            && (self.statuses.is_empty() || self.statuses.contains(&invoice.status))
            && self.issued_from.map_or(true, |d| invoice.issue_date >= d)
            && self.issued_to.map_or(true, |d| invoice.issue_date <= d)
            && self.due_before.map_or(true, |d| invoice.due_date < d)
    }

    pub(crate) fn status_strings(&self) -> Vec<String> {
        self.statuses.iter().map(|s| s.as_str().to_string()).collect()
    }
}
