//! Agent and sales-partner models.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

string_enum! {
    /// Agent lifecycle status.
    AgentStatus {
        Active => "ACTIVE",
        Inactive => "INACTIVE",
        Suspended => "SUSPENDED",
    }
}

/// Sales partner that owns a group of agents and earns commission on them.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct Partner {
    pub id: Uuid,
    pub code: String,
    pub name: String,
    pub email: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Billing subject. Owns one wallet and many invoices and payments.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct Agent {
    pub id: Uuid,
    pub code: String,
    pub name: String,
    pub partner_id: Option<Uuid>,
    /// Percentage between 0 and 100.
    pub commission_rate: Decimal,
    #[sqlx(try_from = "String")]
    pub status: AgentStatus,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub total_invoiced: Decimal,
    pub total_outstanding: Decimal,
    pub summary_updated_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Agent {
    pub fn summary(&self) -> AgentSummary {
        AgentSummary {
            total_invoiced: self.total_invoiced,
            total_outstanding: self.total_outstanding,
        }
    }
}

/// Denormalised financial totals kept on the agent row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AgentSummary {
    pub total_invoiced: Decimal,
    pub total_outstanding: Decimal,
}

/// Input for registering a new agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewAgent {
    pub code: String,
    pub name: String,
    pub partner_id: Option<Uuid>,
    pub commission_rate: Decimal,
    pub email: Option<String>,
    pub phone: Option<String>,
}

/// Input for registering a new partner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewPartner {
    pub code: String,
    pub name: String,
    pub email: Option<String>,
}

/// Filter parameters for listing agents.
#[derive(Debug, Clone, Default)]
pub struct AgentFilter {
    pub partner_id: Option<Uuid>,
    pub status: Option<AgentStatus>,
    pub limit: Option<i64>,
}

impl AgentFilter {
    pub fn matches(&self, agent: &Agent) -> bool {
        self.partner_id.map_or(true, |p| agent.partner_id == Some(p))
            && self.status.map_or(true, |s| agent.status == s)
    }
}
