//! Payment model.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

string_enum! {
    /// How the money reached the agent's account.
    PaymentMethod {
        External => "EXTERNAL",
        InternalSettlement => "INTERNAL_SETTLEMENT",
        Adjustment => "ADJUSTMENT",
    }
}

/// Recorded payment. Immutable apart from the wallet transaction link.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct Payment {
    pub id: Uuid,
    pub agent_id: Uuid,
    pub invoice_id: Option<Uuid>,
    pub amount: Decimal,
    #[sqlx(try_from = "String")]
    pub method: PaymentMethod,
    pub reference: String,
    pub wallet_transaction_id: Option<Uuid>,
    pub recorded_by: String,
    pub recorded_at: DateTime<Utc>,
}

/// Input for recording a payment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewPayment {
    pub agent_id: Uuid,
    pub invoice_id: Option<Uuid>,
    pub amount: Decimal,
    pub method: PaymentMethod,
    pub reference: String,
}
