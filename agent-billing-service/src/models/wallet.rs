//! Wallet and wallet transaction models.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

string_enum! {
    /// Kind of wallet movement. Amounts are stored as positive magnitudes.
    WalletTransactionType {
        Deposit => "DEPOSIT",
        Withdrawal => "WITHDRAWAL",
        Settlement => "SETTLEMENT",
        Reversal => "REVERSAL",
    }
}

impl WalletTransactionType {
    /// Signed effect of a movement of `amount` on the wallet balance.
    pub fn signed(&self, amount: Decimal) -> Decimal {
        match self {
            Self::Deposit => amount,
            Self::Withdrawal | Self::Settlement | Self::Reversal => -amount,
        }
    }
}

/// Agent wallet. `version` increments on every balance change.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct Wallet {
    pub id: Uuid,
    pub agent_id: Uuid,
    pub balance: Decimal,
    pub currency: String,
    pub version: i64,
    pub last_transaction_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Wallet {
    pub fn new(agent_id: Uuid, currency: &str) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            agent_id,
            balance: Decimal::ZERO,
            currency: currency.to_string(),
            version: 0,
            last_transaction_at: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Immutable wallet ledger row.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct WalletTransaction {
    pub id: Uuid,
    pub wallet_id: Uuid,
    #[sqlx(rename = "type", try_from = "String")]
    pub transaction_type: WalletTransactionType,
    pub amount: Decimal,
    pub balance_after: Decimal,
    pub reference_id: String,
    pub invoice_id: Option<Uuid>,
    pub payment_id: Option<Uuid>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

/// Input for applying a movement to a wallet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewWalletTransaction {
    pub transaction_type: WalletTransactionType,
    pub amount: Decimal,
    pub reference_id: String,
    pub invoice_id: Option<Uuid>,
    pub payment_id: Option<Uuid>,
}

impl NewWalletTransaction {
    pub fn new(
        transaction_type: WalletTransactionType,
        amount: Decimal,
        reference_id: impl Into<String>,
    ) -> Self {
        Self {
            transaction_type,
            amount,
            reference_id: reference_id.into(),
            invoice_id: None,
            payment_id: None,
        }
    }

    pub fn for_invoice(mut self, invoice_id: Uuid) -> Self {
        self.invoice_id = Some(invoice_id);
        self
    }

    pub fn for_payment(mut self, payment_id: Uuid) -> Self {
        self.payment_id = Some(payment_id);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn only_deposits_increase_balance() {
        assert_eq!(WalletTransactionType::Deposit.signed(dec!(5)), dec!(5));
        assert_eq!(WalletTransactionType::Settlement.signed(dec!(5)), dec!(-5));
        assert_eq!(WalletTransactionType::Reversal.signed(dec!(5)), dec!(-5));
        assert_eq!(WalletTransactionType::Withdrawal.signed(dec!(5)), dec!(-5));
    }
}
