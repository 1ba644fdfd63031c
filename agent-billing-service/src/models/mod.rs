//! Domain models for agent-billing-service.

/// Declares an enum persisted as an upper-case string column.
macro_rules! string_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
        #[serde(rename_all = "SCREAMING_SNAKE_CASE")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            /// Get string representation for database.
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = $crate::error::BillingError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err($crate::error::BillingError::Store(format!(
                        "unknown {} value '{}'",
                        stringify!($name),
                        other
                    ))),
                }
            }
        }

        impl TryFrom<String> for $name {
            type Error = $crate::error::BillingError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                value.parse()
            }
        }
    };
}

mod agent;
mod audit;
mod commission;
mod invoice;
mod payment;
mod setting;
mod usage;
mod wallet;

pub use agent::{Agent, AgentFilter, AgentStatus, AgentSummary, NewAgent, NewPartner, Partner};
pub use audit::{AuditLog, NewAuditLog};
pub use commission::{
    AdjustmentStatus, CommissionAdjustment, CommissionReport, NewCommissionAdjustment,
    NewCommissionReport, ReportStatus,
};
pub use invoice::{
    Invoice, InvoiceFilter, InvoiceSource, InvoiceStatus, InvoiceStatusHistory, NewInvoice,
};
pub use payment::{NewPayment, Payment, PaymentMethod};
pub use setting::{NewSystemSetting, SettingsAuditLog, SystemSetting};
pub use usage::ProcessedUsageHash;
pub use wallet::{NewWalletTransaction, Wallet, WalletTransaction, WalletTransactionType};
