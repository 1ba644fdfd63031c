//! Partner commission reports and per-agent adjustments.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

string_enum! {
    /// Commission report status. Moves forward only.
    ReportStatus {
        Draft => "DRAFT",
        Finalized => "FINALIZED",
        Paid => "PAID",
        Cancelled => "CANCELLED",
    }
}

impl ReportStatus {
    pub fn can_transition_to(&self, to: ReportStatus) -> bool {
        matches!(
            (self, to),
            (Self::Draft, ReportStatus::Finalized)
                | (Self::Finalized, ReportStatus::Paid)
                | (Self::Draft, ReportStatus::Cancelled)
                | (Self::Finalized, ReportStatus::Cancelled)
        )
    }
}

string_enum! {
    AdjustmentStatus {
        Unapplied => "UNAPPLIED",
        Applied => "APPLIED",
    }
}

#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct CommissionReport {
    pub id: Uuid,
    pub partner_id: Uuid,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub total_commission: Decimal,
    #[sqlx(try_from = "String")]
    pub status: ReportStatus,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewCommissionReport {
    pub partner_id: Uuid,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub total_commission: Decimal,
}

/// Signed manual correction folded into the next generated report.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct CommissionAdjustment {
    pub id: Uuid,
    pub agent_id: Uuid,
    pub amount: Decimal,
    pub reason: String,
    #[sqlx(try_from = "String")]
    pub status: AdjustmentStatus,
    pub applied_report_id: Option<Uuid>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewCommissionAdjustment {
    pub agent_id: Uuid,
    pub amount: Decimal,
    pub reason: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_transitions_move_forward_only() {
        assert!(ReportStatus::Draft.can_transition_to(ReportStatus::Finalized));
        assert!(ReportStatus::Finalized.can_transition_to(ReportStatus::Paid));
        assert!(ReportStatus::Draft.can_transition_to(ReportStatus::Cancelled));
        assert!(!ReportStatus::Draft.can_transition_to(ReportStatus::Paid));
        assert!(!ReportStatus::Paid.can_transition_to(ReportStatus::Finalized));
        assert!(!ReportStatus::Paid.can_transition_to(ReportStatus::Cancelled));
        assert!(!ReportStatus::Cancelled.can_transition_to(ReportStatus::Draft));
    }
}
