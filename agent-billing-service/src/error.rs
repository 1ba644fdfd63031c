//! Error taxonomy for the billing core.

use serde::Serialize;
use service_core::error::AppError;
use thiserror::Error;

pub type Result<T, E = BillingError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum BillingError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Invalid state transition: {0}")]
    InvalidStateTransition(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Transient store error: {0}")]
    TransientStore(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Concurrent modification of {entity} {id}: expected version {expected}")]
    ConcurrencyConflict {
        entity: &'static str,
        id: String,
        expected: i64,
    },

    /// Raised when a write path is entered without an attributed actor.
    #[error("No audit actor is bound to the current operation")]
    AuditContextMissing,

    #[error("Operation deadline of {0:?} exceeded")]
    DeadlineExceeded(std::time::Duration),

    #[error("Unit of work is already closed")]
    UnitOfWorkClosed,

    #[error("Encryption error: {0}")]
    Encryption(String),
}

impl BillingError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Whether a retry of the whole operation may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::TransientStore(_) | Self::ConcurrencyConflict { .. } | Self::DeadlineExceeded(_)
        )
    }

    /// Machine-readable reason code used in structured failures.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::InvalidStateTransition(_) => "invalid_state_transition",
            Self::Validation(_) => "validation",
            Self::TransientStore(_) => "transient_store",
            Self::Store(_) => "store",
            Self::Conflict(_) => "conflict",
            Self::ConcurrencyConflict { .. } => "concurrency_conflict",
            Self::AuditContextMissing => "audit_context_missing",
            Self::DeadlineExceeded(_) => "deadline_exceeded",
            Self::UnitOfWorkClosed => "unit_of_work_closed",
            Self::Encryption(_) => "encryption",
        }
    }
}

impl From<sqlx::Error> for BillingError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                BillingError::Conflict(db_err.message().to_string())
            }
            sqlx::Error::Io(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed
            | sqlx::Error::Tls(_) => BillingError::TransientStore(err.to_string()),
            sqlx::Error::RowNotFound => BillingError::Store("row not found".to_string()),
            other => BillingError::Store(other.to_string()),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for BillingError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        BillingError::Store(format!("Migration failed: {}", err))
    }
}

impl From<BillingError> for AppError {
    fn from(err: BillingError) -> Self {
        match err {
            BillingError::NotFound { .. } => AppError::NotFound(anyhow::Error::new(err)),
            BillingError::Validation(_) => AppError::BadRequest(anyhow::Error::new(err)),
            BillingError::InvalidStateTransition(_) => {
                AppError::UnprocessableEntity(anyhow::Error::new(err))
            }
            BillingError::Conflict(_) | BillingError::ConcurrencyConflict { .. } => {
                AppError::Conflict(anyhow::Error::new(err))
            }
            BillingError::AuditContextMissing => AppError::Unauthorized(anyhow::Error::new(err)),
            BillingError::TransientStore(_) | BillingError::DeadlineExceeded(_) => {
                AppError::ServiceUnavailable
            }
            BillingError::Store(_) => AppError::DatabaseError(anyhow::Error::new(err)),
            BillingError::UnitOfWorkClosed | BillingError::Encryption(_) => {
                AppError::InternalError(anyhow::Error::new(err))
            }
        }
    }
}

/// Structured failure returned by domain services instead of an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OperationFailure {
    pub message: String,
    pub reason: &'static str,
}

impl From<BillingError> for OperationFailure {
    fn from(err: BillingError) -> Self {
        Self {
            reason: err.reason(),
            message: err.to_string(),
        }
    }
}

impl std::fmt::Display for OperationFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.reason)
    }
}
