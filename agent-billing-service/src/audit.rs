//! Actor attribution for every financial write.
//!
//! Core entry points take a [`RequestContext`], which cannot be built without
//! an [`Actor`]. For call paths where the actor travels implicitly (background
//! jobs spawned from a request, deserialized job payloads) the actor can be
//! bound to a task with [`with_audit_context`] and recovered with
//! [`required_audit_actor`], which fails instead of falling back to a default.

use crate::error::{BillingError, Result};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

tokio::task_local! {
    static AUDIT_ACTOR: Actor;
}

/// Role of the principal performing an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Admin,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Admin => "admin",
            Role::System => "system",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Identified user or system principal attributed to a mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Actor {
    user_id: String,
    role: Role,
}

impl Actor {
    pub const SYSTEM_READ_ID: &'static str = "system:read";

    pub fn new(user_id: impl Into<String>, role: Role) -> Result<Self> {
        let user_id = user_id.into();
        if user_id.trim().is_empty() {
            return Err(BillingError::Validation(
                "Actor user id must not be empty".to_string(),
            ));
        }
        Ok(Self { user_id, role })
    }

    /// Fixed actor for read-only bulk listing. Always passed explicitly.
    pub fn system_read() -> Self {
        Self {
            user_id: Self::SYSTEM_READ_ID.to_string(),
            role: Role::System,
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn role(&self) -> Role {
        self.role
    }
}

// Deserialization goes through `Actor::new` so payloads cannot smuggle in an
// empty user id.
impl<'de> Deserialize<'de> for Actor {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct RawActor {
            user_id: String,
            role: Role,
        }

        let raw = RawActor::deserialize(deserializer)?;
        Actor::new(raw.user_id, raw.role).map_err(serde::de::Error::custom)
    }
}

/// Binds `actor` for the duration of `future`, including every task-local
/// read reached from it across suspension points.
pub async fn with_audit_context<F>(actor: Actor, future: F) -> F::Output
where
    F: Future,
{
    AUDIT_ACTOR.scope(actor, future).await
}

/// Reads the actor bound by [`with_audit_context`].
pub fn required_audit_actor() -> Result<Actor> {
    AUDIT_ACTOR
        .try_with(|actor| actor.clone())
        .map_err(|_| BillingError::AuditContextMissing)
}

/// Everything a core operation needs to attribute and bound its writes.
#[derive(Debug, Clone)]
pub struct RequestContext {
    actor: Actor,
    correlation_id: Option<String>,
    deadline: Option<Duration>,
}

impl RequestContext {
    pub fn new(actor: Actor) -> Self {
        Self {
            actor,
            correlation_id: None,
            deadline: None,
        }
    }

    /// Builds a context from the actor bound to the current task.
    pub fn from_ambient() -> Result<Self> {
        required_audit_actor().map(Self::new)
    }

    /// Builds a context from an optional actor, e.g. one read from a job payload.
    pub fn resolve(actor: Option<Actor>) -> Result<Self> {
        actor.map(Self::new).ok_or(BillingError::AuditContextMissing)
    }

    pub fn system_read() -> Self {
        Self::new(Actor::system_read())
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn actor(&self) -> &Actor {
        &self.actor
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.correlation_id.as_deref()
    }

    pub fn deadline(&self) -> Option<Duration> {
        self.deadline
    }
}
