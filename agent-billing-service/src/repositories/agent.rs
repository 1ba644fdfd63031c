use super::{payload, RepositoryContext};
use crate::error::{BillingError, Result};
use crate::models::{Agent, AgentFilter, AgentStatus, AgentSummary, NewAgent, NewAuditLog};
use chrono::Utc;
use rust_decimal::Decimal;
use uuid::Uuid;

const ENTITY: &str = "agent";

pub struct AgentRepository {
    ctx: RepositoryContext,
}

impl AgentRepository {
    pub(crate) fn new(ctx: RepositoryContext) -> Self {
        Self { ctx }
    }

    pub async fn create(&self, input: NewAgent) -> Result<Agent> {
        let now = Utc::now();
        let agent = Agent {
            id: Uuid::new_v4(),
            code: input.code,
            name: input.name,
            partner_id: input.partner_id,
            commission_rate: input.commission_rate,
            status: AgentStatus::Active,
            email: input.email,
            phone: input.phone,
            total_invoiced: Decimal::ZERO,
            total_outstanding: Decimal::ZERO,
            summary_updated_at: None,
            created_at: now,
            updated_at: now,
        };

        let mut conn = self.ctx.conn().await?;
        conn.insert_agent(&agent).await?;
        self.ctx
            .audit(
                &mut conn,
                NewAuditLog {
                    entity_type: ENTITY,
                    entity_id: agent.id.to_string(),
                    action: "create",
                    payload: payload(&agent)?,
                },
            )
            .await?;
        Ok(agent)
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<Agent>> {
        self.ctx.conn().await?.get_agent(id).await
    }

    pub async fn require(&self, id: Uuid) -> Result<Agent> {
        self.get(id)
            .await?
            .ok_or_else(|| BillingError::not_found(ENTITY, id))
    }

    pub async fn find_by_code(&self, code: &str) -> Result<Option<Agent>> {
        self.ctx.conn().await?.find_agent_by_code(code).await
    }

    pub async fn list(&self, filter: &AgentFilter) -> Result<Vec<Agent>> {
        self.ctx.conn().await?.list_agents(filter).await
    }

    pub async fn update_status(&self, id: Uuid, status: AgentStatus) -> Result<Agent> {
        let mut conn = self.ctx.conn().await?;
        let agent = conn
            .update_agent_status(id, status, Utc::now())
            .await?
            .ok_or_else(|| BillingError::not_found(ENTITY, id))?;
        self.ctx
            .audit(
                &mut conn,
                NewAuditLog {
                    entity_type: ENTITY,
                    entity_id: id.to_string(),
                    action: "update_status",
                    payload: serde_json::json!({ "status": status }),
                },
            )
            .await?;
        Ok(agent)
    }

    pub async fn update_summary(&self, id: Uuid, summary: AgentSummary) -> Result<Agent> {
        let mut conn = self.ctx.conn().await?;
        let agent = conn
            .update_agent_summary(id, summary, Utc::now())
            .await?
            .ok_or_else(|| BillingError::not_found(ENTITY, id))?;
        self.ctx
            .audit(
                &mut conn,
                NewAuditLog {
                    entity_type: ENTITY,
                    entity_id: id.to_string(),
                    action: "update_summary",
                    payload: payload(&summary)?,
                },
            )
            .await?;
        Ok(agent)
    }
}
