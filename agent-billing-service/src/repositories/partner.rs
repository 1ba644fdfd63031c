use super::{payload, RepositoryContext};
use crate::error::{BillingError, Result};
use crate::models::{Agent, AgentFilter, NewAuditLog, NewPartner, Partner};
use chrono::Utc;
use uuid::Uuid;

const ENTITY: &str = "partner";

pub struct PartnerRepository {
    ctx: RepositoryContext,
}

impl PartnerRepository {
    pub(crate) fn new(ctx: RepositoryContext) -> Self {
        Self { ctx }
    }

    pub async fn create(&self, input: NewPartner) -> Result<Partner> {
        let partner = Partner {
            id: Uuid::new_v4(),
            code: input.code,
            name: input.name,
            email: input.email,
            created_at: Utc::now(),
        };

        let mut conn = self.ctx.conn().await?;
        conn.insert_partner(&partner).await?;
        self.ctx
            .audit(
                &mut conn,
                NewAuditLog {
                    entity_type: ENTITY,
                    entity_id: partner.id.to_string(),
                    action: "create",
                    payload: payload(&partner)?,
                },
            )
            .await?;
        Ok(partner)
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<Partner>> {
        self.ctx.conn().await?.get_partner(id).await
    }

    pub async fn require(&self, id: Uuid) -> Result<Partner> {
        self.get(id)
            .await?
            .ok_or_else(|| BillingError::not_found(ENTITY, id))
    }

    pub async fn find_by_code(&self, code: &str) -> Result<Option<Partner>> {
        self.ctx.conn().await?.find_partner_by_code(code).await
    }

    pub async fn list_agents(&self, partner_id: Uuid) -> Result<Vec<Agent>> {
        let filter = AgentFilter {
            partner_id: Some(partner_id),
            ..Default::default()
        };
        self.ctx.conn().await?.list_agents(&filter).await
    }
}
