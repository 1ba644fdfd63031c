use super::RepositoryContext;
use crate::error::Result;
use crate::models::{NewAuditLog, NewSystemSetting, SettingsAuditLog, SystemSetting};
use chrono::Utc;
use uuid::Uuid;

const ENTITY: &str = "system_setting";
const MASK: &str = "********";

pub struct SettingRepository {
    ctx: RepositoryContext,
}

/// Audit payload for a setting; sensitive values never leave masked.
fn setting_payload(setting: &SystemSetting) -> serde_json::Value {
    let value = if setting.is_sensitive {
        MASK
    } else {
        setting.value.as_str()
    };
    serde_json::json!({
        "key": setting.key,
        "value": value,
        "is_sensitive": setting.is_sensitive,
        "version": setting.version,
    })
}

impl SettingRepository {
    pub(crate) fn new(ctx: RepositoryContext) -> Self {
        Self { ctx }
    }

    pub async fn get(&self, key: &str) -> Result<Option<SystemSetting>> {
        self.ctx.conn().await?.get_setting(key).await
    }

    pub async fn create(&self, input: NewSystemSetting) -> Result<SystemSetting> {
        let setting = SystemSetting {
            key: input.key,
            value: input.stored_value,
            is_sensitive: input.is_sensitive,
            version: 1,
            updated_by: self.ctx.actor().user_id().to_string(),
            updated_at: Utc::now(),
        };

        let mut conn = self.ctx.conn().await?;
        conn.insert_setting(&setting).await?;
        self.ctx
            .audit(
                &mut conn,
                NewAuditLog {
                    entity_type: ENTITY,
                    entity_id: setting.key.clone(),
                    action: "create",
                    payload: setting_payload(&setting),
                },
            )
            .await?;
        Ok(setting)
    }

    /// Stores `stored_value` as the next version of `current`.
    pub async fn update(
        &self,
        current: &SystemSetting,
        stored_value: &str,
    ) -> Result<SystemSetting> {
        let mut conn = self.ctx.conn().await?;
        let updated = conn
            .update_setting(
                &current.key,
                stored_value,
                current.version,
                self.ctx.actor().user_id(),
                Utc::now(),
            )
            .await?;
        self.ctx
            .audit(
                &mut conn,
                NewAuditLog {
                    entity_type: ENTITY,
                    entity_id: updated.key.clone(),
                    action: "update",
                    payload: setting_payload(&updated),
                },
            )
            .await?;
        Ok(updated)
    }

    /// Callers pass already-masked values for sensitive settings.
    pub async fn append_audit(
        &self,
        key: &str,
        old_value: Option<String>,
        new_value: String,
    ) -> Result<SettingsAuditLog> {
        let entry = SettingsAuditLog {
            id: Uuid::new_v4(),
            setting_key: key.to_string(),
            old_value,
            new_value,
            changed_by: self.ctx.actor().user_id().to_string(),
            changed_at: Utc::now(),
        };

        let mut conn = self.ctx.conn().await?;
        conn.insert_settings_audit_log(&entry).await?;
        self.ctx
            .audit(
                &mut conn,
                NewAuditLog {
                    entity_type: "settings_audit_log",
                    entity_id: entry.id.to_string(),
                    action: "create",
                    payload: serde_json::json!({
                        "setting_key": entry.setting_key,
                        "old_value": entry.old_value,
                        "new_value": entry.new_value,
                    }),
                },
            )
            .await?;
        Ok(entry)
    }

    pub async fn list_audit(&self, key: &str) -> Result<Vec<SettingsAuditLog>> {
        self.ctx.conn().await?.list_settings_audit_logs(key).await
    }
}
