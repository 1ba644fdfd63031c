//! System settings with encryption at rest for sensitive keys.

use super::encryption::EncryptionProvider;
use super::metrics;
use super::notifier::AdminNotifier;
use crate::audit::RequestContext;
use crate::error::{BillingError, OperationFailure, Result};
use crate::models::{NewSystemSetting, SettingsAuditLog, SystemSetting};
use crate::unit_of_work::UnitOfWorkFactory;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, instrument, warn};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SettingUpdate {
    pub key: String,
    pub version: i64,
    /// `true` when the requested value was already stored.
    pub noop: bool,
}

/// Setting as seen by callers. `value` is decrypted or masked.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SettingView {
    pub key: String,
    pub value: String,
    pub is_sensitive: bool,
    pub version: i64,
}

#[derive(Clone)]
pub struct SettingsService {
    uow: UnitOfWorkFactory,
    encryption: Arc<dyn EncryptionProvider>,
    notifier: Arc<dyn AdminNotifier>,
}

impl SettingsService {
    pub fn new(
        uow: UnitOfWorkFactory,
        encryption: Arc<dyn EncryptionProvider>,
        notifier: Arc<dyn AdminNotifier>,
    ) -> Self {
        Self {
            uow,
            encryption,
            notifier,
        }
    }

    #[instrument(skip(self, ctx, new_value), fields(actor = %ctx.actor().user_id()))]
    pub async fn update_setting(
        &self,
        ctx: &RequestContext,
        key: &str,
        new_value: &str,
    ) -> std::result::Result<SettingUpdate, OperationFailure> {
        let encryption = self.encryption.clone();
        let result = self
            .uow
            .run(ctx, |uow| async move {
                let current = uow
                    .settings()
                    .get(key)
                    .await?
                    .ok_or_else(|| BillingError::not_found("setting", key))?;

                let existing = if current.is_sensitive {
                    encryption.decrypt(&current.value)?
                } else {
                    current.value.clone()
                };
                if existing == new_value {
                    return Ok((
                        SettingUpdate {
                            key: current.key,
                            version: current.version,
                            noop: true,
                        },
                        false,
                    ));
                }

                let (stored, old_logged, new_logged) = if current.is_sensitive {
                    (
                        encryption.encrypt(new_value)?,
                        encryption.mask(&existing),
                        encryption.mask(new_value),
                    )
                } else {
                    (new_value.to_string(), existing, new_value.to_string())
                };

                let updated = uow.settings().update(&current, &stored).await?;
                uow.settings()
                    .append_audit(key, Some(old_logged), new_logged)
                    .await?;

                Ok((
                    SettingUpdate {
                        key: updated.key,
                        version: updated.version,
                        noop: false,
                    },
                    updated.is_sensitive,
                ))
            })
            .await;

        match result {
            Ok((update, notify)) => {
                if update.noop {
                    metrics::record_settings_update("noop");
                    info!(setting_key = %key, "Setting unchanged");
                } else {
                    metrics::record_settings_update("success");
                    info!(setting_key = %key, version = update.version, "Setting updated");
                }
                if notify {
                    self.notifier.sensitive_setting_changed(key, ctx.actor()).await;
                }
                Ok(update)
            }
            Err(err) => {
                metrics::record_settings_update("failure");
                warn!(setting_key = %key, error = %err, "Setting update failed");
                Err(err.into())
            }
        }
    }

    /// Creates a setting at version 1.
    #[instrument(skip(self, ctx, value), fields(actor = %ctx.actor().user_id()))]
    pub async fn create_setting(
        &self,
        ctx: &RequestContext,
        key: &str,
        value: &str,
        is_sensitive: bool,
    ) -> Result<SystemSetting> {
        if key.trim().is_empty() {
            return Err(BillingError::Validation(
                "Setting key must not be empty".to_string(),
            ));
        }
        let stored_value = if is_sensitive {
            self.encryption.encrypt(value)?
        } else {
            value.to_string()
        };

        self.uow
            .run(ctx, |uow| async move {
                if uow.settings().get(key).await?.is_some() {
                    return Err(BillingError::Conflict(format!(
                        "setting '{}' already exists",
                        key
                    )));
                }
                uow.settings()
                    .create(NewSystemSetting {
                        key: key.to_string(),
                        stored_value,
                        is_sensitive,
                    })
                    .await
            })
            .await
    }

    /// Returns the plaintext value.
    pub async fn get_setting(&self, ctx: &RequestContext, key: &str) -> Result<SettingView> {
        let setting = self.load(ctx, key).await?;
        let value = if setting.is_sensitive {
            self.encryption.decrypt(&setting.value)?
        } else {
            setting.value.clone()
        };
        Ok(view(setting, value))
    }

    /// Returns the value masked when the setting is sensitive.
    pub async fn get_setting_masked(&self, ctx: &RequestContext, key: &str) -> Result<SettingView> {
        let setting = self.load(ctx, key).await?;
        let value = if setting.is_sensitive {
            self.encryption.mask(&self.encryption.decrypt(&setting.value)?)
        } else {
            setting.value.clone()
        };
        Ok(view(setting, value))
    }

    pub async fn audit_trail(
        &self,
        ctx: &RequestContext,
        key: &str,
    ) -> Result<Vec<SettingsAuditLog>> {
        self.uow
            .run(ctx, |uow| async move { uow.settings().list_audit(key).await })
            .await
    }

    async fn load(&self, ctx: &RequestContext, key: &str) -> Result<SystemSetting> {
        self.uow
            .run(ctx, |uow| async move {
                uow.settings()
                    .get(key)
                    .await?
                    .ok_or_else(|| BillingError::not_found("setting", key))
            })
            .await
    }
}

fn view(setting: SystemSetting, value: String) -> SettingView {
    SettingView {
        key: setting.key,
        value,
        is_sensitive: setting.is_sensitive,
        version: setting.version,
    }
}
