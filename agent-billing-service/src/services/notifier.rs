//! Admin notification side effect for sensitive settings changes.

use crate::audit::Actor;
use async_trait::async_trait;
use tracing::info;

#[async_trait]
pub trait AdminNotifier: Send + Sync {
    /// Called after the change has been committed. Never receives the value.
    async fn sensitive_setting_changed(&self, key: &str, actor: &Actor);
}

/// Notifier that only writes a structured log line.
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

#[async_trait]
impl AdminNotifier for LogNotifier {
    async fn sensitive_setting_changed(&self, key: &str, actor: &Actor) {
        info!(
            setting_key = %key,
            actor = %actor.user_id(),
            role = %actor.role(),
            "Sensitive setting changed"
        );
    }
}
