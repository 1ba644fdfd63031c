//! Integration tests for settings updates, encryption at rest and masking.

mod common;

use agent_billing_service::services::encryption::is_encrypted;
use agent_billing_service::services::{AdminNotifier, ChaChaEncryption, SettingsService};
use agent_billing_service::store::{FailPoint, InMemoryStore};
use agent_billing_service::{Actor, UnitOfWorkFactory};
use async_trait::async_trait;
use common::{admin_ctx, init_tracing, TEST_KEY};
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct RecordingNotifier {
    calls: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl AdminNotifier for RecordingNotifier {
    async fn sensitive_setting_changed(&self, key: &str, actor: &Actor) {
        self.calls
            .lock()
            .unwrap()
            .push((key.to_string(), actor.user_id().to_string()));
    }
}

struct Harness {
    store: InMemoryStore,
    notifier: Arc<RecordingNotifier>,
    settings: SettingsService,
}

fn harness() -> Harness {
    init_tracing();
    let store = InMemoryStore::new();
    let notifier = Arc::new(RecordingNotifier::default());
    let settings = SettingsService::new(
        UnitOfWorkFactory::new(Arc::new(store.clone())),
        Arc::new(ChaChaEncryption::new("test", TEST_KEY)),
        notifier.clone(),
    );
    Harness {
        store,
        notifier,
        settings,
    }
}

#[tokio::test]
async fn same_value_is_a_noop() {
    let h = harness();
    let ctx = admin_ctx();
    h.settings
        .create_setting(&ctx, "invoice.prefix", "INV", false)
        .await
        .unwrap();

    let update = h
        .settings
        .update_setting(&ctx, "invoice.prefix", "INV")
        .await
        .unwrap();

    assert!(update.noop);
    assert_eq!(update.version, 1);
    let tables = h.store.snapshot().await;
    assert_eq!(tables.settings[0].version, 1);
    assert!(tables.settings_audit_logs.is_empty());
}

#[tokio::test]
async fn sensitive_same_value_is_a_noop() {
    let h = harness();
    let ctx = admin_ctx();
    h.settings
        .create_setting(&ctx, "gateway.api_key", "sk-live-1234567890", true)
        .await
        .unwrap();

    let update = h
        .settings
        .update_setting(&ctx, "gateway.api_key", "sk-live-1234567890")
        .await
        .unwrap();

    assert!(update.noop);
    assert!(h.notifier.calls.lock().unwrap().is_empty());
    assert!(h.store.snapshot().await.settings_audit_logs.is_empty());
}

#[tokio::test]
async fn plain_update_bumps_version_and_audits() {
    let h = harness();
    let ctx = admin_ctx();
    h.settings
        .create_setting(&ctx, "invoice.prefix", "INV", false)
        .await
        .unwrap();

    let update = h
        .settings
        .update_setting(&ctx, "invoice.prefix", "BIL")
        .await
        .unwrap();

    assert!(!update.noop);
    assert_eq!(update.version, 2);

    let trail = h
        .settings
        .audit_trail(&ctx, "invoice.prefix")
        .await
        .unwrap();
    assert_eq!(trail.len(), 1);
    assert_eq!(trail[0].old_value.as_deref(), Some("INV"));
    assert_eq!(trail[0].new_value, "BIL");
    assert_eq!(trail[0].changed_by, "admin-1");
    assert!(h.notifier.calls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn sensitive_values_are_encrypted_and_masked() {
    let h = harness();
    let ctx = admin_ctx();
    h.settings
        .create_setting(&ctx, "gateway.api_key", "sk-live-1234567890", true)
        .await
        .unwrap();

    h.settings
        .update_setting(&ctx, "gateway.api_key", "sk-live-0987654321")
        .await
        .unwrap();

    let tables = h.store.snapshot().await;
    let stored = &tables.settings[0];
    assert!(is_encrypted(&stored.value));
    assert!(!stored.value.contains("0987654321"));
    assert_eq!(stored.version, 2);

    let audit = &tables.settings_audit_logs[0];
    assert_eq!(audit.old_value.as_deref(), Some("********7890"));
    assert_eq!(audit.new_value, "********4321");
    for log in &tables.audit_logs {
        let payload = log.payload.to_string();
        assert!(!payload.contains("sk-live-0987654321"));
        assert!(!payload.contains("sk-live-1234567890"));
    }

    let plain = h.settings.get_setting(&ctx, "gateway.api_key").await.unwrap();
    assert_eq!(plain.value, "sk-live-0987654321");
    let masked = h
        .settings
        .get_setting_masked(&ctx, "gateway.api_key")
        .await
        .unwrap();
    assert_eq!(masked.value, "********4321");

    assert_eq!(
        *h.notifier.calls.lock().unwrap(),
        vec![("gateway.api_key".to_string(), "admin-1".to_string())]
    );
}

#[tokio::test]
async fn legacy_plaintext_sensitive_value_is_readable() {
    let h = harness();
    let ctx = admin_ctx();
    let plain_settings = SettingsService::new(
        UnitOfWorkFactory::new(Arc::new(h.store.clone())),
        Arc::new(agent_billing_service::services::PlaintextEncryption),
        h.notifier.clone(),
    );
    plain_settings
        .create_setting(&ctx, "smtp.password", "hunter22", true)
        .await
        .unwrap();

    let view = h.settings.get_setting(&ctx, "smtp.password").await.unwrap();
    assert_eq!(view.value, "hunter22");

    let update = h
        .settings
        .update_setting(&ctx, "smtp.password", "hunter22")
        .await
        .unwrap();
    assert!(update.noop);
}

#[tokio::test]
async fn missing_setting_is_a_failure() {
    let h = harness();
    let failure = h
        .settings
        .update_setting(&admin_ctx(), "does.not.exist", "x")
        .await
        .unwrap_err();
    assert_eq!(failure.reason, "not_found");
}

#[tokio::test]
async fn failed_update_leaves_setting_untouched() {
    let h = harness();
    let ctx = admin_ctx();
    h.settings
        .create_setting(&ctx, "gateway.api_key", "sk-live-1234567890", true)
        .await
        .unwrap();
    h.store.fail_on(FailPoint::UpdateSetting, 1);

    let failure = h
        .settings
        .update_setting(&ctx, "gateway.api_key", "sk-live-0000000000")
        .await
        .unwrap_err();

    assert_eq!(failure.reason, "transient_store");
    assert!(!failure.message.contains("sk-live"));
    let tables = h.store.snapshot().await;
    assert_eq!(tables.settings[0].version, 1);
    assert!(tables.settings_audit_logs.is_empty());
    assert!(h.notifier.calls.lock().unwrap().is_empty());
}
