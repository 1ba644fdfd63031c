//! Common test utilities for agent-billing-service integration tests.

use agent_billing_service::config::{
    AgentBillingConfig, BillingConfig, EncryptionConfig, StorageBackend, StorageConfig,
};
use agent_billing_service::models::{Agent, Invoice, InvoiceSource, InvoiceStatus, NewAgent, NewInvoice};
use agent_billing_service::services::{ChaChaEncryption, EncryptionProvider};
use agent_billing_service::startup::BillingServices;
use agent_billing_service::store::{InMemoryStore, PgStore};
use agent_billing_service::{Actor, RequestContext, Role};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use service_core::config::Config as CommonConfig;
use std::sync::{Arc, Once};

static INIT: Once = Once::new();

/// Initialize tracing for tests (only once).
pub fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter("info,agent_billing_service=debug")
            .with_test_writer()
            .try_init()
            .ok();
    });
}

pub const TEST_KEY: [u8; 32] = [7u8; 32];

pub fn test_config() -> AgentBillingConfig {
    AgentBillingConfig {
        common: CommonConfig::ephemeral(),
        service_name: "agent-billing-service-test".to_string(),
        service_version: "test".to_string(),
        log_level: "debug".to_string(),
        otlp_endpoint: None,
        storage: StorageConfig {
            backend: StorageBackend::Memory,
            database_url: None,
            max_connections: 1,
            min_connections: 1,
        },
        billing: BillingConfig {
            settle_batch_size: 100,
            default_currency: "IDR".to_string(),
            import_max_attempts: 3,
        },
        encryption: EncryptionConfig {
            key: None,
            key_id: "test".to_string(),
        },
    }
}

/// Services wired to an in-memory store.
#[allow(dead_code)]
pub struct TestEnv {
    pub store: InMemoryStore,
    pub services: BillingServices,
    pub encryption: Arc<ChaChaEncryption>,
    pub ctx: RequestContext,
}

/// Store with atomic rollback.
#[allow(dead_code)]
pub fn atomic_env() -> TestEnv {
    env_with(InMemoryStore::new())
}

/// Store whose writes survive rollback.
#[allow(dead_code)]
pub fn write_through_env() -> TestEnv {
    env_with(InMemoryStore::write_through())
}

fn env_with(store: InMemoryStore) -> TestEnv {
    init_tracing();
    let encryption = Arc::new(ChaChaEncryption::new("test", TEST_KEY));
    let services = BillingServices::new(
        Arc::new(store.clone()),
        encryption.clone() as Arc<dyn EncryptionProvider>,
        &test_config(),
    );
    TestEnv {
        store,
        services,
        encryption,
        ctx: admin_ctx(),
    }
}

/// Services wired to a real PostgreSQL database.
#[allow(dead_code)]
pub struct PgEnv {
    pub store: Arc<PgStore>,
    pub services: BillingServices,
    pub ctx: RequestContext,
}

/// Connects to `TEST_DATABASE_URL` and applies migrations. Returns `None` when
/// the variable is unset so the suite is skipped on machines without a
/// database.
#[allow(dead_code)]
pub async fn pg_env() -> Option<PgEnv> {
    init_tracing();
    let Ok(database_url) = std::env::var("TEST_DATABASE_URL") else {
        eprintln!("TEST_DATABASE_URL not set, skipping PostgreSQL test");
        return None;
    };

    let store = PgStore::connect(&database_url, 4, 1)
        .await
        .expect("Failed to connect to TEST_DATABASE_URL");
    store
        .run_migrations()
        .await
        .expect("Failed to run migrations");
    let store = Arc::new(store);

    let mut config = test_config();
    config.storage.backend = StorageBackend::Postgres;
    let services = BillingServices::new(
        store.clone(),
        Arc::new(ChaChaEncryption::new("test", TEST_KEY)) as Arc<dyn EncryptionProvider>,
        &config,
    );
    Some(PgEnv {
        store,
        services,
        ctx: admin_ctx(),
    })
}

/// Suffix that keeps codes and numbers unique across runs on a shared database.
#[allow(dead_code)]
pub fn unique(prefix: &str) -> String {
    format!("{}-{}", prefix, &uuid::Uuid::new_v4().simple().to_string()[..12])
}

pub fn admin_ctx() -> RequestContext {
    RequestContext::new(Actor::new("admin-1", Role::Admin).unwrap())
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

#[allow(dead_code)]
pub async fn register_agent(env: &TestEnv, code: &str) -> Agent {
    env.services
        .agents
        .register_agent(
            &env.ctx,
            NewAgent {
                code: code.to_string(),
                name: format!("Agent {}", code),
                partner_id: None,
                commission_rate: dec!(10),
                email: None,
                phone: None,
            },
        )
        .await
        .expect("Failed to register agent")
}

#[allow(dead_code)]
pub fn new_invoice(agent_id: uuid::Uuid, number: &str, amount: Decimal, due: NaiveDate) -> NewInvoice {
    NewInvoice {
        agent_id,
        invoice_number: number.to_string(),
        amount,
        currency: "IDR".to_string(),
        issue_date: date(2023, 12, 1),
        due_date: due,
        status: InvoiceStatus::Unpaid,
        source: InvoiceSource::Manual,
        metadata: None,
    }
}

#[allow(dead_code)]
pub async fn create_invoice(
    env: &TestEnv,
    agent_id: uuid::Uuid,
    number: &str,
    amount: Decimal,
    due: NaiveDate,
) -> Invoice {
    env.services
        .invoices
        .create_idempotent_invoice(&env.ctx, new_invoice(agent_id, number, amount, due))
        .await
        .expect("Failed to create invoice")
        .invoice
}
