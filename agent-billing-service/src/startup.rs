//! Application startup and lifecycle management.

use crate::config::{AgentBillingConfig, StorageBackend};
use crate::error::BillingError;
use crate::services::{
    get_metrics, init_metrics, AgentService, ChaChaEncryption, CommissionService,
    EncryptionProvider, FinancialOrchestrator, Importer, ImporterConfig, InvoiceRowProcessor,
    InvoiceService, LogNotifier, PlaintextEncryption, SettingsService, UsageIngestor,
};
use crate::store::{InMemoryStore, PgStore, Store};
use crate::unit_of_work::UnitOfWorkFactory;
use axum::{
    extract::State, http::StatusCode, middleware, response::IntoResponse, routing::get, Json,
    Router,
};
use secrecy::ExposeSecret;
use serde_json::json;
use service_core::error::AppError;
use service_core::middleware::metrics::metrics_middleware;
use service_core::middleware::tracing::request_id_middleware;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

/// Domain services sharing one unit of work factory.
#[derive(Clone)]
pub struct BillingServices {
    pub uow: UnitOfWorkFactory,
    pub agents: AgentService,
    pub invoices: InvoiceService,
    pub orchestrator: FinancialOrchestrator,
    pub settings: SettingsService,
    pub commissions: CommissionService,
    pub usage: UsageIngestor,
    pub importer: Importer,
    pub invoice_rows: InvoiceRowProcessor,
}

impl BillingServices {
    pub fn new(
        store: Arc<dyn Store>,
        encryption: Arc<dyn EncryptionProvider>,
        config: &AgentBillingConfig,
    ) -> Self {
        let uow = UnitOfWorkFactory::new(store);
        let currency = config.billing.default_currency.clone();

        Self {
            agents: AgentService::new(uow.clone(), currency.clone()),
            invoices: InvoiceService::new(uow.clone()),
            orchestrator: FinancialOrchestrator::new(
                uow.clone(),
                config.billing.settle_batch_size,
                currency.clone(),
            ),
            settings: SettingsService::new(uow.clone(), encryption, Arc::new(LogNotifier)),
            commissions: CommissionService::new(uow.clone()),
            usage: UsageIngestor::new(uow.clone(), currency.clone()),
            importer: Importer::new(ImporterConfig {
                max_attempts: config.billing.import_max_attempts,
                ..Default::default()
            }),
            invoice_rows: InvoiceRowProcessor::new(uow.clone(), currency),
            uow,
        }
    }
}

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: AgentBillingConfig,
    pub store: Arc<dyn Store>,
    pub services: BillingServices,
}

/// Liveness endpoint for Docker/K8s health checks.
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    match state.store.health_check().await {
        Ok(_) => {
            tracing::debug!("Health check passed");
            (
                StatusCode::OK,
                Json(json!({
                    "status": "ok",
                    "service": state.config.service_name,
                    "version": state.config.service_version,
                    "atomic_transactions": state.store.supports_atomic_transactions(),
                })),
            )
        }
        Err(e) => {
            tracing::warn!(error = %e, "Health check failed - store unavailable");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "status": "unhealthy",
                    "service": state.config.service_name,
                    "error": e.to_string()
                })),
            )
        }
    }
}

/// Readiness endpoint for K8s; fails while the store is unreachable.
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    match state.store.health_check().await {
        Ok(_) => StatusCode::OK,
        Err(e) => {
            tracing::warn!(error = %e, "Readiness check failed");
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

/// Metrics endpoint for Prometheus scraping.
async fn metrics_handler() -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        get_metrics(),
    )
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/metrics", get(metrics_handler))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(metrics_middleware))
        .layer(middleware::from_fn(request_id_middleware))
        .with_state(state)
}

/// Application container for managing server lifecycle.
pub struct Application {
    port: u16,
    listener: TcpListener,
    state: AppState,
}

impl Application {
    /// Build the application with the configured store.
    pub async fn build(config: AgentBillingConfig) -> Result<Self, AppError> {
        let store = connect_store(&config).await?;
        Self::build_with_store(config, store).await
    }

    /// Build the application around an existing store.
    pub async fn build_with_store(
        config: AgentBillingConfig,
        store: Arc<dyn Store>,
    ) -> Result<Self, AppError> {
        init_metrics();

        let encryption = encryption_provider(&config)?;
        let services = BillingServices::new(store.clone(), encryption, &config);
        let state = AppState {
            config: config.clone(),
            store,
            services,
        };

        let addr = SocketAddr::from(([0, 0, 0, 0], config.common.port));
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            tracing::error!(error = %e, addr = %addr, "Failed to bind HTTP listener");
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();
        tracing::info!(port = port, "Agent billing service listener bound");

        Ok(Self {
            port,
            listener,
            state,
        })
    }

    /// Get the HTTP port the server is listening on.
    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Serves until `shutdown` resolves, then drains in-flight requests so no
    /// unit of work is cut off mid-transaction.
    pub async fn run_until_stopped<F>(self, shutdown: F) -> std::io::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        tracing::info!(
            service = %self.state.config.service_name,
            version = %self.state.config.service_version,
            port = self.port,
            atomic_transactions = self.state.store.supports_atomic_transactions(),
            "Service ready to accept connections"
        );

        axum::serve(self.listener, router(self.state))
            .with_graceful_shutdown(shutdown)
            .await
    }
}

async fn connect_store(config: &AgentBillingConfig) -> Result<Arc<dyn Store>, AppError> {
    match config.storage.backend {
        StorageBackend::Postgres => {
            let url = config.storage.database_url.as_ref().ok_or_else(|| {
                AppError::ConfigError(anyhow::anyhow!("DATABASE_URL is required but not set"))
            })?;
            let store = PgStore::connect(
                url.expose_secret(),
                config.storage.max_connections,
                config.storage.min_connections,
            )
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Failed to connect to PostgreSQL");
                AppError::from(e)
            })?;
            store.run_migrations().await.map_err(|e| {
                tracing::error!(error = %e, "Failed to run migrations");
                AppError::from(e)
            })?;
            Ok(Arc::new(store))
        }
        StorageBackend::Memory => {
            tracing::warn!(
                "Using in-memory store without atomic rollback; payments use compensation"
            );
            Ok(Arc::new(InMemoryStore::write_through()))
        }
    }
}

fn encryption_provider(
    config: &AgentBillingConfig,
) -> Result<Arc<dyn EncryptionProvider>, AppError> {
    match &config.encryption.key {
        Some(key) => {
            let provider = ChaChaEncryption::from_base64(config.encryption.key_id.clone(), key)
                .map_err(|e: BillingError| AppError::ConfigError(anyhow::Error::new(e)))?;
            tracing::info!(key_id = %provider.key_id(), "Settings encryption enabled");
            Ok(Arc::new(provider))
        }
        None => {
            tracing::warn!("SETTINGS_ENCRYPTION_KEY not set - sensitive settings stored as plaintext");
            Ok(Arc::new(PlaintextEncryption))
        }
    }
}
