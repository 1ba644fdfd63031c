pub mod agent;
pub mod commission;
pub mod encryption;
pub mod importer;
pub mod invoice;
pub mod metrics;
pub mod notifier;
pub mod orchestrator;
pub mod settings;
pub mod settlement;
pub mod usage;

pub use agent::{summarize, AgentService, WalletStatement};
pub use commission::CommissionService;
pub use encryption::{ChaChaEncryption, EncryptionProvider, PlaintextEncryption};
pub use importer::{
    DeadLetter, ImportReport, Importer, ImporterConfig, InvoiceRow, InvoiceRowProcessor,
    RowOutcome, RowProcessor,
};
pub use invoice::{apply_status_change, CreatedInvoice, InvoiceService, StatusChange};
pub use metrics::{get_metrics, init_metrics};
pub use notifier::{AdminNotifier, LogNotifier};
pub use orchestrator::{FinancialOrchestrator, PaymentOutcome, PaymentRequest};
pub use settings::{SettingUpdate, SettingView, SettingsService};
pub use settlement::{settle_within, SettlementSummary};
pub use usage::{fingerprint, IngestOutcome, UsageIngestor, UsageRow};
