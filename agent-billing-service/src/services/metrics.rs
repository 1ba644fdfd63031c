//! Prometheus metrics for agent-billing-service.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter, register_counter_vec, register_histogram_vec, Counter, CounterVec,
    HistogramVec, TextEncoder,
};

/// Payment orchestration outcomes.
pub static PAYMENTS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "billing_orchestrator_payments_total",
        "Total number of processed payments",
        &["status"] // success, failure
    )
    .expect("Failed to register payments_total")
});

/// Failed payments that went through the rollback path.
pub static ROLLBACKS_TOTAL: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "billing_orchestrator_rollbacks_total",
        "Total number of payment rollbacks"
    )
    .expect("Failed to register rollbacks_total")
});

pub static SETTINGS_UPDATES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "billing_settings_updates_total",
        "Total number of settings updates by outcome",
        &["outcome"] // success, noop, failure
    )
    .expect("Failed to register settings_updates_total")
});

pub static UNIT_OF_WORK_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "billing_unit_of_work_total",
        "Total number of units of work by outcome",
        &["outcome"] // commit, rollback, commit_failed
    )
    .expect("Failed to register unit_of_work_total")
});

pub static UNIT_OF_WORK_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "billing_unit_of_work_duration_seconds",
        "Unit of work duration in seconds",
        &["outcome"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]
    )
    .expect("Failed to register unit_of_work_duration")
});

pub static IMPORT_ROWS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "billing_import_rows_total",
        "Total number of imported rows by status",
        &["status"] // processed, skipped, dead_letter
    )
    .expect("Failed to register import_rows_total")
});

/// Invoices settled against wallet balance.
pub static SETTLEMENTS_TOTAL: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "billing_settlements_total",
        "Total number of invoices settled from wallet balance"
    )
    .expect("Failed to register settlements_total")
});

/// Initialize all metrics (forces lazy initialization).
pub fn init_metrics() {
    Lazy::force(&PAYMENTS_TOTAL);
    Lazy::force(&ROLLBACKS_TOTAL);
    Lazy::force(&SETTINGS_UPDATES_TOTAL);
    Lazy::force(&UNIT_OF_WORK_TOTAL);
    Lazy::force(&UNIT_OF_WORK_DURATION);
    Lazy::force(&IMPORT_ROWS_TOTAL);
    Lazy::force(&SETTLEMENTS_TOTAL);
}

/// Get metrics in Prometheus text format.
pub fn get_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder
        .encode_to_string(&metric_families)
        .unwrap_or_default()
}

pub fn record_payment(status: &str) {
    PAYMENTS_TOTAL.with_label_values(&[status]).inc();
}

pub fn record_rollback() {
    ROLLBACKS_TOTAL.inc();
}

pub fn record_settings_update(outcome: &str) {
    SETTINGS_UPDATES_TOTAL.with_label_values(&[outcome]).inc();
}

pub fn record_unit_of_work(outcome: &str, seconds: f64) {
    UNIT_OF_WORK_TOTAL.with_label_values(&[outcome]).inc();
    UNIT_OF_WORK_DURATION
        .with_label_values(&[outcome])
        .observe(seconds);
}

pub fn record_import_row(status: &str) {
    IMPORT_ROWS_TOTAL.with_label_values(&[status]).inc();
}

pub fn record_settlements(count: u64) {
    SETTLEMENTS_TOTAL.inc_by(count as f64);
}
