//! Integration tests for actor attribution of financial writes.

mod common;

use agent_billing_service::audit::{required_audit_actor, with_audit_context};
use agent_billing_service::models::{
    AgentFilter, AgentStatus, AgentSummary, AuditLog, InvoiceFilter, InvoiceStatus, NewAgent,
    NewCommissionAdjustment, NewCommissionReport, NewPartner, NewPayment, NewSystemSetting,
    NewWalletTransaction, PaymentMethod, ReportStatus, WalletTransactionType,
};
use agent_billing_service::services::PaymentRequest;
use agent_billing_service::{Actor, BillingError, RequestContext, Role, UnitOfWork};
use common::{atomic_env, create_invoice, date, new_invoice, register_agent, TestEnv};
use rust_decimal_macros::dec;
use std::collections::HashSet;
use std::future::Future;

/// Runs `work` in its own unit of work and returns the audit rows it added.
async fn audited<T, F, Fut>(env: &TestEnv, work: F) -> (T, Vec<AuditLog>)
where
    F: FnOnce(UnitOfWork) -> Fut,
    Fut: Future<Output = Result<T, BillingError>>,
{
    let before = env.store.snapshot().await.audit_logs.len();
    let value = env.services.uow.run(&env.ctx, work).await.unwrap();
    let added = env.store.snapshot().await.audit_logs[before..].to_vec();
    (value, added)
}

/// Asserts exactly one row for the entity and action, written by the caller.
fn assert_one(rows: &[AuditLog], entity_type: &str, entity_id: impl ToString, action: &str) {
    let entity_id = entity_id.to_string();
    let matching: Vec<&AuditLog> = rows
        .iter()
        .filter(|log| log.entity_type == entity_type && log.action == action)
        .collect();
    assert_eq!(
        matching.len(),
        1,
        "expected one {} {} row, got {:?}",
        entity_type,
        action,
        rows
    );
    let log = matching[0];
    assert_eq!(log.entity_id, entity_id, "{} {}", entity_type, action);
    assert_eq!(log.actor_user_id, "admin-1");
    assert!(!log.correlation_id.is_empty());
}

#[tokio::test]
async fn every_write_carries_the_actor() {
    let env = atomic_env();
    let agent = register_agent(&env, "AG-AUD").await;
    let invoice = create_invoice(&env, agent.id, "INV-AUD", dec!(100), date(2024, 1, 1)).await;
    env.services
        .orchestrator
        .process_payment(&env.ctx, PaymentRequest::new(agent.id, dec!(100)))
        .await
        .unwrap();

    let tables = env.store.snapshot().await;
    assert!(!tables.audit_logs.is_empty());
    assert!(tables.audit_logs.iter().all(|log| log.actor_user_id == "admin-1"));

    // One row per wallet movement and per payment.
    let movement_rows = tables
        .audit_logs
        .iter()
        .filter(|log| log.entity_type == "wallet_transaction")
        .count();
    assert_eq!(movement_rows, tables.wallet_transactions.len());
    let payment_creates = tables
        .audit_logs
        .iter()
        .filter(|log| log.entity_type == "payment" && log.action == "create")
        .count();
    assert_eq!(payment_creates, 1);

    let paid = tables.invoice(invoice.id).unwrap();
    assert_eq!(paid.status, InvoiceStatus::Paid);
    let history: Vec<&str> = tables
        .invoice_status_history
        .iter()
        .map(|h| h.actor_user_id.as_str())
        .collect();
    assert_eq!(history, vec!["admin-1", "admin-1"]);
}

#[tokio::test]
async fn ambient_actor_is_required_outside_scope() {
    assert!(matches!(
        RequestContext::from_ambient(),
        Err(BillingError::AuditContextMissing)
    ));
    assert!(matches!(
        RequestContext::resolve(None),
        Err(BillingError::AuditContextMissing)
    ));
}

#[tokio::test]
async fn background_job_writes_as_bound_actor() {
    let env = atomic_env();
    let agent = register_agent(&env, "AG-JOB").await;
    let job_actor = Actor::new("scheduler", Role::System).unwrap();
    let invoices = env.services.invoices.clone();

    let marked = with_audit_context(job_actor, async move {
        tokio::task::yield_now().await;
        let ctx = RequestContext::from_ambient()?;
        assert_eq!(ctx.actor().user_id(), "scheduler");
        invoices.mark_overdue(&ctx, date(2030, 1, 1)).await
    })
    .await
    .unwrap();
    assert_eq!(marked, 0);

    create_invoice(&env, agent.id, "INV-JOB", dec!(10), date(2024, 1, 1)).await;
    let invoices = env.services.invoices.clone();
    let marked = with_audit_context(Actor::new("scheduler", Role::System).unwrap(), async move {
        let ctx = RequestContext::from_ambient()?;
        invoices.mark_overdue(&ctx, date(2024, 2, 1)).await
    })
    .await
    .unwrap();
    assert_eq!(marked, 1);

    let tables = env.store.snapshot().await;
    let overdue_change = tables
        .invoice_status_history
        .iter()
        .find(|h| h.to_status == InvoiceStatus::Overdue)
        .unwrap();
    assert_eq!(overdue_change.actor_user_id, "scheduler");
    let actors: HashSet<&str> = tables
        .audit_logs
        .iter()
        .map(|log| log.actor_user_id.as_str())
        .collect();
    assert_eq!(actors, HashSet::from(["admin-1", "scheduler"]));
}

#[tokio::test]
async fn spawned_task_does_not_inherit_the_actor() {
    let actor = Actor::new("admin-1", Role::Admin).unwrap();
    let inherited = with_audit_context(actor, async {
        tokio::spawn(async { required_audit_actor().is_ok() })
            .await
            .unwrap()
    })
    .await;
    assert!(!inherited);
}

#[tokio::test]
async fn payload_actor_resolves_to_context() {
    let payload = serde_json::json!({"actor": {"user_id": "ops-9", "role": "admin"}});
    let actor: Option<Actor> = serde_json::from_value(payload["actor"].clone()).ok();
    let ctx = RequestContext::resolve(actor).unwrap();
    assert_eq!(ctx.actor().user_id(), "ops-9");
    assert_eq!(ctx.actor().role(), Role::Admin);

    let empty: Option<Actor> =
        serde_json::from_value(serde_json::json!({"user_id": "", "role": "admin"})).ok();
    assert!(RequestContext::resolve(empty).is_err());
}

#[tokio::test]
async fn each_mutation_writes_one_audit_row() {
    let env = atomic_env();

    let (partner, rows) = audited(&env, |uow| async move {
        uow.partners()
            .create(NewPartner {
                code: "PT-AUD".to_string(),
                name: "Audit Partner".to_string(),
                email: None,
            })
            .await
    })
    .await;
    assert_eq!(rows.len(), 1);
    assert_one(&rows, "partner", partner.id, "create");

    let partner_id = partner.id;
    let (agent, rows) = audited(&env, |uow| async move {
        uow.agents()
            .create(NewAgent {
                code: "AG-ROWS".to_string(),
                name: "Agent Rows".to_string(),
                partner_id: Some(partner_id),
                commission_rate: dec!(10),
                email: None,
                phone: None,
            })
            .await
    })
    .await;
    assert_eq!(rows.len(), 1);
    assert_one(&rows, "agent", agent.id, "create");
    let agent_id = agent.id;

    let (wallet, rows) = audited(&env, |uow| async move {
        uow.wallets().get_or_create(agent_id, "IDR").await
    })
    .await;
    assert_eq!(rows.len(), 1);
    assert_one(&rows, "wallet", wallet.id, "create");

    let (_, rows) = audited(&env, |uow| async move {
        uow.agents().update_status(agent_id, AgentStatus::Suspended).await
    })
    .await;
    assert_eq!(rows.len(), 1);
    assert_one(&rows, "agent", agent_id, "update_status");

    let (_, rows) = audited(&env, |uow| async move {
        uow.agents()
            .update_summary(
                agent_id,
                AgentSummary {
                    total_invoiced: dec!(500),
                    total_outstanding: dec!(500),
                },
            )
            .await
    })
    .await;
    assert_eq!(rows.len(), 1);
    assert_one(&rows, "agent", agent_id, "update_summary");

    let (invoice, rows) = audited(&env, |uow| async move {
        uow.invoices()
            .create(new_invoice(agent_id, "INV-ROWS", dec!(500), date(2024, 1, 1)))
            .await
    })
    .await;
    assert_eq!(rows.len(), 1);
    assert_one(&rows, "invoice", invoice.id, "create");
    let invoice_id = invoice.id;

    let (created, rows) = audited(&env, |uow| async move {
        uow.invoices()
            .append_history(invoice_id, None, InvoiceStatus::Unpaid, None)
            .await
    })
    .await;
    assert_eq!(rows.len(), 1);
    assert_one(&rows, "invoice_status_history", created.id, "create");

    let ((_, change), rows) = audited(&env, |uow| async move {
        uow.invoices()
            .transition(invoice_id, InvoiceStatus::Unpaid, InvoiceStatus::Overdue, None)
            .await
    })
    .await;
    assert_eq!(rows.len(), 2);
    assert_one(&rows, "invoice", invoice_id, "update_status");
    assert_one(&rows, "invoice_status_history", change.id, "create");

    let (payment, rows) = audited(&env, |uow| async move {
        uow.payments()
            .record(NewPayment {
                agent_id,
                invoice_id: None,
                amount: dec!(200),
                method: PaymentMethod::External,
                reference: "pay-rows".to_string(),
            })
            .await
    })
    .await;
    assert_eq!(rows.len(), 1);
    assert_one(&rows, "payment", payment.id, "create");
    let payment_id = payment.id;

    let ((updated, entry), rows) = audited(&env, |uow| async move {
        uow.wallets()
            .apply(
                &wallet,
                NewWalletTransaction::new(WalletTransactionType::Deposit, dec!(200), "pay-rows")
                    .for_payment(payment_id),
            )
            .await
    })
    .await;
    assert_eq!(rows.len(), 2);
    assert_one(&rows, "wallet_transaction", entry.id, "create");
    assert_one(&rows, "wallet", updated.id, "update_balance");
    let (wallet_id, entry_id) = (updated.id, entry.id);

    let (_, rows) = audited(&env, |uow| async move {
        uow.payments()
            .link_wallet_transaction(payment_id, entry_id)
            .await
    })
    .await;
    assert_eq!(rows.len(), 1);
    assert_one(&rows, "payment", payment_id, "link_wallet_transaction");

    let (_, rows) = audited(&env, |uow| async move { uow.wallets().touch(wallet_id).await }).await;
    assert_eq!(rows.len(), 1);
    assert_one(&rows, "wallet", wallet_id, "touch");

    let (setting, rows) = audited(&env, |uow| async move {
        uow.settings()
            .create(NewSystemSetting {
                key: "rows.limit".to_string(),
                stored_value: "1".to_string(),
                is_sensitive: false,
            })
            .await
    })
    .await;
    assert_eq!(rows.len(), 1);
    assert_one(&rows, "system_setting", "rows.limit", "create");

    let (_, rows) = audited(&env, |uow| async move {
        uow.settings().update(&setting, "2").await
    })
    .await;
    assert_eq!(rows.len(), 1);
    assert_one(&rows, "system_setting", "rows.limit", "update");

    let (trail, rows) = audited(&env, |uow| async move {
        uow.settings()
            .append_audit("rows.limit", Some("1".to_string()), "2".to_string())
            .await
    })
    .await;
    assert_eq!(rows.len(), 1);
    assert_one(&rows, "settings_audit_log", trail.id, "create");

    let (report, rows) = audited(&env, |uow| async move {
        uow.commissions()
            .create_report(NewCommissionReport {
                partner_id,
                period_start: date(2024, 1, 1),
                period_end: date(2024, 1, 31),
                total_commission: dec!(50),
            })
            .await
    })
    .await;
    assert_eq!(rows.len(), 1);
    assert_one(&rows, "commission_report", report.id, "create");
    let report_id = report.id;

    let (adjustment, rows) = audited(&env, |uow| async move {
        uow.commissions()
            .create_adjustment(NewCommissionAdjustment {
                agent_id,
                amount: dec!(-5),
                reason: "chargeback".to_string(),
            })
            .await
    })
    .await;
    assert_eq!(rows.len(), 1);
    assert_one(&rows, "commission_adjustment", adjustment.id, "create");
    let adjustment_id = adjustment.id;

    let (_, rows) = audited(&env, |uow| async move {
        uow.commissions()
            .mark_applied(&[adjustment_id], report_id)
            .await
    })
    .await;
    assert_eq!(rows.len(), 1);
    assert_one(&rows, "commission_adjustment", adjustment_id, "update_status");

    let (_, rows) = audited(&env, |uow| async move {
        uow.commissions()
            .update_report_status(report_id, ReportStatus::Finalized)
            .await
    })
    .await;
    assert_eq!(rows.len(), 1);
    assert_one(&rows, "commission_report", report_id, "update_status");

    let (draft, _) = audited(&env, |uow| async move {
        uow.commissions()
            .create_report(NewCommissionReport {
                partner_id,
                period_start: date(2024, 2, 1),
                period_end: date(2024, 2, 29),
                total_commission: dec!(0),
            })
            .await
    })
    .await;
    let draft_id = draft.id;
    let (_, rows) = audited(&env, |uow| async move {
        uow.commissions().delete_report(draft_id).await
    })
    .await;
    assert_eq!(rows.len(), 1);
    assert_one(&rows, "commission_report", draft_id, "delete");

    let (_, rows) = audited(&env, |uow| async move {
        uow.usage_hashes().mark_processed("usage-hash-1").await
    })
    .await;
    assert_eq!(rows.len(), 1);
    assert_one(&rows, "processed_usage_hash", "usage-hash-1", "create");
}

#[tokio::test]
async fn reads_write_no_audit_rows() {
    let env = atomic_env();
    let agent = register_agent(&env, "AG-READ").await;
    let invoice = create_invoice(&env, agent.id, "INV-READ", dec!(100), date(2024, 1, 1)).await;
    env.services
        .orchestrator
        .process_payment(&env.ctx, PaymentRequest::new(agent.id, dec!(40)))
        .await
        .unwrap();
    env.services
        .settings
        .create_setting(&env.ctx, "read.limit", "5", false)
        .await
        .unwrap();
    let before = env.store.snapshot().await.audit_logs.len();

    let services = &env.services;
    services.invoices.get_invoice(&env.ctx, invoice.id).await.unwrap();
    services
        .invoices
        .list_invoices(&env.ctx, InvoiceFilter::for_agent(agent.id))
        .await
        .unwrap();
    services.agents.wallet_statement(&env.ctx, agent.id).await.unwrap();
    services
        .agents
        .list_agents(&env.ctx, AgentFilter::default())
        .await
        .unwrap();
    services.settings.get_setting(&env.ctx, "read.limit").await.unwrap();
    services
        .settings
        .get_setting_masked(&env.ctx, "read.limit")
        .await
        .unwrap();
    services.settings.audit_trail(&env.ctx, "read.limit").await.unwrap();
    services
        .commissions
        .list_reports(&env.ctx, uuid::Uuid::new_v4())
        .await
        .unwrap();

    let (agent_id, invoice_id) = (agent.id, invoice.id);
    let (_, rows) = audited(&env, |uow| async move {
        let wallet = uow.wallets().find_by_agent(agent_id).await?.unwrap();
        uow.wallet_transactions().list_for_wallet(wallet.id).await?;
        uow.wallet_transactions()
            .find_by_reference(wallet.id, "missing")
            .await?;
        uow.payments().list_for_agent(agent_id).await?;
        uow.invoices().list_history(invoice_id).await?;
        uow.usage_hashes().is_processed("nope").await?;
        uow.commissions().list_unapplied(&[agent_id]).await?;
        uow.audit_logs().list_for_entity("agent", &agent_id.to_string()).await?;
        Ok(())
    })
    .await;
    assert!(rows.is_empty());
    assert_eq!(env.store.snapshot().await.audit_logs.len(), before);
}
