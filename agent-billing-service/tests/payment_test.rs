//! Integration tests for payment orchestration.

mod common;

use agent_billing_service::models::{InvoiceStatus, WalletTransactionType};
use agent_billing_service::services::{PaymentRequest, SettlementSummary};
use agent_billing_service::store::FailPoint;
use common::{atomic_env, create_invoice, date, register_agent, write_through_env};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

#[tokio::test]
async fn payment_settles_outstanding_invoice() {
    let env = atomic_env();
    let agent = register_agent(&env, "AG-A").await;
    let invoice = create_invoice(&env, agent.id, "INV-A-1", dec!(1500000), date(2024, 1, 1)).await;

    let outcome = env
        .services
        .orchestrator
        .process_payment(&env.ctx, PaymentRequest::new(agent.id, dec!(1500000)))
        .await
        .expect("payment should succeed");

    assert_eq!(
        outcome.settlement,
        SettlementSummary {
            settled_count: 1,
            used_balance: dec!(1500000),
            batches_processed: 1,
        }
    );

    let tables = env.store.snapshot().await;
    let wallet = tables.wallet_for(agent.id).unwrap();
    assert_eq!(wallet.balance, Decimal::ZERO);
    assert_eq!(
        tables.invoice(invoice.id).unwrap().status,
        InvoiceStatus::Paid
    );

    let kinds: Vec<WalletTransactionType> = tables
        .transactions_for(wallet.id)
        .iter()
        .map(|t| t.transaction_type)
        .collect();
    assert_eq!(
        kinds,
        vec![WalletTransactionType::Deposit, WalletTransactionType::Settlement]
    );

    let payment = &tables.payments[0];
    assert_eq!(payment.wallet_transaction_id, Some(outcome.wallet_transaction_id));
    assert_eq!(payment.recorded_by, "admin-1");

    let agent = tables.agents.iter().find(|a| a.id == agent.id).unwrap();
    assert_eq!(agent.total_outstanding, Decimal::ZERO);
    assert_eq!(agent.total_invoiced, dec!(1500000));
}

#[tokio::test]
async fn payment_without_debt_stays_in_wallet() {
    let env = atomic_env();
    let agent = register_agent(&env, "AG-B").await;

    let outcome = env
        .services
        .orchestrator
        .process_payment(&env.ctx, PaymentRequest::new(agent.id, dec!(250.50)))
        .await
        .unwrap();

    assert_eq!(outcome.settlement.settled_count, 0);
    assert!(outcome.reference_id.starts_with("payment:"));
    let tables = env.store.snapshot().await;
    assert_eq!(tables.wallet_for(agent.id).unwrap().balance, dec!(250.50));
}

#[tokio::test]
async fn non_positive_amount_is_rejected() {
    let env = atomic_env();
    let agent = register_agent(&env, "AG-C").await;

    for amount in [Decimal::ZERO, dec!(-10)] {
        let failure = env
            .services
            .orchestrator
            .process_payment(&env.ctx, PaymentRequest::new(agent.id, amount))
            .await
            .unwrap_err();
        assert_eq!(failure.reason, "validation");
    }

    assert!(env.store.snapshot().await.payments.is_empty());
}

#[tokio::test]
async fn settlement_failure_rolls_back_everything() {
    let env = atomic_env();
    let agent = register_agent(&env, "AG-D").await;
    let invoice = create_invoice(&env, agent.id, "INV-D-1", dec!(1000), date(2024, 1, 1)).await;
    let before = env.store.snapshot().await;

    env.store.fail_always(FailPoint::InsertWalletTransaction(
        WalletTransactionType::Settlement,
    ));
    let failure = env
        .services
        .orchestrator
        .process_payment(&env.ctx, PaymentRequest::new(agent.id, dec!(1000)))
        .await
        .unwrap_err();
    assert_eq!(failure.reason, "transient_store");

    let after = env.store.snapshot().await;
    assert!(after.payments.is_empty());
    assert!(after.wallet_transactions.is_empty());
    assert_eq!(after.invoice(invoice.id).unwrap().status, InvoiceStatus::Unpaid);
    assert_eq!(after.wallet_for(agent.id), before.wallet_for(agent.id));
    assert_eq!(after.audit_logs.len(), before.audit_logs.len());
}

#[tokio::test]
async fn write_through_failure_is_compensated() {
    let env = write_through_env();
    let agent = register_agent(&env, "AG-E").await;
    create_invoice(&env, agent.id, "INV-E-1", dec!(1000), date(2024, 1, 1)).await;

    env.store.fail_always(FailPoint::InsertWalletTransaction(
        WalletTransactionType::Settlement,
    ));
    let mut request = PaymentRequest::new(agent.id, dec!(1000));
    request.reference_id = Some("bank-ref-77".to_string());
    let failure = env
        .services
        .orchestrator
        .process_payment(&env.ctx, request)
        .await
        .unwrap_err();
    assert_eq!(failure.reason, "transient_store");

    let tables = env.store.snapshot().await;
    let wallet = tables.wallet_for(agent.id).unwrap();
    assert_eq!(wallet.balance, Decimal::ZERO);

    let movements: Vec<(WalletTransactionType, &str)> = tables
        .transactions_for(wallet.id)
        .iter()
        .map(|t| (t.transaction_type, t.reference_id.as_str()))
        .collect();
    assert_eq!(
        movements,
        vec![
            (WalletTransactionType::Deposit, "bank-ref-77"),
            (WalletTransactionType::Reversal, "rollback:bank-ref-77"),
        ]
    );

    // Both units of work share one correlation id.
    let correlation_ids: std::collections::HashSet<&str> = tables
        .audit_logs
        .iter()
        .filter(|log| log.entity_type == "wallet_transaction")
        .map(|log| log.correlation_id.as_str())
        .collect();
    assert_eq!(correlation_ids.len(), 1);
}

#[tokio::test]
async fn failed_balance_update_leaves_wallet_untouched() {
    let env = write_through_env();
    let agent = register_agent(&env, "AG-E2").await;
    env.services
        .orchestrator
        .process_payment(&env.ctx, PaymentRequest::new(agent.id, dec!(250)))
        .await
        .unwrap();

    env.store.fail_on(FailPoint::UpdateWalletBalance, 1);
    let mut request = PaymentRequest::new(agent.id, dec!(1000));
    request.reference_id = Some("bank-ref-78".to_string());
    let failure = env
        .services
        .orchestrator
        .process_payment(&env.ctx, request)
        .await
        .unwrap_err();
    assert_eq!(failure.reason, "transient_store");

    let tables = env.store.snapshot().await;
    let wallet = tables.wallet_for(agent.id).unwrap();
    assert_eq!(wallet.balance, dec!(250));
    assert!(tables
        .transactions_for(wallet.id)
        .iter()
        .all(|t| t.reference_id != "bank-ref-78" && !t.reference_id.starts_with("rollback:")));
}

#[tokio::test]
async fn write_through_reversal_covers_only_what_reached_the_wallet() {
    let env = write_through_env();
    let agent = register_agent(&env, "AG-E3").await;
    let invoice = create_invoice(&env, agent.id, "INV-E3-1", dec!(600), date(2024, 1, 1)).await;

    env.store.fail_on(FailPoint::UpdateInvoiceStatus, 1);
    let mut request = PaymentRequest::new(agent.id, dec!(1000));
    request.reference_id = Some("bank-ref-79".to_string());
    let failure = env
        .services
        .orchestrator
        .process_payment(&env.ctx, request)
        .await
        .unwrap_err();
    assert_eq!(failure.reason, "transient_store");

    let tables = env.store.snapshot().await;
    let wallet = tables.wallet_for(agent.id).unwrap();
    assert_eq!(wallet.balance, Decimal::ZERO);
    assert_eq!(
        tables.invoice(invoice.id).unwrap().status,
        InvoiceStatus::Unpaid
    );

    let history: Vec<_> = tables
        .invoice_status_history
        .iter()
        .filter(|h| h.invoice_id == invoice.id)
        .collect();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].from_status, None);

    let movements: Vec<(WalletTransactionType, Decimal)> = tables
        .transactions_for(wallet.id)
        .iter()
        .map(|t| (t.transaction_type, t.amount))
        .collect();
    assert_eq!(
        movements,
        vec![
            (WalletTransactionType::Deposit, dec!(1000)),
            (WalletTransactionType::Settlement, dec!(600)),
            (WalletTransactionType::Reversal, dec!(400)),
        ]
    );
}

#[tokio::test]
async fn invoice_of_another_agent_is_rejected() {
    let env = atomic_env();
    let owner = register_agent(&env, "AG-F").await;
    let payer = register_agent(&env, "AG-G").await;
    let invoice = create_invoice(&env, owner.id, "INV-F-1", dec!(10), date(2024, 1, 1)).await;

    let mut request = PaymentRequest::new(payer.id, dec!(10));
    request.invoice_id = Some(invoice.id);
    let failure = env
        .services
        .orchestrator
        .process_payment(&env.ctx, request)
        .await
        .unwrap_err();

    assert_eq!(failure.reason, "validation");
    assert!(env.store.snapshot().await.payments.is_empty());
}
