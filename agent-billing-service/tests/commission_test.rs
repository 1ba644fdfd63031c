//! Integration tests for partner commission reports.

mod common;

use agent_billing_service::models::{
    AdjustmentStatus, Agent, InvoiceStatus, NewAgent, NewPartner, Partner, ReportStatus,
};
use common::{atomic_env, date, new_invoice, register_agent, TestEnv};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use uuid::Uuid;

async fn partner_with_agents(env: &TestEnv) -> (Partner, Agent, Agent) {
    let partner = env
        .services
        .agents
        .register_partner(
            &env.ctx,
            NewPartner {
                code: "PT-1".to_string(),
                name: "Partner One".to_string(),
                email: None,
            },
        )
        .await
        .unwrap();

    let mut agents = Vec::new();
    for (code, rate) in [("AG-P1", dec!(10)), ("AG-P2", dec!(7.5))] {
        let agent = env
            .services
            .agents
            .register_agent(
                &env.ctx,
                NewAgent {
                    code: code.to_string(),
                    name: format!("Agent {}", code),
                    partner_id: Some(partner.id),
                    commission_rate: rate,
                    email: None,
                    phone: None,
                },
            )
            .await
            .unwrap();
        agents.push(agent);
    }
    let second = agents.pop().unwrap();
    let first = agents.pop().unwrap();
    (partner, first, second)
}

async fn paid_invoice(env: &TestEnv, agent_id: Uuid, number: &str, amount: Decimal, issued: chrono::NaiveDate) {
    let mut input = new_invoice(agent_id, number, amount, date(2024, 6, 30));
    input.issue_date = issued;
    let invoice = env
        .services
        .invoices
        .create_idempotent_invoice(&env.ctx, input)
        .await
        .unwrap()
        .invoice;
    env.services
        .invoices
        .change_status(&env.ctx, invoice.id, InvoiceStatus::Paid, None)
        .await
        .unwrap();
}

#[tokio::test]
async fn report_totals_paid_invoices_and_adjustments() {
    let env = atomic_env();
    let (partner, first, second) = partner_with_agents(&env).await;
    let outsider = register_agent(&env, "AG-X").await;

    paid_invoice(&env, first.id, "INV-1", dec!(1000), date(2024, 1, 10)).await;
    paid_invoice(&env, first.id, "INV-2", dec!(2000), date(2024, 2, 10)).await;
    paid_invoice(&env, second.id, "INV-3", dec!(333.33), date(2024, 1, 31)).await;
    let mut unpaid = new_invoice(first.id, "INV-4", dec!(500), date(2024, 6, 30));
    unpaid.issue_date = date(2024, 1, 15);
    env.services
        .invoices
        .create_idempotent_invoice(&env.ctx, unpaid)
        .await
        .unwrap();

    let commissions = &env.services.commissions;
    commissions
        .create_adjustment(&env.ctx, first.id, dec!(15), "bonus")
        .await
        .unwrap();
    commissions
        .create_adjustment(&env.ctx, second.id, dec!(-5), "chargeback")
        .await
        .unwrap();
    let foreign = commissions
        .create_adjustment(&env.ctx, outsider.id, dec!(99), "other partner")
        .await
        .unwrap();

    let report = commissions
        .generate_report(&env.ctx, partner.id, date(2024, 1, 1), date(2024, 1, 31))
        .await
        .unwrap();

    // 1000 * 10% + 333.33 * 7.5% + 15 - 5
    assert_eq!(report.total_commission, dec!(135.00));
    assert_eq!(report.status, ReportStatus::Draft);
    assert_eq!(report.created_by, "admin-1");

    let tables = env.store.snapshot().await;
    for adjustment in &tables.commission_adjustments {
        if adjustment.id == foreign.id {
            assert_eq!(adjustment.status, AdjustmentStatus::Unapplied);
            assert_eq!(adjustment.applied_report_id, None);
        } else {
            assert_eq!(adjustment.status, AdjustmentStatus::Applied);
            assert_eq!(adjustment.applied_report_id, Some(report.id));
        }
    }

    // Applied adjustments are not counted twice.
    let next = commissions
        .generate_report(&env.ctx, partner.id, date(2024, 3, 1), date(2024, 3, 31))
        .await
        .unwrap();
    assert_eq!(next.total_commission, Decimal::ZERO);
}

#[tokio::test]
async fn inverted_period_is_rejected() {
    let env = atomic_env();
    let (partner, _, _) = partner_with_agents(&env).await;

    let err = env
        .services
        .commissions
        .generate_report(&env.ctx, partner.id, date(2024, 2, 1), date(2024, 1, 1))
        .await
        .unwrap_err();
    assert_eq!(err.reason(), "validation");
    assert!(env.store.snapshot().await.commission_reports.is_empty());
}

#[tokio::test]
async fn zero_adjustment_is_rejected() {
    let env = atomic_env();
    let agent = register_agent(&env, "AG-Z").await;
    let err = env
        .services
        .commissions
        .create_adjustment(&env.ctx, agent.id, Decimal::ZERO, "nothing")
        .await
        .unwrap_err();
    assert_eq!(err.reason(), "validation");
}

#[tokio::test]
async fn report_status_moves_forward_only() {
    let env = atomic_env();
    let (partner, _, _) = partner_with_agents(&env).await;
    let commissions = &env.services.commissions;
    let report = commissions
        .generate_report(&env.ctx, partner.id, date(2024, 1, 1), date(2024, 1, 31))
        .await
        .unwrap();

    let failure = commissions
        .change_report_status(&env.ctx, report.id, ReportStatus::Paid)
        .await
        .unwrap_err();
    assert_eq!(failure.reason, "invalid_state_transition");

    let finalized = commissions
        .change_report_status(&env.ctx, report.id, ReportStatus::Finalized)
        .await
        .unwrap();
    assert_eq!(finalized.status, ReportStatus::Finalized);

    let paid = commissions
        .change_report_status(&env.ctx, report.id, ReportStatus::Paid)
        .await
        .unwrap();
    assert_eq!(paid.status, ReportStatus::Paid);

    let failure = commissions
        .change_report_status(&env.ctx, report.id, ReportStatus::Draft)
        .await
        .unwrap_err();
    assert_eq!(failure.reason, "invalid_state_transition");
}

#[tokio::test]
async fn deleting_draft_releases_adjustments() {
    let env = atomic_env();
    let (partner, first, _) = partner_with_agents(&env).await;
    let commissions = &env.services.commissions;
    let adjustment = commissions
        .create_adjustment(&env.ctx, first.id, dec!(20), "bonus")
        .await
        .unwrap();
    let report = commissions
        .generate_report(&env.ctx, partner.id, date(2024, 1, 1), date(2024, 1, 31))
        .await
        .unwrap();

    commissions.delete_draft_report(&env.ctx, report.id).await.unwrap();

    let tables = env.store.snapshot().await;
    assert!(tables.commission_reports.is_empty());
    let released = tables
        .commission_adjustments
        .iter()
        .find(|a| a.id == adjustment.id)
        .unwrap();
    assert_eq!(released.status, AdjustmentStatus::Unapplied);
    assert_eq!(released.applied_report_id, None);

    let regenerated = commissions
        .generate_report(&env.ctx, partner.id, date(2024, 1, 1), date(2024, 1, 31))
        .await
        .unwrap();
    assert_eq!(regenerated.total_commission, dec!(20));
}

#[tokio::test]
async fn finalized_report_cannot_be_deleted() {
    let env = atomic_env();
    let (partner, _, _) = partner_with_agents(&env).await;
    let commissions = &env.services.commissions;
    let report = commissions
        .generate_report(&env.ctx, partner.id, date(2024, 1, 1), date(2024, 1, 31))
        .await
        .unwrap();
    commissions
        .change_report_status(&env.ctx, report.id, ReportStatus::Finalized)
        .await
        .unwrap();

    let err = commissions
        .delete_draft_report(&env.ctx, report.id)
        .await
        .unwrap_err();
    assert_eq!(err.reason(), "invalid_state_transition");
    assert_eq!(env.store.snapshot().await.commission_reports.len(), 1);
}
