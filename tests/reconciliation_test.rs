mod common;

use chrono::{Duration, Utc};
use common::{Harness, SECRET, harness, harness_with, signed_callback};
use payorder::application::callback::CallbackKind;
use payorder::application::execution::UnifiedPaymentCommand;
use payorder::application::reconciliation::ReconcileAction;
use payorder::application::refund::{RefundCommand, RefundSplit};
use payorder::config::EngineConfig;
use payorder::domain::events::PaymentEventKind;
use payorder::domain::ports::GatewayStatus;
use payorder::domain::types::{PaymentChannel, PaymentStatus, RefundStatus, TransactionStatus};
use payorder::error::PaymentError;
use payorder::infrastructure::simulated::SimulatedGateway;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::watch;

async fn submit(h: &Harness, codes: &[&str], amounts: &[Decimal]) -> String {
    h.engine
        .execute_unified_payment(UnifiedPaymentCommand {
            payment_codes: codes.iter().map(|c| c.to_string()).collect(),
            allocated_amounts: amounts.to_vec(),
            total_amount: amounts.iter().sum(),
            channel: PaymentChannel::Online,
            params: HashMap::new(),
        })
        .await
        .unwrap()
        .correlation_id
}

#[tokio::test]
async fn test_lost_callback_is_recovered_from_channel() {
    let h = harness();
    h.create("P1", "R1", dec!(900.00)).await;
    let reference = submit(&h, &["P1"], &[dec!(900.00)]).await;
    h.online.set_remote_status(&reference, GatewayStatus::Success);

    let report = h.engine.compensate_and_sync(&reference).await.unwrap();
    assert_eq!(report.entries.len(), 1);
    assert_eq!(report.entries[0].action, ReconcileAction::Applied { success: true });
    assert!(!report.needs_attention());

    assert_eq!(h.payment("P1").await.status(), PaymentStatus::Paid);
    assert!(h.notifier.kinds().contains(&PaymentEventKind::PaymentCompleted));

    // Running it again finds the transaction settled and in agreement.
    let again = h.engine.compensate_and_sync(&reference).await.unwrap();
    assert_eq!(again.entries[0].action, ReconcileAction::InSync);
}

#[tokio::test]
async fn test_channel_failure_is_applied() {
    let h = harness();
    h.create("P1", "R1", dec!(900.00)).await;
    let reference = submit(&h, &["P1"], &[dec!(900.00)]).await;
    h.online.set_remote_status(&reference, GatewayStatus::Failed);

    let report = h.engine.compensate_and_sync(&reference).await.unwrap();
    assert_eq!(report.entries[0].action, ReconcileAction::Applied { success: false });
    assert_eq!(h.payment("P1").await.status(), PaymentStatus::Failed);
}

#[tokio::test]
async fn test_processing_and_unknown_leave_transaction_open() {
    let h = harness();
    h.create("P1", "R1", dec!(900.00)).await;
    let reference = submit(&h, &["P1"], &[dec!(900.00)]).await;

    let pending = h.engine.compensate_and_sync(&reference).await.unwrap();
    assert_eq!(pending.entries[0].action, ReconcileAction::StillProcessing);

    h.online.set_remote_status(&reference, GatewayStatus::Unknown);
    let unknown = h.engine.compensate_and_sync(&reference).await.unwrap();
    assert!(matches!(unknown.entries[0].action, ReconcileAction::Unresolved { .. }));
    assert!(unknown.needs_attention());

    h.online.set_remote_status(&reference, GatewayStatus::Success);
    h.online.fail_queries(true);
    let down = h.engine.compensate_and_sync(&reference).await.unwrap();
    assert!(matches!(down.entries[0].action, ReconcileAction::Unresolved { .. }));

    let payment = h.payment("P1").await;
    assert_eq!(payment.status(), PaymentStatus::Paying);
    assert!(payment.running_transaction().unwrap().is_processing());
}

#[tokio::test]
async fn test_settled_disagreement_is_reported() {
    let h = harness();
    h.create("P1", "R1", dec!(900.00)).await;
    let reference = submit(&h, &["P1"], &[dec!(900.00)]).await;
    h.engine
        .handle_callback(signed_callback(&h.online, CallbackKind::Payment, &reference, true))
        .await
        .unwrap();
    h.online.set_remote_status(&reference, GatewayStatus::Failed);

    let report = h.engine.compensate_and_sync(&reference).await.unwrap();
    assert_eq!(
        report.entries[0].action,
        ReconcileAction::Mismatch {
            local: TransactionStatus::Success,
            remote: GatewayStatus::Failed,
        }
    );
    assert!(matches!(
        report.ensure_in_sync(),
        Err(PaymentError::ReconciliationMismatch(_))
    ));
    assert_eq!(h.payment("P1").await.status(), PaymentStatus::Paid);
}

#[tokio::test]
async fn test_unknown_reference_is_not_found() {
    let h = harness();
    let result = h.engine.compensate_and_sync("online-pay-nothing").await;
    assert!(matches!(result, Err(PaymentError::NotFound(_))));
}

#[tokio::test]
async fn test_batch_is_reconciled_with_one_query() {
    let h = harness();
    h.create("P1", "R1", dec!(100.00)).await;
    h.create("P2", "R1", dec!(200.00)).await;
    let reference = submit(&h, &["P1", "P2"], &[dec!(100.00), dec!(200.00)]).await;
    h.online.set_remote_status(&reference, GatewayStatus::Success);

    let report = h.engine.compensate_and_sync(&reference).await.unwrap();
    assert_eq!(report.entries.len(), 2);
    assert_eq!(h.online.status_queries(), 1);
    assert_eq!(h.payment("P1").await.status(), PaymentStatus::Paid);
    assert_eq!(h.payment("P2").await.status(), PaymentStatus::Paid);
}

#[tokio::test]
async fn test_sweep_waits_for_expiry_and_grace() {
    let h = harness();
    h.create("P1", "R1", dec!(500.00)).await;
    let reference = submit(&h, &["P1"], &[dec!(500.00)]).await;
    h.online.set_remote_status(&reference, GatewayStatus::Success);

    let early = h.engine.sweep(Utc::now()).await.unwrap();
    assert!(early.reports.is_empty());
    assert_eq!(h.payment("P1").await.status(), PaymentStatus::Paying);

    let late = h.engine.sweep(Utc::now() + Duration::minutes(31)).await.unwrap();
    assert_eq!(late.applied(), 1);
    assert_eq!(h.payment("P1").await.status(), PaymentStatus::Paid);

    let refund = h
        .engine
        .execute_refund(RefundCommand {
            payment_code: "P1".to_string(),
            amount: dec!(500.00),
            original_transaction_id: None,
            business_order_id: None,
            reason: None,
            split: RefundSplit::SingleTransaction,
        })
        .await
        .unwrap();
    h.online
        .set_remote_status(&refund.refund_correlation_id, GatewayStatus::Success);

    assert!(h.engine.sweep(Utc::now()).await.unwrap().reports.is_empty());
    let summary = h.engine.sweep(Utc::now() + Duration::minutes(6)).await.unwrap();
    assert_eq!(summary.applied(), 1);

    let payment = h.payment("P1").await;
    assert_eq!(payment.refund_status(), RefundStatus::FullRefunded);
    payment.check_invariants().unwrap();
}

#[tokio::test]
async fn test_sweep_carries_on_past_a_payment_it_cannot_save() {
    let h = harness();
    h.create("P1", "R1", dec!(400.00)).await;
    h.create("P2", "R2", dec!(250.00)).await;
    let first = submit(&h, &["P1"], &[dec!(400.00)]).await;
    let second = h
        .engine
        .execute_unified_payment(UnifiedPaymentCommand {
            payment_codes: vec!["P2".to_string()],
            allocated_amounts: vec![dec!(250.00)],
            total_amount: dec!(250.00),
            channel: PaymentChannel::Wallet,
            params: HashMap::new(),
        })
        .await
        .unwrap()
        .correlation_id;
    h.online.set_remote_status(&first, GatewayStatus::Success);
    h.wallet.set_remote_status(&second, GatewayStatus::Success);
    h.repository.fail_saves_for("P1");

    let summary = h.engine.sweep(Utc::now() + Duration::hours(2)).await.unwrap();
    assert_eq!(summary.reports.len(), 2);
    assert_eq!(summary.applied(), 1);

    let stuck = summary
        .reports
        .iter()
        .find(|r| r.correlation_id == first)
        .unwrap();
    assert!(matches!(stuck.entries[0].action, ReconcileAction::Unresolved { .. }));
    assert!(stuck.needs_attention());
    assert_eq!(h.payment("P1").await.status(), PaymentStatus::Paying);
    assert_eq!(h.payment("P2").await.status(), PaymentStatus::Paid);

    // The next pass picks it up once storage recovers.
    h.repository.heal();
    let retry = h.engine.sweep(Utc::now() + Duration::hours(2)).await.unwrap();
    assert_eq!(retry.applied(), 1);
    assert_eq!(h.payment("P1").await.status(), PaymentStatus::Paid);
}

#[tokio::test]
async fn test_batch_sync_reports_each_payment_separately() {
    let h = harness();
    h.create("P1", "R1", dec!(100.00)).await;
    h.create("P2", "R1", dec!(200.00)).await;
    let reference = submit(&h, &["P1", "P2"], &[dec!(100.00), dec!(200.00)]).await;
    h.online.set_remote_status(&reference, GatewayStatus::Failed);
    h.repository.fail_saves_for("P1");

    let report = h.engine.compensate_and_sync(&reference).await.unwrap();
    let actions: Vec<_> = report
        .entries
        .iter()
        .map(|e| (e.payment_code.as_str(), e.action.clone()))
        .collect();
    assert!(matches!(actions[0], ("P1", ReconcileAction::Unresolved { .. })));
    assert_eq!(actions[1], ("P2", ReconcileAction::Applied { success: false }));
    assert_eq!(h.payment("P2").await.status(), PaymentStatus::Failed);
}

#[tokio::test]
async fn test_periodic_worker_settles_and_stops() {
    let config = EngineConfig {
        sweep_interval: std::time::Duration::from_millis(10),
        ..EngineConfig::default()
    }
    .with_payment_expiry_minutes(0);
    let h = harness_with(config, SimulatedGateway::new(PaymentChannel::Online, SECRET));
    h.create("P1", "R1", dec!(50.00)).await;
    let reference = submit(&h, &["P1"], &[dec!(50.00)]).await;
    h.online.set_remote_status(&reference, GatewayStatus::Success);

    let (shutdown, receiver) = watch::channel(false);
    let worker = tokio::spawn(Arc::clone(&h.engine).run_periodic(receiver));

    tokio::time::timeout(std::time::Duration::from_secs(5), async {
        while h.payment("P1").await.status() != PaymentStatus::Paid {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("worker never settled the payment");

    shutdown.send(true).unwrap();
    tokio::time::timeout(std::time::Duration::from_secs(5), worker)
        .await
        .expect("worker did not stop")
        .unwrap();
}
