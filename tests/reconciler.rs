mod common;

use chrono::{Duration, Utc};
use std::sync::Arc;

use common::*;
use ticket_issuance::models::IntentStatus;
use ticket_issuance::services::payment::GatewayOutcome;
use ticket_issuance::services::reconciler::{ReconcileReport, Reconciler};
use ticket_issuance::store::TicketStore;

async fn initiated_intent(h: &Harness, email: &str) -> (i64, String) {
    let reservation = h
        .state
        .reservations
        .create_reservation(None, request(JAZZ_EVENT, REGULAR, 1, guest("Amina Yusuf", email)))
        .await
        .unwrap();
    let initiated = h
        .state
        .initiator
        .initiate_payment(reservation.intent.id, "0712345678", None, Some(reservation.intent.reference.as_str()))
        .await
        .unwrap();
    (reservation.intent.id, initiated.intent.correlation_id.unwrap())
}

fn reconciler(h: &Harness) -> Reconciler {
    Reconciler::new(
        h.state.store.clone(),
        h.state.gateway.clone(),
        h.state.confirmation.clone(),
        0,
    )
}

#[tokio::test]
async fn stale_payments_are_settled_from_gateway_status() {
    let h = Harness::new();
    let (paid_id, paid_correlation) = initiated_intent(&h, "paid@example.com").await;
    let (waiting_id, _) = initiated_intent(&h, "waiting@example.com").await;
    h.gateway.set_outcome(
        &paid_correlation,
        GatewayOutcome::Success {
            receipt_id: Some("RCN4K2L0".to_string()),
            amount: None,
        },
    );

    // Заявка без correlation id, зависшая после падения процесса
    let orphan = h
        .state
        .reservations
        .create_reservation(None, request(JAZZ_EVENT, REGULAR, 1, guest("Amina Yusuf", "orphan@example.com")))
        .await
        .unwrap();
    assert!(h
        .store
        .claim_initiation(orphan.intent.id, "254712345678", Utc::now() - Duration::minutes(30))
        .await
        .unwrap());

    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    let report = reconciler(&h).run_once().await.unwrap();
    assert_eq!(
        report,
        ReconcileReport {
            released_claims: 1,
            settled: 1,
            still_pending: 1,
            unavailable: 0,
        }
    );

    let paid = h.store.find_intent(paid_id).await.unwrap().unwrap();
    assert_eq!(paid.status, IntentStatus::Completed);
    assert_eq!(paid.receipt_id.as_deref(), Some("RCN4K2L0"));
    let waiting = h.store.find_intent(waiting_id).await.unwrap().unwrap();
    assert_eq!(waiting.status, IntentStatus::Pending);

    // Снятая заявка снова может быть инициирована
    let retried = h
        .state
        .initiator
        .initiate_payment(orphan.intent.id, "0712345678", None, Some(orphan.intent.reference.as_str()))
        .await
        .unwrap();
    assert!(retried.intent.correlation_id.is_some());
}

#[tokio::test]
async fn gateway_outage_leaves_payments_pending() {
    let h = Harness::new();
    let (intent_id, _) = initiated_intent(&h, "amina@example.com").await;
    h.gateway.set_unavailable(true);

    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    let report = reconciler(&h).run_once().await.unwrap();
    assert_eq!(report.unavailable, 1);
    assert_eq!(report.settled, 0);

    let intent = h.store.find_intent(intent_id).await.unwrap().unwrap();
    assert_eq!(intent.status, IntentStatus::Pending);
}

#[tokio::test]
async fn spawned_reconciler_runs_in_background() {
    let h = Harness::new();
    let (intent_id, correlation_id) = initiated_intent(&h, "amina@example.com").await;
    h.gateway.set_outcome(
        &correlation_id,
        GatewayOutcome::Failure {
            reason: "Request cancelled by user".to_string(),
        },
    );

    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    let handle = Arc::new(reconciler(&h)).spawn(1);
    // Первый тик interval срабатывает сразу
    let mut settled = false;
    for _ in 0..50 {
        let intent = h.store.find_intent(intent_id).await.unwrap().unwrap();
        if intent.status == IntentStatus::Failed {
            settled = true;
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    handle.abort();
    assert!(settled);
}
