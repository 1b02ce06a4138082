mod common;

use common::*;

use ticket_issuance::error::TicketingError;
use ticket_issuance::models::{IntentStatus, TicketStatus};
use ticket_issuance::services::confirmation::{CallbackDisposition, ConfirmationStatus};
use ticket_issuance::services::payment::GatewayOutcome;
use ticket_issuance::store::{TicketStore, SOLD_OUT_REASON};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn last_seat_is_sold_to_only_one_confirmed_payment() {
    let h = Harness::new();

    // Обе брони проходят: на этапе резерва место ещё свободно
    let (first, second) = tokio::join!(
        h.state.reservations.create_reservation(
            None,
            request(SIDE_EVENT, LAST_SEAT, 1, guest("Amina Yusuf", "amina@example.com")),
        ),
        h.state.reservations.create_reservation(
            None,
            request(SIDE_EVENT, LAST_SEAT, 1, guest("Brian Kiprop", "brian@example.com")),
        ),
    );
    let (first, second) = (first.unwrap(), second.unwrap());

    let (a, b) = tokio::join!(
        h.state.confirmation.simulate(first.intent.id, true),
        h.state.confirmation.simulate(second.intent.id, true),
    );
    let (a, b) = (a.unwrap(), b.unwrap());

    let statuses = [a.status, b.status];
    assert_eq!(
        statuses.iter().filter(|s| **s == ConfirmationStatus::Completed).count(),
        1
    );
    assert_eq!(
        statuses.iter().filter(|s| **s == ConfirmationStatus::Failed).count(),
        1
    );

    let loser = if a.status == ConfirmationStatus::Failed { a } else { b };
    assert_eq!(loser.intent.status, IntentStatus::Failed);
    assert_eq!(loser.intent.failure_reason.as_deref(), Some(SOLD_OUT_REASON));
    // Квитанция сохраняется для возврата средств
    assert!(loser.intent.receipt_id.is_some());
    assert!(loser.tickets.is_empty());

    let seat = h.store.find_ticket_type(LAST_SEAT).await.unwrap().unwrap();
    assert_eq!(seat.sold, 1);
    assert!(seat.sold <= seat.capacity);

    let loser_tickets = h.store.tickets_for_intent(loser.intent.id).await.unwrap();
    assert!(loser_tickets
        .iter()
        .all(|t| t.is_provisional && t.status == TicketStatus::Failed));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn callback_and_manual_confirmation_issue_tickets_once() {
    let h = Harness::new();
    let reservation = h
        .state
        .reservations
        .create_reservation(None, request(JAZZ_EVENT, REGULAR, 2, guest("Amina Yusuf", "amina@example.com")))
        .await
        .unwrap();
    let initiated = h
        .state
        .initiator
        .initiate_payment(reservation.intent.id, "0712345678", None, Some(reservation.intent.reference.as_str()))
        .await
        .unwrap();
    let correlation_id = initiated.intent.correlation_id.unwrap();
    h.gateway.set_outcome(
        &correlation_id,
        GatewayOutcome::Success {
            receipt_id: Some("QRT5ZX91".to_string()),
            amount: None,
        },
    );

    let payload = success_callback(&correlation_id, 3000, "QRT5ZX91");
    let (callback, manual) = tokio::join!(
        h.state.confirmation.handle_callback(&payload),
        h.state.confirmation.confirm_by_correlation(&correlation_id),
    );
    let callback = callback.unwrap();
    let manual = manual.unwrap();

    let completed = [
        callback == CallbackDisposition::Applied(ConfirmationStatus::Completed),
        manual.status == ConfirmationStatus::Completed,
    ];
    assert_eq!(completed.iter().filter(|c| **c).count(), 1);
    assert_eq!(manual.tickets.len(), 2);

    let finals: Vec<_> = h
        .store
        .tickets_for_intent(reservation.intent.id)
        .await
        .unwrap()
        .into_iter()
        .filter(|t| !t.is_provisional)
        .collect();
    assert_eq!(finals.len(), 2);
    assert_eq!(h.store.find_ticket_type(REGULAR).await.unwrap().unwrap().sold, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_scans_redeem_a_ticket_once() {
    let h = Harness::new();
    let organizer = h.user(ORGANIZER_ID).await;
    let admin = h.user(ADMIN_ID).await;

    let reservation = h
        .state
        .reservations
        .create_reservation(None, request(JAZZ_EVENT, REGULAR, 1, guest("Amina Yusuf", "amina@example.com")))
        .await
        .unwrap();
    let issued = h.state.confirmation.simulate(reservation.intent.id, true).await.unwrap();
    let token = issued.tickets[0].scan_token.clone().unwrap();

    let (gate_a, gate_b) = tokio::join!(
        h.state.verifier.verify_and_redeem(&token, JAZZ_EVENT, &organizer),
        h.state.verifier.verify_and_redeem(&token, JAZZ_EVENT, &admin),
    );

    let outcomes = [gate_a, gate_b];
    assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(outcomes
        .iter()
        .any(|r| matches!(r, Err(TicketingError::AlreadyRedeemed(_)))));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn burst_of_buyers_never_oversells() {
    let h = Harness::new();

    // VIP: вместимость 20, покупателей 30
    let buyers = (0..30).map(|i| {
        let state = h.state.clone();
        async move {
            let email = format!("buyer{}@example.com", i);
            let reservation = state
                .reservations
                .create_reservation(None, request(JAZZ_EVENT, VIP, 1, guest("Burst Buyer", &email)))
                .await?;
            state.confirmation.simulate(reservation.intent.id, true).await
        }
    });
    let results = futures::future::join_all(buyers).await;

    let completed = results
        .iter()
        .filter(|r| matches!(r, Ok(c) if c.status == ConfirmationStatus::Completed))
        .count();
    assert_eq!(completed, 20);
    // Остальные либо не прошли резерв, либо завершились как sold_out
    assert!(results.iter().all(|r| match r {
        Ok(c) => c.status != ConfirmationStatus::Completed || c.tickets.len() == 1,
        Err(e) => matches!(e, TicketingError::CapacityExceeded { .. }),
    }));

    let vip = h.store.find_ticket_type(VIP).await.unwrap().unwrap();
    assert_eq!(vip.sold, vip.capacity);
}
