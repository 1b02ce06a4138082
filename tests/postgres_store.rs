//! Гонки против настоящего Postgres: `DATABASE_URL=postgres://... cargo test -- --ignored`.
//! `sqlx::test` создаёт отдельную базу на каждый тест и прогоняет миграции.

mod common;

use sqlx::PgPool;
use std::sync::Arc;

use common::*;
use ticket_issuance::cache::CacheService;
use ticket_issuance::config::Config;
use ticket_issuance::error::TicketingError;
use ticket_issuance::models::{IntentStatus, TicketStatus};
use ticket_issuance::services::cancellation::{CancellationStatus, TicketRequester};
use ticket_issuance::services::confirmation::{CallbackDisposition, ConfirmationStatus};
use ticket_issuance::services::notifier::LogNotifier;
use ticket_issuance::services::payment::GatewayOutcome;
use ticket_issuance::store::{PgTicketStore, TicketStore, SOLD_OUT_REASON};
use ticket_issuance::AppState;

struct PgHarness {
    state: Arc<AppState>,
    store: Arc<PgTicketStore>,
    gateway: Arc<StubGateway>,
}

async fn pg_harness(pool: PgPool) -> PgHarness {
    seed_postgres(&pool).await;
    let store = Arc::new(PgTicketStore::new(pool));
    let gateway = Arc::new(StubGateway::default());
    let state = AppState::build(
        Config::for_tests(),
        store.clone(),
        CacheService::disabled(),
        gateway.clone(),
        Arc::new(LogNotifier),
    )
    .unwrap();
    PgHarness {
        state,
        store,
        gateway,
    }
}

// Те же идентификаторы, что и в in-memory обвязке
async fn seed_postgres(pool: &PgPool) {
    sqlx::query(
        "INSERT INTO users (id, email, name, password_hash, role, is_active, is_verified) VALUES \
         ($1, 'organizer@eventhub.local', 'Organizer', 'x', 'organizer', TRUE, TRUE), \
         ($2, 'admin@eventhub.local', 'Admin', 'x', 'admin', TRUE, TRUE)",
    )
    .bind(ORGANIZER_ID)
    .bind(ADMIN_ID)
    .execute(pool)
    .await
    .unwrap();

    sqlx::query(
        "INSERT INTO events (id, organizer_id, title, status, is_published, start_date, end_date) VALUES \
         ($1, $3, 'Nairobi Jazz Night', 'approved', TRUE, NOW() + INTERVAL '14 days', NOW() + INTERVAL '14 days 4 hours'), \
         ($2, $3, 'Mombasa Comedy Hour', 'approved', TRUE, NOW() + INTERVAL '3 days', NOW() + INTERVAL '3 days 2 hours')",
    )
    .bind(JAZZ_EVENT)
    .bind(SIDE_EVENT)
    .bind(ORGANIZER_ID)
    .execute(pool)
    .await
    .unwrap();

    sqlx::query(
        "INSERT INTO ticket_types (id, event_id, name, price_cents, capacity, sold) VALUES \
         ($1, $3, 'Regular', 150000, 200, 0), \
         ($2, $4, 'Front Row', 250000, 1, 0)",
    )
    .bind(REGULAR)
    .bind(LAST_SEAT)
    .bind(JAZZ_EVENT)
    .bind(SIDE_EVENT)
    .execute(pool)
    .await
    .unwrap();
}

#[sqlx::test(migrations = "./src/migrations")]
#[ignore = "requires DATABASE_URL"]
async fn last_seat_goes_to_exactly_one_payment(pool: PgPool) {
    let h = pg_harness(pool).await;

    let first = h
        .state
        .reservations
        .create_reservation(None, request(SIDE_EVENT, LAST_SEAT, 1, guest("Amina Yusuf", "amina@example.com")))
        .await
        .unwrap();
    let second = h
        .state
        .reservations
        .create_reservation(None, request(SIDE_EVENT, LAST_SEAT, 1, guest("Brian Kiprop", "brian@example.com")))
        .await
        .unwrap();

    let (a, b) = tokio::join!(
        h.state.confirmation.simulate(first.intent.id, true),
        h.state.confirmation.simulate(second.intent.id, true),
    );
    let (a, b) = (a.unwrap(), b.unwrap());
    let completed = [a.status, b.status]
        .iter()
        .filter(|s| **s == ConfirmationStatus::Completed)
        .count();
    assert_eq!(completed, 1);

    let loser = if a.status == ConfirmationStatus::Completed { b } else { a };
    assert_eq!(loser.status, ConfirmationStatus::Failed);
    assert_eq!(loser.intent.failure_reason.as_deref(), Some(SOLD_OUT_REASON));
    assert!(loser.intent.receipt_id.is_some());

    let seat = h.store.find_ticket_type(LAST_SEAT).await.unwrap().unwrap();
    assert_eq!(seat.sold, 1);
}

#[sqlx::test(migrations = "./src/migrations")]
#[ignore = "requires DATABASE_URL"]
async fn callback_and_confirm_settle_the_intent_once(pool: PgPool) {
    let h = pg_harness(pool).await;
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
            receipt_id: Some("QPG7TX41".to_string()),
            amount: None,
        },
    );

    let payload = success_callback(&correlation_id, 3000, "QPG7TX41");
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

    let intent = h.store.find_intent(reservation.intent.id).await.unwrap().unwrap();
    assert_eq!(intent.status, IntentStatus::Completed);
    let tickets = h.store.tickets_for_intent(intent.id).await.unwrap();
    assert_eq!(tickets.iter().filter(|t| !t.is_provisional).count(), 2);
    assert_eq!(h.store.find_ticket_type(REGULAR).await.unwrap().unwrap().sold, 2);
}

#[sqlx::test(migrations = "./src/migrations")]
#[ignore = "requires DATABASE_URL"]
async fn concurrent_scans_redeem_once(pool: PgPool) {
    let h = pg_harness(pool).await;
    let organizer = h.store.find_user(ORGANIZER_ID).await.unwrap().unwrap();
    let admin = h.store.find_user(ADMIN_ID).await.unwrap().unwrap();

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

#[sqlx::test(migrations = "./src/migrations")]
#[ignore = "requires DATABASE_URL"]
async fn concurrent_cancellations_restock_once(pool: PgPool) {
    let h = pg_harness(pool).await;
    let reservation = h
        .state
        .reservations
        .create_reservation(None, request(JAZZ_EVENT, REGULAR, 1, guest("Amina Yusuf", "amina@example.com")))
        .await
        .unwrap();
    let issued = h.state.confirmation.simulate(reservation.intent.id, true).await.unwrap();
    let ticket_id = issued.tickets[0].id;
    assert_eq!(h.store.find_ticket_type(REGULAR).await.unwrap().unwrap().sold, 1);

    let requester = TicketRequester {
        user: None,
        guest_email: Some("amina@example.com"),
    };
    let (a, b) = tokio::join!(
        h.state.cancellations.cancel_ticket(ticket_id, requester),
        h.state.cancellations.cancel_ticket(ticket_id, requester),
    );
    let mut statuses = [a.unwrap().status, b.unwrap().status];
    statuses.sort_by_key(|s| *s == CancellationStatus::AlreadyCancelled);
    assert_eq!(
        statuses,
        [CancellationStatus::Cancelled, CancellationStatus::AlreadyCancelled]
    );

    let ticket = h.store.find_ticket(ticket_id).await.unwrap().unwrap();
    assert_eq!(ticket.status, TicketStatus::Cancelled);
    assert_eq!(h.store.find_ticket_type(REGULAR).await.unwrap().unwrap().sold, 0);
}
