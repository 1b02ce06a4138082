use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::controllers::ok;
use crate::error::TicketingError;
use crate::middleware::{AuthUser, MaybeAuthUser};
use crate::services::cancellation::TicketRequester;
use crate::services::reservation::ReservationRequest;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/tickets/reserve", post(reserve))
        .route("/tickets/verify", post(verify))
        .route("/tickets/mine", get(my_tickets))
        .route("/tickets/{ticket_id}/cancel", post(cancel))
        .route("/tickets/{ticket_id}/qr", get(ticket_qr))
}

// POST /api/tickets/reserve
async fn reserve(
    State(state): State<Arc<AppState>>,
    buyer: MaybeAuthUser,
    Json(req): Json<ReservationRequest>,
) -> Result<impl IntoResponse, TicketingError> {
    let reservation = state.reservations.create_reservation(buyer.user(), req).await?;
    Ok((StatusCode::CREATED, ok(reservation)))
}

#[derive(Debug, Deserialize)]
struct VerifyRequest {
    scan_token: String,
    event_id: i64,
}

// POST /api/tickets/verify
async fn verify(
    State(state): State<Arc<AppState>>,
    AuthUser(operator): AuthUser,
    Json(req): Json<VerifyRequest>,
) -> Result<impl IntoResponse, TicketingError> {
    let ticket = state
        .verifier
        .verify_and_redeem(&req.scan_token, req.event_id, &operator)
        .await?;
    Ok(ok(ticket))
}

// GET /api/tickets/mine
async fn my_tickets(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
) -> Result<impl IntoResponse, TicketingError> {
    let tickets = state.store.tickets_for_user(user.id).await?;
    Ok(ok(tickets))
}

#[derive(Debug, Deserialize)]
struct GuestQuery {
    guest_email: Option<String>,
}

// POST /api/tickets/{ticket_id}/cancel
async fn cancel(
    State(state): State<Arc<AppState>>,
    requester: MaybeAuthUser,
    Path(ticket_id): Path<Uuid>,
    Query(query): Query<GuestQuery>,
) -> Result<impl IntoResponse, TicketingError> {
    let result = state
        .cancellations
        .cancel_ticket(
            ticket_id,
            TicketRequester {
                user: requester.user(),
                guest_email: query.guest_email.as_deref(),
            },
        )
        .await?;
    Ok(ok(result))
}

// GET /api/tickets/{ticket_id}/qr
async fn ticket_qr(
    State(state): State<Arc<AppState>>,
    requester: MaybeAuthUser,
    Path(ticket_id): Path<Uuid>,
    Query(query): Query<GuestQuery>,
) -> Result<impl IntoResponse, TicketingError> {
    let qr = state
        .qr
        .ticket_qr(
            ticket_id,
            TicketRequester {
                user: requester.user(),
                guest_email: query.guest_email.as_deref(),
            },
        )
        .await?;
    Ok(ok(qr))
}
