use axum::{
    extract::{Path, State},
    response::IntoResponse,
    routing::get,
    Router,
};
use std::sync::Arc;

use crate::controllers::ok;
use crate::error::TicketingError;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/events/{event_id}/ticket-types", get(ticket_type_availability))
}

// GET /api/events/{event_id}/ticket-types
async fn ticket_type_availability(
    State(state): State<Arc<AppState>>,
    Path(event_id): Path<i64>,
) -> Result<impl IntoResponse, TicketingError> {
    let listing = state.ledger.availability(event_id).await?;
    Ok(ok(listing))
}
