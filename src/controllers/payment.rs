use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info};

use crate::controllers::ok;
use crate::error::TicketingError;
use crate::middleware::{AuthUser, MaybeAuthUser};
use crate::models::IntentStatus;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/payments", get(list_payments))
        .route("/payments/initiate", post(initiate_payment))
        .route("/payments/confirm", post(confirm_payment))
        .route("/payments/mpesa/callback", post(mpesa_callback))
        .route("/payments/{identifier}/status", get(payment_status))
        .route("/payments/{intent_id}/simulate", post(simulate_payment))
}

#[derive(Debug, Deserialize)]
struct InitiatePaymentRequest {
    intent_id: i64,
    phone: String,
    reference: Option<String>,
}

// POST /api/payments/initiate
async fn initiate_payment(
    State(state): State<Arc<AppState>>,
    requester: MaybeAuthUser,
    Json(req): Json<InitiatePaymentRequest>,
) -> Result<impl IntoResponse, TicketingError> {
    let result = state
        .initiator
        .initiate_payment(req.intent_id, &req.phone, requester.user(), req.reference.as_deref())
        .await?;
    Ok(ok(result))
}

#[derive(Debug, Deserialize)]
struct ConfirmPaymentRequest {
    correlation_id: String,
}

// POST /api/payments/confirm
async fn confirm_payment(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ConfirmPaymentRequest>,
) -> Result<impl IntoResponse, TicketingError> {
    let correlation_id = req.correlation_id.trim();
    if correlation_id.is_empty() {
        return Err(TicketingError::Validation("correlation_id is required".to_string()));
    }
    let result = state.confirmation.confirm_by_correlation(correlation_id).await?;
    Ok(ok(result))
}

// POST /api/payments/mpesa/callback
// Провайдер получает подтверждение, как только payload разобран: иначе он
// будет повторять доставку из-за наших же ошибок.
async fn mpesa_callback(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<Value>,
) -> Result<impl IntoResponse, TicketingError> {
    let disposition = state.confirmation.handle_callback(&payload).await?;
    info!(?disposition, "M-Pesa callback handled");
    Ok(Json(json!({ "ResultCode": 0, "ResultDesc": "Accepted" })))
}

#[derive(Debug, Deserialize)]
struct StatusQuery {
    reference: Option<String>,
}

// GET /api/payments/{identifier}/status
// identifier: id intent (число) или CheckoutRequestID шлюза
async fn payment_status(
    State(state): State<Arc<AppState>>,
    requester: MaybeAuthUser,
    Path(identifier): Path<String>,
    Query(query): Query<StatusQuery>,
) -> Result<impl IntoResponse, TicketingError> {
    let reference = query.reference.as_deref();
    let view = match identifier.parse::<i64>() {
        Ok(intent_id) => {
            state
                .confirmation
                .payment_status(intent_id, requester.user(), reference)
                .await?
        }
        Err(_) => {
            state
                .confirmation
                .payment_status_by_correlation(&identifier, requester.user(), reference)
                .await?
        }
    };
    Ok(ok(view))
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    status: Option<String>,
    #[serde(default = "default_page")]
    page: i64,
    #[serde(default = "default_per_page")]
    per_page: i64,
}

fn default_page() -> i64 {
    1
}

fn default_per_page() -> i64 {
    20
}

// GET /api/payments?status=&page=&per_page=
async fn list_payments(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Query(query): Query<ListQuery>,
) -> Result<impl IntoResponse, TicketingError> {
    let status = match query.status.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        Some(raw) => Some(
            IntentStatus::parse(&raw.to_uppercase())
                .ok_or_else(|| TicketingError::Validation(format!("unknown payment status {:?}", raw)))?,
        ),
        None => None,
    };
    let page = state
        .confirmation
        .list_payments(&user, status, query.page, query.per_page)
        .await?;
    Ok(ok(page))
}

#[derive(Debug, Deserialize)]
struct SimulateRequest {
    #[serde(default = "default_success")]
    success: bool,
}

fn default_success() -> bool {
    true
}

// POST /api/payments/{intent_id}/simulate
async fn simulate_payment(
    State(state): State<Arc<AppState>>,
    Path(intent_id): Path<i64>,
    Json(req): Json<SimulateRequest>,
) -> Result<impl IntoResponse, TicketingError> {
    debug!(intent_id, success = req.success, "Simulate payment requested");
    let result = state.confirmation.simulate(intent_id, req.success).await?;
    Ok(ok(result))
}
