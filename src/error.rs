use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde_json::json;
use thiserror::Error;
use tracing::{error, warn};
use uuid::Uuid;

/// Классы ошибок, на которые отображается каждая конкретная ошибка.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    CapacityExceeded,
    NotFound,
    PermissionDenied,
    Conflict,
    GatewayUnavailable,
    SignatureInvalid,
    InternalInconsistency,
    Internal,
}

#[derive(Debug, Error)]
pub enum TicketingError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("event {0} is not open for ticket sales")]
    EventNotAvailable(i64),

    #[error("ticket type {ticket_type_id} is not sold for event {event_id}")]
    InvalidTicketType { event_id: i64, ticket_type_id: i64 },

    #[error("only {available} tickets left, {requested} requested")]
    CapacityExceeded { available: i32, requested: i32 },

    #[error("invalid guest contact: {0}")]
    InvalidGuestContact(String),

    #[error("buyer account {0} is not verified")]
    BuyerNotVerified(i64),

    #[error("{0} not found")]
    NotFound(String),

    #[error("ticket {0} not found")]
    TicketNotFound(Uuid),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("payment for intent {0} is already in progress")]
    PaymentInProgress(i64),

    #[error("payment gateway unavailable: {0}")]
    GatewayUnavailable(String),

    #[error("scan token signature is invalid")]
    SignatureInvalid,

    #[error("ticket belongs to event {actual}, not {expected}")]
    WrongEvent { expected: i64, actual: i64 },

    #[error("ticket already redeemed at {0}")]
    AlreadyRedeemed(DateTime<Utc>),

    #[error("ticket payment is not completed")]
    PaymentNotCompleted,

    #[error("event has already ended")]
    EventEnded,

    #[error("ticket cannot be cancelled: {0}")]
    NotCancellable(String),

    #[error("payment reference {0} is already taken")]
    DuplicateReference(String),

    #[error("internal inconsistency: {0}")]
    InternalInconsistency(String),

    #[error("qr code rendering failed: {0}")]
    QrRendering(String),

    #[error("database error")]
    Database(#[from] sqlx::Error),
}

pub type TicketingResult<T> = Result<T, TicketingError>;

impl TicketingError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TicketingError::Validation(_)
            | TicketingError::EventNotAvailable(_)
            | TicketingError::InvalidTicketType { .. }
            | TicketingError::InvalidGuestContact(_)
            | TicketingError::WrongEvent { .. }
            | TicketingError::PaymentNotCompleted
            | TicketingError::EventEnded
            | TicketingError::NotCancellable(_) => ErrorKind::Validation,
            TicketingError::CapacityExceeded { .. } => ErrorKind::CapacityExceeded,
            TicketingError::NotFound(_) | TicketingError::TicketNotFound(_) => ErrorKind::NotFound,
            TicketingError::BuyerNotVerified(_) | TicketingError::PermissionDenied(_) => {
                ErrorKind::PermissionDenied
            }
            TicketingError::PaymentInProgress(_) | TicketingError::AlreadyRedeemed(_) => {
                ErrorKind::Conflict
            }
            TicketingError::GatewayUnavailable(_) => ErrorKind::GatewayUnavailable,
            TicketingError::SignatureInvalid => ErrorKind::SignatureInvalid,
            TicketingError::DuplicateReference(_) | TicketingError::InternalInconsistency(_) => {
                ErrorKind::InternalInconsistency
            }
            TicketingError::QrRendering(_) | TicketingError::Database(_) => ErrorKind::Internal,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self.kind() {
            ErrorKind::Validation => StatusCode::BAD_REQUEST,
            ErrorKind::CapacityExceeded | ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::PermissionDenied => StatusCode::FORBIDDEN,
            ErrorKind::GatewayUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::SignatureInvalid => StatusCode::UNPROCESSABLE_ENTITY,
            ErrorKind::InternalInconsistency | ErrorKind::Internal => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            TicketingError::Validation(_) => "VALIDATION_ERROR",
            TicketingError::EventNotAvailable(_) => "EVENT_NOT_AVAILABLE",
            TicketingError::InvalidTicketType { .. } => "INVALID_TICKET_TYPE",
            TicketingError::CapacityExceeded { .. } => "CAPACITY_EXCEEDED",
            TicketingError::InvalidGuestContact(_) => "INVALID_GUEST_CONTACT",
            TicketingError::BuyerNotVerified(_) => "BUYER_NOT_VERIFIED",
            TicketingError::NotFound(_) => "NOT_FOUND",
            TicketingError::TicketNotFound(_) => "TICKET_NOT_FOUND",
            TicketingError::PermissionDenied(_) => "PERMISSION_DENIED",
            TicketingError::PaymentInProgress(_) => "PAYMENT_IN_PROGRESS",
            TicketingError::GatewayUnavailable(_) => "GATEWAY_UNAVAILABLE",
            TicketingError::SignatureInvalid => "INVALID_SIGNATURE",
            TicketingError::WrongEvent { .. } => "WRONG_EVENT",
            TicketingError::AlreadyRedeemed(_) => "ALREADY_REDEEMED",
            TicketingError::PaymentNotCompleted => "PAYMENT_NOT_COMPLETED",
            TicketingError::EventEnded => "EVENT_ENDED",
            TicketingError::NotCancellable(_) => "NOT_CANCELLABLE",
            TicketingError::DuplicateReference(_) => "DUPLICATE_REFERENCE",
            TicketingError::InternalInconsistency(_) => "INTERNAL_INCONSISTENCY",
            TicketingError::QrRendering(_) => "QR_RENDERING_FAILED",
            TicketingError::Database(_) => "DATABASE_ERROR",
        }
    }

    fn log(&self) {
        match self {
            TicketingError::SignatureInvalid => {
                warn!(target: "security", code = self.code(), "Rejected forged or corrupted scan token");
            }
            TicketingError::InternalInconsistency(msg) => {
                error!(target: "security", message = %msg, "Internal inconsistency detected");
            }
            TicketingError::Database(e) => {
                error!(error = ?e, "Database error");
            }
            TicketingError::GatewayUnavailable(msg) => {
                warn!(message = %msg, "Payment gateway unavailable");
            }
            _ => {
                tracing::debug!(code = self.code(), error = %self, "Request rejected");
            }
        }
    }
}

impl IntoResponse for TicketingError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        self.log();

        // Детали ошибок БД клиенту не отдаём
        let message = match &self {
            TicketingError::Database(_) => "A database error occurred".to_string(),
            other => other.to_string(),
        };

        let body = Json(json!({
            "success": false,
            "error": {
                "code": self.code(),
                "message": message,
            }
        }));

        let mut response = (status, body).into_response();
        if self.kind() == ErrorKind::GatewayUnavailable {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from_static("10"));
        }
        response
    }
}
