use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::BuyerIdentity;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TicketStatus {
    Pending,
    Completed,
    Failed,
    Cancelled,
}

impl TicketStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TicketStatus::Pending => "PENDING",
            TicketStatus::Completed => "COMPLETED",
            TicketStatus::Failed => "FAILED",
            TicketStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "PENDING" => Some(TicketStatus::Pending),
            "COMPLETED" => Some(TicketStatus::Completed),
            "FAILED" => Some(TicketStatus::Failed),
            "CANCELLED" => Some(TicketStatus::Cancelled),
            _ => None,
        }
    }
}

/// Билет. Предварительный (`is_provisional`) создаётся при резервировании,
/// финальные - по одному на единицу количества после подтверждения оплаты.
#[derive(Debug, Clone, Serialize)]
pub struct Ticket {
    pub id: Uuid,
    pub ticket_number: String,
    pub intent_id: i64,
    pub event_id: i64,
    pub ticket_type_id: i64,
    pub owner: BuyerIdentity,
    pub quantity: i32,
    pub price_cents: i64,
    pub status: TicketStatus,
    pub is_provisional: bool,
    pub scan_token: Option<String>,
    pub receipt_id: Option<String>,
    pub redeemed_at: Option<DateTime<Utc>>,
    pub redeemed_by: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl Ticket {
    pub fn is_redeemed(&self) -> bool {
        self.redeemed_at.is_some()
    }

    /// Номер-заглушка предварительного билета до выпуска финальных.
    pub fn provisional_number(id: &Uuid) -> String {
        let raw = id.simple().to_string().to_uppercase();
        format!("PND-{}", &raw[..12])
    }
}
