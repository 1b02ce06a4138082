use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::TicketingError;
use crate::models::BuyerIdentity;

// Crockford base32: без I, L, O, U
const REFERENCE_ALPHABET: &[u8] = b"0123456789ABCDEFGHJKMNPQRSTVWXYZ";
const REFERENCE_PREFIX: &str = "TX";
const REFERENCE_RANDOM_LEN: usize = 10;

/// Жизненный цикл попытки оплаты: `PENDING -> {COMPLETED, FAILED}`.
/// Терминальные состояния окончательны.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IntentStatus {
    Pending,
    Completed,
    Failed,
}

impl IntentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntentStatus::Pending => "PENDING",
            IntentStatus::Completed => "COMPLETED",
            IntentStatus::Failed => "FAILED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "PENDING" => Some(IntentStatus::Pending),
            "COMPLETED" => Some(IntentStatus::Completed),
            "FAILED" => Some(IntentStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, IntentStatus::Pending)
    }

    /// Единственная допустимая функция перехода. Любой переход из терминального
    /// состояния или обратно в `PENDING` отклоняется.
    pub fn transition(self, to: IntentStatus) -> Result<IntentStatus, TicketingError> {
        match (self, to) {
            (IntentStatus::Pending, IntentStatus::Completed)
            | (IntentStatus::Pending, IntentStatus::Failed) => Ok(to),
            (from, to) => Err(TicketingError::InternalInconsistency(format!(
                "illegal payment intent transition {} -> {}",
                from.as_str(),
                to.as_str()
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PaymentIntent {
    pub id: i64,
    /// Идемпотентная ссылка, передаваемая шлюзу как AccountReference.
    pub reference: String,
    pub buyer: BuyerIdentity,
    pub event_id: i64,
    pub ticket_type_id: i64,
    pub quantity: i32,
    pub unit_price_cents: i64,
    pub amount_cents: i64,
    pub phone: Option<String>,
    pub correlation_id: Option<String>,
    pub receipt_id: Option<String>,
    pub status: IntentStatus,
    pub failure_reason: Option<String>,
    pub provisional_ticket_id: Option<Uuid>,
    pub initiated_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl PaymentIntent {
    /// Короткая ссылка для шлюза (AccountReference допускает не более 12 символов).
    /// Гостю она служит ключом доступа к intent: 50 случайных бит.
    pub fn new_reference() -> String {
        let mut rng = rand::thread_rng();
        let random: String = (0..REFERENCE_RANDOM_LEN)
            .map(|_| REFERENCE_ALPHABET[rng.gen_range(0..REFERENCE_ALPHABET.len())] as char)
            .collect();
        format!("{}{}", REFERENCE_PREFIX, random)
    }

    /// Предъявленная ссылка совпадает со ссылкой intent (без учёта регистра).
    pub fn matches_reference(&self, reference: Option<&str>) -> bool {
        reference.map_or(false, |r| r.trim().eq_ignore_ascii_case(&self.reference))
    }

    /// Сумма в целых единицах валюты, которую принимает шлюз.
    pub fn gateway_amount(&self) -> i64 {
        (self.amount_cents + 99) / 100
    }
}
