//! reservation.rs
//!
//! Резервирование: пара PENDING PaymentIntent + предварительный билет.
//! Проверка остатка здесь оптимистичная, счётчик `sold` не меняется; окончательно
//! вместимость проверяется при подтверждении оплаты.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;
use validator::Validate;

use crate::error::{TicketingError, TicketingResult};
use crate::models::{BuyerIdentity, GuestContact, PaymentIntent, Ticket, User};
use crate::services::inventory;
use crate::store::{NewReservation, TicketStore};

// Ссылка случайная; совпадение почти невозможно, но не исключено
const REFERENCE_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct GuestContactInput {
    #[validate(length(min = 2, max = 255, message = "Guest name must be 2-255 characters"))]
    pub name: String,
    #[validate(email(message = "Invalid email format"))]
    pub email: String,
}

impl GuestContactInput {
    fn into_contact(self) -> TicketingResult<GuestContact> {
        let normalized = GuestContactInput {
            name: self.name.trim().to_string(),
            email: self.email.trim().to_lowercase(),
        };
        normalized
            .validate()
            .map_err(|e| TicketingError::InvalidGuestContact(e.to_string()))?;
        Ok(GuestContact {
            name: normalized.name,
            email: normalized.email,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReservationRequest {
    pub event_id: i64,
    pub ticket_type_id: i64,
    pub quantity: i32,
    #[serde(default)]
    pub guest: Option<GuestContactInput>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Reservation {
    pub intent: PaymentIntent,
    pub provisional_ticket: Ticket,
}

pub struct ReservationManager {
    store: Arc<dyn TicketStore>,
    max_per_order: i32,
}

impl ReservationManager {
    pub fn new(store: Arc<dyn TicketStore>, max_per_order: i32) -> Self {
        Self { store, max_per_order }
    }

    /// Владелец фиксируется здесь: аутентифицированный запрос всегда покупает
    /// на свой аккаунт, анонимный - как гость с обязательными контактами.
    fn resolve_buyer(&self, buyer: Option<&User>, guest: Option<GuestContactInput>) -> TicketingResult<BuyerIdentity> {
        match buyer {
            Some(user) => {
                if !user.is_active || !user.is_verified {
                    return Err(TicketingError::BuyerNotVerified(user.id));
                }
                if guest.is_some() {
                    debug!(user_id = user.id, "Ignoring guest contact on authenticated reservation");
                }
                Ok(BuyerIdentity::Registered { user_id: user.id })
            }
            None => {
                let guest = guest.ok_or_else(|| {
                    TicketingError::InvalidGuestContact("guest name and email are required".to_string())
                })?;
                Ok(BuyerIdentity::Guest(guest.into_contact()?))
            }
        }
    }

    pub async fn create_reservation(
        &self,
        buyer: Option<&User>,
        request: ReservationRequest,
    ) -> TicketingResult<Reservation> {
        let now = Utc::now();

        if request.quantity < 1 || request.quantity > self.max_per_order {
            return Err(TicketingError::Validation(format!(
                "quantity must be between 1 and {}",
                self.max_per_order
            )));
        }
        let buyer = self.resolve_buyer(buyer, request.guest)?;

        let event = self
            .store
            .find_event(request.event_id)
            .await?
            .ok_or_else(|| TicketingError::NotFound(format!("event {}", request.event_id)))?;
        if !event.is_open_for_sales(now) {
            return Err(TicketingError::EventNotAvailable(event.id));
        }

        let ticket_type = self
            .store
            .find_ticket_type(request.ticket_type_id)
            .await?
            .filter(|tt| tt.event_id == event.id)
            .ok_or(TicketingError::InvalidTicketType {
                event_id: event.id,
                ticket_type_id: request.ticket_type_id,
            })?;
        if !ticket_type.is_on_sale(now) {
            return Err(TicketingError::Validation(format!(
                "sales for ticket type {} are closed",
                ticket_type.name
            )));
        }

        inventory::reserve_capacity(&ticket_type, request.quantity)?;
        let amount_cents = ticket_type
            .price_for(request.quantity)
            .ok_or_else(|| TicketingError::Validation("order amount is too large".to_string()))?;

        let provisional_ticket_id = Uuid::new_v4();
        let mut attempt = 0;
        let (intent, provisional_ticket) = loop {
            attempt += 1;
            let reservation = NewReservation {
                reference: PaymentIntent::new_reference(),
                buyer: buyer.clone(),
                event_id: event.id,
                ticket_type_id: ticket_type.id,
                quantity: request.quantity,
                unit_price_cents: ticket_type.price_cents,
                amount_cents,
                provisional_ticket_id,
                provisional_number: Ticket::provisional_number(&provisional_ticket_id),
                created_at: now,
            };
            match self.store.create_reservation(reservation).await {
                Err(TicketingError::DuplicateReference(reference)) if attempt < REFERENCE_ATTEMPTS => {
                    warn!(%reference, attempt, "Payment reference collision, generating a new one");
                }
                other => break other?,
            }
        };

        info!(
            intent_id = intent.id,
            reference = %intent.reference,
            event_id = event.id,
            ticket_type_id = ticket_type.id,
            quantity = intent.quantity,
            guest = intent.buyer.is_guest(),
            "Reservation created"
        );
        Ok(Reservation {
            intent,
            provisional_ticket,
        })
    }
}
