//! verification.rs
//!
//! Проверка QR-кода на входе и погашение билета.

use chrono::Utc;
use constant_time_eq::constant_time_eq;
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::{TicketingError, TicketingResult};
use crate::models::{Ticket, TicketStatus, User};
use crate::services::signing::TicketSigner;
use crate::store::{Redemption, TicketStore};

pub struct TicketVerifier {
    store: Arc<dyn TicketStore>,
    signer: TicketSigner,
}

impl TicketVerifier {
    pub fn new(store: Arc<dyn TicketStore>, signer: TicketSigner) -> Self {
        Self { store, signer }
    }

    /// Проверяет подпись, принадлежность событию и однократность, затем гасит билет.
    /// Погашение - единственный условный UPDATE; из конкурентных сканов проходит один.
    pub async fn verify_and_redeem(&self, scan_token: &str, event_id: i64, operator: &User) -> TicketingResult<Ticket> {
        let token = self.signer.verify(scan_token)?;

        let event = self
            .store
            .find_event(event_id)
            .await?
            .ok_or_else(|| TicketingError::NotFound(format!("event {}", event_id)))?;
        if !operator.role.is_staff() && event.organizer_id != operator.id {
            return Err(TicketingError::PermissionDenied(
                "only event staff can scan tickets".to_string(),
            ));
        }

        let ticket = self
            .store
            .find_ticket(token.ticket_id)
            .await?
            .ok_or(TicketingError::TicketNotFound(token.ticket_id))?;

        // Подпись верна, но токен должен совпадать с выданным
        let issued = ticket.scan_token.as_deref().unwrap_or_default();
        if !constant_time_eq(issued.as_bytes(), token.encode().as_bytes()) {
            warn!(target: "security", ticket_id = %ticket.id, "Scan token differs from the issued one");
            return Err(TicketingError::SignatureInvalid);
        }

        if ticket.event_id != event_id {
            return Err(TicketingError::WrongEvent {
                expected: event_id,
                actual: ticket.event_id,
            });
        }
        if let Some(redeemed_at) = ticket.redeemed_at {
            return Err(TicketingError::AlreadyRedeemed(redeemed_at));
        }
        if ticket.is_provisional || ticket.status != TicketStatus::Completed {
            return Err(TicketingError::PaymentNotCompleted);
        }
        let now = Utc::now();
        if event.has_ended(now) {
            return Err(TicketingError::EventEnded);
        }

        match self.store.redeem_ticket(ticket.id, operator.id, now).await? {
            Some(Redemption::Redeemed(ticket)) => {
                info!(
                    ticket_id = %ticket.id,
                    ticket_number = %ticket.ticket_number,
                    event_id,
                    operator_id = operator.id,
                    "Ticket redeemed"
                );
                Ok(ticket)
            }
            Some(Redemption::Rejected(current)) => match current.redeemed_at {
                Some(redeemed_at) => Err(TicketingError::AlreadyRedeemed(redeemed_at)),
                None => Err(TicketingError::PaymentNotCompleted),
            },
            None => Err(TicketingError::TicketNotFound(ticket.id)),
        }
    }
}
