//! issuance.rs
//!
//! Выпуск финальных билетов. `mint` только готовит подписанные билеты; в хранилище
//! они попадают атомарно вместе с переводом intent в COMPLETED
//! (см. `TicketStore::settle_success`), поэтому выпуск происходит ровно один раз.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{error, warn};
use uuid::Uuid;

use crate::error::{TicketingError, TicketingResult};
use crate::models::{BuyerIdentity, PaymentIntent, Ticket, TicketStatus};
use crate::services::notifier::{self, TicketEmail, TicketNotifier};
use crate::services::signing::TicketSigner;
use crate::store::TicketStore;

pub struct TicketIssuer {
    store: Arc<dyn TicketStore>,
    signer: TicketSigner,
    notifier: Arc<dyn TicketNotifier>,
}

impl TicketIssuer {
    pub fn new(store: Arc<dyn TicketStore>, signer: TicketSigner, notifier: Arc<dyn TicketNotifier>) -> Self {
        Self { store, signer, notifier }
    }

    /// Готовит `quantity` финальных билетов владельца intent.
    ///
    /// Владелец берётся только из intent. Если предварительный билет принадлежит
    /// кому-то другому, это дефект данных, а не повод выбрать одного из них.
    pub fn mint(
        &self,
        intent: &PaymentIntent,
        provisional: Option<&Ticket>,
        receipt_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> TicketingResult<Vec<Ticket>> {
        if let Some(provisional) = provisional {
            if provisional.intent_id != intent.id || provisional.owner != intent.buyer {
                return Err(TicketingError::InternalInconsistency(format!(
                    "provisional ticket {} does not match owner of intent {}",
                    provisional.id, intent.id
                )));
            }
        }

        let tickets = (0..intent.quantity)
            .map(|_| {
                let id = Uuid::new_v4();
                let token = self.signer.sign(id);
                Ticket {
                    id,
                    ticket_number: token.ticket_number(),
                    intent_id: intent.id,
                    event_id: intent.event_id,
                    ticket_type_id: intent.ticket_type_id,
                    owner: intent.buyer.clone(),
                    quantity: 1,
                    price_cents: intent.unit_price_cents,
                    status: TicketStatus::Completed,
                    is_provisional: false,
                    scan_token: Some(token.encode()),
                    receipt_id: receipt_id.map(str::to_string),
                    redeemed_at: None,
                    redeemed_by: None,
                    created_at: now,
                    cancelled_at: None,
                }
            })
            .collect();
        Ok(tickets)
    }

    /// Письмо с билетами. Вызывается после фиксации выпуска; ошибки не возвращаются.
    pub fn deliver(&self, intent: &PaymentIntent, tickets: &[Ticket]) {
        let store = self.store.clone();
        let sender = self.notifier.clone();
        let intent = intent.clone();
        let ticket_numbers: Vec<String> = tickets.iter().map(|t| t.ticket_number.clone()).collect();

        tokio::spawn(async move {
            let event_title = match store.find_event(intent.event_id).await {
                Ok(Some(event)) => event.title,
                Ok(None) => format!("event {}", intent.event_id),
                Err(e) => {
                    warn!(intent_id = intent.id, error = %e, "Could not load event for ticket email");
                    format!("event {}", intent.event_id)
                }
            };

            let recipient = match &intent.buyer {
                BuyerIdentity::Guest(contact) => Some((contact.email.clone(), contact.name.clone())),
                BuyerIdentity::Registered { user_id } => match store.find_user(*user_id).await {
                    Ok(Some(user)) => Some((user.email, user.name)),
                    Ok(None) => None,
                    Err(e) => {
                        error!(intent_id = intent.id, error = %e, "Could not load buyer for ticket email");
                        None
                    }
                },
            };
            let Some((recipient_email, recipient_name)) = recipient else {
                warn!(intent_id = intent.id, "No recipient for ticket email");
                return;
            };

            notifier::dispatch(
                sender,
                TicketEmail {
                    recipient_email,
                    recipient_name,
                    event_title,
                    ticket_numbers,
                    quantity: intent.quantity,
                    total_price_cents: intent.amount_cents,
                    pdf_bytes: None,
                },
            );
        });
    }
}
