//! Отмена оплаченного билета до начала события.
//!
//! Компенсирующая операция: билет CANCELLED и `sold -= quantity` в одной
//! транзакции хранилища. Повторная отмена возвращает тот же результат.

use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::error::{TicketingError, TicketingResult};
use crate::models::{BuyerIdentity, Ticket, TicketStatus, User, UserRole};
use crate::services::inventory::InventoryLedger;
use crate::store::{Cancellation, TicketStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CancellationStatus {
    Cancelled,
    AlreadyCancelled,
}

#[derive(Debug, Clone, Serialize)]
pub struct CancellationResult {
    pub status: CancellationStatus,
    pub ticket: Ticket,
}

/// Кто обращается к билету: аккаунт и/или email гостя.
#[derive(Debug, Clone, Copy, Default)]
pub struct TicketRequester<'a> {
    pub user: Option<&'a User>,
    pub guest_email: Option<&'a str>,
}

impl TicketRequester<'_> {
    pub(crate) fn may_access(&self, owner: &BuyerIdentity) -> bool {
        if self.user.map_or(false, |u| u.role == UserRole::Admin) {
            return true;
        }
        match owner {
            BuyerIdentity::Registered { user_id } => self.user.map_or(false, |u| u.id == *user_id),
            BuyerIdentity::Guest(contact) => self
                .guest_email
                .map_or(false, |email| email.trim().eq_ignore_ascii_case(&contact.email)),
        }
    }
}

pub struct CancellationService {
    store: Arc<dyn TicketStore>,
    ledger: Arc<InventoryLedger>,
}

impl CancellationService {
    pub fn new(store: Arc<dyn TicketStore>, ledger: Arc<InventoryLedger>) -> Self {
        Self { store, ledger }
    }

    pub async fn cancel_ticket(&self, ticket_id: Uuid, requester: TicketRequester<'_>) -> TicketingResult<CancellationResult> {
        let ticket = self
            .store
            .find_ticket(ticket_id)
            .await?
            .ok_or(TicketingError::TicketNotFound(ticket_id))?;

        if !requester.may_access(&ticket.owner) {
            return Err(TicketingError::PermissionDenied(
                "ticket belongs to another buyer".to_string(),
            ));
        }
        if ticket.status == TicketStatus::Cancelled {
            return Ok(CancellationResult {
                status: CancellationStatus::AlreadyCancelled,
                ticket,
            });
        }

        let now = Utc::now();
        let event = self
            .store
            .find_event(ticket.event_id)
            .await?
            .ok_or_else(|| TicketingError::InternalInconsistency(format!("event {} of ticket {} is missing", ticket.event_id, ticket.id)))?;
        if event.has_started(now) {
            return Err(TicketingError::NotCancellable("event has already started".to_string()));
        }

        match self.store.cancel_ticket(ticket_id, now).await? {
            Some(Cancellation::Cancelled { ticket, ticket_type }) => {
                info!(
                    ticket_id = %ticket.id,
                    ticket_type_id = ticket_type.id,
                    sold = ticket_type.sold,
                    "Ticket cancelled, capacity restocked"
                );
                self.ledger.invalidate(ticket.event_id).await;
                Ok(CancellationResult {
                    status: CancellationStatus::Cancelled,
                    ticket,
                })
            }
            Some(Cancellation::AlreadyCancelled(ticket)) => Ok(CancellationResult {
                status: CancellationStatus::AlreadyCancelled,
                ticket,
            }),
            Some(Cancellation::Rejected(ticket)) => {
                let reason = if ticket.is_redeemed() {
                    "ticket has already been redeemed"
                } else {
                    "only paid tickets can be cancelled"
                };
                Err(TicketingError::NotCancellable(reason.to_string()))
            }
            None => Err(TicketingError::TicketNotFound(ticket_id)),
        }
    }
}
