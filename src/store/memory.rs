//! Хранилище в памяти процесса: тесты и локальный запуск без Postgres.
//!
//! Каждая операция выполняется под одной короткой критической секцией и никогда
//! не держит блокировку через `.await`, поэтому контракт атомарности совпадает
//! с Postgres-реализацией.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use crate::error::{TicketingError, TicketingResult};
use crate::models::{
    Event, EventStatus, IntentStatus, PaymentIntent, Ticket, TicketStatus, TicketType, User,
    UserRole,
};
use crate::services::inventory;
use crate::store::{
    Cancellation, NewReservation, Redemption, Settlement, SuccessSettlement, TicketStore,
    SOLD_OUT_REASON,
};

#[derive(Default)]
struct Inner {
    users: HashMap<i64, User>,
    events: HashMap<i64, Event>,
    ticket_types: HashMap<i64, TicketType>,
    intents: HashMap<i64, PaymentIntent>,
    tickets: HashMap<Uuid, Ticket>,
    next_intent_id: i64,
}

impl Inner {
    fn final_tickets(&self, intent_id: i64) -> Vec<Ticket> {
        let mut tickets: Vec<Ticket> = self
            .tickets
            .values()
            .filter(|t| t.intent_id == intent_id && !t.is_provisional)
            .cloned()
            .collect();
        tickets.sort_by(|a, b| a.ticket_number.cmp(&b.ticket_number));
        tickets
    }

    fn intent(&self, intent_id: i64) -> TicketingResult<PaymentIntent> {
        self.intents
            .get(&intent_id)
            .cloned()
            .ok_or_else(|| TicketingError::NotFound(format!("payment intent {}", intent_id)))
    }

    fn intent_mut(&mut self, intent_id: i64) -> TicketingResult<&mut PaymentIntent> {
        self.intents
            .get_mut(&intent_id)
            .ok_or_else(|| TicketingError::NotFound(format!("payment intent {}", intent_id)))
    }

    fn set_provisional_status(&mut self, intent_id: i64, status: TicketStatus, receipt: Option<&str>) {
        for ticket in self.tickets.values_mut() {
            if ticket.intent_id == intent_id && ticket.is_provisional {
                ticket.status = status;
                if let Some(receipt) = receipt {
                    ticket.receipt_id = Some(receipt.to_string());
                }
            }
        }
    }
}

#[derive(Default)]
pub struct MemoryTicketStore {
    inner: Mutex<Inner>,
}

impl MemoryTicketStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> TicketingResult<MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| TicketingError::InternalInconsistency("memory store lock poisoned".to_string()))
    }

    pub fn insert_user(&self, user: User) -> TicketingResult<()> {
        self.lock()?.users.insert(user.id, user);
        Ok(())
    }

    pub fn insert_event(&self, event: Event) -> TicketingResult<()> {
        self.lock()?.events.insert(event.id, event);
        Ok(())
    }

    pub fn insert_ticket_type(&self, ticket_type: TicketType) -> TicketingResult<()> {
        self.lock()?.ticket_types.insert(ticket_type.id, ticket_type);
        Ok(())
    }

    /// Демонстрационные данные для `DATABASE_URL=memory://`.
    pub fn with_demo_data() -> TicketingResult<Self> {
        let store = Self::new();
        let now = Utc::now();
        let password_hash = bcrypt::hash("organizer-demo", 4)
            .map_err(|e| TicketingError::InternalInconsistency(format!("demo hash failed: {}", e)))?;

        store.insert_user(User {
            id: 1,
            email: "organizer@eventhub.local".to_string(),
            name: "Demo Organizer".to_string(),
            password_hash,
            role: UserRole::Organizer,
            is_active: true,
            is_verified: true,
        })?;
        store.insert_event(Event {
            id: 1,
            organizer_id: 1,
            title: "Nairobi Jazz Night".to_string(),
            venue: Some("Carnivore Grounds".to_string()),
            status: EventStatus::Approved,
            is_published: true,
            start_date: now + Duration::days(14),
            end_date: now + Duration::days(14) + Duration::hours(5),
        })?;
        store.insert_ticket_type(TicketType {
            id: 1,
            event_id: 1,
            name: "Regular".to_string(),
            price_cents: 150_000,
            capacity: 200,
            sold: 0,
            sales_start: None,
            sales_end: None,
        })?;
        store.insert_ticket_type(TicketType {
            id: 2,
            event_id: 1,
            name: "VIP".to_string(),
            price_cents: 500_000,
            capacity: 20,
            sold: 0,
            sales_start: None,
            sales_end: None,
        })?;
        Ok(store)
    }
}

#[async_trait]
impl TicketStore for MemoryTicketStore {
    async fn find_event(&self, event_id: i64) -> TicketingResult<Option<Event>> {
        Ok(self.lock()?.events.get(&event_id).cloned())
    }

    async fn find_ticket_type(&self, ticket_type_id: i64) -> TicketingResult<Option<TicketType>> {
        Ok(self.lock()?.ticket_types.get(&ticket_type_id).cloned())
    }

    async fn list_ticket_types(&self, event_id: i64) -> TicketingResult<Vec<TicketType>> {
        let inner = self.lock()?;
        let mut types: Vec<TicketType> = inner
            .ticket_types
            .values()
            .filter(|tt| tt.event_id == event_id)
            .cloned()
            .collect();
        types.sort_by_key(|tt| tt.id);
        Ok(types)
    }

    async fn find_user(&self, user_id: i64) -> TicketingResult<Option<User>> {
        Ok(self.lock()?.users.get(&user_id).cloned())
    }

    async fn find_user_by_email(&self, email: &str) -> TicketingResult<Option<User>> {
        Ok(self
            .lock()?
            .users
            .values()
            .find(|u| u.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    async fn create_reservation(
        &self,
        reservation: NewReservation,
    ) -> TicketingResult<(PaymentIntent, Ticket)> {
        let mut inner = self.lock()?;
        if inner.intents.values().any(|i| i.reference == reservation.reference) {
            return Err(TicketingError::DuplicateReference(reservation.reference));
        }

        inner.next_intent_id += 1;
        let intent_id = inner.next_intent_id;

        let intent = PaymentIntent {
            id: intent_id,
            reference: reservation.reference,
            buyer: reservation.buyer.clone(),
            event_id: reservation.event_id,
            ticket_type_id: reservation.ticket_type_id,
            quantity: reservation.quantity,
            unit_price_cents: reservation.unit_price_cents,
            amount_cents: reservation.amount_cents,
            phone: None,
            correlation_id: None,
            receipt_id: None,
            status: IntentStatus::Pending,
            failure_reason: None,
            provisional_ticket_id: Some(reservation.provisional_ticket_id),
            initiated_at: None,
            created_at: reservation.created_at,
            completed_at: None,
        };
        let ticket = Ticket {
            id: reservation.provisional_ticket_id,
            ticket_number: reservation.provisional_number,
            intent_id,
            event_id: reservation.event_id,
            ticket_type_id: reservation.ticket_type_id,
            owner: reservation.buyer,
            quantity: reservation.quantity,
            price_cents: reservation.amount_cents,
            status: TicketStatus::Pending,
            is_provisional: true,
            scan_token: None,
            receipt_id: None,
            redeemed_at: None,
            redeemed_by: None,
            created_at: reservation.created_at,
            cancelled_at: None,
        };

        inner.intents.insert(intent_id, intent.clone());
        inner.tickets.insert(ticket.id, ticket.clone());
        Ok((intent, ticket))
    }

    async fn find_intent(&self, intent_id: i64) -> TicketingResult<Option<PaymentIntent>> {
        Ok(self.lock()?.intents.get(&intent_id).cloned())
    }

    async fn find_intent_by_correlation(
        &self,
        correlation_id: &str,
    ) -> TicketingResult<Option<PaymentIntent>> {
        Ok(self
            .lock()?
            .intents
            .values()
            .find(|i| i.correlation_id.as_deref() == Some(correlation_id))
            .cloned())
    }

    async fn find_ticket(&self, ticket_id: Uuid) -> TicketingResult<Option<Ticket>> {
        Ok(self.lock()?.tickets.get(&ticket_id).cloned())
    }

    async fn tickets_for_intent(&self, intent_id: i64) -> TicketingResult<Vec<Ticket>> {
        let inner = self.lock()?;
        let mut tickets: Vec<Ticket> = inner
            .tickets
            .values()
            .filter(|t| t.intent_id == intent_id)
            .cloned()
            .collect();
        tickets.sort_by(|a, b| (!a.is_provisional, &a.ticket_number).cmp(&(!b.is_provisional, &b.ticket_number)));
        Ok(tickets)
    }

    async fn tickets_for_user(&self, user_id: i64) -> TicketingResult<Vec<Ticket>> {
        let inner = self.lock()?;
        let mut tickets: Vec<Ticket> = inner
            .tickets
            .values()
            .filter(|t| !t.is_provisional && t.owner.user_id() == Some(user_id))
            .cloned()
            .collect();
        tickets.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.ticket_number.cmp(&b.ticket_number)));
        Ok(tickets)
    }

    async fn claim_initiation(
        &self,
        intent_id: i64,
        phone: &str,
        now: DateTime<Utc>,
    ) -> TicketingResult<bool> {
        let mut inner = self.lock()?;
        let intent = inner.intent_mut(intent_id)?;
        if intent.status != IntentStatus::Pending || intent.initiated_at.is_some() {
            return Ok(false);
        }
        intent.initiated_at = Some(now);
        intent.phone = Some(phone.to_string());
        Ok(true)
    }

    async fn release_initiation(&self, intent_id: i64) -> TicketingResult<()> {
        let mut inner = self.lock()?;
        let intent = inner.intent_mut(intent_id)?;
        if intent.status == IntentStatus::Pending && intent.correlation_id.is_none() {
            intent.initiated_at = None;
        }
        Ok(())
    }

    async fn attach_correlation(
        &self,
        intent_id: i64,
        correlation_id: &str,
    ) -> TicketingResult<PaymentIntent> {
        let mut inner = self.lock()?;
        if inner
            .intents
            .values()
            .any(|i| i.id != intent_id && i.correlation_id.as_deref() == Some(correlation_id))
        {
            return Err(TicketingError::InternalInconsistency(format!(
                "correlation id {} already belongs to another intent",
                correlation_id
            )));
        }
        let intent = inner.intent_mut(intent_id)?;
        if intent.correlation_id.is_none() {
            intent.correlation_id = Some(correlation_id.to_string());
        }
        Ok(intent.clone())
    }

    async fn settle_success(&self, success: SuccessSettlement) -> TicketingResult<Settlement> {
        let mut guard = self.lock()?;
        let inner = &mut *guard;
        let intent = inner.intent(success.intent_id)?;

        // Идемпотентность: терминальный intent не трогаем
        if intent.status.is_terminal() {
            let tickets = inner.final_tickets(intent.id);
            return Ok(Settlement::AlreadySettled { intent, tickets });
        }
        if intent.buyer != success.expected_owner {
            return Err(TicketingError::InternalInconsistency(format!(
                "tickets for intent {} were minted for a different owner",
                intent.id
            )));
        }
        if success.tickets.len() != intent.quantity as usize {
            return Err(TicketingError::InternalInconsistency(format!(
                "intent {} expects {} tickets, got {}",
                intent.id,
                intent.quantity,
                success.tickets.len()
            )));
        }
        let duplicate = success.tickets.iter().any(|new| {
            inner.tickets.contains_key(&new.id)
                || inner.tickets.values().any(|t| {
                    t.ticket_number == new.ticket_number
                        || (t.scan_token.is_some() && t.scan_token == new.scan_token)
                })
        });
        if duplicate {
            return Err(TicketingError::InternalInconsistency(format!(
                "duplicate ticket identity while settling intent {}",
                intent.id
            )));
        }
        let next_status = intent.status.transition(IntentStatus::Completed)?;

        let ticket_type = inner
            .ticket_types
            .get_mut(&intent.ticket_type_id)
            .ok_or_else(|| {
                TicketingError::InternalInconsistency(format!(
                    "ticket type {} of intent {} is missing",
                    intent.ticket_type_id, intent.id
                ))
            })?;

        if inventory::commit_sale(ticket_type, intent.quantity).is_err() {
            let failed = intent.status.transition(IntentStatus::Failed)?;
            let stored = inner.intent_mut(intent.id)?;
            stored.status = failed;
            stored.failure_reason = Some(SOLD_OUT_REASON.to_string());
            stored.receipt_id = success.receipt_id.clone();
            stored.completed_at = Some(success.settled_at);
            let intent = stored.clone();
            inner.set_provisional_status(intent.id, TicketStatus::Failed, success.receipt_id.as_deref());
            return Ok(Settlement::SoldOut { intent });
        }

        for ticket in &success.tickets {
            inner.tickets.insert(ticket.id, ticket.clone());
        }
        let stored = inner.intent_mut(intent.id)?;
        stored.status = next_status;
        stored.receipt_id = success.receipt_id.clone();
        stored.completed_at = Some(success.settled_at);
        let intent = stored.clone();
        inner.set_provisional_status(intent.id, TicketStatus::Completed, success.receipt_id.as_deref());

        let tickets = inner.final_tickets(intent.id);
        Ok(Settlement::Completed { intent, tickets })
    }

    async fn settle_failure(
        &self,
        intent_id: i64,
        reason: &str,
        settled_at: DateTime<Utc>,
    ) -> TicketingResult<Settlement> {
        let mut guard = self.lock()?;
        let inner = &mut *guard;
        let intent = inner.intent(intent_id)?;
        if intent.status.is_terminal() {
            let tickets = inner.final_tickets(intent.id);
            return Ok(Settlement::AlreadySettled { intent, tickets });
        }
        let next_status = intent.status.transition(IntentStatus::Failed)?;
        let stored = inner.intent_mut(intent_id)?;
        stored.status = next_status;
        stored.failure_reason = Some(reason.to_string());
        stored.completed_at = Some(settled_at);
        let intent = stored.clone();
        inner.set_provisional_status(intent_id, TicketStatus::Failed, None);
        Ok(Settlement::Failed { intent })
    }

    async fn redeem_ticket(
        &self,
        ticket_id: Uuid,
        operator_id: i64,
        now: DateTime<Utc>,
    ) -> TicketingResult<Option<Redemption>> {
        let mut inner = self.lock()?;
        let Some(ticket) = inner.tickets.get_mut(&ticket_id) else {
            return Ok(None);
        };
        let redeemable = !ticket.is_provisional
            && ticket.status == TicketStatus::Completed
            && ticket.redeemed_at.is_none();
        if !redeemable {
            return Ok(Some(Redemption::Rejected(ticket.clone())));
        }
        ticket.redeemed_at = Some(now);
        ticket.redeemed_by = Some(operator_id);
        Ok(Some(Redemption::Redeemed(ticket.clone())))
    }

    async fn cancel_ticket(
        &self,
        ticket_id: Uuid,
        now: DateTime<Utc>,
    ) -> TicketingResult<Option<Cancellation>> {
        let mut guard = self.lock()?;
        let inner = &mut *guard;
        let Some(ticket) = inner.tickets.get(&ticket_id).cloned() else {
            return Ok(None);
        };
        if ticket.status == TicketStatus::Cancelled {
            return Ok(Some(Cancellation::AlreadyCancelled(ticket)));
        }
        if ticket.is_provisional || ticket.status != TicketStatus::Completed || ticket.is_redeemed() {
            return Ok(Some(Cancellation::Rejected(ticket)));
        }

        let ticket_type = inner.ticket_types.get_mut(&ticket.ticket_type_id).ok_or_else(|| {
            TicketingError::InternalInconsistency(format!(
                "ticket type {} of ticket {} is missing",
                ticket.ticket_type_id, ticket.id
            ))
        })?;
        inventory::restock(ticket_type, ticket.quantity)?;
        let ticket_type = ticket_type.clone();

        let stored = inner.tickets.get_mut(&ticket_id).ok_or_else(|| {
            TicketingError::InternalInconsistency(format!("ticket {} vanished", ticket_id))
        })?;
        stored.status = TicketStatus::Cancelled;
        stored.cancelled_at = Some(now);
        Ok(Some(Cancellation::Cancelled {
            ticket: stored.clone(),
            ticket_type,
        }))
    }

    async fn list_intents(
        &self,
        status: Option<IntentStatus>,
        limit: i64,
        offset: i64,
    ) -> TicketingResult<(Vec<PaymentIntent>, i64)> {
        let inner = self.lock()?;
        let mut matching: Vec<&PaymentIntent> = inner
            .intents
            .values()
            .filter(|i| status.map_or(true, |s| i.status == s))
            .collect();
        matching.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
        let total = matching.len() as i64;
        let page = matching
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .cloned()
            .collect();
        Ok((page, total))
    }

    async fn stale_pending_intents(
        &self,
        older_than: DateTime<Utc>,
        limit: i64,
    ) -> TicketingResult<Vec<PaymentIntent>> {
        let inner = self.lock()?;
        let mut stale: Vec<PaymentIntent> = inner
            .intents
            .values()
            .filter(|i| {
                i.status == IntentStatus::Pending
                    && i.correlation_id.is_some()
                    && i.initiated_at.map_or(false, |at| at < older_than)
            })
            .cloned()
            .collect();
        stale.sort_by_key(|i| i.initiated_at);
        stale.truncate(limit.max(0) as usize);
        Ok(stale)
    }

    async fn release_stale_claims(&self, older_than: DateTime<Utc>) -> TicketingResult<u64> {
        let mut inner = self.lock()?;
        let mut released = 0;
        for intent in inner.intents.values_mut() {
            let stale_claim = intent.status == IntentStatus::Pending
                && intent.correlation_id.is_none()
                && intent.initiated_at.map_or(false, |at| at < older_than);
            if stale_claim {
                intent.initiated_at = None;
                released += 1;
            }
        }
        Ok(released)
    }
}
