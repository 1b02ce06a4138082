//! Слой хранения.
//!
//! Все изменения, охраняющие инварианты (счётчик продаж, терминальный переход
//! PaymentIntent, флаг погашения билета), выполняются одной атомарной операцией
//! хранилища с блокировкой только затрагиваемой строки.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::TicketingResult;
use crate::models::{BuyerIdentity, Event, IntentStatus, PaymentIntent, Ticket, TicketType, User};

pub use memory::MemoryTicketStore;
pub use postgres::PgTicketStore;

/// Данные для атомарного создания PaymentIntent и предварительного билета.
#[derive(Debug, Clone)]
pub struct NewReservation {
    pub reference: String,
    pub buyer: BuyerIdentity,
    pub event_id: i64,
    pub ticket_type_id: i64,
    pub quantity: i32,
    pub unit_price_cents: i64,
    pub amount_cents: i64,
    pub provisional_ticket_id: Uuid,
    pub provisional_number: String,
    pub created_at: DateTime<Utc>,
}

/// Успешный исход оплаты вместе с заранее подписанными финальными билетами.
#[derive(Debug, Clone)]
pub struct SuccessSettlement {
    pub intent_id: i64,
    pub receipt_id: Option<String>,
    /// Владелец, под которого выпущены билеты; сверяется с сохранённым в intent.
    pub expected_owner: BuyerIdentity,
    pub tickets: Vec<Ticket>,
    pub settled_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub enum Settlement {
    /// Этот вызов перевёл intent в COMPLETED и выпустил билеты.
    Completed { intent: PaymentIntent, tickets: Vec<Ticket> },
    /// Intent уже был в терминальном состоянии; билеты возвращаются как есть.
    AlreadySettled { intent: PaymentIntent, tickets: Vec<Ticket> },
    /// Этот вызов перевёл intent в FAILED.
    Failed { intent: PaymentIntent },
    /// Оплата прошла, но места закончились: intent переведён в FAILED (`sold_out`).
    SoldOut { intent: PaymentIntent },
}

#[derive(Debug, Clone)]
pub enum Redemption {
    Redeemed(Ticket),
    /// Условное обновление не сработало; текущее состояние билета.
    Rejected(Ticket),
}

#[derive(Debug, Clone)]
pub enum Cancellation {
    Cancelled { ticket: Ticket, ticket_type: TicketType },
    AlreadyCancelled(Ticket),
    /// Билет нельзя отменить (погашен, не оплачен, предварительный).
    Rejected(Ticket),
}

pub const SOLD_OUT_REASON: &str = "sold_out";

#[async_trait]
pub trait TicketStore: Send + Sync {
    async fn find_event(&self, event_id: i64) -> TicketingResult<Option<Event>>;
    async fn find_ticket_type(&self, ticket_type_id: i64) -> TicketingResult<Option<TicketType>>;
    async fn list_ticket_types(&self, event_id: i64) -> TicketingResult<Vec<TicketType>>;
    async fn find_user(&self, user_id: i64) -> TicketingResult<Option<User>>;
    async fn find_user_by_email(&self, email: &str) -> TicketingResult<Option<User>>;

    /// Всё или ничего: intent (PENDING) и связанный предварительный билет.
    async fn create_reservation(
        &self,
        reservation: NewReservation,
    ) -> TicketingResult<(PaymentIntent, Ticket)>;

    async fn find_intent(&self, intent_id: i64) -> TicketingResult<Option<PaymentIntent>>;
    async fn find_intent_by_correlation(
        &self,
        correlation_id: &str,
    ) -> TicketingResult<Option<PaymentIntent>>;

    /// Intents для персонала, новые первыми. Возвращает страницу и общее число.
    async fn list_intents(
        &self,
        status: Option<IntentStatus>,
        limit: i64,
        offset: i64,
    ) -> TicketingResult<(Vec<PaymentIntent>, i64)>;

    async fn find_ticket(&self, ticket_id: Uuid) -> TicketingResult<Option<Ticket>>;
    /// Все билеты intent, включая предварительный.
    async fn tickets_for_intent(&self, intent_id: i64) -> TicketingResult<Vec<Ticket>>;
    /// Финальные билеты зарегистрированного покупателя.
    async fn tickets_for_user(&self, user_id: i64) -> TicketingResult<Vec<Ticket>>;

    /// Занимает слот инициации оплаты. `false`, если intent не PENDING или уже инициирован.
    async fn claim_initiation(
        &self,
        intent_id: i64,
        phone: &str,
        now: DateTime<Utc>,
    ) -> TicketingResult<bool>;
    /// Освобождает слот, если шлюз так и не выдал correlation id.
    async fn release_initiation(&self, intent_id: i64) -> TicketingResult<()>;
    async fn attach_correlation(
        &self,
        intent_id: i64,
        correlation_id: &str,
    ) -> TicketingResult<PaymentIntent>;

    async fn settle_success(&self, success: SuccessSettlement) -> TicketingResult<Settlement>;
    async fn settle_failure(
        &self,
        intent_id: i64,
        reason: &str,
        settled_at: DateTime<Utc>,
    ) -> TicketingResult<Settlement>;

    async fn redeem_ticket(
        &self,
        ticket_id: Uuid,
        operator_id: i64,
        now: DateTime<Utc>,
    ) -> TicketingResult<Option<Redemption>>;

    async fn cancel_ticket(
        &self,
        ticket_id: Uuid,
        now: DateTime<Utc>,
    ) -> TicketingResult<Option<Cancellation>>;

    /// PENDING intents с correlation id, инициированные раньше `older_than`.
    async fn stale_pending_intents(
        &self,
        older_than: DateTime<Utc>,
        limit: i64,
    ) -> TicketingResult<Vec<PaymentIntent>>;
    /// Снимает «зависшие» слоты инициации без correlation id. Возвращает число снятых.
    async fn release_stale_claims(&self, older_than: DateTime<Utc>) -> TicketingResult<u64>;
}
