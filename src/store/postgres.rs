//! Postgres-хранилище.
//!
//! Терминальный переход intent выполняется под `SELECT ... FOR UPDATE` одной
//! строки intent; счётчик продаж и флаг погашения меняются условными UPDATE,
//! поэтому гонки разрешаются на уровне БД.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::error::{TicketingError, TicketingResult};
use crate::models::{
    BuyerIdentity, Event, EventStatus, IntentStatus, PaymentIntent, Ticket, TicketStatus,
    TicketType, User, UserRole,
};
use crate::store::{
    Cancellation, NewReservation, Redemption, Settlement, SuccessSettlement, TicketStore,
    SOLD_OUT_REASON,
};

const EVENT_COLUMNS: &str =
    "id, organizer_id, title, venue, status, is_published, start_date, end_date";

const TICKET_TYPE_COLUMNS: &str =
    "id, event_id, name, price_cents, capacity, sold, sales_start, sales_end";

const USER_COLUMNS: &str = "id, email, name, password_hash, role, is_active, is_verified";

const INTENT_COLUMNS: &str = "id, reference, user_id, guest_name, guest_email, event_id, \
    ticket_type_id, quantity, unit_price_cents, amount_cents, phone, correlation_id, receipt_id, \
    status, failure_reason, provisional_ticket_id, initiated_at, created_at, completed_at";

const TICKET_COLUMNS: &str = "id, ticket_number, intent_id, event_id, ticket_type_id, user_id, \
    guest_name, guest_email, quantity, price_cents, status, is_provisional, scan_token, \
    receipt_id, redeemed_at, redeemed_by, created_at, cancelled_at";

// Код ошибки Postgres unique_violation
const UNIQUE_VIOLATION: &str = "23505";
const REFERENCE_CONSTRAINT: &str = "payment_intents_reference_key";

fn corrupt(what: &str, id: impl std::fmt::Display, value: &str) -> TicketingError {
    TicketingError::InternalInconsistency(format!("{} {} has invalid stored value {:?}", what, id, value))
}

fn unique_violation(e: sqlx::Error, context: &str) -> TicketingError {
    match &e {
        sqlx::Error::Database(db) if db.code().as_deref() == Some(UNIQUE_VIOLATION) => {
            TicketingError::InternalInconsistency(format!("{}: {}", context, db.message()))
        }
        _ => TicketingError::Database(e),
    }
}

#[derive(sqlx::FromRow)]
struct EventRow {
    id: i64,
    organizer_id: i64,
    title: String,
    venue: Option<String>,
    status: String,
    is_published: bool,
    start_date: DateTime<Utc>,
    end_date: DateTime<Utc>,
}

impl TryFrom<EventRow> for Event {
    type Error = TicketingError;

    fn try_from(row: EventRow) -> Result<Self, Self::Error> {
        let status = EventStatus::parse(&row.status).ok_or_else(|| corrupt("event", row.id, &row.status))?;
        Ok(Event {
            id: row.id,
            organizer_id: row.organizer_id,
            title: row.title,
            venue: row.venue,
            status,
            is_published: row.is_published,
            start_date: row.start_date,
            end_date: row.end_date,
        })
    }
}

#[derive(sqlx::FromRow)]
struct TicketTypeRow {
    id: i64,
    event_id: i64,
    name: String,
    price_cents: i64,
    capacity: i32,
    sold: i32,
    sales_start: Option<DateTime<Utc>>,
    sales_end: Option<DateTime<Utc>>,
}

impl From<TicketTypeRow> for TicketType {
    fn from(row: TicketTypeRow) -> Self {
        TicketType {
            id: row.id,
            event_id: row.event_id,
            name: row.name,
            price_cents: row.price_cents,
            capacity: row.capacity,
            sold: row.sold,
            sales_start: row.sales_start,
            sales_end: row.sales_end,
        }
    }
}

#[derive(sqlx::FromRow)]
struct UserRow {
    id: i64,
    email: String,
    name: String,
    password_hash: String,
    role: String,
    is_active: bool,
    is_verified: bool,
}

impl TryFrom<UserRow> for User {
    type Error = TicketingError;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        let role = UserRole::parse(&row.role).ok_or_else(|| corrupt("user", row.id, &row.role))?;
        Ok(User {
            id: row.id,
            email: row.email,
            name: row.name,
            password_hash: row.password_hash,
            role,
            is_active: row.is_active,
            is_verified: row.is_verified,
        })
    }
}

#[derive(sqlx::FromRow)]
struct IntentRow {
    id: i64,
    reference: String,
    user_id: Option<i64>,
    guest_name: Option<String>,
    guest_email: Option<String>,
    event_id: i64,
    ticket_type_id: i64,
    quantity: i32,
    unit_price_cents: i64,
    amount_cents: i64,
    phone: Option<String>,
    correlation_id: Option<String>,
    receipt_id: Option<String>,
    status: String,
    failure_reason: Option<String>,
    provisional_ticket_id: Option<Uuid>,
    initiated_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
}

impl TryFrom<IntentRow> for PaymentIntent {
    type Error = TicketingError;

    fn try_from(row: IntentRow) -> Result<Self, Self::Error> {
        let status = IntentStatus::parse(&row.status).ok_or_else(|| corrupt("payment intent", row.id, &row.status))?;
        let buyer = BuyerIdentity::from_columns(row.user_id, row.guest_name, row.guest_email)
            .ok_or_else(|| corrupt("payment intent", row.id, "owner columns"))?;
        Ok(PaymentIntent {
            id: row.id,
            reference: row.reference,
            buyer,
            event_id: row.event_id,
            ticket_type_id: row.ticket_type_id,
            quantity: row.quantity,
            unit_price_cents: row.unit_price_cents,
            amount_cents: row.amount_cents,
            phone: row.phone,
            correlation_id: row.correlation_id,
            receipt_id: row.receipt_id,
            status,
            failure_reason: row.failure_reason,
            provisional_ticket_id: row.provisional_ticket_id,
            initiated_at: row.initiated_at,
            created_at: row.created_at,
            completed_at: row.completed_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct TicketRow {
    id: Uuid,
    ticket_number: String,
    intent_id: i64,
    event_id: i64,
    ticket_type_id: i64,
    user_id: Option<i64>,
    guest_name: Option<String>,
    guest_email: Option<String>,
    quantity: i32,
    price_cents: i64,
    status: String,
    is_provisional: bool,
    scan_token: Option<String>,
    receipt_id: Option<String>,
    redeemed_at: Option<DateTime<Utc>>,
    redeemed_by: Option<i64>,
    created_at: DateTime<Utc>,
    cancelled_at: Option<DateTime<Utc>>,
}

impl TryFrom<TicketRow> for Ticket {
    type Error = TicketingError;

    fn try_from(row: TicketRow) -> Result<Self, Self::Error> {
        let status = TicketStatus::parse(&row.status).ok_or_else(|| corrupt("ticket", row.id, &row.status))?;
        let owner = BuyerIdentity::from_columns(row.user_id, row.guest_name, row.guest_email)
            .ok_or_else(|| corrupt("ticket", row.id, "owner columns"))?;
        Ok(Ticket {
            id: row.id,
            ticket_number: row.ticket_number,
            intent_id: row.intent_id,
            event_id: row.event_id,
            ticket_type_id: row.ticket_type_id,
            owner,
            quantity: row.quantity,
            price_cents: row.price_cents,
            status,
            is_provisional: row.is_provisional,
            scan_token: row.scan_token,
            receipt_id: row.receipt_id,
            redeemed_at: row.redeemed_at,
            redeemed_by: row.redeemed_by,
            created_at: row.created_at,
            cancelled_at: row.cancelled_at,
        })
    }
}

fn tickets_from_rows(rows: Vec<TicketRow>) -> TicketingResult<Vec<Ticket>> {
    rows.into_iter().map(Ticket::try_from).collect()
}

async fn insert_ticket(conn: &mut PgConnection, ticket: &Ticket) -> TicketingResult<Ticket> {
    let (user_id, guest_name, guest_email) = ticket.owner.clone().into_columns();
    let row = sqlx::query_as::<_, TicketRow>(&format!(
        "INSERT INTO tickets (id, ticket_number, intent_id, event_id, ticket_type_id, user_id, \
         guest_name, guest_email, quantity, price_cents, status, is_provisional, scan_token, \
         receipt_id, created_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15) \
         RETURNING {}",
        TICKET_COLUMNS
    ))
    .bind(ticket.id)
    .bind(&ticket.ticket_number)
    .bind(ticket.intent_id)
    .bind(ticket.event_id)
    .bind(ticket.ticket_type_id)
    .bind(user_id)
    .bind(guest_name)
    .bind(guest_email)
    .bind(ticket.quantity)
    .bind(ticket.price_cents)
    .bind(ticket.status.as_str())
    .bind(ticket.is_provisional)
    .bind(&ticket.scan_token)
    .bind(&ticket.receipt_id)
    .bind(ticket.created_at)
    .fetch_one(&mut *conn)
    .await
    .map_err(|e| unique_violation(e, "duplicate ticket identity"))?;
    Ticket::try_from(row)
}

async fn final_tickets(conn: &mut PgConnection, intent_id: i64) -> TicketingResult<Vec<Ticket>> {
    let rows = sqlx::query_as::<_, TicketRow>(&format!(
        "SELECT {} FROM tickets WHERE intent_id = $1 AND NOT is_provisional ORDER BY ticket_number",
        TICKET_COLUMNS
    ))
    .bind(intent_id)
    .fetch_all(&mut *conn)
    .await?;
    tickets_from_rows(rows)
}

async fn mark_provisional(
    conn: &mut PgConnection,
    intent_id: i64,
    status: TicketStatus,
    receipt_id: Option<&str>,
) -> TicketingResult<()> {
    sqlx::query(
        "UPDATE tickets SET status = $2, receipt_id = COALESCE($3, receipt_id) \
         WHERE intent_id = $1 AND is_provisional",
    )
    .bind(intent_id)
    .bind(status.as_str())
    .bind(receipt_id)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn finish_intent(
    conn: &mut PgConnection,
    intent_id: i64,
    status: IntentStatus,
    failure_reason: Option<&str>,
    receipt_id: Option<&str>,
    settled_at: DateTime<Utc>,
) -> TicketingResult<PaymentIntent> {
    let row = sqlx::query_as::<_, IntentRow>(&format!(
        "UPDATE payment_intents \
         SET status = $2, failure_reason = $3, receipt_id = COALESCE($4, receipt_id), completed_at = $5 \
         WHERE id = $1 AND status = 'PENDING' \
         RETURNING {}",
        INTENT_COLUMNS
    ))
    .bind(intent_id)
    .bind(status.as_str())
    .bind(failure_reason)
    .bind(receipt_id)
    .bind(settled_at)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| {
        TicketingError::InternalInconsistency(format!(
            "payment intent {} left PENDING while locked",
            intent_id
        ))
    })?;
    PaymentIntent::try_from(row)
}

#[derive(Clone)]
pub struct PgTicketStore {
    pool: PgPool,
}

impl PgTicketStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn lock_intent(
        conn: &mut PgConnection,
        intent_id: i64,
    ) -> TicketingResult<PaymentIntent> {
        let row = sqlx::query_as::<_, IntentRow>(&format!(
            "SELECT {} FROM payment_intents WHERE id = $1 FOR UPDATE",
            INTENT_COLUMNS
        ))
        .bind(intent_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| TicketingError::NotFound(format!("payment intent {}", intent_id)))?;
        PaymentIntent::try_from(row)
    }

    async fn intent_exists(&self, intent_id: i64) -> TicketingResult<bool> {
        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM payment_intents WHERE id = $1)",
        )
        .bind(intent_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }
}

#[async_trait]
impl TicketStore for PgTicketStore {
    async fn find_event(&self, event_id: i64) -> TicketingResult<Option<Event>> {
        let row = sqlx::query_as::<_, EventRow>(&format!(
            "SELECT {} FROM events WHERE id = $1",
            EVENT_COLUMNS
        ))
        .bind(event_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Event::try_from).transpose()
    }

    async fn find_ticket_type(&self, ticket_type_id: i64) -> TicketingResult<Option<TicketType>> {
        let row = sqlx::query_as::<_, TicketTypeRow>(&format!(
            "SELECT {} FROM ticket_types WHERE id = $1",
            TICKET_TYPE_COLUMNS
        ))
        .bind(ticket_type_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(TicketType::from))
    }

    async fn list_ticket_types(&self, event_id: i64) -> TicketingResult<Vec<TicketType>> {
        let rows = sqlx::query_as::<_, TicketTypeRow>(&format!(
            "SELECT {} FROM ticket_types WHERE event_id = $1 ORDER BY id",
            TICKET_TYPE_COLUMNS
        ))
        .bind(event_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(TicketType::from).collect())
    }

    async fn find_user(&self, user_id: i64) -> TicketingResult<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {} FROM users WHERE id = $1",
            USER_COLUMNS
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(User::try_from).transpose()
    }

    async fn find_user_by_email(&self, email: &str) -> TicketingResult<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {} FROM users WHERE lower(email) = lower($1)",
            USER_COLUMNS
        ))
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        row.map(User::try_from).transpose()
    }

    async fn create_reservation(
        &self,
        reservation: NewReservation,
    ) -> TicketingResult<(PaymentIntent, Ticket)> {
        let mut tx = self.pool.begin().await?;
        let (user_id, guest_name, guest_email) = reservation.buyer.clone().into_columns();

        let row = sqlx::query_as::<_, IntentRow>(&format!(
            "INSERT INTO payment_intents (reference, user_id, guest_name, guest_email, event_id, \
             ticket_type_id, quantity, unit_price_cents, amount_cents, status, \
             provisional_ticket_id, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, 'PENDING', $10, $11) \
             RETURNING {}",
            INTENT_COLUMNS
        ))
        .bind(&reservation.reference)
        .bind(user_id)
        .bind(guest_name)
        .bind(guest_email)
        .bind(reservation.event_id)
        .bind(reservation.ticket_type_id)
        .bind(reservation.quantity)
        .bind(reservation.unit_price_cents)
        .bind(reservation.amount_cents)
        .bind(reservation.provisional_ticket_id)
        .bind(reservation.created_at)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.constraint() == Some(REFERENCE_CONSTRAINT) => {
                TicketingError::DuplicateReference(reservation.reference.clone())
            }
            _ => unique_violation(e, "duplicate reservation"),
        })?;
        let intent = PaymentIntent::try_from(row)?;

        let provisional = Ticket {
            id: reservation.provisional_ticket_id,
            ticket_number: reservation.provisional_number,
            intent_id: intent.id,
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
        let ticket = insert_ticket(&mut tx, &provisional).await?;

        tx.commit().await?;
        Ok((intent, ticket))
    }

    async fn find_intent(&self, intent_id: i64) -> TicketingResult<Option<PaymentIntent>> {
        let row = sqlx::query_as::<_, IntentRow>(&format!(
            "SELECT {} FROM payment_intents WHERE id = $1",
            INTENT_COLUMNS
        ))
        .bind(intent_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(PaymentIntent::try_from).transpose()
    }

    async fn find_intent_by_correlation(
        &self,
        correlation_id: &str,
    ) -> TicketingResult<Option<PaymentIntent>> {
        let row = sqlx::query_as::<_, IntentRow>(&format!(
            "SELECT {} FROM payment_intents WHERE correlation_id = $1",
            INTENT_COLUMNS
        ))
        .bind(correlation_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(PaymentIntent::try_from).transpose()
    }

    async fn find_ticket(&self, ticket_id: Uuid) -> TicketingResult<Option<Ticket>> {
        let row = sqlx::query_as::<_, TicketRow>(&format!(
            "SELECT {} FROM tickets WHERE id = $1",
            TICKET_COLUMNS
        ))
        .bind(ticket_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Ticket::try_from).transpose()
    }

    async fn tickets_for_intent(&self, intent_id: i64) -> TicketingResult<Vec<Ticket>> {
        let rows = sqlx::query_as::<_, TicketRow>(&format!(
            "SELECT {} FROM tickets WHERE intent_id = $1 ORDER BY is_provisional DESC, ticket_number",
            TICKET_COLUMNS
        ))
        .bind(intent_id)
        .fetch_all(&self.pool)
        .await?;
        tickets_from_rows(rows)
    }

    async fn tickets_for_user(&self, user_id: i64) -> TicketingResult<Vec<Ticket>> {
        let rows = sqlx::query_as::<_, TicketRow>(&format!(
            "SELECT {} FROM tickets WHERE user_id = $1 AND NOT is_provisional \
             ORDER BY created_at DESC, ticket_number",
            TICKET_COLUMNS
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        tickets_from_rows(rows)
    }

    async fn claim_initiation(
        &self,
        intent_id: i64,
        phone: &str,
        now: DateTime<Utc>,
    ) -> TicketingResult<bool> {
        let result = sqlx::query(
            "UPDATE payment_intents SET initiated_at = $3, phone = $2 \
             WHERE id = $1 AND status = 'PENDING' AND initiated_at IS NULL",
        )
        .bind(intent_id)
        .bind(phone)
        .bind(now)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(true);
        }
        if !self.intent_exists(intent_id).await? {
            return Err(TicketingError::NotFound(format!("payment intent {}", intent_id)));
        }
        Ok(false)
    }

    async fn release_initiation(&self, intent_id: i64) -> TicketingResult<()> {
        sqlx::query(
            "UPDATE payment_intents SET initiated_at = NULL \
             WHERE id = $1 AND status = 'PENDING' AND correlation_id IS NULL",
        )
        .bind(intent_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn attach_correlation(
        &self,
        intent_id: i64,
        correlation_id: &str,
    ) -> TicketingResult<PaymentIntent> {
        let row = sqlx::query_as::<_, IntentRow>(&format!(
            "UPDATE payment_intents SET correlation_id = COALESCE(correlation_id, $2) \
             WHERE id = $1 RETURNING {}",
            INTENT_COLUMNS
        ))
        .bind(intent_id)
        .bind(correlation_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| unique_violation(e, "correlation id already belongs to another intent"))?
        .ok_or_else(|| TicketingError::NotFound(format!("payment intent {}", intent_id)))?;
        PaymentIntent::try_from(row)
    }

    async fn settle_success(&self, success: SuccessSettlement) -> TicketingResult<Settlement> {
        let mut tx = self.pool.begin().await?;
        let intent = Self::lock_intent(&mut tx, success.intent_id).await?;

        // Идемпотентность: терминальный intent не трогаем
        if intent.status.is_terminal() {
            let tickets = final_tickets(&mut tx, intent.id).await?;
            tx.commit().await?;
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
        let next_status = intent.status.transition(IntentStatus::Completed)?;

        let sold = sqlx::query_scalar::<_, i32>(
            "UPDATE ticket_types SET sold = sold + $2 \
             WHERE id = $1 AND sold + $2 <= capacity \
             RETURNING sold",
        )
        .bind(intent.ticket_type_id)
        .bind(intent.quantity)
        .fetch_optional(&mut *tx)
        .await?;

        if sold.is_none() {
            let failed = intent.status.transition(IntentStatus::Failed)?;
            let receipt = success.receipt_id.as_deref();
            let intent = finish_intent(&mut tx, intent.id, failed, Some(SOLD_OUT_REASON), receipt, success.settled_at).await?;
            mark_provisional(&mut tx, intent.id, TicketStatus::Failed, receipt).await?;
            tx.commit().await?;
            return Ok(Settlement::SoldOut { intent });
        }

        for ticket in &success.tickets {
            insert_ticket(&mut tx, ticket).await?;
        }
        let receipt = success.receipt_id.as_deref();
        let intent = finish_intent(&mut tx, intent.id, next_status, None, receipt, success.settled_at).await?;
        mark_provisional(&mut tx, intent.id, TicketStatus::Completed, receipt).await?;
        let tickets = final_tickets(&mut tx, intent.id).await?;

        tx.commit().await?;
        Ok(Settlement::Completed { intent, tickets })
    }

    async fn settle_failure(
        &self,
        intent_id: i64,
        reason: &str,
        settled_at: DateTime<Utc>,
    ) -> TicketingResult<Settlement> {
        let mut tx = self.pool.begin().await?;
        let intent = Self::lock_intent(&mut tx, intent_id).await?;

        if intent.status.is_terminal() {
            let tickets = final_tickets(&mut tx, intent.id).await?;
            tx.commit().await?;
            return Ok(Settlement::AlreadySettled { intent, tickets });
        }
        let next_status = intent.status.transition(IntentStatus::Failed)?;
        let intent = finish_intent(&mut tx, intent_id, next_status, Some(reason), None, settled_at).await?;
        mark_provisional(&mut tx, intent_id, TicketStatus::Failed, None).await?;

        tx.commit().await?;
        Ok(Settlement::Failed { intent })
    }

    async fn redeem_ticket(
        &self,
        ticket_id: Uuid,
        operator_id: i64,
        now: DateTime<Utc>,
    ) -> TicketingResult<Option<Redemption>> {
        // Погашает ровно один конкурентный запрос
        let row = sqlx::query_as::<_, TicketRow>(&format!(
            "UPDATE tickets SET redeemed_at = $2, redeemed_by = $3 \
             WHERE id = $1 AND redeemed_at IS NULL AND status = 'COMPLETED' AND NOT is_provisional \
             RETURNING {}",
            TICKET_COLUMNS
        ))
        .bind(ticket_id)
        .bind(now)
        .bind(operator_id)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = row {
            return Ok(Some(Redemption::Redeemed(Ticket::try_from(row)?)));
        }
        Ok(self.find_ticket(ticket_id).await?.map(Redemption::Rejected))
    }

    async fn cancel_ticket(
        &self,
        ticket_id: Uuid,
        now: DateTime<Utc>,
    ) -> TicketingResult<Option<Cancellation>> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query_as::<_, TicketRow>(&format!(
            "SELECT {} FROM tickets WHERE id = $1 FOR UPDATE",
            TICKET_COLUMNS
        ))
        .bind(ticket_id)
        .fetch_optional(&mut *tx)
        .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let ticket = Ticket::try_from(row)?;

        if ticket.status == TicketStatus::Cancelled {
            tx.commit().await?;
            return Ok(Some(Cancellation::AlreadyCancelled(ticket)));
        }
        if ticket.is_provisional || ticket.status != TicketStatus::Completed || ticket.is_redeemed() {
            tx.commit().await?;
            return Ok(Some(Cancellation::Rejected(ticket)));
        }

        let row = sqlx::query_as::<_, TicketRow>(&format!(
            "UPDATE tickets SET status = 'CANCELLED', cancelled_at = $2 WHERE id = $1 RETURNING {}",
            TICKET_COLUMNS
        ))
        .bind(ticket_id)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;
        let ticket = Ticket::try_from(row)?;

        let ticket_type = sqlx::query_as::<_, TicketTypeRow>(&format!(
            "UPDATE ticket_types SET sold = sold - $2 WHERE id = $1 AND sold >= $2 RETURNING {}",
            TICKET_TYPE_COLUMNS
        ))
        .bind(ticket.ticket_type_id)
        .bind(ticket.quantity)
        .fetch_optional(&mut *tx)
        .await?
        .map(TicketType::from)
        .ok_or_else(|| {
            TicketingError::InternalInconsistency(format!(
                "restocking ticket type {} would make sold count negative",
                ticket.ticket_type_id
            ))
        })?;

        tx.commit().await?;
        Ok(Some(Cancellation::Cancelled { ticket, ticket_type }))
    }

    async fn list_intents(
        &self,
        status: Option<IntentStatus>,
        limit: i64,
        offset: i64,
    ) -> TicketingResult<(Vec<PaymentIntent>, i64)> {
        let status = status.map(|s| s.as_str());
        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM payment_intents WHERE ($1::text IS NULL OR status = $1::text)",
        )
        .bind(status)
        .fetch_one(&self.pool)
        .await?;

        let rows = sqlx::query_as::<_, IntentRow>(&format!(
            "SELECT {} FROM payment_intents \
             WHERE ($1::text IS NULL OR status = $1::text) \
             ORDER BY created_at DESC, id DESC LIMIT $2 OFFSET $3",
            INTENT_COLUMNS
        ))
        .bind(status)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        let intents = rows
            .into_iter()
            .map(PaymentIntent::try_from)
            .collect::<TicketingResult<Vec<_>>>()?;
        Ok((intents, total))
    }

    async fn stale_pending_intents(
        &self,
        older_than: DateTime<Utc>,
        limit: i64,
    ) -> TicketingResult<Vec<PaymentIntent>> {
        let rows = sqlx::query_as::<_, IntentRow>(&format!(
            "SELECT {} FROM payment_intents \
             WHERE status = 'PENDING' AND correlation_id IS NOT NULL AND initiated_at < $1 \
             ORDER BY initiated_at LIMIT $2",
            INTENT_COLUMNS
        ))
        .bind(older_than)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(PaymentIntent::try_from).collect()
    }

    async fn release_stale_claims(&self, older_than: DateTime<Utc>) -> TicketingResult<u64> {
        let result = sqlx::query(
            "UPDATE payment_intents SET initiated_at = NULL \
             WHERE status = 'PENDING' AND correlation_id IS NULL AND initiated_at < $1",
        )
        .bind(older_than)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}
