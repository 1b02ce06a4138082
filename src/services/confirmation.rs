//! confirmation.rs
//!
//! Машина состояний подтверждения оплаты: `PENDING -> {COMPLETED, FAILED}`.
//!
//! Входы: callback шлюза, ручной опрос (confirm), симуляция вне production и
//! фоновая сверка. Все они сходятся в [`PaymentConfirmation::apply`], а
//! терминальный переход выполняет хранилище под блокировкой строки intent.

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::config::RetryConfig;
use crate::error::{TicketingError, TicketingResult};
use crate::models::{IntentStatus, PaymentIntent, Ticket, User};
use crate::services::inventory::InventoryLedger;
use crate::services::issuance::TicketIssuer;
use crate::services::payment::{retry_with_backoff, GatewayOutcome, PaymentGateway};
use crate::store::{Settlement, SuccessSettlement, TicketStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmationStatus {
    Completed,
    AlreadyProcessed,
    Failed,
    Pending,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConfirmationResult {
    pub status: ConfirmationStatus,
    pub intent: PaymentIntent,
    pub tickets: Vec<Ticket>,
}

/// Что сделали с входящим webhook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackDisposition {
    Applied(ConfirmationStatus),
    UnknownCorrelation,
    /// Сумма не совпала с intent или отсутствует; intent остаётся PENDING.
    AmountMismatch,
}

#[derive(Debug, Clone, Serialize)]
pub struct PaymentStatusView {
    pub intent: PaymentIntent,
    pub tickets: Vec<Ticket>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PaymentPage {
    pub payments: Vec<PaymentIntent>,
    pub total: i64,
    pub pages: i64,
    pub current_page: i64,
}

const MAX_PAGE_SIZE: i64 = 100;

pub struct PaymentConfirmation {
    store: Arc<dyn TicketStore>,
    gateway: Arc<dyn PaymentGateway>,
    issuer: TicketIssuer,
    ledger: Arc<InventoryLedger>,
    retry: RetryConfig,
    simulation_enabled: bool,
}

impl PaymentConfirmation {
    pub fn new(
        store: Arc<dyn TicketStore>,
        gateway: Arc<dyn PaymentGateway>,
        issuer: TicketIssuer,
        ledger: Arc<InventoryLedger>,
        retry: RetryConfig,
        simulation_enabled: bool,
    ) -> Self {
        Self {
            store,
            gateway,
            issuer,
            ledger,
            retry,
            simulation_enabled,
        }
    }

    async fn final_tickets(&self, intent_id: i64) -> TicketingResult<Vec<Ticket>> {
        let tickets = self.store.tickets_for_intent(intent_id).await?;
        Ok(tickets.into_iter().filter(|t| !t.is_provisional).collect())
    }

    async fn already_processed(&self, intent: PaymentIntent) -> TicketingResult<ConfirmationResult> {
        let tickets = self.final_tickets(intent.id).await?;
        Ok(ConfirmationResult {
            status: ConfirmationStatus::AlreadyProcessed,
            intent,
            tickets,
        })
    }

    /// Webhook провайдера. Корреляция только по correlation id из payload.
    pub async fn handle_callback(&self, payload: &Value) -> TicketingResult<CallbackDisposition> {
        let event = self.gateway.parse_callback(payload)?;

        let Some(intent) = self.store.find_intent_by_correlation(&event.correlation_id).await? else {
            warn!(correlation_id = %event.correlation_id, "Callback for unknown correlation id");
            return Ok(CallbackDisposition::UnknownCorrelation);
        };

        // Успех без суммы тоже не принимаем: intent дождётся опроса шлюза
        if let GatewayOutcome::Success { amount, .. } = &event.outcome {
            if *amount != Some(intent.gateway_amount()) {
                warn!(
                    target: "security",
                    intent_id = intent.id,
                    correlation_id = %event.correlation_id,
                    reported = ?amount,
                    expected = intent.gateway_amount(),
                    "Callback amount does not match payment intent, ignoring"
                );
                return Ok(CallbackDisposition::AmountMismatch);
            }
        }

        info!(
            intent_id = intent.id,
            correlation_id = %event.correlation_id,
            outcome = ?event.outcome,
            "Payment callback received"
        );
        let result = self.apply(intent, event.outcome).await?;
        Ok(CallbackDisposition::Applied(result.status))
    }

    /// Ручная проверка: опрашивает шлюз, если исход ещё не известен.
    pub async fn confirm_by_correlation(&self, correlation_id: &str) -> TicketingResult<ConfirmationResult> {
        let intent = self
            .store
            .find_intent_by_correlation(correlation_id)
            .await?
            .ok_or_else(|| TicketingError::NotFound(format!("payment with correlation id {}", correlation_id)))?;

        if intent.status.is_terminal() {
            return self.already_processed(intent).await;
        }

        let outcome = retry_with_backoff(&self.retry, || self.gateway.poll_status(correlation_id)).await?;
        self.apply(intent, outcome).await
    }

    /// Подтверждение без шлюза; доступно только при включённом флаге и вне production.
    pub async fn simulate(&self, intent_id: i64, success: bool) -> TicketingResult<ConfirmationResult> {
        if !self.simulation_enabled {
            return Err(TicketingError::PermissionDenied(
                "payment simulation is disabled".to_string(),
            ));
        }
        let intent = self
            .store
            .find_intent(intent_id)
            .await?
            .ok_or_else(|| TicketingError::NotFound(format!("payment intent {}", intent_id)))?;

        let outcome = if success {
            GatewayOutcome::Success {
                receipt_id: Some(format!("SIM{}", intent.reference.trim_start_matches("TX"))),
                amount: None,
            }
        } else {
            GatewayOutcome::Failure {
                reason: "simulated failure".to_string(),
            }
        };
        warn!(intent_id, success, "Applying simulated payment outcome");
        self.apply(intent, outcome).await
    }

    /// Состояние intent и его билетов. Зарегистрированный intent виден только
    /// владельцу и персоналу; гостевой - по его ссылке (`reference`), т.к. id
    /// последовательны и угадываемы.
    pub async fn payment_status(
        &self,
        intent_id: i64,
        requester: Option<&User>,
        reference: Option<&str>,
    ) -> TicketingResult<PaymentStatusView> {
        let intent = self
            .store
            .find_intent(intent_id)
            .await?
            .ok_or_else(|| TicketingError::NotFound(format!("payment intent {}", intent_id)))?;
        self.status_view(intent, requester, reference).await
    }

    /// То же, но по CheckoutRequestID шлюза.
    pub async fn payment_status_by_correlation(
        &self,
        correlation_id: &str,
        requester: Option<&User>,
        reference: Option<&str>,
    ) -> TicketingResult<PaymentStatusView> {
        let intent = self
            .store
            .find_intent_by_correlation(correlation_id)
            .await?
            .ok_or_else(|| TicketingError::NotFound(format!("payment with correlation id {}", correlation_id)))?;
        self.status_view(intent, requester, reference).await
    }

    /// Список оплат для персонала с фильтром по статусу; страницы с 1.
    pub async fn list_payments(
        &self,
        requester: &User,
        status: Option<IntentStatus>,
        page: i64,
        per_page: i64,
    ) -> TicketingResult<PaymentPage> {
        if !requester.role.is_staff() {
            return Err(TicketingError::PermissionDenied(
                "only staff may list payments".to_string(),
            ));
        }
        let page = page.max(1);
        let per_page = per_page.clamp(1, MAX_PAGE_SIZE);
        let (payments, total) = self
            .store
            .list_intents(status, per_page, (page - 1) * per_page)
            .await?;
        Ok(PaymentPage {
            payments,
            total,
            pages: (total + per_page - 1) / per_page,
            current_page: page,
        })
    }

    async fn status_view(
        &self,
        intent: PaymentIntent,
        requester: Option<&User>,
        reference: Option<&str>,
    ) -> TicketingResult<PaymentStatusView> {
        let is_staff = requester.map_or(false, |u| u.role.is_staff());
        let allowed = match intent.buyer.user_id() {
            Some(owner_id) => is_staff || requester.map_or(false, |u| u.id == owner_id),
            None => is_staff || intent.matches_reference(reference),
        };
        if !allowed {
            return Err(TicketingError::PermissionDenied(
                "payment intent belongs to another buyer".to_string(),
            ));
        }

        let tickets = self.store.tickets_for_intent(intent.id).await?;
        Ok(PaymentStatusView { intent, tickets })
    }

    /// Применяет явный исход провайдера к intent.
    pub async fn apply(&self, intent: PaymentIntent, outcome: GatewayOutcome) -> TicketingResult<ConfirmationResult> {
        // Быстрый путь идемпотентности; окончательная проверка внутри хранилища
        if intent.status.is_terminal() {
            return self.already_processed(intent).await;
        }

        match outcome {
            GatewayOutcome::Pending => Ok(ConfirmationResult {
                status: ConfirmationStatus::Pending,
                intent,
                tickets: Vec::new(),
            }),
            GatewayOutcome::Failure { reason } => {
                let settlement = self.store.settle_failure(intent.id, &reason, Utc::now()).await?;
                self.finish(settlement).await
            }
            GatewayOutcome::Success { receipt_id, .. } => {
                let provisional = match intent.provisional_ticket_id {
                    Some(id) => self.store.find_ticket(id).await?,
                    None => None,
                };
                let now = Utc::now();
                let tickets = self
                    .issuer
                    .mint(&intent, provisional.as_ref(), receipt_id.as_deref(), now)?;

                let settlement = self
                    .store
                    .settle_success(SuccessSettlement {
                        intent_id: intent.id,
                        receipt_id,
                        expected_owner: intent.buyer.clone(),
                        tickets,
                        settled_at: now,
                    })
                    .await?;
                self.finish(settlement).await
            }
        }
    }

    async fn finish(&self, settlement: Settlement) -> TicketingResult<ConfirmationResult> {
        match settlement {
            Settlement::Completed { intent, tickets } => {
                info!(
                    intent_id = intent.id,
                    receipt = ?intent.receipt_id,
                    tickets = tickets.len(),
                    "Payment completed, tickets issued"
                );
                self.ledger.invalidate(intent.event_id).await;
                self.issuer.deliver(&intent, &tickets);
                Ok(ConfirmationResult {
                    status: ConfirmationStatus::Completed,
                    intent,
                    tickets,
                })
            }
            Settlement::AlreadySettled { intent, tickets } => {
                info!(intent_id = intent.id, status = intent.status.as_str(), "Payment already processed");
                Ok(ConfirmationResult {
                    status: ConfirmationStatus::AlreadyProcessed,
                    intent,
                    tickets,
                })
            }
            Settlement::Failed { intent } => {
                info!(intent_id = intent.id, reason = ?intent.failure_reason, "Payment failed");
                Ok(ConfirmationResult {
                    status: ConfirmationStatus::Failed,
                    intent,
                    tickets: Vec::new(),
                })
            }
            Settlement::SoldOut { intent } => {
                error!(
                    intent_id = intent.id,
                    reference = %intent.reference,
                    receipt = ?intent.receipt_id,
                    amount_cents = intent.amount_cents,
                    "Payment received but ticket type sold out - refund required"
                );
                Ok(ConfirmationResult {
                    status: ConfirmationStatus::Failed,
                    intent,
                    tickets: Vec::new(),
                })
            }
        }
    }
}
