//! Инициация оплаты (STK push) по зарезервированному intent.
//!
//! Слот инициации занимается условным UPDATE, шлюз вызывается без каких-либо
//! блокировок, correlation id прикрепляется после ответа. При ошибке шлюза слот
//! освобождается, intent остаётся PENDING. Инициация не повторяется автоматически.

use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info};

use crate::error::{TicketingError, TicketingResult};
use crate::models::{PaymentIntent, User};
use crate::services::payment::{normalize_phone, InitiateRequest, PaymentGateway};
use crate::store::TicketStore;

const TRANSACTION_DESCRIPTION: &str = "Event tickets";

#[derive(Debug, Clone, Serialize)]
pub struct InitiationResult {
    pub intent: PaymentIntent,
    pub customer_message: Option<String>,
}

pub struct PaymentInitiator {
    store: Arc<dyn TicketStore>,
    gateway: Arc<dyn PaymentGateway>,
}

impl PaymentInitiator {
    pub fn new(store: Arc<dyn TicketStore>, gateway: Arc<dyn PaymentGateway>) -> Self {
        Self { store, gateway }
    }

    pub async fn initiate_payment(
        &self,
        intent_id: i64,
        phone: &str,
        requester: Option<&User>,
        reference: Option<&str>,
    ) -> TicketingResult<InitiationResult> {
        let phone = normalize_phone(phone)?;
        let intent = self
            .store
            .find_intent(intent_id)
            .await?
            .ok_or_else(|| TicketingError::NotFound(format!("payment intent {}", intent_id)))?;

        // Гостевой intent инициирует только тот, кто знает его ссылку
        let allowed = match intent.buyer.user_id() {
            Some(owner_id) => requester.map(|u| u.id) == Some(owner_id),
            None => intent.matches_reference(reference),
        };
        if !allowed {
            return Err(TicketingError::PermissionDenied(
                "payment intent belongs to another buyer".to_string(),
            ));
        }
        if intent.status.is_terminal() {
            return Err(TicketingError::Validation(format!(
                "payment intent {} is already {}",
                intent.id,
                intent.status.as_str()
            )));
        }

        if !self.store.claim_initiation(intent.id, &phone, Utc::now()).await? {
            return Err(TicketingError::PaymentInProgress(intent.id));
        }

        let request = InitiateRequest {
            phone,
            amount: intent.gateway_amount(),
            reference: intent.reference.clone(),
            description: TRANSACTION_DESCRIPTION.to_string(),
        };

        match self.gateway.initiate(request).await {
            Ok(initiation) => {
                let intent = self
                    .store
                    .attach_correlation(intent.id, &initiation.correlation_id)
                    .await?;
                info!(
                    intent_id = intent.id,
                    correlation_id = %initiation.correlation_id,
                    "Payment initiated"
                );
                Ok(InitiationResult {
                    intent,
                    customer_message: initiation.customer_message,
                })
            }
            Err(e) => {
                if let Err(release_err) = self.store.release_initiation(intent.id).await {
                    error!(intent_id = intent.id, error = %release_err, "Failed to release initiation slot");
                }
                Err(e.into())
            }
        }
    }
}
