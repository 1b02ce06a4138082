//! reconciler.rs
//!
//! Фоновая сверка "зависших" оплат: если callback не пришёл, опрашиваем шлюз
//! и применяем явный исход. Недоступность шлюза или "ещё в обработке" intent
//! не трогают; по таймауту intent никогда не переводится в FAILED.

use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tracing::{debug, error, info, warn};

use crate::error::TicketingResult;
use crate::services::confirmation::{ConfirmationStatus, PaymentConfirmation};
use crate::services::payment::{GatewayOutcome, PaymentGateway};
use crate::store::TicketStore;

const BATCH_SIZE: i64 = 50;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    pub released_claims: u64,
    pub settled: usize,
    pub still_pending: usize,
    pub unavailable: usize,
}

pub struct Reconciler {
    store: Arc<dyn TicketStore>,
    gateway: Arc<dyn PaymentGateway>,
    confirmation: Arc<PaymentConfirmation>,
    stale_after: ChronoDuration,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn TicketStore>,
        gateway: Arc<dyn PaymentGateway>,
        confirmation: Arc<PaymentConfirmation>,
        stale_after_minutes: i64,
    ) -> Self {
        Self {
            store,
            gateway,
            confirmation,
            stale_after: ChronoDuration::minutes(stale_after_minutes),
        }
    }

    pub async fn run_once(&self) -> TicketingResult<ReconcileReport> {
        let cutoff = Utc::now() - self.stale_after;
        let mut report = ReconcileReport {
            released_claims: self.store.release_stale_claims(cutoff).await?,
            ..ReconcileReport::default()
        };

        let stale = self.store.stale_pending_intents(cutoff, BATCH_SIZE).await?;
        if stale.is_empty() && report.released_claims == 0 {
            debug!("No stale payments to reconcile");
            return Ok(report);
        }
        info!(
            stale = stale.len(),
            released_claims = report.released_claims,
            "🔄 Reconciling stale payments"
        );

        for intent in stale {
            let Some(correlation_id) = intent.correlation_id.clone() else {
                continue;
            };
            // Один опрос за проход; следующий проход и есть повтор
            match self.gateway.poll_status(&correlation_id).await {
                Ok(GatewayOutcome::Pending) => report.still_pending += 1,
                Ok(outcome) => match self.confirmation.apply(intent, outcome).await {
                    Ok(result) if result.status == ConfirmationStatus::Pending => report.still_pending += 1,
                    Ok(_) => report.settled += 1,
                    Err(e) => error!(correlation_id = %correlation_id, error = %e, "Failed to apply reconciled outcome"),
                },
                Err(e) => {
                    warn!(correlation_id = %correlation_id, error = %e, "Gateway unavailable during reconciliation");
                    report.unavailable += 1;
                }
            }
        }

        info!(?report, "✅ Reconciliation pass completed");
        Ok(report)
    }

    pub fn spawn(self: Arc<Self>, interval_seconds: u64) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(interval_seconds.max(1)));
            loop {
                ticker.tick().await;
                if let Err(e) = self.run_once().await {
                    error!(error = %e, "Reconciliation pass failed");
                }
            }
        })
    }
}
