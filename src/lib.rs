pub mod cache;
pub mod config;
pub mod controllers;
pub mod database;
pub mod error;
pub mod middleware;
pub mod models;
pub mod redis_client;
pub mod services;
pub mod store;

use std::sync::Arc;
use tracing::info;

use services::cancellation::CancellationService;
use services::confirmation::PaymentConfirmation;
use services::initiation::PaymentInitiator;
use services::inventory::InventoryLedger;
use services::issuance::TicketIssuer;
use services::notifier::TicketNotifier;
use services::payment::{MpesaClient, PaymentGateway};
use services::qr::TicketQrService;
use services::reservation::ReservationManager;
use services::signing::TicketSigner;
use services::verification::TicketVerifier;
use store::{MemoryTicketStore, PgTicketStore, TicketStore};

pub use controllers::build_router;

// Shared state для всего приложения
pub struct AppState {
    pub config: config::Config,
    pub store: Arc<dyn TicketStore>,
    pub gateway: Arc<dyn PaymentGateway>,
    pub ledger: Arc<InventoryLedger>,
    pub reservations: ReservationManager,
    pub initiator: PaymentInitiator,
    pub confirmation: Arc<PaymentConfirmation>,
    pub verifier: TicketVerifier,
    pub cancellations: CancellationService,
    pub qr: TicketQrService,
}

impl AppState {
    /// Собирает сервисы поверх готовых зависимостей (хранилище, шлюз, уведомления).
    pub fn build(
        config: config::Config,
        store: Arc<dyn TicketStore>,
        cache: cache::CacheService,
        gateway: Arc<dyn PaymentGateway>,
        notifier: Arc<dyn TicketNotifier>,
    ) -> error::TicketingResult<Arc<Self>> {
        let signer = TicketSigner::new(&config.tickets.signing_key)?;
        let ledger = Arc::new(InventoryLedger::new(store.clone(), cache));
        let issuer = TicketIssuer::new(store.clone(), signer.clone(), notifier);

        let confirmation = Arc::new(PaymentConfirmation::new(
            store.clone(),
            gateway.clone(),
            issuer,
            ledger.clone(),
            config.retry.clone(),
            config.simulation_allowed(),
        ));

        Ok(Arc::new(Self {
            reservations: ReservationManager::new(store.clone(), config.tickets.max_per_order),
            initiator: PaymentInitiator::new(store.clone(), gateway.clone()),
            verifier: TicketVerifier::new(store.clone(), signer),
            cancellations: CancellationService::new(store.clone(), ledger.clone()),
            qr: TicketQrService::new(store.clone()),
            confirmation,
            ledger,
            gateway,
            store,
            config,
        }))
    }

    /// Подключает внешние сервисы по конфигурации.
    pub async fn from_config(config: config::Config) -> anyhow::Result<Arc<Self>> {
        let store: Arc<dyn TicketStore> = if config.database.is_in_memory() {
            info!("Using in-memory ticket store");
            if config.app.is_production() {
                Arc::new(MemoryTicketStore::new())
            } else {
                Arc::new(MemoryTicketStore::with_demo_data()?)
            }
        } else {
            let db = database::Database::connect(&config.database.url, config.database.pool_size).await?;
            db.run_migrations().await?;
            Arc::new(PgTicketStore::new(db.pool))
        };

        let cache = match config.redis.url.as_deref() {
            Some(url) => {
                let redis = redis_client::RedisClient::connect(url).await?;
                cache::CacheService::new(redis, config.redis.availability_ttl_seconds)
            }
            None => cache::CacheService::disabled(),
        };

        let gateway: Arc<dyn PaymentGateway> =
            Arc::new(MpesaClient::new(config.mpesa.clone(), &config.circuit_breaker)?);
        let notifier = services::notifier::notifier_from_config(&config.mail);

        Ok(Self::build(config, store, cache, gateway, notifier)?)
    }
}
