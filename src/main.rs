use mimalloc::MiMalloc;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ticket_issuance::{build_router, config::Config, services::reconciler::Reconciler, AppState};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

fn init_tracing(config: &Config) {
    let filter = tracing_subscriber::EnvFilter::new(&config.app.rust_log);
    if config.app.log_format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            // Логгер ещё не настроен
            eprintln!("Invalid configuration: {e}");
            std::process::exit(1);
        }
    };
    init_tracing(&config);

    info!(environment = %config.app.environment, "Starting Ticket Issuance API");

    let state = match AppState::from_config(config.clone()).await {
        Ok(state) => state,
        Err(e) => {
            error!(error = %e, "Failed to initialize application state");
            std::process::exit(1);
        }
    };

    // --- Фоновые задачи ---
    if config.features.enable_reconciler {
        let reconciler = Arc::new(Reconciler::new(
            state.store.clone(),
            state.gateway.clone(),
            state.confirmation.clone(),
            config.tickets.stale_pending_minutes,
        ));
        reconciler.spawn(config.tickets.reconcile_interval_seconds);
        info!(
            interval_seconds = config.tickets.reconcile_interval_seconds,
            "Payment reconciler started"
        );
    }

    // --- Веб-сервер ---
    let app = build_router(state);

    let addr = format!("{}:{}", config.app.host, config.app.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Server listening on {}", addr);

    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}
