use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use dotenv::dotenv;
use tokio::net::TcpListener;
use tower_http::cors::{CorsLayer, Any};
use tower_http::trace::{self, TraceLayer};
use tracing::{Level, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod router;

use appointment_cell::services::{
    AppointmentStore, InMemoryAppointmentStore, SchedulingService, SlotRegistry, StoreAudience,
    SupabaseAppointmentStore,
};
use doctor_cell::{
    AvailabilityRepository, AvailabilityService, InMemoryAvailabilityRepository,
    SupabaseAvailabilityRepository,
};
use notification_cell::NotificationFanout;
use shared_config::{AppConfig, StoreBackend};

use crate::router::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Loading Env Vars
    dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting clinic scheduling API server");

    // Load configuration
    let config = Arc::new(AppConfig::from_env());

    let (store, availability_repo): (Arc<dyn AppointmentStore>, Arc<dyn AvailabilityRepository>) =
        match config.effective_store_backend() {
            StoreBackend::Supabase => {
                info!("Using Supabase store at {}", config.supabase_url);
                (
                    Arc::new(SupabaseAppointmentStore::new(&config)),
                    Arc::new(SupabaseAvailabilityRepository::new(&config)),
                )
            }
            StoreBackend::Memory => {
                info!("Using in-memory store");
                (
                    Arc::new(InMemoryAppointmentStore::new()),
                    Arc::new(InMemoryAvailabilityRepository::new()),
                )
            }
        };

    let fanout = NotificationFanout::with_buffer(config.fanout_buffer);
    let availability = Arc::new(
        AvailabilityService::new(availability_repo, fanout.clone(), config.slot_duration_minutes)
            .with_audience(Arc::new(StoreAudience(store.clone()))),
    );
    let scheduling = Arc::new(SchedulingService::new(
        store,
        Arc::new(SlotRegistry::new()),
        availability.clone(),
        fanout.clone(),
    ));

    // Reservations live in memory; re-derive them before taking traffic.
    let restored = scheduling
        .rebuild_registry()
        .await
        .context("failed to load active appointments")?;
    info!("Restored {} slot reservations", restored);

    // Set up CORS
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Build the application router
    let app = router::create_router(AppState {
        config: config.clone(),
        scheduling,
        availability,
        fanout,
    })
    .layer(
        TraceLayer::new_for_http()
            .make_span_with(trace::DefaultMakeSpan::new()
                .level(Level::INFO))
            .on_response(trace::DefaultOnResponse::new()
                .level(Level::INFO)),
    )
    .layer(cors);

    // Run the server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    info!("Listening on {}", addr);

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    axum::serve(listener, app).await.context("server error")?;

    Ok(())
}
