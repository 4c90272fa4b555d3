//! Doorlink gateway entry point

use std::sync::Arc;

use doorlink::{
    bus::{InProcessBus, MessageBus},
    call::CallCoordinator,
    dispatcher::InboundDispatcher,
    door::DoorActuator,
    heartbeat::LifeAnnouncer,
    reconciler::ConfigReconciler,
    registry::DeviceRegistry,
    state::{AppConfig, AppState},
    web_api,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "doorlink=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting doorlink gateway v{}", env!("CARGO_PKG_VERSION"));

    let config = AppConfig::default();
    tracing::info!(
        definitions_dir = %config.definitions_dir.display(),
        reconcile_interval_secs = config.reconcile_interval.as_secs(),
        call_timeout_secs = config.call_timeout.as_secs(),
        auto_close_delay_secs = config.auto_close_delay.as_secs(),
        "Configuration loaded"
    );

    // Initialize components
    let registry = Arc::new(DeviceRegistry::new());
    let bus: Arc<dyn MessageBus> = Arc::new(InProcessBus::new());

    let coordinator = Arc::new(
        CallCoordinator::new(registry.clone(), bus.clone())
            .with_call_timeout(config.call_timeout),
    );
    let door = Arc::new(
        DoorActuator::new(registry.clone(), bus.clone())
            .with_auto_close_delay(config.auto_close_delay),
    );
    tracing::info!("CallCoordinator and DoorActuator initialized");

    // Start the reconciliation loop
    let reconciler = ConfigReconciler::new(
        registry.clone(),
        bus.clone(),
        config.definitions_dir.clone(),
    )
    .with_interval(config.reconcile_interval);
    tokio::spawn(reconciler.run());

    // Start the liveness announcer
    let announcer = LifeAnnouncer::new(registry.clone(), bus.clone())
        .with_interval(config.heartbeat_interval);
    tokio::spawn(announcer.run());

    // Start the inbound dispatcher
    let dispatcher = Arc::new(
        InboundDispatcher::new(bus.clone(), coordinator.clone(), door.clone())
            .with_resubscribe_backoff(config.resubscribe_backoff),
    );
    tokio::spawn(dispatcher.run());
    tracing::info!("Background loops started (reconciler, announcer, dispatcher)");

    // Create application state and router
    let state = AppState {
        config: config.clone(),
        registry,
        bus,
        coordinator,
        door,
    };

    let app = web_api::create_router(state)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http());

    // Start server
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
