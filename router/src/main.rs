use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;

use fleet_router::config::StoreBackend;
use fleet_router::fleet::spawn_stale_sweeper;
use fleet_router::notify::{webhook_queue, WebhookDispatcher};
use fleet_router::{
    app, logging, ApiKeyAuth, AppState, CircuitBreaker, Config, EventBus, FleetMetrics,
    FleetService, FleetStore, KeyValueStore, MemoryStore, RateLimiter, SqliteStore,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load()?;

    logging::init(&config.logging.level);

    tracing::info!("Starting fleet router");

    let backend: Arc<dyn KeyValueStore> = match config.store.backend {
        StoreBackend::Memory => Arc::new(MemoryStore::new()),
        StoreBackend::Sqlite => Arc::new(SqliteStore::new(&config.store.path)?),
    };
    let store = FleetStore::new(backend, config.store.timeout());

    let metrics = Arc::new(FleetMetrics::new());
    let breaker = Arc::new(CircuitBreaker::from_config(&config.circuit_breaker));

    let mut events = EventBus::new();
    if !config.webhooks.urls.is_empty() {
        let (tx, rx) = webhook_queue(&config.webhooks);
        let dispatcher = WebhookDispatcher::new(&config.webhooks, breaker.clone(), metrics.clone())?;
        tokio::spawn(dispatcher.run(rx));
        events = events.with_webhooks(tx);
    }

    let fleet = Arc::new(FleetService::new(
        store,
        breaker,
        metrics,
        events,
        config.routing.cache_ttl(),
    ));
    fleet.bootstrap().await;

    spawn_stale_sweeper(
        fleet.clone(),
        Duration::from_secs(config.routing.sweep_interval_secs),
        Duration::from_secs(config.routing.heartbeat_timeout_secs),
    );

    let state = Arc::new(AppState {
        config: config.clone(),
        fleet,
        rate_limiter: RateLimiter::from_config(&config.rate_limit),
        auth: ApiKeyAuth::from_config(&config.auth)?,
    });
    if state.auth.is_open() {
        tracing::warn!("No API keys configured, the admin API is open");
    }

    let addr = format!("{}:{}", config.server.host, config.server.port);
    tracing::info!("Listening on {}", addr);

    let listener = TcpListener::bind(&addr).await?;
    axum::serve(
        listener,
        app(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
