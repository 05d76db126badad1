pub mod auth;
pub mod config;
pub mod error;
pub mod events;
pub mod fleet;
pub mod logging;
pub mod metrics;
pub mod notify;
pub mod resilience;
pub mod routes;
pub mod store;
pub mod test_util;

pub use auth::ApiKeyAuth;
pub use config::Config;
pub use error::FleetError;
pub use events::EventBus;
pub use fleet::FleetService;
pub use metrics::FleetMetrics;
pub use resilience::{CircuitBreaker, RateLimiter};
pub use store::{FleetStore, KeyValueStore, MemoryStore, SqliteStore};

use std::sync::Arc;

use axum::{middleware, Router};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Shared application state.
pub struct AppState {
    pub config: Config,
    /// The fleet core: registry, policy, cache and decision engine.
    pub fleet: Arc<FleetService>,
    /// Per-client admission control for routing requests.
    pub rate_limiter: RateLimiter,
    pub auth: ApiKeyAuth,
}

/// Build the full HTTP application.
pub fn app(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(routes::health::router(state.clone()))
        .merge(routes::router(state))
        .layer(middleware::from_fn(logging::request_logger))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}
