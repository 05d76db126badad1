use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{routing::get, Json, Router};
use serde::Serialize;

use crate::fleet::STORE_SERVICE;
use crate::resilience::CircuitState;
use crate::AppState;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    heads: usize,
    active_heads: usize,
    store_circuit: CircuitState,
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let (heads, active_heads) = state.fleet.head_counts().await;
    let store_circuit = state.fleet.breaker().state(STORE_SERVICE).await;

    Json(HealthResponse {
        status: if store_circuit == CircuitState::Closed {
            "ok"
        } else {
            "degraded"
        },
        version: env!("CARGO_PKG_VERSION"),
        heads,
        active_heads,
        store_circuit,
    })
}

async fn metrics(State(state): State<Arc<AppState>>) -> Response {
    let version = env!("CARGO_PKG_VERSION");
    let (heads, active) = state.fleet.head_counts().await;

    let mut body = format!(
        "# HELP fleet_up Whether the service is up\n\
         # TYPE fleet_up gauge\n\
         fleet_up 1\n\
         # HELP fleet_info Service information\n\
         # TYPE fleet_info gauge\n\
         fleet_info{{version=\"{}\"}} 1\n\
         # HELP fleet_heads Registered heads\n\
         # TYPE fleet_heads gauge\n\
         fleet_heads {}\n\
         # HELP fleet_active_heads Heads currently in rotation\n\
         # TYPE fleet_active_heads gauge\n\
         fleet_active_heads {}\n",
        version,
        heads,
        active
    );
    body.push_str(&state.fleet.metrics().render().await);

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        body,
    )
        .into_response()
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .with_state(state)
}
