//! HTTP admin surface over the fleet service.
//!
//! - `GET /health`, `GET /metrics` (public)
//! - `GET /v1/heads`, `POST /v1/route`, `GET /v1/policy`, `GET /v1/events` (viewer)
//! - `POST /v1/heads`, `PUT /v1/heads/:id/status`, `DELETE /v1/heads/:id` (operator)
//! - `PUT /v1/policy` (admin)

pub mod events;
pub mod health;
pub mod heads;
pub mod routing;

use std::sync::Arc;

use axum::{
    middleware,
    routing::{delete, get, post, put},
    Router,
};

use crate::auth::{require_admin, require_operator, require_viewer};
use crate::AppState;

/// Build the `/v1` API router.
pub fn router(state: Arc<AppState>) -> Router {
    let viewer_routes = Router::new()
        .route("/v1/heads", get(heads::list_heads))
        .route("/v1/route", post(routing::route))
        .route("/v1/policy", get(routing::get_policy))
        .route("/v1/events", get(events::fleet_events))
        .layer(middleware::from_fn_with_state(state.clone(), require_viewer))
        .with_state(state.clone());

    let operator_routes = Router::new()
        .route("/v1/heads", post(heads::register_head))
        .route("/v1/heads/:id/status", put(heads::update_status))
        .route("/v1/heads/:id", delete(heads::deregister_head))
        .layer(middleware::from_fn_with_state(state.clone(), require_operator))
        .with_state(state.clone());

    let admin_routes = Router::new()
        .route("/v1/policy", put(routing::update_policy))
        .layer(middleware::from_fn_with_state(state.clone(), require_admin))
        .with_state(state);

    viewer_routes.merge(operator_routes).merge(admin_routes)
}
