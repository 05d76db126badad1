//! Routing decisions and policy.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{ConnectInfo, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};

use fleet_common::{OperationResponse, RoutingCriteria, RoutingPolicy};

use crate::error::FleetError;
use crate::resilience::RateLimitResult;
use crate::AppState;

/// POST /v1/route
///
/// Rate limited per client IP. A request for a model with no active heads
/// still answers 200 with an empty decision.
pub async fn route(
    State(state): State<Arc<AppState>>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    Json(criteria): Json<RoutingCriteria>,
) -> Response {
    let client = connect_info
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string());

    if let RateLimitResult::RateLimited { retry_after } = state.rate_limiter.check(&client).await {
        state.fleet.metrics().inc_rate_limited();
        // Retry-After is whole seconds; never advertise 0.
        let secs = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
        let secs = secs.max(1);
        tracing::warn!(client = %client, retry_after_secs = secs, "Routing request rate limited");
        return (
            StatusCode::TOO_MANY_REQUESTS,
            [(header::RETRY_AFTER, secs.to_string())],
            Json(OperationResponse::failed("rate limit exceeded")),
        )
            .into_response();
    }

    Json(state.fleet.get_routing_decision(&criteria).await).into_response()
}

/// GET /v1/policy
pub async fn get_policy(State(state): State<Arc<AppState>>) -> Json<RoutingPolicy> {
    Json(state.fleet.get_routing_policy().await)
}

/// PUT /v1/policy
pub async fn update_policy(
    State(state): State<Arc<AppState>>,
    Json(policy): Json<RoutingPolicy>,
) -> Result<Json<OperationResponse>, FleetError> {
    let strategy = policy.default_strategy;
    state.fleet.update_routing_policy(policy).await?;
    Ok(Json(OperationResponse::ok(format!(
        "policy updated, default strategy {}",
        strategy
    ))))
}
