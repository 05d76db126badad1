//! Head administration: list, register, heartbeat, deregister.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Deserialize;

use fleet_common::{
    HeadRecord, HeadStatus, OperationResponse, RegisterHeadRequest, UpdateHeadStatusRequest,
};

use crate::error::FleetError;
use crate::AppState;

/// Body of `PUT /v1/heads/:id/status`; the head id comes from the path.
#[derive(Debug, Deserialize)]
pub struct StatusUpdateBody {
    pub status: HeadStatus,
    #[serde(default)]
    pub current_load: u32,
    #[serde(default)]
    pub timestamp: Option<i64>,
}

/// GET /v1/heads
pub async fn list_heads(State(state): State<Arc<AppState>>) -> Json<Vec<HeadRecord>> {
    Json(state.fleet.get_all_heads().await)
}

/// POST /v1/heads
pub async fn register_head(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RegisterHeadRequest>,
) -> Result<Json<OperationResponse>, FleetError> {
    let record = state.fleet.register_head(request).await?;
    Ok(Json(OperationResponse::ok(format!(
        "head {} registered",
        record.head_id
    ))))
}

/// PUT /v1/heads/:id/status
pub async fn update_status(
    State(state): State<Arc<AppState>>,
    Path(head_id): Path<String>,
    Json(body): Json<StatusUpdateBody>,
) -> Result<Json<OperationResponse>, FleetError> {
    let record = state
        .fleet
        .update_head_status(UpdateHeadStatusRequest {
            head_id,
            status: body.status,
            current_load: body.current_load,
            timestamp: body.timestamp,
        })
        .await?;
    Ok(Json(OperationResponse::ok(format!(
        "head {} is {}",
        record.head_id, record.status
    ))))
}

/// DELETE /v1/heads/:id
pub async fn deregister_head(
    State(state): State<Arc<AppState>>,
    Path(head_id): Path<String>,
) -> Result<Json<OperationResponse>, FleetError> {
    let record = state.fleet.deregister_head(&head_id).await?;
    Ok(Json(OperationResponse::ok(format!(
        "head {} deregistered",
        record.head_id
    ))))
}
