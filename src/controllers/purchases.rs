use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

use super::{to_api_error, ApiResult};
use crate::coordinator::{PurchaseHandle, PurchaseStatus};
use crate::middleware::Patron;
use crate::models::{AreaId, PurchaseId, SessionId};
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/purchases", post(begin_purchase))
        .route("/purchases/{id}", get(purchase_status).delete(cancel_purchase))
}

#[derive(Debug, Deserialize, Validate)]
pub struct BeginPurchaseRequest {
    #[validate(range(min = 1))]
    pub session_id: i64,
    #[validate(range(min = 1))]
    pub area_id: i64,
    #[validate(range(min = 1))]
    pub seat: u32,
}

// POST /api/purchases
async fn begin_purchase(
    State(state): State<Arc<AppState>>,
    Patron(patron): Patron,
    Json(req): Json<BeginPurchaseRequest>,
) -> ApiResult<(StatusCode, Json<PurchaseHandle>)> {
    req.validate()
        .map_err(|e| to_api_error(StatusCode::UNPROCESSABLE_ENTITY, "validation_failed", e.to_string()))?;

    let handle = state
        .coordinator
        .begin_purchase(patron, SessionId::new(req.session_id), AreaId::new(req.area_id), req.seat)
        .await?;

    Ok((StatusCode::CREATED, Json(handle)))
}

fn owned_status(state: &AppState, patron: Patron, id: PurchaseId) -> ApiResult<PurchaseStatus> {
    let status = state
        .coordinator
        .purchase_status(id)
        .ok_or_else(|| to_api_error(StatusCode::NOT_FOUND, "unknown_purchase", format!("purchase {} not found", id)))?;
    if status.patron != patron.0 {
        return Err(to_api_error(StatusCode::FORBIDDEN, "forbidden", "Purchase belongs to another patron"));
    }
    Ok(status)
}

// GET /api/purchases/{id}
async fn purchase_status(
    State(state): State<Arc<AppState>>,
    patron: Patron,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<PurchaseStatus>> {
    owned_status(&state, patron, PurchaseId::from_uuid(id)).map(Json)
}

// DELETE /api/purchases/{id}
async fn cancel_purchase(
    State(state): State<Arc<AppState>>,
    patron: Patron,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    let id = PurchaseId::from_uuid(id);
    owned_status(&state, patron, id)?;
    state.coordinator.cancel_purchase(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
