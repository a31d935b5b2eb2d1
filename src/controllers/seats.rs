use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;

use super::ApiResult;
use crate::models::{AreaId, Price, SeatNumber, SessionId};
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route(
        "/sessions/{session_id}/areas/{area_id}/seats",
        get(list_available_seats),
    )
}

#[derive(Debug, Serialize)]
pub struct SeatsResponse {
    pub session_id: SessionId,
    pub area_id: AreaId,
    pub area_name: String,
    pub capacity: u32,
    pub price: Price,
    pub occupied: usize,
    pub available: Vec<SeatNumber>,
}

// GET /api/sessions/{session_id}/areas/{area_id}/seats
async fn list_available_seats(
    State(state): State<Arc<AppState>>,
    Path((session_id, area_id)): Path<(i64, i64)>,
) -> ApiResult<Json<SeatsResponse>> {
    let availability = state
        .coordinator
        .availability(SessionId::new(session_id), AreaId::new(area_id))
        .await?;

    Ok(Json(SeatsResponse {
        session_id: availability.session,
        area_id: availability.area.id,
        area_name: availability.area.name,
        capacity: availability.area.capacity,
        price: availability.area.price,
        occupied: availability.occupied,
        available: availability.available,
    }))
}
