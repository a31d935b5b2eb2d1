use axum::{
    extract::{Json, State},
    http::StatusCode,
    routing::post,
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use super::{to_api_error, ApiResult};
use crate::error::PurchaseError;
use crate::models::{PurchaseId, Ticket};
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/payments/webhook", post(payment_webhook))
}

#[derive(Debug, Deserialize)]
pub struct PaymentWebhook {
    pub purchase_id: Uuid,
    pub approved: bool,
    pub token: String,
}

#[derive(Debug, Serialize)]
pub struct WebhookAck {
    pub status: &'static str,
    pub ticket: Option<Ticket>,
}

/// POST /api/payments/webhook
///
/// A decline is an expected outcome for the gateway, so it is acknowledged
/// with 200 like an approval; only unusable notifications get an error.
async fn payment_webhook(
    State(state): State<Arc<AppState>>,
    Json(hook): Json<PaymentWebhook>,
) -> ApiResult<Json<WebhookAck>> {
    let purchase = PurchaseId::from_uuid(hook.purchase_id);
    if !state.signer.verify(purchase, hook.approved, &hook.token) {
        tracing::warn!(purchase = %purchase, "Payment webhook with bad token");
        return Err(to_api_error(StatusCode::UNAUTHORIZED, "bad_token", "Invalid webhook token"));
    }

    match state.coordinator.confirm_payment(purchase, hook.approved).await {
        Ok(ticket) => Ok(Json(WebhookAck { status: "committed", ticket: Some(ticket) })),
        Err(PurchaseError::PaymentDenied) => Ok(Json(WebhookAck { status: "released", ticket: None })),
        Err(e) => Err(e.into()),
    }
}
