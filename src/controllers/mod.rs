pub mod payment;
pub mod purchases;
pub mod seats;

use axum::{http::StatusCode, Json, Router};
use serde::Serialize;
use std::sync::Arc;

use crate::error::PurchaseError;

pub fn routes() -> Router<Arc<crate::AppState>> {
    Router::new()
        .merge(seats::routes())
        .merge(purchases::routes())
        .merge(payment::routes())
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    success: bool,
    code: &'static str,
    message: String,
}

pub type ApiResult<T> = Result<T, (StatusCode, Json<ApiError>)>;

pub(crate) fn to_api_error(status: StatusCode, code: &'static str, message: impl Into<String>) -> (StatusCode, Json<ApiError>) {
    (status, Json(ApiError { success: false, code, message: message.into() }))
}

// Lost seat races have always been answered with 419 by this service.
fn status_419() -> StatusCode {
    StatusCode::from_u16(419).unwrap_or(StatusCode::CONFLICT)
}

impl From<PurchaseError> for (StatusCode, Json<ApiError>) {
    fn from(err: PurchaseError) -> Self {
        let message = err.to_string();
        match err {
            PurchaseError::InvalidRequest(_) => to_api_error(StatusCode::BAD_REQUEST, "invalid_request", message),
            PurchaseError::SeatTaken => to_api_error(status_419(), "seat_taken", "Seat is already taken, pick another seat"),
            PurchaseError::ClaimExpired => to_api_error(StatusCode::GONE, "claim_expired", "Seat hold expired, start the purchase again"),
            PurchaseError::PaymentDenied => to_api_error(StatusCode::PAYMENT_REQUIRED, "payment_denied", "Payment was declined, try again"),
            PurchaseError::UnknownPurchase(_) => to_api_error(StatusCode::NOT_FOUND, "unknown_purchase", message),
            PurchaseError::SettlementInProgress => to_api_error(StatusCode::CONFLICT, "settlement_in_progress", message),
            PurchaseError::Store(_) | PurchaseError::Catalog(_) => {
                tracing::error!("Purchase backend failure: {}", message);
                to_api_error(StatusCode::INTERNAL_SERVER_ERROR, "internal", "Internal error")
            }
        }
    }
}
