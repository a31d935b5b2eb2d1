use thiserror::Error;

use crate::models::PurchaseId;

/// Outcomes of the reservation store that are not a successful transition.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("seat is already held or sold")]
    SeatTaken,
    #[error("claim was released or has expired")]
    ClaimExpired,
    #[error("reservation backend failure: {0}")]
    Backend(String),
}

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        StoreError::Backend(err.to_string())
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::Backend(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Backend(format!("malformed reservation record: {}", err))
    }
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("catalog database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("catalog record is invalid: {0}")]
    Corrupt(String),
}

/// Everything a purchase attempt can end with, short of a ticket.
#[derive(Debug, Error)]
pub enum PurchaseError {
    #[error("invalid purchase request: {0}")]
    InvalidRequest(String),
    #[error("seat is already taken")]
    SeatTaken,
    #[error("claim expired before payment was confirmed")]
    ClaimExpired,
    #[error("payment was denied")]
    PaymentDenied,
    #[error("purchase {0} not found")]
    UnknownPurchase(PurchaseId),
    #[error("purchase is being settled")]
    SettlementInProgress,
    #[error(transparent)]
    Store(StoreError),
    #[error(transparent)]
    Catalog(#[from] CatalogError),
}

impl PurchaseError {
    /// Whether the patron can get somewhere by trying again, possibly with a
    /// different seat or different payment details.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PurchaseError::SeatTaken
                | PurchaseError::PaymentDenied
                | PurchaseError::SettlementInProgress
        )
    }
}

impl From<StoreError> for PurchaseError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::SeatTaken => PurchaseError::SeatTaken,
            StoreError::ClaimExpired => PurchaseError::ClaimExpired,
            other => PurchaseError::Store(other),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{key} has an invalid value {value:?}")]
    Invalid { key: &'static str, value: String },
    #[error("{0} must be set")]
    Missing(&'static str),
}
