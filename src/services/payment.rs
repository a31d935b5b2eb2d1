//! Payment collaborator seam.
//!
//! The box office never talks to a card network itself: a `PaymentGate`
//! answers approve/deny for a purchase, or a gateway calls back through the
//! signed webhook and the decision is handed to `confirm_payment`.

use async_trait::async_trait;
use rand::Rng;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::time::Duration;
use thiserror::Error;
use tracing::info;

use crate::models::{PatronId, Price, PurchaseId, SeatKey};

#[derive(Debug, Clone, Serialize)]
pub struct PaymentRequest {
    pub purchase: PurchaseId,
    pub patron: PatronId,
    pub seat: SeatKey,
    pub amount: Price,
    pub description: String,
}

#[derive(Debug, Error)]
pub enum PaymentGateError {
    #[error("payment gateway unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait PaymentGate: Send + Sync {
    /// `Ok(true)` approves, `Ok(false)` declines.
    async fn authorize(&self, request: &PaymentRequest) -> Result<bool, PaymentGateError>;
}

/// Stand-in gateway that approves a fixed share of payments after a delay.
/// A ratio outside `0.0..=1.0` is clamped; NaN declines everything.
#[derive(Debug, Clone)]
pub struct SimulatedPaymentGate {
    approval_ratio: f64,
    latency: Duration,
}

impl SimulatedPaymentGate {
    pub fn new(approval_ratio: f64, latency: Duration) -> Self {
        Self {
            approval_ratio: if approval_ratio.is_nan() {
                0.0
            } else {
                approval_ratio.clamp(0.0, 1.0)
            },
            latency,
        }
    }

    pub fn always_approve() -> Self {
        Self::new(1.0, Duration::ZERO)
    }

    pub fn always_decline() -> Self {
        Self::new(0.0, Duration::ZERO)
    }
}

#[async_trait]
impl PaymentGate for SimulatedPaymentGate {
    async fn authorize(&self, request: &PaymentRequest) -> Result<bool, PaymentGateError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let approved = rand::thread_rng().gen_bool(self.approval_ratio);
        info!(
            purchase = %request.purchase,
            amount = request.amount.cents(),
            approved,
            "Simulated payment decided"
        );
        Ok(approved)
    }
}

/// Signs and checks payment webhook decisions with the merchant secret.
#[derive(Clone)]
pub struct WebhookSigner {
    secret: String,
}

impl WebhookSigner {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    pub fn sign(&self, purchase: PurchaseId, approved: bool) -> String {
        let payload = format!("{}{}{}", purchase, approved, self.secret);
        let mut hasher = Sha256::new();
        hasher.update(payload.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    pub fn verify(&self, purchase: PurchaseId, approved: bool, token: &str) -> bool {
        let expected = self.sign(purchase, approved);
        // Length is fixed (64 hex chars); compare without early exit.
        expected.len() == token.len()
            && expected
                .bytes()
                .zip(token.bytes())
                .fold(0u8, |acc, (a, b)| acc | (a ^ b))
                == 0
    }
}
