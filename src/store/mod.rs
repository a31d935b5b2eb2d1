//! Authoritative seat occupancy.
//!
//! `try_claim` is the only way a seat goes from free to held, and it is a
//! single atomic step in every backend. `occupied_seats` is a display
//! snapshot and must never be used to decide whether a purchase may proceed.

mod ledger;
mod memory;
mod redis_store;

pub use self::ledger::{LedgeredStore, OccupancyLedger, PgOccupancyLedger};
pub use self::memory::MemoryReservationStore;
pub use self::redis_store::RedisReservationStore;

use async_trait::async_trait;
use std::collections::BTreeSet;
use std::time::Duration;

use crate::error::StoreError;
use crate::models::{AreaId, Claim, Occupancy, PatronId, SeatKey, SeatNumber, SessionId, TicketCode};

#[async_trait]
pub trait ReservationStore: Send + Sync {
    /// Seats currently held or sold. Stale as soon as it is returned.
    async fn occupied_seats(
        &self,
        session: SessionId,
        area: AreaId,
    ) -> Result<BTreeSet<SeatNumber>, StoreError>;

    /// Atomically holds a free seat for `patron`, or fails with `SeatTaken`.
    async fn try_claim(&self, key: SeatKey, patron: PatronId) -> Result<Claim, StoreError>;

    /// Turns a live claim into a sale. `ClaimExpired` if the hold is gone.
    async fn commit(&self, claim: &Claim, code: &TicketCode) -> Result<Occupancy, StoreError>;

    /// Drops the hold if it is still this claim's. No-op otherwise.
    async fn release(&self, claim: &Claim) -> Result<(), StoreError>;

    /// Removes holds past their deadline; returns how many went.
    async fn purge_expired(&self) -> Result<usize, StoreError>;
}

pub(crate) fn claim_window(hold: Duration) -> (chrono::DateTime<chrono::Utc>, chrono::DateTime<chrono::Utc>) {
    let claimed_at = chrono::Utc::now();
    let hold = chrono::Duration::milliseconds(i64::try_from(hold.as_millis()).unwrap_or(i64::MAX / 2));
    (claimed_at, claimed_at + hold)
}
