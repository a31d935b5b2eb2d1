use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::FromRow;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{error, warn};

use super::ReservationStore;
use crate::database::Database;
use crate::error::StoreError;
use crate::models::{
    AreaId, Claim, Occupancy, PatronId, SeatKey, SeatNumber, SessionId, TicketCode,
};

/// Durable record of sold seats, at most one per seat.
#[async_trait]
pub trait OccupancyLedger: Send + Sync {
    /// `false` when the seat is already recorded as sold.
    async fn record(&self, occupancy: &Occupancy) -> Result<bool, StoreError>;

    /// Removes the record only if it still carries this ticket code.
    async fn forget(&self, occupancy: &Occupancy) -> Result<(), StoreError>;

    async fn load(&self) -> Result<Vec<Occupancy>, StoreError>;
}

#[derive(Clone)]
pub struct PgOccupancyLedger {
    db: Database,
}

#[derive(FromRow)]
struct OccupancyRow {
    session_id: i64,
    area_id: i64,
    seat: i32,
    patron_id: i64,
    ticket_code: String,
    sold_at: DateTime<Utc>,
}

impl TryFrom<OccupancyRow> for Occupancy {
    type Error = StoreError;

    fn try_from(row: OccupancyRow) -> Result<Self, Self::Error> {
        let seat = SeatNumber::try_from(row.seat)
            .map_err(|_| StoreError::Backend(format!("occupancy with seat {}", row.seat)))?;
        Ok(Occupancy {
            key: SeatKey::new(SessionId::new(row.session_id), AreaId::new(row.area_id), seat),
            patron: PatronId::new(row.patron_id),
            ticket_code: TicketCode::new(row.ticket_code),
            sold_at: row.sold_at,
        })
    }
}

fn seat_column(seat: SeatNumber) -> Result<i32, StoreError> {
    i32::try_from(seat).map_err(|_| StoreError::Backend(format!("seat {} out of range", seat)))
}

impl PgOccupancyLedger {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl OccupancyLedger for PgOccupancyLedger {
    async fn record(&self, occupancy: &Occupancy) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO occupancies (session_id, area_id, seat, patron_id, ticket_code, sold_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT DO NOTHING
            "#
        )
        .bind(occupancy.key.session.get())
        .bind(occupancy.key.area.get())
        .bind(seat_column(occupancy.key.seat)?)
        .bind(occupancy.patron.get())
        .bind(occupancy.ticket_code.as_str())
        .bind(occupancy.sold_at)
        .execute(&self.db.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn forget(&self, occupancy: &Occupancy) -> Result<(), StoreError> {
        sqlx::query(
            "DELETE FROM occupancies
             WHERE session_id = $1 AND area_id = $2 AND seat = $3 AND ticket_code = $4"
        )
        .bind(occupancy.key.session.get())
        .bind(occupancy.key.area.get())
        .bind(seat_column(occupancy.key.seat)?)
        .bind(occupancy.ticket_code.as_str())
        .execute(&self.db.pool)
        .await?;
        Ok(())
    }

    async fn load(&self) -> Result<Vec<Occupancy>, StoreError> {
        let rows: Vec<OccupancyRow> = sqlx::query_as(
            "SELECT session_id, area_id, seat, patron_id, ticket_code, sold_at FROM occupancies"
        )
        .fetch_all(&self.db.pool)
        .await?;

        rows.into_iter().map(Occupancy::try_from).collect()
    }
}

/// Puts a ledger in front of a store's commit. A seat is only sold once the
/// ledger accepted it, so a seat sold before a restart, or by another
/// instance, cannot be sold again even if the store has forgotten it.
pub struct LedgeredStore {
    inner: Arc<dyn ReservationStore>,
    ledger: Arc<dyn OccupancyLedger>,
}

impl LedgeredStore {
    pub fn new(inner: Arc<dyn ReservationStore>, ledger: Arc<dyn OccupancyLedger>) -> Self {
        Self { inner, ledger }
    }
}

#[async_trait]
impl ReservationStore for LedgeredStore {
    async fn occupied_seats(
        &self,
        session: SessionId,
        area: AreaId,
    ) -> Result<BTreeSet<SeatNumber>, StoreError> {
        self.inner.occupied_seats(session, area).await
    }

    async fn try_claim(&self, key: SeatKey, patron: PatronId) -> Result<Claim, StoreError> {
        self.inner.try_claim(key, patron).await
    }

    async fn commit(&self, claim: &Claim, code: &TicketCode) -> Result<Occupancy, StoreError> {
        // A lapsed claim may already belong to a newer claimer; keep it out of the ledger.
        if claim.expires_at <= Utc::now() {
            return Err(StoreError::ClaimExpired);
        }

        let occupancy = Occupancy {
            key: claim.key,
            patron: claim.patron,
            ticket_code: code.clone(),
            sold_at: Utc::now(),
        };
        if !self.ledger.record(&occupancy).await? {
            warn!(seat = %claim.key, "Seat already in the occupancy ledger");
            return Err(StoreError::SeatTaken);
        }

        match self.inner.commit(claim, code).await {
            Ok(committed) => Ok(committed),
            Err(e) => {
                if let Err(forget) = self.ledger.forget(&occupancy).await {
                    error!(seat = %claim.key, code = %code, "Failed to withdraw ledger entry: {}", forget);
                }
                Err(e)
            }
        }
    }

    async fn release(&self, claim: &Claim) -> Result<(), StoreError> {
        self.inner.release(claim).await
    }

    async fn purge_expired(&self) -> Result<usize, StoreError> {
        self.inner.purge_expired().await
    }
}
