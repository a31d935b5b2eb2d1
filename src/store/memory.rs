use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

use super::{claim_window, ReservationStore};
use crate::error::StoreError;
use crate::models::{
    AreaId, Claim, ClaimId, Occupancy, PatronId, SeatKey, SeatNumber, SessionId, TicketCode,
};

type PartitionKey = (SessionId, AreaId);

enum SeatState {
    Held { claim: ClaimId, deadline: Instant },
    Sold(Occupancy),
}

impl SeatState {
    fn is_live(&self, now: Instant) -> bool {
        match self {
            SeatState::Held { deadline, .. } => *deadline > now,
            SeatState::Sold(_) => true,
        }
    }
}

#[derive(Default)]
struct Partition {
    seats: HashMap<SeatNumber, SeatState>,
}

impl Partition {
    fn held_deadline(&self, seat: SeatNumber, claim: ClaimId) -> Option<Instant> {
        match self.seats.get(&seat) {
            Some(SeatState::Held { claim: holder, deadline }) if *holder == claim => Some(*deadline),
            _ => None,
        }
    }

    fn purge(&mut self, now: Instant) -> usize {
        let before = self.seats.len();
        self.seats.retain(|_, state| state.is_live(now));
        before - self.seats.len()
    }
}

/// In-process store. Each (session, area) partition has its own lock, so a
/// claim only ever contends with claims on the same area of the same session.
pub struct MemoryReservationStore {
    hold: Duration,
    partitions: RwLock<HashMap<PartitionKey, Arc<Mutex<Partition>>>>,
}

impl MemoryReservationStore {
    pub fn new(hold: Duration) -> Self {
        Self {
            hold,
            partitions: RwLock::new(HashMap::new()),
        }
    }

    /// Marks previously sold seats as occupied, e.g. from the ledger at
    /// startup. Returns how many were loaded.
    pub fn restore(&self, sold: impl IntoIterator<Item = Occupancy>) -> usize {
        let mut restored = 0;
        for occupancy in sold {
            let partition = self.partition(occupancy.key.partition());
            lock(&partition)
                .seats
                .insert(occupancy.key.seat, SeatState::Sold(occupancy));
            restored += 1;
        }
        restored
    }

    fn existing(&self, key: PartitionKey) -> Option<Arc<Mutex<Partition>>> {
        self.partitions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
            .cloned()
    }

    fn partition(&self, key: PartitionKey) -> Arc<Mutex<Partition>> {
        if let Some(partition) = self.existing(key) {
            return partition;
        }
        self.partitions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(key)
            .or_default()
            .clone()
    }
}

fn lock(partition: &Mutex<Partition>) -> MutexGuard<'_, Partition> {
    partition.lock().unwrap_or_else(PoisonError::into_inner)
}

#[async_trait]
impl ReservationStore for MemoryReservationStore {
    async fn occupied_seats(
        &self,
        session: SessionId,
        area: AreaId,
    ) -> Result<BTreeSet<SeatNumber>, StoreError> {
        let Some(partition) = self.existing((session, area)) else {
            return Ok(BTreeSet::new());
        };
        let now = Instant::now();
        let mut guard = lock(&partition);
        guard.purge(now);
        Ok(guard.seats.keys().copied().collect())
    }

    async fn try_claim(&self, key: SeatKey, patron: PatronId) -> Result<Claim, StoreError> {
        let partition = self.partition(key.partition());
        let now = Instant::now();
        let mut guard = lock(&partition);

        if guard.seats.get(&key.seat).is_some_and(|state| state.is_live(now)) {
            debug!(seat = %key, "claim refused, seat taken");
            return Err(StoreError::SeatTaken);
        }

        let (claimed_at, expires_at) = claim_window(self.hold);
        let claim = Claim {
            id: ClaimId::new(),
            key,
            patron,
            claimed_at,
            expires_at,
        };
        guard.seats.insert(
            key.seat,
            SeatState::Held {
                claim: claim.id,
                deadline: now + self.hold,
            },
        );
        Ok(claim)
    }

    async fn commit(&self, claim: &Claim, code: &TicketCode) -> Result<Occupancy, StoreError> {
        let partition = self
            .existing(claim.key.partition())
            .ok_or(StoreError::ClaimExpired)?;
        let now = Instant::now();
        let mut guard = lock(&partition);

        let deadline = guard
            .held_deadline(claim.key.seat, claim.id)
            .ok_or(StoreError::ClaimExpired)?;
        if deadline <= now {
            guard.seats.remove(&claim.key.seat);
            return Err(StoreError::ClaimExpired);
        }

        let occupancy = Occupancy {
            key: claim.key,
            patron: claim.patron,
            ticket_code: code.clone(),
            sold_at: Utc::now(),
        };
        guard
            .seats
            .insert(claim.key.seat, SeatState::Sold(occupancy.clone()));
        Ok(occupancy)
    }

    async fn release(&self, claim: &Claim) -> Result<(), StoreError> {
        let Some(partition) = self.existing(claim.key.partition()) else {
            return Ok(());
        };
        let mut guard = lock(&partition);
        if guard.held_deadline(claim.key.seat, claim.id).is_some() {
            guard.seats.remove(&claim.key.seat);
            debug!(seat = %claim.key, claim = %claim.id, "claim released");
        }
        Ok(())
    }

    async fn purge_expired(&self) -> Result<usize, StoreError> {
        let partitions: Vec<_> = self
            .partitions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();

        let now = Instant::now();
        let purged: usize = partitions.iter().map(|p| lock(p).purge(now)).sum();
        if purged > 0 {
            info!("Purged {} expired seat holds", purged);
        }
        Ok(purged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(seat: SeatNumber) -> SeatKey {
        SeatKey::new(SessionId::new(1), AreaId::new(1), seat)
    }

    fn store() -> MemoryReservationStore {
        MemoryReservationStore::new(Duration::from_secs(300))
    }

    #[tokio::test]
    async fn second_claim_on_same_seat_is_refused() {
        let store = store();
        store.try_claim(key(3), PatronId::new(1)).await.unwrap();

        let err = store.try_claim(key(3), PatronId::new(2)).await.unwrap_err();
        assert_eq!(err, StoreError::SeatTaken);
        assert!(store.try_claim(key(4), PatronId::new(2)).await.is_ok());
    }

    #[tokio::test]
    async fn same_seat_number_in_other_session_is_independent() {
        let store = store();
        store.try_claim(key(3), PatronId::new(1)).await.unwrap();

        let other = SeatKey::new(SessionId::new(2), AreaId::new(1), 3);
        assert!(store.try_claim(other, PatronId::new(2)).await.is_ok());
    }

    #[tokio::test]
    async fn committed_seat_stays_occupied() {
        let store = store();
        let claim = store.try_claim(key(1), PatronId::new(1)).await.unwrap();
        let occupancy = store.commit(&claim, &TicketCode::new("AB12CD34")).await.unwrap();

        assert_eq!(occupancy.key, key(1));
        assert_eq!(occupancy.ticket_code.as_str(), "AB12CD34");
        store.release(&claim).await.unwrap();
        let occupied = store.occupied_seats(SessionId::new(1), AreaId::new(1)).await.unwrap();
        assert!(occupied.contains(&1));
        assert_eq!(
            store.try_claim(key(1), PatronId::new(2)).await.unwrap_err(),
            StoreError::SeatTaken
        );
    }

    #[tokio::test]
    async fn released_claim_cannot_commit() {
        let store = store();
        let claim = store.try_claim(key(1), PatronId::new(1)).await.unwrap();
        store.release(&claim).await.unwrap();
        store.release(&claim).await.unwrap();

        let err = store.commit(&claim, &TicketCode::new("X")).await.unwrap_err();
        assert_eq!(err, StoreError::ClaimExpired);
    }

    #[tokio::test]
    async fn stale_release_does_not_free_a_newer_claim() {
        let store = store();
        let first = store.try_claim(key(1), PatronId::new(1)).await.unwrap();
        store.release(&first).await.unwrap();
        let second = store.try_claim(key(1), PatronId::new(2)).await.unwrap();

        store.release(&first).await.unwrap();
        assert!(store.commit(&second, &TicketCode::new("Y")).await.is_ok());
    }

    #[tokio::test]
    async fn restored_sales_are_occupied() {
        let store = store();
        let restored = store.restore([Occupancy {
            key: key(8),
            patron: PatronId::new(4),
            ticket_code: TicketCode::new("0A0A0A0A0A0A"),
            sold_at: Utc::now(),
        }]);

        assert_eq!(restored, 1);
        let occupied = store.occupied_seats(SessionId::new(1), AreaId::new(1)).await.unwrap();
        assert_eq!(occupied.into_iter().collect::<Vec<_>>(), vec![8]);
        assert_eq!(
            store.try_claim(key(8), PatronId::new(5)).await.unwrap_err(),
            StoreError::SeatTaken
        );
    }

    #[tokio::test(start_paused = true)]
    async fn hold_lapses_after_deadline() {
        let store = store();
        let claim = store.try_claim(key(1), PatronId::new(1)).await.unwrap();

        tokio::time::advance(Duration::from_secs(301)).await;

        let occupied = store.occupied_seats(SessionId::new(1), AreaId::new(1)).await.unwrap();
        assert!(occupied.is_empty());
        assert_eq!(
            store.commit(&claim, &TicketCode::new("Z")).await.unwrap_err(),
            StoreError::ClaimExpired
        );
        assert!(store.try_claim(key(1), PatronId::new(2)).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn purge_counts_only_lapsed_holds() {
        let store = store();
        let sold = store.try_claim(key(1), PatronId::new(1)).await.unwrap();
        store.commit(&sold, &TicketCode::new("S")).await.unwrap();
        store.try_claim(key(2), PatronId::new(1)).await.unwrap();
        store.try_claim(key(3), PatronId::new(1)).await.unwrap();

        tokio::time::advance(Duration::from_secs(600)).await;

        assert_eq!(store.purge_expired().await.unwrap(), 2);
        let occupied = store.occupied_seats(SessionId::new(1), AreaId::new(1)).await.unwrap();
        assert_eq!(occupied.into_iter().collect::<Vec<_>>(), vec![1]);
    }
}
