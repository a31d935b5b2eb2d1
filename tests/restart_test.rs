//! Sold seats survive a restart when sales go through an occupancy ledger.
//!
//! Run with: `cargo test --test restart_test`

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use box_office::{
    catalog::{Catalog, MemoryCatalog},
    coordinator::{PurchaseCoordinator, PurchaseState, ReleaseReason},
    error::{PurchaseError, StoreError},
    models::{AreaId, Occupancy, PatronId, SeatKey, SessionId},
    notifications::NotificationHub,
    store::{LedgeredStore, MemoryReservationStore, OccupancyLedger, ReservationStore},
};

const S1: SessionId = SessionId::new(1);
const STALLS: AreaId = AreaId::new(1);

/// Stands in for the `occupancies` table: one row per seat.
#[derive(Default)]
struct SharedLedger {
    rows: Mutex<HashMap<SeatKey, Occupancy>>,
}

#[async_trait]
impl OccupancyLedger for SharedLedger {
    async fn record(&self, occupancy: &Occupancy) -> Result<bool, StoreError> {
        let mut rows = self.rows.lock().unwrap();
        if rows.contains_key(&occupancy.key) {
            return Ok(false);
        }
        rows.insert(occupancy.key, occupancy.clone());
        Ok(true)
    }

    async fn forget(&self, occupancy: &Occupancy) -> Result<(), StoreError> {
        let mut rows = self.rows.lock().unwrap();
        if rows.get(&occupancy.key).map(|o| &o.ticket_code) == Some(&occupancy.ticket_code) {
            rows.remove(&occupancy.key);
        }
        Ok(())
    }

    async fn load(&self) -> Result<Vec<Occupancy>, StoreError> {
        Ok(self.rows.lock().unwrap().values().cloned().collect())
    }
}

/// Boots a coordinator the way `AppState::build` does with a database:
/// memory store seeded from the ledger when `restore` is set, ledger in front.
async fn boot(
    catalog: &Arc<MemoryCatalog>,
    ledger: &Arc<SharedLedger>,
    restore: bool,
) -> PurchaseCoordinator {
    let memory = MemoryReservationStore::new(Duration::from_secs(300));
    if restore {
        memory.restore(ledger.load().await.unwrap());
    }
    let store: Arc<dyn ReservationStore> = Arc::new(LedgeredStore::new(
        Arc::new(memory),
        ledger.clone() as Arc<dyn OccupancyLedger>,
    ));
    PurchaseCoordinator::new(
        catalog.clone() as Arc<dyn Catalog>,
        store,
        Arc::new(NotificationHub::new()),
        Duration::from_secs(300),
    )
}

#[tokio::test]
async fn seat_sold_before_restart_stays_sold() {
    let catalog = Arc::new(MemoryCatalog::demo());
    let ledger = Arc::new(SharedLedger::default());

    let before = boot(&catalog, &ledger, true).await;
    let handle = before.begin_purchase(PatronId::new(1), S1, STALLS, 1).await.unwrap();
    let ticket = before.confirm_payment(handle.id, true).await.unwrap();
    drop(before);

    let after = boot(&catalog, &ledger, true).await;
    assert!(!after.list_available_seats(S1, STALLS).await.unwrap().contains(&1));
    let err = after.begin_purchase(PatronId::new(2), S1, STALLS, 1).await.unwrap_err();
    assert!(matches!(err, PurchaseError::SeatTaken));

    let rows = ledger.load().await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].ticket_code, ticket.code);
}

#[tokio::test]
async fn store_that_forgot_the_sale_is_overruled_by_the_ledger() {
    let catalog = Arc::new(MemoryCatalog::demo());
    let ledger = Arc::new(SharedLedger::default());

    let first = boot(&catalog, &ledger, true).await;
    let handle = first.begin_purchase(PatronId::new(1), S1, STALLS, 4).await.unwrap();
    let ticket = first.confirm_payment(handle.id, true).await.unwrap();

    // No restore: the in-process store has never heard of seat 4.
    let second = boot(&catalog, &ledger, false).await;
    let late = second.begin_purchase(PatronId::new(2), S1, STALLS, 4).await.unwrap();
    let err = second.confirm_payment(late.id, true).await.unwrap_err();

    assert!(matches!(err, PurchaseError::SeatTaken));
    let status = second.purchase_status(late.id).unwrap();
    assert_eq!(status.state, PurchaseState::Released);
    assert_eq!(status.release_reason, Some(ReleaseReason::AlreadySold));

    let rows = ledger.load().await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].ticket_code, ticket.code);
    assert_eq!(rows[0].patron, PatronId::new(1));
}
