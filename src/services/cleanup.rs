use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::coordinator::PurchaseCoordinator;
use crate::store::ReservationStore;

/// Periodic cleanup of abandoned purchases and lapsed seat holds.
///
/// Expiry is already enforced lazily on every read and commit; the sweep
/// keeps the tables small and settles purchases nobody came back for.
pub struct ExpirySweeper {
    coordinator: Arc<PurchaseCoordinator>,
    store: Arc<dyn ReservationStore>,
    retention: Duration,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    pub expired_purchases: usize,
    pub purged_holds: usize,
    pub pruned_records: usize,
}

impl SweepStats {
    pub fn total(&self) -> usize {
        self.expired_purchases + self.purged_holds + self.pruned_records
    }
}

impl ExpirySweeper {
    pub fn new(
        coordinator: Arc<PurchaseCoordinator>,
        store: Arc<dyn ReservationStore>,
        retention: Duration,
    ) -> Self {
        Self {
            coordinator,
            store,
            retention,
        }
    }

    pub async fn run_once(&self) -> SweepStats {
        let expired_purchases = self.coordinator.expire_overdue().await;

        let purged_holds = match self.store.purge_expired().await {
            Ok(purged) => purged,
            Err(e) => {
                error!("Failed to purge expired holds: {}", e);
                0
            }
        };

        let pruned_records = self.coordinator.prune_settled(self.retention);

        let stats = SweepStats {
            expired_purchases,
            purged_holds,
            pruned_records,
        };
        if stats.total() > 0 {
            info!(
                expired = stats.expired_purchases,
                purged = stats.purged_holds,
                pruned = stats.pruned_records,
                "Sweep finished"
            );
        }
        stats
    }

    pub fn spawn(self, every: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                self.run_once().await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::MemoryCatalog;
    use crate::models::{AreaId, PatronId, SessionId};
    use crate::notifications::NotificationHub;
    use crate::store::MemoryReservationStore;

    #[tokio::test(start_paused = true)]
    async fn sweep_settles_abandoned_purchases() {
        let store: Arc<dyn ReservationStore> =
            Arc::new(MemoryReservationStore::new(Duration::from_secs(120)));
        let coordinator = Arc::new(PurchaseCoordinator::new(
            Arc::new(MemoryCatalog::demo()),
            store.clone(),
            Arc::new(NotificationHub::new()),
            Duration::from_secs(120),
        ));
        let sweeper = ExpirySweeper::new(coordinator.clone(), store, Duration::from_secs(60));

        coordinator
            .begin_purchase(PatronId::new(1), SessionId::new(1), AreaId::new(1), 1)
            .await
            .unwrap();
        assert_eq!(sweeper.run_once().await, SweepStats::default());

        tokio::time::advance(Duration::from_secs(121)).await;
        let stats = sweeper.run_once().await;
        assert_eq!(stats.expired_purchases, 1);
        assert_eq!(coordinator.pending_count(), 0);

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(sweeper.run_once().await.pruned_records, 1);
    }
}
