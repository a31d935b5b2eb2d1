//! Purchase state machine.
//!
//! ```text
//! Requested -> Claimed -> AwaitingPayment -> Committed
//!                                         -> Released
//! Requested -> Rejected
//! ```
//!
//! Every path that ends in `Released` or fails after a claim gives the seat
//! back to the store before returning, so no seat is ever left half-held.
//! Confirm, cancel and timeout race for the same pending entry; whichever
//! takes it out of the table settles the purchase and the others see the
//! settled outcome.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::catalog::Catalog;
use crate::error::{PurchaseError, StoreError};
use crate::models::{
    Area, AreaId, Claim, PatronId, Price, PurchaseId, SeatKey, SeatNumber, Session, SessionId,
    Ticket,
};
use crate::notifications::{NotificationHub, ObserverError, SaleCompleted};
use crate::seat_map::SeatMap;
use crate::services::payment::{PaymentGate, PaymentRequest};
use crate::store::ReservationStore;
use crate::tickets::TicketFactory;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PurchaseState {
    Requested,
    Claimed,
    AwaitingPayment,
    Committed,
    Released,
    Rejected,
}

impl PurchaseState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            PurchaseState::Committed | PurchaseState::Released | PurchaseState::Rejected
        )
    }

    pub fn can_advance_to(self, next: PurchaseState) -> bool {
        use PurchaseState::*;
        matches!(
            (self, next),
            (Requested, Claimed)
                | (Requested, Rejected)
                | (Claimed, AwaitingPayment)
                | (Claimed, Released)
                | (AwaitingPayment, Committed)
                | (AwaitingPayment, Released)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReleaseReason {
    PaymentDenied,
    PaymentTimeout,
    Cancelled,
    ClaimLapsed,
    AlreadySold,
    BackendFailure,
}

/// What the patron gets back from `begin_purchase`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PurchaseHandle {
    pub id: PurchaseId,
    pub patron: PatronId,
    pub seat: SeatKey,
    pub price: Price,
    pub pay_by: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PurchaseStatus {
    pub id: PurchaseId,
    pub patron: PatronId,
    pub state: PurchaseState,
    pub release_reason: Option<ReleaseReason>,
    pub ticket: Option<Ticket>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeatAvailability {
    pub session: SessionId,
    pub area: Area,
    pub available: Vec<SeatNumber>,
    pub occupied: usize,
}

struct Pending {
    patron: PatronId,
    claim: Claim,
    session: Session,
    area: Area,
    deadline: Instant,
    state: PurchaseState,
}

impl Pending {
    fn advance(&mut self, next: PurchaseState) {
        debug_assert!(self.state.can_advance_to(next), "{:?} -> {:?}", self.state, next);
        self.state = next;
    }
}

#[derive(Clone)]
enum Outcome {
    Committed(Ticket),
    Released(ReleaseReason),
}

enum Entry {
    Pending(Pending),
    Settling { patron: PatronId },
    Settled { patron: PatronId, outcome: Outcome, at: Instant },
}

enum Taken {
    Pending(Pending),
    Settled(Outcome),
}

pub struct PurchaseCoordinator {
    catalog: Arc<dyn Catalog>,
    store: Arc<dyn ReservationStore>,
    tickets: TicketFactory,
    hub: Arc<NotificationHub>,
    payment_timeout: Duration,
    purchases: Mutex<HashMap<PurchaseId, Entry>>,
}

impl PurchaseCoordinator {
    pub fn new(
        catalog: Arc<dyn Catalog>,
        store: Arc<dyn ReservationStore>,
        hub: Arc<NotificationHub>,
        payment_timeout: Duration,
    ) -> Self {
        Self {
            catalog,
            store,
            tickets: TicketFactory::new(),
            hub,
            payment_timeout,
            purchases: Mutex::new(HashMap::new()),
        }
    }

    /// Registers a listener for completed sales.
    pub fn on_sale_completed<F>(&self, name: impl Into<String>, listener: F)
    where
        F: Fn(&SaleCompleted) -> Result<(), ObserverError> + Send + Sync + 'static,
    {
        self.hub.subscribe(name, listener);
    }

    fn table(&self) -> MutexGuard<'_, HashMap<PurchaseId, Entry>> {
        self.purchases.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn resolve(&self, session: SessionId, area: AreaId) -> Result<(Session, Area), PurchaseError> {
        let session = self
            .catalog
            .session(session)
            .await?
            .ok_or_else(|| PurchaseError::InvalidRequest(format!("unknown session {}", session)))?;
        let area = self
            .catalog
            .area(area)
            .await?
            .ok_or_else(|| PurchaseError::InvalidRequest(format!("unknown area {}", area)))?;
        Ok((session, area))
    }

    pub async fn availability(
        &self,
        session: SessionId,
        area: AreaId,
    ) -> Result<SeatAvailability, PurchaseError> {
        let (session, area) = self.resolve(session, area).await?;
        let occupied: BTreeSet<SeatNumber> = self.store.occupied_seats(session.id, area.id).await?;
        let available = SeatMap::of(&area).available(&occupied);
        Ok(SeatAvailability {
            session: session.id,
            occupied: area.capacity as usize - available.len(),
            available,
            area,
        })
    }

    /// Free seats in display order. Informational only.
    pub async fn list_available_seats(
        &self,
        session: SessionId,
        area: AreaId,
    ) -> Result<Vec<SeatNumber>, PurchaseError> {
        Ok(self.availability(session, area).await?.available)
    }

    pub async fn begin_purchase(
        &self,
        patron: PatronId,
        session: SessionId,
        area: AreaId,
        seat: SeatNumber,
    ) -> Result<PurchaseHandle, PurchaseError> {
        let (session, area) = match self.validate(patron, session, area, seat).await {
            Ok(found) => found,
            Err(e) => {
                info!(patron = %patron, "Purchase rejected: {}", e);
                return Err(e);
            }
        };

        let key = SeatKey::new(session.id, area.id, seat);
        let claim = match self.store.try_claim(key, patron).await {
            Ok(claim) => claim,
            Err(StoreError::SeatTaken) => {
                warn!(patron = %patron, seat = %key, "Purchase rejected, seat taken");
                return Err(PurchaseError::SeatTaken);
            }
            Err(e) => {
                error!(seat = %key, "Reservation store failed on claim: {}", e);
                return Err(e.into());
            }
        };

        let id = PurchaseId::new();
        let handle = PurchaseHandle {
            id,
            patron,
            seat: key,
            price: area.price,
            pay_by: (Utc::now() + chrono_duration(self.payment_timeout)).min(claim.expires_at),
        };

        let mut pending = Pending {
            patron,
            claim,
            session,
            area,
            deadline: Instant::now() + self.payment_timeout,
            state: PurchaseState::Claimed,
        };
        pending.advance(PurchaseState::AwaitingPayment);
        self.table().insert(id, Entry::Pending(pending));

        info!(purchase = %id, patron = %patron, seat = %key, price = %handle.price, "Seat claimed, awaiting payment");
        Ok(handle)
    }

    async fn validate(
        &self,
        patron: PatronId,
        session: SessionId,
        area: AreaId,
        seat: SeatNumber,
    ) -> Result<(Session, Area), PurchaseError> {
        if !self.catalog.patron_exists(patron).await? {
            return Err(PurchaseError::InvalidRequest(format!("unknown patron {}", patron)));
        }
        let (session, area) = self.resolve(session, area).await?;
        if !SeatMap::of(&area).contains(seat) {
            return Err(PurchaseError::InvalidRequest(format!(
                "seat {} outside 1..={} in {}",
                seat, area.capacity, area.name
            )));
        }
        Ok((session, area))
    }

    fn take(&self, id: PurchaseId) -> Result<Taken, PurchaseError> {
        let mut table = self.table();
        let entry = table.remove(&id).ok_or(PurchaseError::UnknownPurchase(id))?;
        match entry {
            Entry::Pending(pending) => {
                table.insert(id, Entry::Settling { patron: pending.patron });
                Ok(Taken::Pending(pending))
            }
            Entry::Settling { patron } => {
                table.insert(id, Entry::Settling { patron });
                Err(PurchaseError::SettlementInProgress)
            }
            Entry::Settled { patron, outcome, at } => {
                table.insert(id, Entry::Settled { patron, outcome: outcome.clone(), at });
                Ok(Taken::Settled(outcome))
            }
        }
    }

    fn settle(&self, id: PurchaseId, patron: PatronId, outcome: Outcome) {
        self.table().insert(
            id,
            Entry::Settled {
                patron,
                outcome,
                at: Instant::now(),
            },
        );
    }

    async fn release(&self, id: PurchaseId, mut pending: Pending, reason: ReleaseReason) {
        if let Err(e) = self.store.release(&pending.claim).await {
            // The hold still lapses at its deadline.
            error!(purchase = %id, seat = %pending.claim.key, "Failed to release claim: {}", e);
        }
        pending.advance(PurchaseState::Released);
        self.settle(id, pending.patron, Outcome::Released(reason));
        info!(purchase = %id, seat = %pending.claim.key, ?reason, "Purchase released");
    }

    /// Hands the payment decision for a purchase to the coordinator.
    ///
    /// Repeating a confirmation for a committed purchase returns the same
    /// ticket; any confirmation for a released purchase is discarded with
    /// `ClaimExpired`.
    pub async fn confirm_payment(
        &self,
        id: PurchaseId,
        approved: bool,
    ) -> Result<Ticket, PurchaseError> {
        let mut pending = match self.take(id)? {
            Taken::Pending(pending) => pending,
            Taken::Settled(Outcome::Committed(ticket)) => return Ok(ticket),
            Taken::Settled(Outcome::Released(reason)) => {
                warn!(purchase = %id, ?reason, "Late payment decision discarded");
                return Err(PurchaseError::ClaimExpired);
            }
        };

        if !approved {
            self.release(id, pending, ReleaseReason::PaymentDenied).await;
            return Err(PurchaseError::PaymentDenied);
        }
        if Instant::now() >= pending.deadline {
            warn!(purchase = %id, "Payment confirmed after deadline");
            self.release(id, pending, ReleaseReason::PaymentTimeout).await;
            return Err(PurchaseError::ClaimExpired);
        }

        let code = self.tickets.issue_code();
        let occupancy = match self.store.commit(&pending.claim, &code).await {
            Ok(occupancy) => occupancy,
            Err(StoreError::ClaimExpired) => {
                warn!(purchase = %id, seat = %pending.claim.key, "Claim lapsed before commit");
                self.release(id, pending, ReleaseReason::ClaimLapsed).await;
                return Err(PurchaseError::ClaimExpired);
            }
            Err(StoreError::SeatTaken) => {
                warn!(purchase = %id, seat = %pending.claim.key, "Seat already recorded as sold, sale refused");
                self.release(id, pending, ReleaseReason::AlreadySold).await;
                return Err(PurchaseError::SeatTaken);
            }
            Err(e) => {
                error!(purchase = %id, "Reservation store failed on commit: {}", e);
                self.release(id, pending, ReleaseReason::BackendFailure).await;
                return Err(e.into());
            }
        };

        let ticket = self.tickets.mint(&occupancy, &pending.area, &pending.session);
        pending.advance(PurchaseState::Committed);
        self.settle(id, pending.patron, Outcome::Committed(ticket.clone()));
        info!(purchase = %id, code = %ticket.code, seat = %occupancy.key, "Sale committed");

        let report = self.hub.publish(&SaleCompleted {
            purchase: id,
            ticket: ticket.clone(),
        });
        if report.failed > 0 {
            warn!(purchase = %id, "{} of {} sale observers failed", report.failed, report.failed + report.delivered);
        }
        Ok(ticket)
    }

    /// Abandons a purchase. Safe to repeat, and a no-op once settled or
    /// while another call is settling it.
    pub async fn cancel_purchase(&self, id: PurchaseId) -> Result<(), PurchaseError> {
        match self.take(id) {
            Ok(Taken::Pending(pending)) => {
                self.release(id, pending, ReleaseReason::Cancelled).await;
                Ok(())
            }
            Ok(Taken::Settled(_)) => {
                debug!(purchase = %id, "Cancel on settled purchase ignored");
                Ok(())
            }
            Err(PurchaseError::SettlementInProgress) => {
                debug!(purchase = %id, "Cancel while settling ignored");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    pub fn purchase_status(&self, id: PurchaseId) -> Option<PurchaseStatus> {
        let table = self.table();
        let status = match table.get(&id)? {
            Entry::Pending(pending) => PurchaseStatus {
                id,
                patron: pending.patron,
                state: pending.state,
                release_reason: None,
                ticket: None,
            },
            Entry::Settling { patron } => PurchaseStatus {
                id,
                patron: *patron,
                state: PurchaseState::AwaitingPayment,
                release_reason: None,
                ticket: None,
            },
            Entry::Settled { patron, outcome, .. } => match outcome {
                Outcome::Committed(ticket) => PurchaseStatus {
                    id,
                    patron: *patron,
                    state: PurchaseState::Committed,
                    release_reason: None,
                    ticket: Some(ticket.clone()),
                },
                Outcome::Released(reason) => PurchaseStatus {
                    id,
                    patron: *patron,
                    state: PurchaseState::Released,
                    release_reason: Some(*reason),
                    ticket: None,
                },
            },
        };
        Some(status)
    }

    /// Begins a purchase and settles it with a decision from `gate`, waiting
    /// no longer than the payment timeout.
    pub async fn purchase_with<G>(
        &self,
        gate: &G,
        patron: PatronId,
        session: SessionId,
        area: AreaId,
        seat: SeatNumber,
    ) -> Result<Ticket, PurchaseError>
    where
        G: PaymentGate + ?Sized,
    {
        let handle = self.begin_purchase(patron, session, area, seat).await?;
        let request = PaymentRequest {
            purchase: handle.id,
            patron,
            seat: handle.seat,
            amount: handle.price,
            description: format!("Seat {}", handle.seat),
        };

        match tokio::time::timeout(self.payment_timeout, gate.authorize(&request)).await {
            Ok(Ok(approved)) => self.confirm_payment(handle.id, approved).await,
            Ok(Err(e)) => {
                warn!(purchase = %handle.id, "Payment gate error, treating as declined: {}", e);
                self.confirm_payment(handle.id, false).await
            }
            Err(_) => {
                warn!(purchase = %handle.id, "Payment gate timed out");
                // A webhook may have settled the purchase while the gate hung.
                match self.take(handle.id)? {
                    Taken::Pending(pending) => {
                        self.release(handle.id, pending, ReleaseReason::PaymentTimeout).await;
                        Err(PurchaseError::ClaimExpired)
                    }
                    Taken::Settled(Outcome::Committed(ticket)) => Ok(ticket),
                    Taken::Settled(Outcome::Released(_)) => Err(PurchaseError::ClaimExpired),
                }
            }
        }
    }

    /// Releases every purchase whose payment deadline has passed.
    pub async fn expire_overdue(&self) -> usize {
        let now = Instant::now();
        let overdue: Vec<(PurchaseId, Pending)> = {
            let mut table = self.table();
            let ids: Vec<PurchaseId> = table
                .iter()
                .filter_map(|(id, entry)| match entry {
                    Entry::Pending(p) if p.deadline <= now => Some(*id),
                    _ => None,
                })
                .collect();
            ids.into_iter()
                .filter_map(|id| match table.remove(&id)? {
                    Entry::Pending(pending) => {
                        table.insert(id, Entry::Settling { patron: pending.patron });
                        Some((id, pending))
                    }
                    other => {
                        table.insert(id, other);
                        None
                    }
                })
                .collect()
        };

        let count = overdue.len();
        for (id, pending) in overdue {
            self.release(id, pending, ReleaseReason::PaymentTimeout).await;
        }
        count
    }

    /// Forgets settled purchases older than `retention`.
    pub fn prune_settled(&self, retention: Duration) -> usize {
        let now = Instant::now();
        let mut table = self.table();
        let before = table.len();
        table.retain(|_, entry| match entry {
            Entry::Settled { at, .. } => now.duration_since(*at) < retention,
            _ => true,
        });
        before - table.len()
    }

    pub fn pending_count(&self) -> usize {
        self.table()
            .values()
            .filter(|entry| matches!(entry, Entry::Pending(_)))
            .count()
    }
}

fn chrono_duration(duration: Duration) -> chrono::Duration {
    chrono::Duration::milliseconds(i64::try_from(duration.as_millis()).unwrap_or(i64::MAX / 2))
}
