//! End-to-end purchase flows against the in-memory backends.
//!
//! Run with: `cargo test --test purchase_flow_test`

use std::sync::{Arc, Mutex};
use std::time::Duration;

use box_office::{
    catalog::{Catalog, MemoryCatalog},
    coordinator::{PurchaseCoordinator, PurchaseState, ReleaseReason},
    error::PurchaseError,
    models::{
        Area, AreaId, EventId, PatronId, Price, PurchaseId, SeatNumber, Session, SessionId,
        TicketCode, TimeSlot,
    },
    notifications::NotificationHub,
    services::payment::SimulatedPaymentGate,
    store::{MemoryReservationStore, ReservationStore},
};
use chrono::NaiveDate;
use futures::future::join_all;
use tokio::sync::Barrier;

const S1: SessionId = SessionId::new(1);
const ORCHESTRA: AreaId = AreaId::new(10);
const BALCONY: AreaId = AreaId::new(20);
const PATRON_X: PatronId = PatronId::new(1);
const PATRON_Y: PatronId = PatronId::new(2);

struct Harness {
    catalog: Arc<MemoryCatalog>,
    store: Arc<MemoryReservationStore>,
    coordinator: Arc<PurchaseCoordinator>,
}

fn harness(hold: Duration) -> Harness {
    harness_with(hold, hold)
}

fn harness_with(hold: Duration, payment_timeout: Duration) -> Harness {
    let catalog = Arc::new(MemoryCatalog::new());
    catalog.insert_session(Session {
        id: S1,
        event_id: EventId::new(1),
        event_title: "A Midsummer Night's Dream".to_string(),
        date: NaiveDate::from_ymd_opt(2024, 9, 14).unwrap(),
        slot: TimeSlot::Evening,
        time: None,
    });
    catalog.insert_area(Area {
        id: ORCHESTRA,
        name: "Orchestra".to_string(),
        capacity: 2,
        price: Price::from_cents(5000),
    });
    catalog.insert_area(Area {
        id: BALCONY,
        name: "Balcony".to_string(),
        capacity: 40,
        price: Price::from_cents(2000),
    });
    for patron in 1..=200 {
        catalog.register_patron(PatronId::new(patron));
    }

    let store = Arc::new(MemoryReservationStore::new(hold));
    let coordinator = Arc::new(PurchaseCoordinator::new(
        catalog.clone() as Arc<dyn Catalog>,
        store.clone() as Arc<dyn ReservationStore>,
        Arc::new(NotificationHub::new()),
        payment_timeout,
    ));
    Harness { catalog, store, coordinator }
}

fn five_minutes() -> Harness {
    harness(Duration::from_secs(300))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_buyers_of_one_seat_yield_exactly_one_sale() {
    const BUYERS: usize = 100;
    let h = five_minutes();
    let barrier = Arc::new(Barrier::new(BUYERS));

    let attempts = (0..BUYERS).map(|i| {
        let coordinator = h.coordinator.clone();
        let barrier = barrier.clone();
        tokio::spawn(async move {
            barrier.wait().await;
            coordinator
                .begin_purchase(PatronId::new(i as i64 + 1), S1, BALCONY, 7)
                .await
        })
    });
    let results: Vec<_> = join_all(attempts)
        .await
        .into_iter()
        .map(|joined| joined.expect("task panicked"))
        .collect();

    let winners: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
    let lost = results
        .iter()
        .filter(|r| matches!(r, Err(PurchaseError::SeatTaken)))
        .count();
    assert_eq!(winners.len(), 1);
    assert_eq!(lost, BUYERS - 1);

    let ticket = h.coordinator.confirm_payment(winners[0].id, true).await.unwrap();
    assert_eq!(ticket.seat, 7);
    assert_eq!(
        h.coordinator.purchase_status(winners[0].id).unwrap().state,
        PurchaseState::Committed
    );
    assert_eq!(h.store.occupied_seats(S1, BALCONY).await.unwrap().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn scenario_a_two_patrons_race_for_seat_one() {
    let h = five_minutes();

    let (x, y) = tokio::join!(
        h.coordinator.begin_purchase(PATRON_X, S1, ORCHESTRA, 1),
        h.coordinator.begin_purchase(PATRON_Y, S1, ORCHESTRA, 1),
    );

    let outcomes = [x, y];
    assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
    assert_eq!(
        outcomes
            .iter()
            .filter(|r| matches!(r, Err(PurchaseError::SeatTaken)))
            .count(),
        1
    );
}

#[tokio::test]
async fn scenario_b_declined_payment_returns_the_seat() {
    let h = five_minutes();
    let handle = h.coordinator.begin_purchase(PATRON_X, S1, ORCHESTRA, 1).await.unwrap();
    assert_eq!(h.coordinator.list_available_seats(S1, ORCHESTRA).await.unwrap(), vec![2]);

    let err = h.coordinator.confirm_payment(handle.id, false).await.unwrap_err();

    assert!(matches!(err, PurchaseError::PaymentDenied));
    assert!(err.is_retryable());
    assert_eq!(h.coordinator.list_available_seats(S1, ORCHESTRA).await.unwrap(), vec![1, 2]);
}

#[tokio::test(start_paused = true)]
async fn scenario_c_late_confirmation_is_discarded() {
    let h = five_minutes();
    let handle = h.coordinator.begin_purchase(PATRON_X, S1, ORCHESTRA, 1).await.unwrap();

    tokio::time::advance(Duration::from_secs(301)).await;

    let err = h.coordinator.confirm_payment(handle.id, true).await.unwrap_err();
    assert!(matches!(err, PurchaseError::ClaimExpired));
    assert!(!err.is_retryable());
    assert_eq!(h.coordinator.list_available_seats(S1, ORCHESTRA).await.unwrap(), vec![1, 2]);
    assert_eq!(
        h.coordinator.purchase_status(handle.id).unwrap().state,
        PurchaseState::Released
    );
}

#[tokio::test(start_paused = true)]
async fn late_confirmation_never_takes_a_seat_someone_else_claimed() {
    let h = five_minutes();
    let stale = h.coordinator.begin_purchase(PATRON_X, S1, ORCHESTRA, 1).await.unwrap();

    tokio::time::advance(Duration::from_secs(301)).await;
    let fresh = h.coordinator.begin_purchase(PATRON_Y, S1, ORCHESTRA, 1).await.unwrap();

    assert!(matches!(
        h.coordinator.confirm_payment(stale.id, true).await.unwrap_err(),
        PurchaseError::ClaimExpired
    ));
    let ticket = h.coordinator.confirm_payment(fresh.id, true).await.unwrap();
    assert_eq!(ticket.patron, PATRON_Y);
}

#[tokio::test]
async fn scenario_d_each_observer_sees_the_sale_once() {
    let h = five_minutes();
    let seen: Arc<Mutex<Vec<(usize, TicketCode)>>> = Arc::new(Mutex::new(Vec::new()));
    for observer in 0..3 {
        let seen = seen.clone();
        h.coordinator.on_sale_completed(format!("observer-{}", observer), move |event| {
            seen.lock().unwrap().push((observer, event.ticket.code.clone()));
            Ok(())
        });
    }

    let handle = h.coordinator.begin_purchase(PATRON_X, S1, ORCHESTRA, 2).await.unwrap();
    let ticket = h.coordinator.confirm_payment(handle.id, true).await.unwrap();
    // A repeated confirmation must not publish again.
    h.coordinator.confirm_payment(handle.id, true).await.unwrap();

    let seen = seen.lock().unwrap();
    assert_eq!(
        *seen,
        vec![
            (0, ticket.code.clone()),
            (1, ticket.code.clone()),
            (2, ticket.code.clone())
        ]
    );
}

#[tokio::test]
async fn failing_observer_does_not_undo_the_sale() {
    let h = five_minutes();
    h.coordinator.on_sale_completed("flaky", |_| {
        Err(box_office::notifications::ObserverError::new("printer offline"))
    });

    let handle = h.coordinator.begin_purchase(PATRON_X, S1, ORCHESTRA, 1).await.unwrap();
    let ticket = h.coordinator.confirm_payment(handle.id, true).await.unwrap();

    assert_eq!(ticket.seat, 1);
    assert_eq!(h.coordinator.list_available_seats(S1, ORCHESTRA).await.unwrap(), vec![2]);
}

#[tokio::test(start_paused = true)]
async fn unconfirmed_hold_frees_itself() {
    let h = five_minutes();
    h.coordinator.begin_purchase(PATRON_X, S1, ORCHESTRA, 2).await.unwrap();
    assert_eq!(h.coordinator.list_available_seats(S1, ORCHESTRA).await.unwrap(), vec![1]);

    tokio::time::advance(Duration::from_secs(299)).await;
    assert_eq!(h.coordinator.list_available_seats(S1, ORCHESTRA).await.unwrap(), vec![1]);

    tokio::time::advance(Duration::from_secs(2)).await;
    assert_eq!(h.coordinator.list_available_seats(S1, ORCHESTRA).await.unwrap(), vec![1, 2]);
}

#[tokio::test]
async fn cancel_twice_or_after_commit_changes_nothing() {
    let h = five_minutes();
    let abandoned = h.coordinator.begin_purchase(PATRON_X, S1, ORCHESTRA, 1).await.unwrap();
    h.coordinator.cancel_purchase(abandoned.id).await.unwrap();
    h.coordinator.cancel_purchase(abandoned.id).await.unwrap();
    assert_eq!(
        h.coordinator.purchase_status(abandoned.id).unwrap().release_reason,
        Some(ReleaseReason::Cancelled)
    );

    let bought = h.coordinator.begin_purchase(PATRON_Y, S1, ORCHESTRA, 1).await.unwrap();
    let ticket = h.coordinator.confirm_payment(bought.id, true).await.unwrap();
    h.coordinator.cancel_purchase(bought.id).await.unwrap();
    h.coordinator.cancel_purchase(abandoned.id).await.unwrap();

    let status = h.coordinator.purchase_status(bought.id).unwrap();
    assert_eq!(status.state, PurchaseState::Committed);
    assert_eq!(status.ticket.unwrap().code, ticket.code);
    assert_eq!(h.coordinator.list_available_seats(S1, ORCHESTRA).await.unwrap(), vec![2]);
}

#[tokio::test]
async fn price_is_fixed_when_the_purchase_starts() {
    let h = five_minutes();
    let handle = h.coordinator.begin_purchase(PATRON_X, S1, ORCHESTRA, 1).await.unwrap();
    assert_eq!(handle.price, Price::from_cents(5000));

    assert!(h.catalog.set_area_price(ORCHESTRA, Price::from_cents(7500)));
    let ticket = h.coordinator.confirm_payment(handle.id, true).await.unwrap();
    assert_eq!(ticket.price, Price::from_cents(5000));

    assert!(h.catalog.set_area_price(ORCHESTRA, Price::from_cents(100)));
    let recorded = h.coordinator.purchase_status(handle.id).unwrap().ticket.unwrap();
    assert_eq!(recorded.price, Price::from_cents(5000));
    assert_eq!(recorded.area_name, "Orchestra");

    let next = h.coordinator.begin_purchase(PATRON_Y, S1, ORCHESTRA, 2).await.unwrap();
    assert_eq!(next.price, Price::from_cents(100));
}

#[tokio::test]
async fn other_seats_stay_claimable_while_one_awaits_payment() {
    let h = five_minutes();
    let pending = h.coordinator.begin_purchase(PATRON_X, S1, BALCONY, 1).await.unwrap();

    for seat in 2..=10 {
        let handle = h
            .coordinator
            .begin_purchase(PatronId::new(seat as i64 + 10), S1, BALCONY, seat)
            .await
            .unwrap();
        h.coordinator.confirm_payment(handle.id, true).await.unwrap();
    }

    let ticket = h.coordinator.confirm_payment(pending.id, true).await.unwrap();
    assert_eq!(ticket.seat, 1);
    assert_eq!(h.coordinator.list_available_seats(S1, BALCONY).await.unwrap().len(), 30);
}

#[tokio::test]
async fn gate_driven_purchase_commits_or_releases() {
    let h = five_minutes();

    let ticket = h
        .coordinator
        .purchase_with(&SimulatedPaymentGate::always_approve(), PATRON_X, S1, ORCHESTRA, 1)
        .await
        .unwrap();
    assert_eq!(ticket.patron, PATRON_X);

    let err = h
        .coordinator
        .purchase_with(&SimulatedPaymentGate::always_decline(), PATRON_Y, S1, ORCHESTRA, 2)
        .await
        .unwrap_err();
    assert!(matches!(err, PurchaseError::PaymentDenied));
    assert_eq!(h.coordinator.list_available_seats(S1, ORCHESTRA).await.unwrap(), vec![2]);
}

fn record_sales(h: &Harness) -> Arc<Mutex<Vec<PurchaseId>>> {
    let sold = Arc::new(Mutex::new(Vec::new()));
    let sink = sold.clone();
    h.coordinator.on_sale_completed("recorder", move |event| {
        sink.lock().unwrap().push(event.purchase);
        Ok(())
    });
    sold
}

/// The seat must be sold to exactly the committed purchase, or free, and
/// only committed purchases may have been announced.
async fn assert_settled_cleanly(
    h: &Harness,
    id: PurchaseId,
    seat: SeatNumber,
    confirmed: Result<box_office::models::Ticket, PurchaseError>,
    announced: &[PurchaseId],
) {
    let status = h.coordinator.purchase_status(id).unwrap();
    let occupied = h.store.occupied_seats(S1, BALCONY).await.unwrap().contains(&seat);
    let announcements = announced.iter().filter(|p| **p == id).count();

    match confirmed {
        Ok(ticket) => {
            assert_eq!(status.state, PurchaseState::Committed);
            assert_eq!(status.ticket.unwrap().code, ticket.code);
            assert!(occupied, "seat {} committed but free", seat);
            assert_eq!(announcements, 1);
        }
        Err(PurchaseError::ClaimExpired) | Err(PurchaseError::SettlementInProgress) => {
            assert_eq!(status.state, PurchaseState::Released);
            assert!(!occupied, "seat {} released but still taken", seat);
            assert_eq!(announcements, 0);
        }
        Err(other) => panic!("unexpected confirmation outcome {:?}", other),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn confirmation_racing_cancel_settles_one_way() {
    let h = five_minutes();
    let sold = record_sales(&h);

    let mut outcomes = Vec::new();
    for seat in 1..=40 {
        let handle = h
            .coordinator
            .begin_purchase(PatronId::new(seat as i64), S1, BALCONY, seat)
            .await
            .unwrap();

        let (confirmer, canceller) = (h.coordinator.clone(), h.coordinator.clone());
        let confirm = tokio::spawn(async move { confirmer.confirm_payment(handle.id, true).await });
        let cancel = tokio::spawn(async move { canceller.cancel_purchase(handle.id).await });

        let confirmed = confirm.await.unwrap();
        cancel.await.unwrap().unwrap();
        outcomes.push((handle.id, seat, confirmed));
    }

    let announced = sold.lock().unwrap().clone();
    for (id, seat, confirmed) in outcomes {
        assert_settled_cleanly(&h, id, seat, confirmed, &announced).await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn confirmation_racing_the_timeout_sweep_settles_one_way() {
    let h = harness_with(Duration::from_secs(300), Duration::from_millis(30));
    let sold = record_sales(&h);

    let mut outcomes = Vec::new();
    for seat in 1..=20 {
        let handle = h
            .coordinator
            .begin_purchase(PatronId::new(seat as i64), S1, BALCONY, seat)
            .await
            .unwrap();
        // Land on both sides of the payment deadline.
        tokio::time::sleep(Duration::from_millis(20 + u64::from(seat % 20))).await;

        let (confirmer, sweeper) = (h.coordinator.clone(), h.coordinator.clone());
        let confirm = tokio::spawn(async move { confirmer.confirm_payment(handle.id, true).await });
        let sweep = tokio::spawn(async move { sweeper.expire_overdue().await });

        let confirmed = confirm.await.unwrap();
        sweep.await.unwrap();
        // Anything the sweep did not reach is settled by the next pass.
        h.coordinator.expire_overdue().await;
        outcomes.push((handle.id, seat, confirmed));
    }

    let announced = sold.lock().unwrap().clone();
    for (id, seat, confirmed) in outcomes {
        assert_settled_cleanly(&h, id, seat, confirmed, &announced).await;
    }
    assert_eq!(h.coordinator.pending_count(), 0);
}
