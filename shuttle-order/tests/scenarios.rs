mod common;

use common::{harness, SCENARIO_TIERS};
use shuttle_core::{BookingRequest, EngineError, Identity, Trip};

fn request(trip: &Trip, passengers: u32) -> BookingRequest {
    BookingRequest {
        trip_id: trip.id,
        passenger_count: passengers,
        pickup: None,
        dropoff: None,
    }
}

async fn paid(h: &common::Harness, trip: &Trip, identity: &Identity) -> i64 {
    let manifest = h.orchestrator.trip_manifest(&h.admin, trip.id).await.unwrap();
    manifest
        .bookings
        .iter()
        .filter(|b| b.user_id == identity.user_id)
        .map(|b| b.credits_cost_paid)
        .sum()
}

#[tokio::test]
async fn test_second_rider_lowers_everyone_to_pair_rate() {
    let h = harness();
    let destination = h.destination(4, &SCENARIO_TIERS).await;
    let trip = h.trip(&destination).await;
    let a = h.customer(500).await;
    let b = h.customer(500).await;

    let first = h.orchestrator.create_booking(&a, request(&trip, 1)).await.unwrap();
    assert_eq!(first.booking.credits_cost_paid, 120);
    assert_eq!(h.balance(&a).await, 380);

    let second = h.orchestrator.create_booking(&b, request(&trip, 1)).await.unwrap();
    assert_eq!(second.rate.per_passenger, 90);
    assert_eq!(second.adjustments.len(), 1);
    assert_eq!(second.adjustments[0].delta(), -30);

    assert_eq!(paid(&h, &trip, &a).await, 90);
    assert_eq!(paid(&h, &trip, &b).await, 90);
    assert_eq!(h.balance(&a).await, 410);
    assert_eq!(h.balance(&b).await, 410);
    h.assert_ledger_consistent(&a).await;
    h.assert_ledger_consistent(&b).await;
}

#[tokio::test]
async fn test_third_rider_settles_all_to_trio_rate_and_cancel_reverts() {
    let h = harness();
    let destination = h.destination(4, &SCENARIO_TIERS).await;
    let trip = h.trip(&destination).await;
    let a = h.customer(500).await;
    let b = h.customer(500).await;
    let c = h.customer(500).await;

    h.orchestrator.create_booking(&a, request(&trip, 1)).await.unwrap();
    h.orchestrator.create_booking(&b, request(&trip, 1)).await.unwrap();
    let third = h.orchestrator.create_booking(&c, request(&trip, 1)).await.unwrap();

    // Joining: everyone at 80
    assert_eq!(third.rate.per_passenger, 80);
    assert_eq!(third.adjustments.len(), 2);
    assert!(third.adjustments.iter().all(|adj| adj.delta() == -10));
    for rider in [&a, &b, &c] {
        assert_eq!(paid(&h, &trip, rider).await, 80);
        assert_eq!(h.balance(rider).await, 420);
    }

    // Leaving: back to 90, C refunded in full
    let cancelled = h
        .orchestrator
        .cancel_booking(&c, third.booking.id)
        .await
        .unwrap();
    assert_eq!(cancelled.refunded, 80);
    assert_eq!(cancelled.adjustments.len(), 2);
    assert!(cancelled.adjustments.iter().all(|adj| adj.delta() == 10));

    assert_eq!(paid(&h, &trip, &a).await, 90);
    assert_eq!(paid(&h, &trip, &b).await, 90);
    assert_eq!(h.balance(&a).await, 410);
    assert_eq!(h.balance(&b).await, 410);
    assert_eq!(h.balance(&c).await, 500);
    for rider in [&a, &b, &c] {
        h.assert_ledger_consistent(rider).await;
    }
}

#[tokio::test]
async fn test_full_trip_rejects_extra_passenger_without_side_effects() {
    let h = harness();
    let destination = h.destination(4, &SCENARIO_TIERS).await;
    let trip = h.trip(&destination).await;

    let mut riders = Vec::new();
    for _ in 0..4 {
        let rider = h.customer(500).await;
        h.orchestrator.create_booking(&rider, request(&trip, 1)).await.unwrap();
        riders.push(rider);
    }
    let before = h.orchestrator.trip_manifest(&h.admin, trip.id).await.unwrap();
    let mut balances = Vec::new();
    for rider in &riders {
        balances.push(h.balance(rider).await);
    }

    let late = h.customer(500).await;
    let err = h
        .orchestrator
        .create_booking(&late, request(&trip, 1))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        EngineError::CapacityExceeded {
            trip_id: trip.id,
            requested: 1,
            available: 0,
        }
    );

    let after = h.orchestrator.trip_manifest(&h.admin, trip.id).await.unwrap();
    assert_eq!(after.bookings, before.bookings);
    for (rider, balance) in riders.iter().zip(balances) {
        assert_eq!(h.balance(rider).await, balance);
    }
    assert_eq!(h.balance(&late).await, 500);
}

#[tokio::test]
async fn test_insufficient_credits_writes_nothing() {
    let h = harness();
    let destination = h.destination(4, &SCENARIO_TIERS).await;
    let trip = h.trip(&destination).await;
    let poor = h.customer(50).await;

    let err = h
        .orchestrator
        .create_booking(&poor, request(&trip, 1))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::InsufficientCredits { balance: 50, required: 120, .. }
    ));

    assert_eq!(h.balance(&poor).await, 50);
    let history = h
        .ledger
        .history(poor.user_id, Default::default())
        .await
        .unwrap();
    assert_eq!(history.total, 1, "only the seed purchase remains");

    let manifest = h.orchestrator.trip_manifest(&h.admin, trip.id).await.unwrap();
    assert!(manifest.bookings.is_empty());
    assert!(h
        .metrics
        .render()
        .unwrap()
        .contains("shuttle_ledger_rejections_total 1"));
}
