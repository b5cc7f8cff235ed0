mod common;

use common::{harness, harness_with_calendar, departure, Harness, StaticCalendar, SCENARIO_TIERS};
use chrono::{Duration, NaiveDate};
use proptest::prelude::*;
use shuttle_catalog::CapacityTracker;
use shuttle_core::{
    BookingRequest, BookingStatus, BusyCalendar, EngineError, ExternalBusyWindow, Identity,
    PageRequest, Trip,
};
use shuttle_order::SlotReservation;
use shuttle_shared::NotificationEvent;
use std::sync::Arc;

fn request(trip: &Trip, passengers: u32) -> BookingRequest {
    BookingRequest {
        trip_id: trip.id,
        passenger_count: passengers,
        pickup: Some("Terminal A".to_string()),
        dropoff: None,
    }
}

async fn assert_uniform_pricing(h: &Harness, trip: &Trip) {
    let manifest = h.orchestrator.trip_manifest(&h.admin, trip.id).await.unwrap();
    if let Some(rate) = manifest.rate {
        for booking in &manifest.bookings {
            assert_eq!(
                booking.credits_cost_paid,
                booking.passenger_count as i64 * rate.per_passenger
            );
        }
    }
    assert!(manifest.occupancy <= manifest.trip.capacity);
}

#[tokio::test]
async fn test_cancelling_twice_refunds_once() {
    let h = harness();
    let destination = h.destination(4, &SCENARIO_TIERS).await;
    let trip = h.trip(&destination).await;
    let rider = h.customer(300).await;

    let receipt = h.orchestrator.create_booking(&rider, request(&trip, 2)).await.unwrap();
    h.orchestrator.cancel_booking(&rider, receipt.booking.id).await.unwrap();

    let err = h
        .orchestrator
        .cancel_booking(&rider, receipt.booking.id)
        .await
        .unwrap_err();
    assert_eq!(err, EngineError::AlreadyCancelled(receipt.booking.id));
    assert_eq!(h.balance(&rider).await, 300);
    h.assert_ledger_consistent(&rider).await;
}

#[tokio::test]
async fn test_book_then_cancel_restores_balance() {
    let h = harness();
    let destination = h.destination(4, &SCENARIO_TIERS).await;
    let trip = h.trip(&destination).await;
    let rider = h.customer(1_000).await;

    let receipt = h.orchestrator.create_booking(&rider, request(&trip, 3)).await.unwrap();
    assert_eq!(receipt.booking.credits_cost_paid, 240);
    h.orchestrator.cancel_booking(&rider, receipt.booking.id).await.unwrap();

    assert_eq!(h.balance(&rider).await, 1_000);
}

#[tokio::test]
async fn test_only_owner_or_admin_may_cancel() {
    let h = harness();
    let destination = h.destination(4, &SCENARIO_TIERS).await;
    let trip = h.trip(&destination).await;
    let owner = h.customer(500).await;
    let stranger = h.customer(0).await;

    let receipt = h.orchestrator.create_booking(&owner, request(&trip, 1)).await.unwrap();
    let err = h
        .orchestrator
        .cancel_booking(&stranger, receipt.booking.id)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Forbidden(_)));

    h.orchestrator
        .cancel_booking(&h.admin, receipt.booking.id)
        .await
        .unwrap();
    assert_eq!(h.balance(&owner).await, 500);
}

#[tokio::test]
async fn test_destination_without_tiers_uses_flat_rate() {
    let h = harness();
    let destination = h.destination(6, &[]).await;
    let trip = h.trip(&destination).await;
    let rider = h.customer(10).await;

    let receipt = h.orchestrator.create_booking(&rider, request(&trip, 3)).await.unwrap();
    assert_eq!(receipt.rate.per_passenger, 1);
    assert_eq!(receipt.booking.credits_cost_paid, 3);
    assert_eq!(h.balance(&rider).await, 7);
}

#[tokio::test]
async fn test_trip_cancellation_refunds_everyone() {
    let h = harness();
    let destination = h.destination(4, &SCENARIO_TIERS).await;
    let trip = h.trip(&destination).await;
    let a = h.customer(500).await;
    let b = h.customer(500).await;
    h.orchestrator.create_booking(&a, request(&trip, 1)).await.unwrap();
    h.orchestrator.create_booking(&b, request(&trip, 2)).await.unwrap();

    let outcome = h.orchestrator.cancel_trip(&h.admin, trip.id).await.unwrap();
    assert_eq!(outcome.cancelled_bookings.len(), 2);
    assert_eq!(outcome.credits_refunded, 3 * 80);
    assert_eq!(h.balance(&a).await, 500);
    assert_eq!(h.balance(&b).await, 500);

    let again = h.orchestrator.cancel_trip(&h.admin, trip.id).await.unwrap_err();
    assert_eq!(again, EngineError::TripCancelled(trip.id));

    let late = h.orchestrator.create_booking(&a, request(&trip, 1)).await.unwrap_err();
    assert_eq!(late, EngineError::TripCancelled(trip.id));

    // Two confirmations, one repricing, then the trip cancellation
    let events = h.notifier.wait_for(4).await;
    assert!(events
        .iter()
        .any(|e| matches!(e, NotificationEvent::TripCancelled(t) if t.trip_id == trip.id)));
}

#[tokio::test]
async fn test_customers_cannot_run_operator_actions() {
    let h = harness();
    let destination = h.destination(4, &SCENARIO_TIERS).await;
    let customer = Identity::customer(uuid::Uuid::new_v4());

    let err = h
        .orchestrator
        .schedule_trip(&customer, destination.id, departure(), None)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Forbidden(_)));

    let err = h
        .ledger
        .adjust(&customer, customer.user_id, 1_000, "free money", false)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Forbidden(_)));
}

#[tokio::test]
async fn test_admin_adjustment_may_overdraw_only_when_flagged() {
    let h = harness();
    let rider = h.customer(20).await;

    let err = h
        .ledger
        .adjust(&h.admin, rider.user_id, -50, "chargeback", false)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InsufficientCredits { .. }));

    h.ledger
        .adjust(&h.admin, rider.user_id, -50, "chargeback", true)
        .await
        .unwrap();
    assert_eq!(h.balance(&rider).await, -30);
    h.assert_ledger_consistent(&rider).await;
}

#[tokio::test]
async fn test_booking_past_cutoff_is_rejected() {
    let h = harness();
    let destination = h.destination(4, &SCENARIO_TIERS).await;
    // Starts 30 minutes after the fixed clock, inside the 60 minute cutoff
    let err = h
        .orchestrator
        .schedule_trip(&h.admin, destination.id, common::now() + Duration::minutes(30), None)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::SlotNotReservable { .. }));
}

#[tokio::test]
async fn test_overlapping_trip_is_refused() {
    let h = harness();
    let destination = h.destination(4, &SCENARIO_TIERS).await;
    h.trip(&destination).await;

    let err = h
        .orchestrator
        .schedule_trip(&h.admin, destination.id, departure() + Duration::minutes(60), None)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::SlotUnavailable(_)));

    // Back-to-back is fine: trips are half-open intervals
    h.orchestrator
        .schedule_trip(&h.admin, destination.id, departure() + Duration::minutes(90), None)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_reserve_slot_schedules_then_joins() {
    let h = harness();
    let destination = h.destination(4, &SCENARIO_TIERS).await;
    let a = h.customer(500).await;
    let b = h.customer(500).await;

    let reservation = |passengers| SlotReservation {
        destination_id: destination.id,
        start: departure(),
        passenger_count: passengers,
        pickup: None,
        dropoff: Some("Hotel".to_string()),
    };

    let first = h.orchestrator.reserve_slot(&a, reservation(1)).await.unwrap();
    let second = h.orchestrator.reserve_slot(&b, reservation(1)).await.unwrap();
    assert_eq!(first.booking.trip_id, second.booking.trip_id);
    assert_eq!(second.occupancy, 2);
    assert_eq!(h.balance(&a).await, 410);

    let off_grid = SlotReservation {
        start: departure() + Duration::minutes(7),
        ..reservation(1)
    };
    let err = h.orchestrator.reserve_slot(&a, off_grid).await.unwrap_err();
    assert!(matches!(err, EngineError::SlotUnavailable(_)));
}

#[tokio::test]
async fn test_availability_marks_trips_and_external_windows() {
    let busy_start = departure() + Duration::hours(4);
    let calendar: Arc<dyn BusyCalendar> = Arc::new(StaticCalendar {
        windows: vec![ExternalBusyWindow::new(busy_start, busy_start + Duration::minutes(30))],
        fail: false,
    });
    let h = harness_with_calendar(Some(calendar));
    let destination = h.destination(4, &SCENARIO_TIERS).await;
    let trip = h.trip(&destination).await;
    let rider = h.customer(500).await;
    h.orchestrator.create_booking(&rider, request(&trip, 1)).await.unwrap();

    let day = NaiveDate::from_ymd_opt(2026, 3, 2).unwrap();
    let availability = h.orchestrator.slot_availability(destination.id, day).await.unwrap();
    assert!(!availability.degraded);

    let at_trip = availability
        .slots
        .iter()
        .find(|s| s.availability.slot.start == departure())
        .unwrap();
    assert!(at_trip.availability.blocked);
    assert_eq!(at_trip.trip_id, Some(trip.id));
    assert_eq!(at_trip.seats_remaining, Some(3));

    let at_busy = availability
        .slots
        .iter()
        .find(|s| s.availability.slot.start == busy_start)
        .unwrap();
    assert!(at_busy.availability.blocked);
    assert_eq!(at_busy.trip_id, None);

    // Non-service day
    let saturday = NaiveDate::from_ymd_opt(2026, 3, 7).unwrap();
    let weekend = h.orchestrator.slot_availability(destination.id, saturday).await.unwrap();
    assert!(weekend.slots.is_empty());
}

#[tokio::test]
async fn test_calendar_outage_degrades_to_internal_trips() {
    let calendar: Arc<dyn BusyCalendar> = Arc::new(StaticCalendar {
        windows: Vec::new(),
        fail: true,
    });
    let h = harness_with_calendar(Some(calendar));
    let destination = h.destination(4, &SCENARIO_TIERS).await;

    let day = NaiveDate::from_ymd_opt(2026, 3, 2).unwrap();
    let availability = h.orchestrator.slot_availability(destination.id, day).await.unwrap();
    assert!(availability.degraded);
    assert!(availability.slots.iter().any(|s| s.availability.available));

    // Scheduling still works while the feed is down
    h.trip(&destination).await;
    assert!(h
        .metrics
        .render()
        .unwrap()
        .contains("shuttle_calendar_degraded_total 2"));
}

#[tokio::test]
async fn test_notifications_follow_commits() {
    let h = harness();
    let destination = h.destination(4, &SCENARIO_TIERS).await;
    let trip = h.trip(&destination).await;
    let a = h.customer(500).await;
    let b = h.customer(500).await;

    h.orchestrator.create_booking(&a, request(&trip, 1)).await.unwrap();
    h.orchestrator.create_booking(&b, request(&trip, 1)).await.unwrap();

    // Confirmed(A), Confirmed(B), Repriced(A)
    let events = h.notifier.wait_for(3).await;
    assert_eq!(events.len(), 3);
    assert!(events.iter().any(|e| matches!(
        e,
        NotificationEvent::BookingRepriced(r) if r.user_id == a.user_id && r.previous_cost == 120 && r.new_cost == 90
    )));

    // A failed booking emits nothing
    let poor = h.customer(10).await;
    h.orchestrator.create_booking(&poor, request(&trip, 1)).await.unwrap_err();
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert_eq!(h.notifier.snapshot().len(), 3);
}

#[tokio::test]
async fn test_non_monotonic_tiers_settle_upwards() {
    let h = harness();
    // Two riders cost more each than one
    let destination = h.destination(4, &[(1, 50), (2, 60)]).await;
    let trip = h.trip(&destination).await;
    let a = h.customer(200).await;
    let b = h.customer(200).await;

    h.orchestrator.create_booking(&a, request(&trip, 1)).await.unwrap();
    let second = h.orchestrator.create_booking(&b, request(&trip, 1)).await.unwrap();
    assert_eq!(second.adjustments[0].delta(), 10);
    assert_eq!(h.balance(&a).await, 140);
    assert_uniform_pricing(&h, &trip).await;
}

#[tokio::test]
async fn test_occupant_short_of_a_price_rise_aborts_the_booking() {
    let h = harness();
    let destination = h.destination(4, &[(1, 50), (2, 60)]).await;
    let trip = h.trip(&destination).await;
    let a = h.customer(50).await;
    let b = h.customer(500).await;

    let first = h.orchestrator.create_booking(&a, request(&trip, 1)).await.unwrap();
    assert_eq!(h.balance(&a).await, 0);

    let err = h.orchestrator.create_booking(&b, request(&trip, 1)).await.unwrap_err();
    assert_eq!(
        err,
        EngineError::InsufficientCredits {
            user_id: a.user_id,
            balance: 0,
            required: 10,
        }
    );

    // Nothing from the attempt survives
    let manifest = h.orchestrator.trip_manifest(&h.admin, trip.id).await.unwrap();
    assert_eq!(manifest.bookings.len(), 1);
    assert_eq!(manifest.bookings[0].id, first.booking.id);
    assert_eq!(manifest.bookings[0].credits_cost_paid, 50);
    assert_eq!(h.balance(&a).await, 0);
    assert_eq!(h.balance(&b).await, 500);
    assert_eq!(h.ledger.history(b.user_id, PageRequest::new(None, None)).await.unwrap().total, 1);
    assert!(h.orchestrator.user_bookings(&b).await.unwrap().is_empty());
    h.assert_ledger_consistent(&a).await;
    h.assert_ledger_consistent(&b).await;
}

#[tokio::test]
async fn test_occupant_short_of_a_price_rise_blocks_the_cancellation() {
    let h = harness();
    let destination = h.destination(4, &SCENARIO_TIERS).await;
    let trip = h.trip(&destination).await;
    let a = h.customer(120).await;
    let b = h.customer(500).await;

    h.orchestrator.create_booking(&a, request(&trip, 1)).await.unwrap();
    let leaving = h.orchestrator.create_booking(&b, request(&trip, 1)).await.unwrap();
    // A got 30 back when B joined; spend it
    h.ledger
        .adjust(&h.admin, a.user_id, -30, "chargeback", false)
        .await
        .unwrap();
    assert_eq!(h.balance(&a).await, 0);

    let err = h
        .orchestrator
        .cancel_booking(&b, leaving.booking.id)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::InsufficientCredits { user_id, required: 30, .. } if user_id == a.user_id
    ));

    let still_booked = h.orchestrator.user_bookings(&b).await.unwrap();
    assert_eq!(still_booked.len(), 1);
    assert_eq!(still_booked[0].status, BookingStatus::Confirmed);
    assert_eq!(still_booked[0].credits_cost_paid, 90);
    assert_eq!(h.balance(&b).await, 410);
    assert_eq!(h.balance(&a).await, 0);

    let manifest = h.orchestrator.trip_manifest(&h.admin, trip.id).await.unwrap();
    assert_eq!(manifest.occupancy, 2);
    assert!(manifest.bookings.iter().all(|booking| booking.credits_cost_paid == 90));
    h.assert_ledger_consistent(&a).await;
    h.assert_ledger_consistent(&b).await;
}

#[tokio::test]
async fn test_oversized_passenger_count_is_capacity_exceeded() {
    let h = harness();
    let destination = h.destination(4, &SCENARIO_TIERS).await;
    let trip = h.trip(&destination).await;
    let a = h.customer(500).await;
    let b = h.customer(500).await;
    h.orchestrator.create_booking(&a, request(&trip, 1)).await.unwrap();

    let err = h
        .orchestrator
        .create_booking(&b, request(&trip, u32::MAX))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::CapacityExceeded { available: 3, .. }));
    assert_eq!(h.balance(&b).await, 500);
    assert_eq!(h.orchestrator.trip_manifest(&h.admin, trip.id).await.unwrap().occupancy, 1);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn prop_random_booking_sequences_keep_invariants(
        ops in prop::collection::vec((1u32..4, any::<bool>()), 1..12)
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let h = harness();
            let destination = h.destination(6, &SCENARIO_TIERS).await;
            let trip = h.trip(&destination).await;
            let mut riders = Vec::new();
            let mut live = Vec::new();

            for (passengers, cancel_one) in ops {
                let rider = h.customer(400).await;
                match h.orchestrator.create_booking(&rider, request(&trip, passengers)).await {
                    Ok(receipt) => live.push((rider, receipt.booking.id)),
                    Err(EngineError::CapacityExceeded { .. }) => {}
                    Err(other) => panic!("unexpected failure: {other}"),
                }
                riders.push(rider);

                if cancel_one && !live.is_empty() {
                    let (owner, booking_id) = live.remove(0);
                    h.orchestrator.cancel_booking(&owner, booking_id).await.unwrap();
                }

                assert_uniform_pricing(&h, &trip).await;
            }

            let manifest = h.orchestrator.trip_manifest(&h.admin, trip.id).await.unwrap();
            assert_eq!(
                manifest.occupancy,
                CapacityTracker::current_occupancy(trip.id, &manifest.bookings)
            );
            for rider in &riders {
                h.assert_ledger_consistent(rider).await;
            }
        });
    }
}
