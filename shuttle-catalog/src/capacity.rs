use shuttle_core::{Booking, EngineError, EngineResult, Trip};
use uuid::Uuid;

/// Occupancy gate for trips.
///
/// Holds no state: occupancy is always derived from the booking set that the
/// caller read under the trip lock, so there is no counter to drift.
pub struct CapacityTracker;

impl CapacityTracker {
    /// Sum of passengers over confirmed bookings of `trip_id`.
    pub fn current_occupancy(trip_id: Uuid, bookings: &[Booking]) -> u32 {
        bookings
            .iter()
            .filter(|b| b.trip_id == trip_id && b.is_confirmed())
            .map(|b| b.passenger_count)
            .sum()
    }

    pub fn remaining(trip: &Trip, bookings: &[Booking]) -> u32 {
        trip.capacity
            .saturating_sub(Self::current_occupancy(trip.id, bookings))
    }

    pub fn can_accept(trip: &Trip, bookings: &[Booking], additional: u32) -> bool {
        Self::current_occupancy(trip.id, bookings)
            .checked_add(additional)
            .is_some_and(|total| total <= trip.capacity)
    }

    /// Like `can_accept`, but returns the occupancy after admitting
    /// `additional` passengers or a `CapacityExceeded` error.
    pub fn admit(trip: &Trip, bookings: &[Booking], additional: u32) -> EngineResult<u32> {
        Self::current_occupancy(trip.id, bookings)
            .checked_add(additional)
            .filter(|total| *total <= trip.capacity)
            .ok_or_else(|| EngineError::CapacityExceeded {
                trip_id: trip.id,
                requested: additional,
                available: Self::remaining(trip, bookings),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use shuttle_core::{BookingRequest, Destination};

    fn scheduled_trip(capacity: u32) -> Trip {
        let destination = Destination::new("Harbour", 60, capacity).unwrap();
        Trip::schedule(&destination, Utc::now(), None).unwrap()
    }

    fn booking(trip: &Trip, passengers: u32) -> Booking {
        let request = BookingRequest {
            trip_id: trip.id,
            passenger_count: passengers,
            pickup: None,
            dropoff: None,
        };
        Booking::confirmed(Uuid::new_v4(), &request, 0)
    }

    #[test]
    fn test_occupancy_ignores_cancelled_and_foreign_bookings() {
        let trip = scheduled_trip(4);
        let other = scheduled_trip(4);
        let mut cancelled = booking(&trip, 2);
        cancelled.cancel().unwrap();

        let bookings = vec![booking(&trip, 1), cancelled, booking(&other, 3), booking(&trip, 2)];

        assert_eq!(CapacityTracker::current_occupancy(trip.id, &bookings), 3);
        assert_eq!(CapacityTracker::remaining(&trip, &bookings), 1);
    }

    #[test]
    fn test_admit_up_to_capacity() {
        let trip = scheduled_trip(4);
        let bookings = vec![booking(&trip, 3)];

        assert_eq!(CapacityTracker::admit(&trip, &bookings, 1).unwrap(), 4);
        assert_eq!(
            CapacityTracker::admit(&trip, &bookings, 2),
            Err(EngineError::CapacityExceeded {
                trip_id: trip.id,
                requested: 2,
                available: 1,
            })
        );
    }

    #[test]
    fn test_oversized_request_is_capacity_exceeded() {
        let trip = scheduled_trip(4);
        let bookings = vec![booking(&trip, 2)];

        assert!(!CapacityTracker::can_accept(&trip, &bookings, u32::MAX));
        assert!(!CapacityTracker::can_accept(&trip, &bookings, u32::MAX - 1));
        assert_eq!(
            CapacityTracker::admit(&trip, &bookings, u32::MAX),
            Err(EngineError::CapacityExceeded {
                trip_id: trip.id,
                requested: u32::MAX,
                available: 2,
            })
        );
    }
}
