use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct BookingConfirmedEvent {
    pub booking_id: Uuid,
    pub trip_id: Uuid,
    pub user_id: Uuid,
    pub passenger_count: u32,
    pub credits_charged: i64,
    pub trip_start: DateTime<Utc>,
    pub timestamp: i64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct BookingCancelledEvent {
    pub booking_id: Uuid,
    pub trip_id: Uuid,
    pub user_id: Uuid,
    pub credits_refunded: i64,
    pub timestamp: i64,
}

/// Emitted for an occupant whose price moved because someone else joined or left.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct BookingRepricedEvent {
    pub booking_id: Uuid,
    pub trip_id: Uuid,
    pub user_id: Uuid,
    pub previous_cost: i64,
    pub new_cost: i64,
    pub timestamp: i64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct TripCancelledEvent {
    pub trip_id: Uuid,
    pub cancelled_bookings: Vec<Uuid>,
    pub credits_refunded: i64,
    pub timestamp: i64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationEvent {
    BookingConfirmed(BookingConfirmedEvent),
    BookingCancelled(BookingCancelledEvent),
    BookingRepriced(BookingRepricedEvent),
    TripCancelled(TripCancelledEvent),
}

impl NotificationEvent {
    /// Topic suffix used by transports that route per event kind.
    pub fn kind(&self) -> &'static str {
        match self {
            NotificationEvent::BookingConfirmed(_) => "booking.confirmed",
            NotificationEvent::BookingCancelled(_) => "booking.cancelled",
            NotificationEvent::BookingRepriced(_) => "booking.repriced",
            NotificationEvent::TripCancelled(_) => "trip.cancelled",
        }
    }

    /// Partition key; events of one trip stay ordered.
    pub fn trip_id(&self) -> Uuid {
        match self {
            NotificationEvent::BookingConfirmed(e) => e.trip_id,
            NotificationEvent::BookingCancelled(e) => e.trip_id,
            NotificationEvent::BookingRepriced(e) => e.trip_id,
            NotificationEvent::TripCancelled(e) => e.trip_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_tagging() {
        let event = NotificationEvent::TripCancelled(TripCancelledEvent {
            trip_id: Uuid::nil(),
            cancelled_bookings: vec![],
            credits_refunded: 0,
            timestamp: 0,
        });

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "TRIP_CANCELLED");
        assert_eq!(event.kind(), "trip.cancelled");
    }
}
