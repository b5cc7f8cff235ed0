use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::{EngineError, EngineResult};

/// Booking status. A request that has not been committed yet is not stored,
/// so only the two settled states exist here.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BookingStatus {
    Confirmed,
    Cancelled,
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BookingStatus::Confirmed => write!(f, "CONFIRMED"),
            BookingStatus::Cancelled => write!(f, "CANCELLED"),
        }
    }
}

impl FromStr for BookingStatus {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CONFIRMED" => Ok(BookingStatus::Confirmed),
            "CANCELLED" => Ok(BookingStatus::Cancelled),
            other => Err(EngineError::Storage(format!("Unknown booking status: {}", other))),
        }
    }
}

/// Seats requested by a customer on an existing trip.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookingRequest {
    pub trip_id: Uuid,
    pub passenger_count: u32,
    pub pickup: Option<String>,
    pub dropoff: Option<String>,
}

impl BookingRequest {
    pub fn validate(&self) -> EngineResult<()> {
        if self.passenger_count == 0 {
            return Err(EngineError::Validation(
                "Passenger count must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// One user's reservation of one or more seats on a trip.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Booking {
    pub id: Uuid,
    pub user_id: Uuid,
    pub trip_id: Uuid,
    pub passenger_count: u32,
    pub pickup: Option<String>,
    pub dropoff: Option<String>,
    pub status: BookingStatus,
    /// Credits currently charged for this booking. Moves as the trip fills or empties.
    pub credits_cost_paid: i64,
    pub created_at: DateTime<Utc>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl Booking {
    pub fn confirmed(user_id: Uuid, request: &BookingRequest, credits_cost_paid: i64) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            trip_id: request.trip_id,
            passenger_count: request.passenger_count,
            pickup: request.pickup.clone(),
            dropoff: request.dropoff.clone(),
            status: BookingStatus::Confirmed,
            credits_cost_paid,
            created_at: Utc::now(),
            cancelled_at: None,
        }
    }

    pub fn is_confirmed(&self) -> bool {
        self.status == BookingStatus::Confirmed
    }

    /// What this booking should pay at a uniform per-passenger rate.
    pub fn cost_at(&self, rate: i64) -> i64 {
        self.passenger_count as i64 * rate
    }

    /// Transition: Confirmed → Cancelled. Returns the credits to refund.
    pub fn cancel(&mut self) -> EngineResult<i64> {
        if self.status == BookingStatus::Cancelled {
            return Err(EngineError::AlreadyCancelled(self.id));
        }
        self.status = BookingStatus::Cancelled;
        self.cancelled_at = Some(Utc::now());
        Ok(self.credits_cost_paid)
    }
}
