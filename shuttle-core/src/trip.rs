use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::destination::Destination;
use crate::{EngineError, EngineResult};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TripStatus {
    Scheduled,
    Cancelled,
}

impl fmt::Display for TripStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TripStatus::Scheduled => write!(f, "SCHEDULED"),
            TripStatus::Cancelled => write!(f, "CANCELLED"),
        }
    }
}

impl FromStr for TripStatus {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SCHEDULED" => Ok(TripStatus::Scheduled),
            "CANCELLED" => Ok(TripStatus::Cancelled),
            other => Err(EngineError::Storage(format!("Unknown trip status: {}", other))),
        }
    }
}

/// A single scheduled departure.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Trip {
    pub id: Uuid,
    pub destination_id: Uuid,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub capacity: u32,
    pub status: TripStatus,
    pub created_at: DateTime<Utc>,
}

impl Trip {
    /// Build a trip for `destination` starting at `start`; the end is derived
    /// from the destination's default duration.
    pub fn schedule(
        destination: &Destination,
        start: DateTime<Utc>,
        capacity: Option<u32>,
    ) -> EngineResult<Self> {
        let capacity = capacity.unwrap_or(destination.default_capacity);
        if capacity == 0 {
            return Err(EngineError::Validation("Trip capacity must be positive".to_string()));
        }

        Ok(Self {
            id: Uuid::new_v4(),
            destination_id: destination.id,
            start_time: start,
            end_time: start + destination.trip_duration(),
            capacity,
            status: TripStatus::Scheduled,
            created_at: Utc::now(),
        })
    }

    pub fn is_cancelled(&self) -> bool {
        self.status == TripStatus::Cancelled
    }

    /// Fails with `TripCancelled` unless the trip still runs.
    pub fn ensure_scheduled(&self) -> EngineResult<()> {
        if self.is_cancelled() {
            return Err(EngineError::TripCancelled(self.id));
        }
        Ok(())
    }

    /// Half-open overlap against `[start, end)`.
    pub fn overlaps(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        start < self.end_time && end > self.start_time
    }

    /// Transition: Scheduled → Cancelled
    pub fn cancel(&mut self) -> EngineResult<()> {
        self.ensure_scheduled()?;
        self.status = TripStatus::Cancelled;
        Ok(())
    }
}
