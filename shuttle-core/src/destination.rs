use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{EngineError, EngineResult};

/// A place the shuttle runs to. Trips inherit duration and capacity from it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Destination {
    pub id: Uuid,
    pub name: String,
    pub default_duration_minutes: u32,
    pub default_capacity: u32,
    /// Identifier of the external calendar whose busy windows block this destination.
    pub calendar_id: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl Destination {
    pub fn new(
        name: impl Into<String>,
        default_duration_minutes: u32,
        default_capacity: u32,
    ) -> EngineResult<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(EngineError::Validation("Destination name is required".to_string()));
        }
        if default_duration_minutes == 0 {
            return Err(EngineError::Validation(
                "Destination duration must be positive".to_string(),
            ));
        }
        if default_capacity == 0 {
            return Err(EngineError::Validation(
                "Destination capacity must be positive".to_string(),
            ));
        }

        Ok(Self {
            id: Uuid::new_v4(),
            name,
            default_duration_minutes,
            default_capacity,
            calendar_id: None,
            is_active: true,
            created_at: Utc::now(),
        })
    }

    pub fn with_calendar(mut self, calendar_id: impl Into<String>) -> Self {
        self.calendar_id = Some(calendar_id.into());
        self
    }

    pub fn trip_duration(&self) -> Duration {
        Duration::minutes(self.default_duration_minutes as i64)
    }
}

/// Group discount rule: when a trip carries exactly `passenger_count`
/// passengers, each pays `cost_per_passenger`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PricingTier {
    pub destination_id: Uuid,
    pub passenger_count: u32,
    pub cost_per_passenger: i64,
}

impl PricingTier {
    pub fn new(destination_id: Uuid, passenger_count: u32, cost_per_passenger: i64) -> Self {
        Self {
            destination_id,
            passenger_count,
            cost_per_passenger,
        }
    }
}
