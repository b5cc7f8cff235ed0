pub mod booking;
pub mod calendar;
pub mod credit;
pub mod destination;
pub mod identity;
pub mod notify;
pub mod payment;
pub mod repository;
pub mod trip;

use chrono::{DateTime, Utc};
use uuid::Uuid;

pub use booking::{Booking, BookingRequest, BookingStatus};
pub use calendar::{BusyCalendar, ExternalBusyWindow, NoCalendar};
pub use credit::{CreditTransaction, Page, PageRequest, TransactionType};
pub use destination::{Destination, PricingTier};
pub use identity::{Identity, Role};
pub use notify::{LogNotifier, Notifier};
pub use repository::{Store, UnitOfWork};
pub use trip::{Trip, TripStatus};

/// Failures surfaced by the booking and ledger engine.
///
/// Every variant except `Busy` is terminal for the current attempt. `Busy`
/// means lock contention or a pool timeout; the caller may retry the whole
/// logical operation with the same inputs.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Capacity exceeded on trip {trip_id}: requested {requested}, available {available}")]
    CapacityExceeded {
        trip_id: Uuid,
        requested: u32,
        available: u32,
    },

    #[error("Slot starting at {start} is past the booking cutoff")]
    SlotNotReservable { start: DateTime<Utc> },

    #[error("Slot unavailable: {0}")]
    SlotUnavailable(String),

    #[error("Insufficient credits for user {user_id}: balance {balance}, required {required}")]
    InsufficientCredits {
        user_id: Uuid,
        balance: i64,
        required: i64,
    },

    #[error("Trip {0} is cancelled")]
    TripCancelled(Uuid),

    #[error("Booking {0} is already cancelled")]
    AlreadyCancelled(Uuid),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Busy, retry the operation: {0}")]
    Busy(String),

    #[error("Storage failure: {0}")]
    Storage(String),
}

impl EngineError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        EngineError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::Busy(_))
    }

    /// Stable machine-readable code for API clients.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::Validation(_) => "VALIDATION_ERROR",
            EngineError::CapacityExceeded { .. } => "CAPACITY_EXCEEDED",
            EngineError::SlotNotReservable { .. } => "SLOT_NOT_RESERVABLE",
            EngineError::SlotUnavailable(_) => "SLOT_UNAVAILABLE",
            EngineError::InsufficientCredits { .. } => "INSUFFICIENT_CREDITS",
            EngineError::TripCancelled(_) => "TRIP_CANCELLED",
            EngineError::AlreadyCancelled(_) => "ALREADY_CANCELLED",
            EngineError::NotFound { .. } => "NOT_FOUND",
            EngineError::Forbidden(_) => "FORBIDDEN",
            EngineError::Busy(_) => "BUSY",
            EngineError::Storage(_) => "STORAGE_FAILURE",
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
