use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

use crate::booking::Booking;
use crate::credit::{CreditTransaction, Page, PageRequest};
use crate::destination::{Destination, PricingTier};
use crate::trip::{Trip, TripStatus};
use crate::EngineResult;

/// Entry point to the system of record.
#[async_trait]
pub trait Store: Send + Sync {
    /// Open a unit of work. Nothing it writes is visible to others until
    /// `commit`; dropping it without committing discards every write.
    async fn begin(&self) -> EngineResult<Box<dyn UnitOfWork>>;
}

/// One atomic transaction against the store.
///
/// The `lock_*` methods take exclusive row locks held until commit or
/// rollback; they fail with `EngineError::Busy` when the lock cannot be
/// acquired in bounded time.
#[async_trait]
pub trait UnitOfWork: Send {
    // ------------------------------------------------------------------
    // Catalog
    // ------------------------------------------------------------------

    async fn destination(&mut self, id: Uuid) -> EngineResult<Option<Destination>>;

    async fn destinations(&mut self) -> EngineResult<Vec<Destination>>;

    async fn insert_destination(&mut self, destination: &Destination) -> EngineResult<()>;

    async fn pricing_tiers(&mut self, destination_id: Uuid) -> EngineResult<Vec<PricingTier>>;

    async fn replace_pricing_tiers(
        &mut self,
        destination_id: Uuid,
        tiers: &[PricingTier],
    ) -> EngineResult<()>;

    // ------------------------------------------------------------------
    // Trips
    // ------------------------------------------------------------------

    async fn trip(&mut self, id: Uuid) -> EngineResult<Option<Trip>>;

    /// Read a trip and hold its row lock; serializes all booking mutations on it.
    async fn lock_trip(&mut self, id: Uuid) -> EngineResult<Option<Trip>>;

    /// Serialize trip scheduling for one service day.
    async fn lock_schedule_day(&mut self, day: NaiveDate) -> EngineResult<()>;

    /// Non-cancelled trips whose window intersects `[from, to)`.
    async fn active_trips_between(
        &mut self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> EngineResult<Vec<Trip>>;

    async fn insert_trip(&mut self, trip: &Trip) -> EngineResult<()>;

    async fn update_trip_status(&mut self, id: Uuid, status: TripStatus) -> EngineResult<()>;

    // ------------------------------------------------------------------
    // Bookings
    // ------------------------------------------------------------------

    async fn booking(&mut self, id: Uuid) -> EngineResult<Option<Booking>>;

    async fn confirmed_bookings(&mut self, trip_id: Uuid) -> EngineResult<Vec<Booking>>;

    async fn user_bookings(&mut self, user_id: Uuid) -> EngineResult<Vec<Booking>>;

    async fn insert_booking(&mut self, booking: &Booking) -> EngineResult<()>;

    /// Persist status, cancellation time and `credits_cost_paid`.
    async fn update_booking(&mut self, booking: &Booking) -> EngineResult<()>;

    // ------------------------------------------------------------------
    // Ledger
    // ------------------------------------------------------------------

    /// Lock the user's balance row, creating it at zero when absent, and return it.
    async fn lock_balance(&mut self, user_id: Uuid) -> EngineResult<i64>;

    /// Overwrite a balance previously locked in this unit of work.
    async fn store_balance(&mut self, user_id: Uuid, credits: i64) -> EngineResult<()>;

    async fn balance(&mut self, user_id: Uuid) -> EngineResult<Option<i64>>;

    async fn append_transaction(&mut self, transaction: &CreditTransaction) -> EngineResult<()>;

    /// Newest first.
    async fn transactions(
        &mut self,
        user_id: Uuid,
        page: PageRequest,
    ) -> EngineResult<Page<CreditTransaction>>;

    async fn transaction_sum(&mut self, user_id: Uuid) -> EngineResult<i64>;

    // ------------------------------------------------------------------
    // Completion
    // ------------------------------------------------------------------

    async fn commit(self: Box<Self>) -> EngineResult<()>;

    async fn rollback(self: Box<Self>) -> EngineResult<()>;
}
