use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use shuttle_core::{
    Booking, BookingStatus, CreditTransaction, Destination, EngineError, EngineResult, Page,
    PageRequest, PricingTier, Store, Trip, TripStatus, UnitOfWork,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Default)]
struct State {
    destinations: HashMap<Uuid, Destination>,
    tiers: HashMap<Uuid, Vec<PricingTier>>,
    trips: HashMap<Uuid, Trip>,
    bookings: HashMap<Uuid, Booking>,
    balances: HashMap<Uuid, i64>,
    /// Append order is chronological.
    transactions: Vec<CreditTransaction>,
}

/// Process-local store for tests and single-node demos.
///
/// A unit of work holds the one global lock for its whole lifetime and works
/// on a private copy of the state; commit swaps the copy in, anything else
/// discards it. Waiting for the lock is bounded and surfaces as `Busy`.
#[derive(Clone)]
pub struct InMemoryStore {
    state: Arc<Mutex<State>>,
    lock_timeout: Duration,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State::default())),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }

    pub fn with_lock_timeout(mut self, lock_timeout: Duration) -> Self {
        self.lock_timeout = lock_timeout;
        self
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn begin(&self) -> EngineResult<Box<dyn UnitOfWork>> {
        let guard = tokio::time::timeout(self.lock_timeout, self.state.clone().lock_owned())
            .await
            .map_err(|_| {
                EngineError::Busy(format!(
                    "Store lock not acquired within {}ms",
                    self.lock_timeout.as_millis()
                ))
            })?;

        let working = (*guard).clone();
        Ok(Box::new(MemoryUnitOfWork { guard, working }))
    }
}

pub struct MemoryUnitOfWork {
    guard: OwnedMutexGuard<State>,
    working: State,
}

#[async_trait]
impl UnitOfWork for MemoryUnitOfWork {
    async fn destination(&mut self, id: Uuid) -> EngineResult<Option<Destination>> {
        Ok(self.working.destinations.get(&id).cloned())
    }

    async fn destinations(&mut self) -> EngineResult<Vec<Destination>> {
        let mut all: Vec<Destination> = self.working.destinations.values().cloned().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(all)
    }

    async fn insert_destination(&mut self, destination: &Destination) -> EngineResult<()> {
        if self.working.destinations.contains_key(&destination.id) {
            return Err(EngineError::Storage(format!(
                "Duplicate destination {}",
                destination.id
            )));
        }
        self.working
            .destinations
            .insert(destination.id, destination.clone());
        Ok(())
    }

    async fn pricing_tiers(&mut self, destination_id: Uuid) -> EngineResult<Vec<PricingTier>> {
        let mut tiers = self
            .working
            .tiers
            .get(&destination_id)
            .cloned()
            .unwrap_or_default();
        tiers.sort_by_key(|t| t.passenger_count);
        Ok(tiers)
    }

    async fn replace_pricing_tiers(
        &mut self,
        destination_id: Uuid,
        tiers: &[PricingTier],
    ) -> EngineResult<()> {
        self.working.tiers.insert(destination_id, tiers.to_vec());
        Ok(())
    }

    async fn trip(&mut self, id: Uuid) -> EngineResult<Option<Trip>> {
        Ok(self.working.trips.get(&id).cloned())
    }

    async fn lock_trip(&mut self, id: Uuid) -> EngineResult<Option<Trip>> {
        // The global lock already serializes everything.
        Ok(self.working.trips.get(&id).cloned())
    }

    async fn lock_schedule_day(&mut self, _day: NaiveDate) -> EngineResult<()> {
        Ok(())
    }

    async fn active_trips_between(
        &mut self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> EngineResult<Vec<Trip>> {
        let mut trips: Vec<Trip> = self
            .working
            .trips
            .values()
            .filter(|t| !t.is_cancelled() && t.overlaps(from, to))
            .cloned()
            .collect();
        trips.sort_by_key(|t| t.start_time);
        Ok(trips)
    }

    async fn insert_trip(&mut self, trip: &Trip) -> EngineResult<()> {
        if !self.working.destinations.contains_key(&trip.destination_id) {
            return Err(EngineError::Storage(format!(
                "Trip {} references unknown destination {}",
                trip.id, trip.destination_id
            )));
        }
        self.working.trips.insert(trip.id, trip.clone());
        Ok(())
    }

    async fn update_trip_status(&mut self, id: Uuid, status: TripStatus) -> EngineResult<()> {
        let trip = self
            .working
            .trips
            .get_mut(&id)
            .ok_or_else(|| EngineError::not_found("trip", id))?;
        trip.status = status;
        Ok(())
    }

    async fn booking(&mut self, id: Uuid) -> EngineResult<Option<Booking>> {
        Ok(self.working.bookings.get(&id).cloned())
    }

    async fn confirmed_bookings(&mut self, trip_id: Uuid) -> EngineResult<Vec<Booking>> {
        let mut bookings: Vec<Booking> = self
            .working
            .bookings
            .values()
            .filter(|b| b.trip_id == trip_id && b.status == BookingStatus::Confirmed)
            .cloned()
            .collect();
        bookings.sort_by_key(|b| b.created_at);
        Ok(bookings)
    }

    async fn user_bookings(&mut self, user_id: Uuid) -> EngineResult<Vec<Booking>> {
        let mut bookings: Vec<Booking> = self
            .working
            .bookings
            .values()
            .filter(|b| b.user_id == user_id)
            .cloned()
            .collect();
        bookings.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(bookings)
    }

    async fn insert_booking(&mut self, booking: &Booking) -> EngineResult<()> {
        if !self.working.trips.contains_key(&booking.trip_id) {
            return Err(EngineError::Storage(format!(
                "Booking {} references unknown trip {}",
                booking.id, booking.trip_id
            )));
        }
        self.working.bookings.insert(booking.id, booking.clone());
        Ok(())
    }

    async fn update_booking(&mut self, booking: &Booking) -> EngineResult<()> {
        let stored = self
            .working
            .bookings
            .get_mut(&booking.id)
            .ok_or_else(|| EngineError::not_found("booking", booking.id))?;
        stored.status = booking.status;
        stored.credits_cost_paid = booking.credits_cost_paid;
        stored.cancelled_at = booking.cancelled_at;
        Ok(())
    }

    async fn lock_balance(&mut self, user_id: Uuid) -> EngineResult<i64> {
        Ok(*self.working.balances.entry(user_id).or_insert(0))
    }

    async fn store_balance(&mut self, user_id: Uuid, credits: i64) -> EngineResult<()> {
        self.working.balances.insert(user_id, credits);
        Ok(())
    }

    async fn balance(&mut self, user_id: Uuid) -> EngineResult<Option<i64>> {
        Ok(self.working.balances.get(&user_id).copied())
    }

    async fn append_transaction(&mut self, transaction: &CreditTransaction) -> EngineResult<()> {
        self.working.transactions.push(transaction.clone());
        Ok(())
    }

    async fn transactions(
        &mut self,
        user_id: Uuid,
        page: PageRequest,
    ) -> EngineResult<Page<CreditTransaction>> {
        let mine: Vec<&CreditTransaction> = self
            .working
            .transactions
            .iter()
            .rev()
            .filter(|t| t.user_id == user_id)
            .collect();

        let items = mine
            .iter()
            .skip(page.offset() as usize)
            .take(page.per_page as usize)
            .map(|t| (*t).clone())
            .collect();

        Ok(Page {
            items,
            page: page.page,
            per_page: page.per_page,
            total: mine.len() as u64,
        })
    }

    async fn transaction_sum(&mut self, user_id: Uuid) -> EngineResult<i64> {
        Ok(self
            .working
            .transactions
            .iter()
            .filter(|t| t.user_id == user_id)
            .map(|t| t.amount)
            .sum())
    }

    async fn commit(self: Box<Self>) -> EngineResult<()> {
        let MemoryUnitOfWork { mut guard, working } = *self;
        *guard = working;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> EngineResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shuttle_core::TransactionType;

    #[tokio::test]
    async fn test_uncommitted_writes_are_discarded() {
        let store = InMemoryStore::new();
        let user = Uuid::new_v4();

        let mut uow = store.begin().await.unwrap();
        uow.store_balance(user, 50).await.unwrap();
        drop(uow);

        let mut uow = store.begin().await.unwrap();
        assert_eq!(uow.balance(user).await.unwrap(), None);
        uow.store_balance(user, 50).await.unwrap();
        uow.commit().await.unwrap();

        let mut uow = store.begin().await.unwrap();
        assert_eq!(uow.balance(user).await.unwrap(), Some(50));
    }

    #[tokio::test]
    async fn test_lock_wait_is_bounded() {
        let store = InMemoryStore::new().with_lock_timeout(Duration::from_millis(20));
        let _held = store.begin().await.unwrap();

        let second = store.begin().await;
        assert!(matches!(second, Err(EngineError::Busy(_))));
    }

    #[tokio::test]
    async fn test_transactions_newest_first() {
        let store = InMemoryStore::new();
        let user = Uuid::new_v4();

        let mut uow = store.begin().await.unwrap();
        for amount in [10, 20, 30] {
            let tx = CreditTransaction::new(user, amount, TransactionType::Purchase, "top-up", None);
            uow.append_transaction(&tx).await.unwrap();
        }

        let page = uow.transactions(user, PageRequest::new(Some(1), Some(2))).await.unwrap();
        assert_eq!(page.total, 3);
        assert_eq!(page.items.iter().map(|t| t.amount).collect::<Vec<_>>(), vec![30, 20]);
        assert_eq!(uow.transaction_sum(user).await.unwrap(), 60);
    }
}
