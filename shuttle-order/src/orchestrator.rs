use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use shuttle_catalog::{
    is_reservable, CapacityTracker, ResolvedRate, SlotAvailability, SlotCalendar, TierReport,
    TierResolver,
};
use shuttle_core::{
    Booking, BookingRequest, BusyCalendar, Destination, EngineError, EngineResult,
    ExternalBusyWindow, Identity, LogNotifier, NoCalendar, Notifier, PricingTier, Store, Trip,
    TripStatus, UnitOfWork,
};
use shuttle_shared::models::events::{
    BookingCancelledEvent, BookingConfirmedEvent, BookingRepricedEvent, TripCancelledEvent,
};
use shuttle_shared::NotificationEvent;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::ledger::{ApplyPolicy, CreditLedger, Posting};
use crate::metrics::EngineMetrics;
use crate::repricing::{self, Adjustment};
use crate::unit_of_work::complete;

/// Service-day grid and booking cutoff.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookingPolicy {
    /// First slot start, local hour.
    pub start_hour: u32,
    /// Slots must fit their base interval before this local hour.
    pub end_hour: u32,
    pub interval_minutes: u32,
    /// Bookings close this many minutes before departure.
    pub cutoff_minutes: u32,
}

impl Default for BookingPolicy {
    fn default() -> Self {
        Self {
            start_hour: 6,
            end_hour: 20,
            interval_minutes: 30,
            cutoff_minutes: 60,
        }
    }
}

pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

#[derive(Debug, Clone, Serialize)]
pub struct BookingReceipt {
    pub booking: Booking,
    pub trip_start: DateTime<Utc>,
    pub rate: ResolvedRate,
    /// Trip occupancy including this booking.
    pub occupancy: u32,
    /// Settlements applied to the other occupants.
    pub adjustments: Vec<Adjustment>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CancellationReceipt {
    pub booking: Booking,
    pub refunded: i64,
    pub adjustments: Vec<Adjustment>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TripCancellation {
    pub trip: Trip,
    pub cancelled_bookings: Vec<Uuid>,
    pub credits_refunded: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TripManifest {
    pub trip: Trip,
    pub bookings: Vec<Booking>,
    pub occupancy: u32,
    pub seats_remaining: u32,
    /// Rate every occupant currently pays; `None` for an empty trip.
    pub rate: Option<ResolvedRate>,
}

/// A slot plus the trip already running in it, if any.
#[derive(Debug, Clone, Serialize)]
pub struct SlotView {
    #[serde(flatten)]
    pub availability: SlotAvailability,
    /// Trip of this destination departing at the slot start; it can be joined.
    pub trip_id: Option<Uuid>,
    pub seats_remaining: Option<u32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DayAvailability {
    pub date: NaiveDate,
    pub destination_id: Uuid,
    /// The external calendar could not be read; only internal trips block slots.
    pub degraded: bool,
    pub slots: Vec<SlotView>,
}

/// Reservation of a slot rather than a known trip.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlotReservation {
    pub destination_id: Uuid,
    pub start: DateTime<Utc>,
    pub passenger_count: u32,
    pub pickup: Option<String>,
    pub dropoff: Option<String>,
}

/// Coordinates trips, bookings, pricing and the ledger.
///
/// Every mutation runs in one unit of work: the trip row is locked first,
/// then the balance rows of everyone whose price moves, in ascending user
/// order. Notifications go out only after commit.
pub struct BookingOrchestrator {
    store: Arc<dyn Store>,
    calendar: Arc<dyn BusyCalendar>,
    notifier: Arc<dyn Notifier>,
    resolver: TierResolver,
    slots: SlotCalendar,
    policy: BookingPolicy,
    metrics: Option<Arc<EngineMetrics>>,
    clock: Clock,
    default_calendar_id: Option<String>,
}

impl BookingOrchestrator {
    pub fn new(store: Arc<dyn Store>, slots: SlotCalendar, policy: BookingPolicy) -> Self {
        Self {
            store,
            calendar: Arc::new(NoCalendar),
            notifier: Arc::new(LogNotifier),
            resolver: TierResolver::default(),
            slots,
            policy,
            metrics: None,
            clock: Arc::new(Utc::now),
            default_calendar_id: None,
        }
    }

    pub fn with_calendar(mut self, calendar: Arc<dyn BusyCalendar>) -> Self {
        self.calendar = calendar;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_resolver(mut self, resolver: TierResolver) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<EngineMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Calendar consulted for destinations without their own calendar id.
    pub fn with_default_calendar(mut self, calendar_id: impl Into<String>) -> Self {
        self.default_calendar_id = Some(calendar_id.into());
        self
    }

    fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    // ========================================================================
    // Bookings
    // ========================================================================

    /// Book seats on an existing trip and settle every occupant to the new rate.
    pub async fn create_booking(
        &self,
        identity: &Identity,
        request: BookingRequest,
    ) -> EngineResult<BookingReceipt> {
        request.validate()?;

        let mut uow = self.store.begin().await?;
        let result = self.create_booking_in(uow.as_mut(), identity, &request).await;
        let receipt = self.finish(complete(uow, result).await)?;

        self.on_booked(&receipt);
        Ok(receipt)
    }

    async fn create_booking_in(
        &self,
        uow: &mut dyn UnitOfWork,
        identity: &Identity,
        request: &BookingRequest,
    ) -> EngineResult<BookingReceipt> {
        // 1. Serialize on the trip
        let trip = uow
            .lock_trip(request.trip_id)
            .await?
            .ok_or_else(|| EngineError::not_found("trip", request.trip_id))?;

        self.book_locked(uow, identity, &trip, request).await
    }

    /// Booking steps shared by `create_booking` and `reserve_slot`. The
    /// caller already holds the lock on `trip`.
    async fn book_locked(
        &self,
        uow: &mut dyn UnitOfWork,
        identity: &Identity,
        trip: &Trip,
        request: &BookingRequest,
    ) -> EngineResult<BookingReceipt> {
        // 1. Trip must still run and be ahead of the cutoff
        trip.ensure_scheduled()?;
        if !is_reservable(trip.start_time, self.policy.cutoff_minutes, self.now()) {
            return Err(EngineError::SlotNotReservable {
                start: trip.start_time,
            });
        }

        // 2. Capacity against bookings read under the lock
        let existing = uow.confirmed_bookings(trip.id).await?;
        let occupancy = CapacityTracker::admit(trip, &existing, request.passenger_count)?;

        // 3. Uniform rate at the new occupancy
        let rate = self.rate_for(uow, trip.destination_id, occupancy).await?;

        // 4. Settle existing occupants, then charge the newcomer
        let adjustments = repricing::plan(&existing, &rate);
        CreditLedger::lock_accounts(
            uow,
            adjustments
                .iter()
                .map(|a| a.user_id)
                .chain(std::iter::once(identity.user_id)),
        )
        .await?;
        settle(uow, trip.id, &existing, &adjustments).await?;

        let booking = Booking::confirmed(
            identity.user_id,
            request,
            rate.total_for(request.passenger_count),
        );
        uow.insert_booking(&booking).await?;
        if booking.credits_cost_paid > 0 {
            CreditLedger::apply_in(
                uow,
                Posting::usage(
                    booking.user_id,
                    booking.id,
                    booking.credits_cost_paid,
                    format!(
                        "Booking {} for {} passenger(s) on trip {}",
                        booking.id, booking.passenger_count, trip.id
                    ),
                ),
                ApplyPolicy::RequireFunds,
            )
            .await?;
        }

        Ok(BookingReceipt {
            booking,
            trip_start: trip.start_time,
            rate,
            occupancy,
            adjustments,
        })
    }

    /// Cancel a booking with a full refund and settle the remaining occupants.
    pub async fn cancel_booking(
        &self,
        identity: &Identity,
        booking_id: Uuid,
    ) -> EngineResult<CancellationReceipt> {
        let mut uow = self.store.begin().await?;
        let result = self.cancel_booking_in(uow.as_mut(), identity, booking_id).await;
        let receipt = self.finish(complete(uow, result).await)?;

        if let Some(metrics) = &self.metrics {
            metrics.bookings_cancelled.inc();
            metrics.repricing_adjustments.inc_by(receipt.adjustments.len() as u64);
        }
        info!(
            booking_id = %receipt.booking.id,
            trip_id = %receipt.booking.trip_id,
            refunded = receipt.refunded,
            "Booking cancelled"
        );

        let timestamp = self.now().timestamp();
        let mut events = vec![NotificationEvent::BookingCancelled(BookingCancelledEvent {
            booking_id: receipt.booking.id,
            trip_id: receipt.booking.trip_id,
            user_id: receipt.booking.user_id,
            credits_refunded: receipt.refunded,
            timestamp,
        })];
        events.extend(repriced_events(receipt.booking.trip_id, &receipt.adjustments, timestamp));
        self.dispatch(events);

        Ok(receipt)
    }

    async fn cancel_booking_in(
        &self,
        uow: &mut dyn UnitOfWork,
        identity: &Identity,
        booking_id: Uuid,
    ) -> EngineResult<CancellationReceipt> {
        // 1. Ownership before any lock
        let booking = uow
            .booking(booking_id)
            .await?
            .ok_or_else(|| EngineError::not_found("booking", booking_id))?;
        identity.ensure_can_act_for(booking.user_id)?;

        // 2. Lock the trip, then re-read the booking under the lock
        let trip = uow
            .lock_trip(booking.trip_id)
            .await?
            .ok_or_else(|| EngineError::not_found("trip", booking.trip_id))?;
        let mut booking = uow
            .booking(booking_id)
            .await?
            .ok_or_else(|| EngineError::not_found("booking", booking_id))?;
        if !booking.is_confirmed() {
            return Err(EngineError::AlreadyCancelled(booking_id));
        }

        // 3. Price the trip without this booking
        let remaining: Vec<Booking> = uow
            .confirmed_bookings(trip.id)
            .await?
            .into_iter()
            .filter(|b| b.id != booking_id)
            .collect();
        let occupancy = CapacityTracker::current_occupancy(trip.id, &remaining);
        let adjustments = if occupancy > 0 {
            let rate = self.rate_for(uow, trip.destination_id, occupancy).await?;
            repricing::plan(&remaining, &rate)
        } else {
            Vec::new()
        };

        // 4. Refund, then settle whoever is left
        CreditLedger::lock_accounts(
            uow,
            adjustments
                .iter()
                .map(|a| a.user_id)
                .chain(std::iter::once(booking.user_id)),
        )
        .await?;

        let refunded = booking.cancel()?;
        uow.update_booking(&booking).await?;
        if refunded > 0 {
            CreditLedger::apply_in(
                uow,
                Posting::refund(
                    booking.user_id,
                    booking.id,
                    refunded,
                    format!("Refund for cancelled booking {}", booking.id),
                ),
                ApplyPolicy::RequireFunds,
            )
            .await?;
        }
        settle(uow, trip.id, &remaining, &adjustments).await?;

        Ok(CancellationReceipt {
            booking,
            refunded,
            adjustments,
        })
    }

    pub async fn user_bookings(&self, identity: &Identity) -> EngineResult<Vec<Booking>> {
        let mut uow = self.store.begin().await?;
        let result = uow.user_bookings(identity.user_id).await;
        complete(uow, result).await
    }

    // ========================================================================
    // Trips
    // ========================================================================

    /// Operator cancellation: every confirmed booking is refunded in full.
    pub async fn cancel_trip(
        &self,
        identity: &Identity,
        trip_id: Uuid,
    ) -> EngineResult<TripCancellation> {
        identity.ensure_admin()?;

        let mut uow = self.store.begin().await?;
        let result = cancel_trip_in(uow.as_mut(), trip_id).await;
        let outcome = self.finish(complete(uow, result).await)?;

        if let Some(metrics) = &self.metrics {
            metrics.trips_cancelled.inc();
            metrics
                .bookings_cancelled
                .inc_by(outcome.cancelled_bookings.len() as u64);
        }
        info!(
            trip_id = %trip_id,
            bookings = outcome.cancelled_bookings.len(),
            refunded = outcome.credits_refunded,
            "Trip cancelled"
        );

        self.dispatch(vec![NotificationEvent::TripCancelled(TripCancelledEvent {
            trip_id,
            cancelled_bookings: outcome.cancelled_bookings.clone(),
            credits_refunded: outcome.credits_refunded,
            timestamp: self.now().timestamp(),
        })]);

        Ok(outcome)
    }

    /// Put a new trip on the schedule.
    pub async fn schedule_trip(
        &self,
        identity: &Identity,
        destination_id: Uuid,
        start: DateTime<Utc>,
        capacity: Option<u32>,
    ) -> EngineResult<Trip> {
        identity.ensure_admin()?;

        let destination = self.active_destination(destination_id).await?;
        let trip = Trip::schedule(&destination, start, capacity)?;
        if !is_reservable(trip.start_time, self.policy.cutoff_minutes, self.now()) {
            return Err(EngineError::SlotNotReservable {
                start: trip.start_time,
            });
        }

        // The external feed is read outside the transaction; no locks are
        // held across the network call.
        let (external, _) = self
            .external_busy(&destination, trip.start_time, trip.end_time)
            .await;

        let mut uow = self.store.begin().await?;
        let result = self.insert_trip_in(uow.as_mut(), &trip, &external).await;
        self.finish(complete(uow, result).await)?;

        if let Some(metrics) = &self.metrics {
            metrics.trips_scheduled.inc();
        }
        info!(trip_id = %trip.id, destination_id = %destination_id, start = %trip.start_time, "Trip scheduled");
        Ok(trip)
    }

    async fn insert_trip_in(
        &self,
        uow: &mut dyn UnitOfWork,
        trip: &Trip,
        external: &[ExternalBusyWindow],
    ) -> EngineResult<()> {
        self.lock_days(uow, trip).await?;

        let conflicts = uow
            .active_trips_between(trip.start_time, trip.end_time)
            .await?;
        if let Some(other) = conflicts.iter().find(|t| t.overlaps(trip.start_time, trip.end_time)) {
            return Err(EngineError::SlotUnavailable(format!(
                "Overlaps trip {} ({} - {})",
                other.id, other.start_time, other.end_time
            )));
        }
        if external
            .iter()
            .any(|w| trip.start_time < w.end && trip.end_time > w.start)
        {
            return Err(EngineError::SlotUnavailable(format!(
                "{} - {} is busy in the external calendar",
                trip.start_time, trip.end_time
            )));
        }

        uow.insert_trip(trip).await
    }

    /// Scheduling locks every service day the trip touches, in date order.
    async fn lock_days(&self, uow: &mut dyn UnitOfWork, trip: &Trip) -> EngineResult<()> {
        for day in self.slots.days_touched(trip.start_time, trip.end_time) {
            uow.lock_schedule_day(day).await?;
        }
        Ok(())
    }

    /// Book a slot of a destination, joining the trip already running in it
    /// or scheduling one in the same unit of work.
    pub async fn reserve_slot(
        &self,
        identity: &Identity,
        reservation: SlotReservation,
    ) -> EngineResult<BookingReceipt> {
        if reservation.passenger_count == 0 {
            return Err(EngineError::Validation(
                "Passenger count must be positive".to_string(),
            ));
        }

        let destination = self.active_destination(reservation.destination_id).await?;

        // 1. The start must be a slot of its service day
        let day = self.slots.local_date(reservation.start);
        let slots = self.slots.generate_slots(
            day,
            self.policy.start_hour,
            self.policy.end_hour,
            self.policy.interval_minutes,
            Some(destination.default_duration_minutes),
        )?;
        if !slots.iter().any(|s| s.start == reservation.start) {
            return Err(EngineError::SlotUnavailable(format!(
                "{} is not a bookable slot",
                reservation.start
            )));
        }
        if !is_reservable(reservation.start, self.policy.cutoff_minutes, self.now()) {
            return Err(EngineError::SlotNotReservable {
                start: reservation.start,
            });
        }

        let candidate = Trip::schedule(&destination, reservation.start, None)?;
        let (external, _) = self
            .external_busy(&destination, candidate.start_time, candidate.end_time)
            .await;

        let mut uow = self.store.begin().await?;
        let result = self
            .reserve_in(uow.as_mut(), identity, &reservation, candidate, &external)
            .await;
        let (receipt, scheduled) = self.finish(complete(uow, result).await)?;

        if scheduled {
            if let Some(metrics) = &self.metrics {
                metrics.trips_scheduled.inc();
            }
            info!(trip_id = %receipt.booking.trip_id, "Trip scheduled for slot reservation");
        }
        self.on_booked(&receipt);
        Ok(receipt)
    }

    async fn reserve_in(
        &self,
        uow: &mut dyn UnitOfWork,
        identity: &Identity,
        reservation: &SlotReservation,
        candidate: Trip,
        external: &[ExternalBusyWindow],
    ) -> EngineResult<(BookingReceipt, bool)> {
        self.lock_days(uow, &candidate).await?;

        let running = uow
            .active_trips_between(candidate.start_time, candidate.end_time)
            .await?
            .into_iter()
            .find(|t| {
                t.destination_id == reservation.destination_id
                    && t.start_time == reservation.start
            });

        let (trip, scheduled) = match running {
            Some(existing) => {
                let trip = uow
                    .lock_trip(existing.id)
                    .await?
                    .ok_or_else(|| EngineError::not_found("trip", existing.id))?;
                (trip, false)
            }
            None => {
                self.insert_trip_in(uow, &candidate, external).await?;
                (candidate, true)
            }
        };

        let request = BookingRequest {
            trip_id: trip.id,
            passenger_count: reservation.passenger_count,
            pickup: reservation.pickup.clone(),
            dropoff: reservation.dropoff.clone(),
        };
        let receipt = self.book_locked(uow, identity, &trip, &request).await?;
        Ok((receipt, scheduled))
    }

    /// Slots of a destination on `day`, with the trips already running in them.
    pub async fn slot_availability(
        &self,
        destination_id: Uuid,
        day: NaiveDate,
    ) -> EngineResult<DayAvailability> {
        let (from, to) = self.slots.day_bounds(day)?;

        // 1. Snapshot destination, trips and seats
        let mut uow = self.store.begin().await?;
        let result = async {
            let destination = uow
                .destination(destination_id)
                .await?
                .ok_or_else(|| EngineError::not_found("destination", destination_id))?;
            let trips = uow.active_trips_between(from, to).await?;

            let mut seats = HashMap::new();
            for trip in trips.iter().filter(|t| t.destination_id == destination_id) {
                let bookings = uow.confirmed_bookings(trip.id).await?;
                seats.insert(trip.id, CapacityTracker::remaining(trip, &bookings));
            }
            Ok::<_, EngineError>((destination, trips, seats))
        }
        .await;
        let (destination, trips, seats) = complete(uow, result).await?;

        // 2. External feed, fail-open
        let (external, degraded) = self.external_busy(&destination, from, to).await;

        // 3. Annotate the grid
        let slots = self.slots.availability(
            day,
            self.policy.start_hour,
            self.policy.end_hour,
            self.policy.interval_minutes,
            Some(destination.default_duration_minutes),
            &trips,
            &external,
            self.policy.cutoff_minutes,
            self.now(),
        )?;

        let slots = slots
            .into_iter()
            .map(|availability| {
                let joinable = trips.iter().find(|t| {
                    t.destination_id == destination_id && t.start_time == availability.slot.start
                });
                SlotView {
                    trip_id: joinable.map(|t| t.id),
                    seats_remaining: joinable.and_then(|t| seats.get(&t.id).copied()),
                    availability,
                }
            })
            .collect();

        Ok(DayAvailability {
            date: day,
            destination_id,
            degraded,
            slots,
        })
    }

    pub async fn trip_manifest(
        &self,
        identity: &Identity,
        trip_id: Uuid,
    ) -> EngineResult<TripManifest> {
        identity.ensure_admin()?;

        let mut uow = self.store.begin().await?;
        let result = async {
            let trip = uow
                .trip(trip_id)
                .await?
                .ok_or_else(|| EngineError::not_found("trip", trip_id))?;
            let bookings = uow.confirmed_bookings(trip_id).await?;
            let occupancy = CapacityTracker::current_occupancy(trip_id, &bookings);
            let rate = if occupancy > 0 {
                Some(self.rate_for(uow.as_mut(), trip.destination_id, occupancy).await?)
            } else {
                None
            };
            Ok::<_, EngineError>(TripManifest {
                seats_remaining: CapacityTracker::remaining(&trip, &bookings),
                trip,
                bookings,
                occupancy,
                rate,
            })
        }
        .await;
        complete(uow, result).await
    }

    // ========================================================================
    // Catalog
    // ========================================================================

    pub async fn list_destinations(&self) -> EngineResult<Vec<Destination>> {
        let mut uow = self.store.begin().await?;
        let result = uow
            .destinations()
            .await
            .map(|all| all.into_iter().filter(|d| d.is_active).collect());
        complete(uow, result).await
    }

    pub async fn create_destination(
        &self,
        identity: &Identity,
        destination: Destination,
    ) -> EngineResult<Destination> {
        identity.ensure_admin()?;

        let mut uow = self.store.begin().await?;
        let result = uow.insert_destination(&destination).await;
        complete(uow, result).await?;

        info!(destination_id = %destination.id, name = %destination.name, "Destination created");
        Ok(destination)
    }

    pub async fn pricing_tiers(&self, destination_id: Uuid) -> EngineResult<Vec<PricingTier>> {
        let mut uow = self.store.begin().await?;
        let result = async {
            uow.destination(destination_id)
                .await?
                .ok_or_else(|| EngineError::not_found("destination", destination_id))?;
            uow.pricing_tiers(destination_id).await
        }
        .await;
        complete(uow, result).await
    }

    /// Replace a destination's tier table. Existing trips are not repriced
    /// here; their next booking change settles occupants to the new table.
    pub async fn set_pricing_tiers(
        &self,
        identity: &Identity,
        destination_id: Uuid,
        tiers: impl IntoIterator<Item = (u32, i64)>,
    ) -> EngineResult<(Vec<PricingTier>, TierReport)> {
        identity.ensure_admin()?;

        let mut tiers: Vec<PricingTier> = tiers
            .into_iter()
            .map(|(count, cost)| PricingTier::new(destination_id, count, cost))
            .collect();
        tiers.sort_by_key(|t| t.passenger_count);
        let report = self.resolver.check_tiers(&tiers)?;

        let mut uow = self.store.begin().await?;
        let result = async {
            uow.destination(destination_id)
                .await?
                .ok_or_else(|| EngineError::not_found("destination", destination_id))?;
            uow.replace_pricing_tiers(destination_id, &tiers).await
        }
        .await;
        complete(uow, result).await?;

        info!(destination_id = %destination_id, tiers = tiers.len(), "Pricing tiers replaced");
        Ok((tiers, report))
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    async fn rate_for(
        &self,
        uow: &mut dyn UnitOfWork,
        destination_id: Uuid,
        occupancy: u32,
    ) -> EngineResult<ResolvedRate> {
        let tiers = uow.pricing_tiers(destination_id).await?;
        self.resolver.resolve(&tiers, occupancy)
    }

    async fn active_destination(&self, destination_id: Uuid) -> EngineResult<Destination> {
        let mut uow = self.store.begin().await?;
        let result = uow.destination(destination_id).await;
        let destination = complete(uow, result)
            .await?
            .ok_or_else(|| EngineError::not_found("destination", destination_id))?;

        if !destination.is_active {
            return Err(EngineError::Validation(format!(
                "Destination {} is not active",
                destination.name
            )));
        }
        Ok(destination)
    }

    /// Busy windows for a destination's calendar. A failing feed degrades to
    /// no external windows and reports `true`.
    async fn external_busy(
        &self,
        destination: &Destination,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> (Vec<ExternalBusyWindow>, bool) {
        let Some(calendar_id) = destination
            .calendar_id
            .as_deref()
            .or(self.default_calendar_id.as_deref())
        else {
            return (Vec::new(), false);
        };

        match self.calendar.busy_windows(calendar_id, from, to).await {
            Ok(windows) => (windows, false),
            Err(e) => {
                warn!(
                    calendar_id,
                    error = %e,
                    "External calendar unavailable; blocking on internal trips only"
                );
                if let Some(metrics) = &self.metrics {
                    metrics.calendar_degraded.inc();
                }
                (Vec::new(), true)
            }
        }
    }

    /// Count ledger rejections on the way out.
    fn finish<T>(&self, result: EngineResult<T>) -> EngineResult<T> {
        if let Err(EngineError::InsufficientCredits { user_id, balance, required }) = &result {
            warn!(user_id = %user_id, balance, required, "Mutation rejected for insufficient credits");
            if let Some(metrics) = &self.metrics {
                metrics.ledger_rejections.inc();
            }
        }
        result
    }

    fn on_booked(&self, receipt: &BookingReceipt) {
        if let Some(metrics) = &self.metrics {
            metrics.bookings_created.inc();
            metrics.repricing_adjustments.inc_by(receipt.adjustments.len() as u64);
        }
        info!(
            booking_id = %receipt.booking.id,
            trip_id = %receipt.booking.trip_id,
            occupancy = receipt.occupancy,
            rate = receipt.rate.per_passenger,
            "Booking confirmed"
        );

        let booking = &receipt.booking;
        let timestamp = self.now().timestamp();
        let mut events = vec![NotificationEvent::BookingConfirmed(BookingConfirmedEvent {
            booking_id: booking.id,
            trip_id: booking.trip_id,
            user_id: booking.user_id,
            passenger_count: booking.passenger_count,
            credits_charged: booking.credits_cost_paid,
            trip_start: receipt.trip_start,
            timestamp,
        })];
        events.extend(repriced_events(booking.trip_id, &receipt.adjustments, timestamp));
        self.dispatch(events);
    }

    /// Deliver events in the background. Delivery failures are logged only.
    fn dispatch(&self, events: Vec<NotificationEvent>) {
        if events.is_empty() {
            return;
        }
        let notifier = self.notifier.clone();
        tokio::spawn(async move {
            for event in events {
                if let Err(e) = notifier.notify(&event).await {
                    warn!(kind = event.kind(), error = %e, "Notification delivery failed");
                }
            }
        });
    }
}

/// Apply the refunds and charges of `adjustments` and store the new costs.
async fn settle(
    uow: &mut dyn UnitOfWork,
    trip_id: Uuid,
    bookings: &[Booking],
    adjustments: &[Adjustment],
) -> EngineResult<()> {
    for adjustment in adjustments {
        let mut booking = bookings
            .iter()
            .find(|b| b.id == adjustment.booking_id)
            .cloned()
            .ok_or_else(|| EngineError::not_found("booking", adjustment.booking_id))?;

        let delta = adjustment.delta();
        let posting = if delta < 0 {
            Posting::refund(
                booking.user_id,
                booking.id,
                -delta,
                format!("Fare reduced on trip {}", trip_id),
            )
        } else {
            Posting::usage(
                booking.user_id,
                booking.id,
                delta,
                format!("Fare increased on trip {}", trip_id),
            )
        };
        CreditLedger::apply_in(uow, posting, ApplyPolicy::RequireFunds).await?;

        booking.credits_cost_paid = adjustment.new_cost;
        uow.update_booking(&booking).await?;
    }
    Ok(())
}

async fn cancel_trip_in(uow: &mut dyn UnitOfWork, trip_id: Uuid) -> EngineResult<TripCancellation> {
    let mut trip = uow
        .lock_trip(trip_id)
        .await?
        .ok_or_else(|| EngineError::not_found("trip", trip_id))?;
    trip.cancel()?;

    let bookings = uow.confirmed_bookings(trip_id).await?;
    CreditLedger::lock_accounts(uow, bookings.iter().map(|b| b.user_id)).await?;

    let mut cancelled_bookings = Vec::with_capacity(bookings.len());
    let mut credits_refunded = 0;
    for mut booking in bookings {
        let refund = booking.cancel()?;
        uow.update_booking(&booking).await?;
        if refund > 0 {
            CreditLedger::apply_in(
                uow,
                Posting::refund(
                    booking.user_id,
                    booking.id,
                    refund,
                    format!("Refund for cancelled trip {}", trip_id),
                ),
                ApplyPolicy::RequireFunds,
            )
            .await?;
        }
        credits_refunded += refund;
        cancelled_bookings.push(booking.id);
    }

    uow.update_trip_status(trip_id, TripStatus::Cancelled).await?;

    Ok(TripCancellation {
        trip,
        cancelled_bookings,
        credits_refunded,
    })
}

fn repriced_events(trip_id: Uuid, adjustments: &[Adjustment], timestamp: i64) -> Vec<NotificationEvent> {
    adjustments
        .iter()
        .map(|a| {
            NotificationEvent::BookingRepriced(BookingRepricedEvent {
                booking_id: a.booking_id,
                trip_id,
                user_id: a.user_id,
                previous_cost: a.previous_cost,
                new_cost: a.new_cost,
                timestamp,
            })
        })
        .collect()
}
