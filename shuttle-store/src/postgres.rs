use async_trait::async_trait;
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use shuttle_core::{
    Booking, CreditTransaction, Destination, EngineError, EngineResult, Page, PageRequest,
    PricingTier, Store, Trip, TripStatus, UnitOfWork,
};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

/// Namespace for scheduling advisory locks, keyed by day number.
const SCHEDULE_LOCK_NAMESPACE: i64 = 0x5348_5554_0000_0000;

/// Lock timeouts, deadlocks, serialization failures and an exhausted pool
/// are contention; everything else is a storage fault.
pub(crate) fn map_sqlx(err: sqlx::Error) -> EngineError {
    match &err {
        sqlx::Error::PoolTimedOut => EngineError::Busy("Connection pool exhausted".to_string()),
        sqlx::Error::Database(db) => match db.code().as_deref() {
            Some("55P03") | Some("40P01") | Some("40001") => {
                EngineError::Busy(db.message().to_string())
            }
            _ => EngineError::Storage(err.to_string()),
        },
        _ => EngineError::Storage(err.to_string()),
    }
}

fn to_u32(value: i32, field: &str) -> EngineResult<u32> {
    u32::try_from(value).map_err(|_| EngineError::Storage(format!("Negative {}: {}", field, value)))
}

/// Counts are INTEGER columns; anything past `i32::MAX` is caller input we cannot store.
fn to_i32(value: u32, field: &str) -> EngineResult<i32> {
    i32::try_from(value).map_err(|_| EngineError::Validation(format!("{} too large: {}", field, value)))
}

// Internal structs for type-safe querying
#[derive(sqlx::FromRow)]
struct DestinationRow {
    id: Uuid,
    name: String,
    default_duration_minutes: i32,
    default_capacity: i32,
    calendar_id: Option<String>,
    is_active: bool,
    created_at: DateTime<Utc>,
}

impl TryFrom<DestinationRow> for Destination {
    type Error = EngineError;

    fn try_from(row: DestinationRow) -> EngineResult<Self> {
        Ok(Destination {
            id: row.id,
            name: row.name,
            default_duration_minutes: to_u32(row.default_duration_minutes, "duration")?,
            default_capacity: to_u32(row.default_capacity, "capacity")?,
            calendar_id: row.calendar_id,
            is_active: row.is_active,
            created_at: row.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct TierRow {
    destination_id: Uuid,
    passenger_count: i32,
    cost_per_passenger: i64,
}

#[derive(sqlx::FromRow)]
struct TripRow {
    id: Uuid,
    destination_id: Uuid,
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
    capacity: i32,
    status: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<TripRow> for Trip {
    type Error = EngineError;

    fn try_from(row: TripRow) -> EngineResult<Self> {
        Ok(Trip {
            id: row.id,
            destination_id: row.destination_id,
            start_time: row.start_time,
            end_time: row.end_time,
            capacity: to_u32(row.capacity, "capacity")?,
            status: row.status.parse()?,
            created_at: row.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct BookingRow {
    id: Uuid,
    user_id: Uuid,
    trip_id: Uuid,
    passenger_count: i32,
    pickup: Option<String>,
    dropoff: Option<String>,
    status: String,
    credits_cost_paid: i64,
    created_at: DateTime<Utc>,
    cancelled_at: Option<DateTime<Utc>>,
}

impl TryFrom<BookingRow> for Booking {
    type Error = EngineError;

    fn try_from(row: BookingRow) -> EngineResult<Self> {
        Ok(Booking {
            id: row.id,
            user_id: row.user_id,
            trip_id: row.trip_id,
            passenger_count: to_u32(row.passenger_count, "passenger count")?,
            pickup: row.pickup,
            dropoff: row.dropoff,
            status: row.status.parse()?,
            credits_cost_paid: row.credits_cost_paid,
            created_at: row.created_at,
            cancelled_at: row.cancelled_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct TransactionRow {
    id: Uuid,
    user_id: Uuid,
    amount: i64,
    transaction_type: String,
    description: String,
    booking_id: Option<Uuid>,
    created_at: DateTime<Utc>,
}

impl TryFrom<TransactionRow> for CreditTransaction {
    type Error = EngineError;

    fn try_from(row: TransactionRow) -> EngineResult<Self> {
        Ok(CreditTransaction {
            id: row.id,
            user_id: row.user_id,
            amount: row.amount,
            transaction_type: row.transaction_type.parse()?,
            description: row.description,
            booking_id: row.booking_id,
            created_at: row.created_at,
        })
    }
}

fn convert_all<R, T>(rows: Vec<R>) -> EngineResult<Vec<T>>
where
    T: TryFrom<R, Error = EngineError>,
{
    rows.into_iter().map(T::try_from).collect()
}

const DESTINATION_COLUMNS: &str =
    "id, name, default_duration_minutes, default_capacity, calendar_id, is_active, created_at";
const TRIP_COLUMNS: &str = "id, destination_id, start_time, end_time, capacity, status, created_at";
const BOOKING_COLUMNS: &str = "id, user_id, trip_id, passenger_count, pickup, dropoff, status, credits_cost_paid, created_at, cancelled_at";
const TRANSACTION_COLUMNS: &str =
    "id, user_id, amount, transaction_type, description, booking_id, created_at";

/// PostgreSQL system of record.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
    lock_timeout_ms: u64,
}

impl PgStore {
    pub fn new(pool: PgPool, lock_timeout_ms: u64) -> Self {
        Self {
            pool,
            lock_timeout_ms,
        }
    }
}

#[async_trait]
impl Store for PgStore {
    async fn begin(&self) -> EngineResult<Box<dyn UnitOfWork>> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx)?;

        // SET does not take bind parameters; the value is a plain integer.
        sqlx::query(&format!("SET LOCAL lock_timeout = '{}ms'", self.lock_timeout_ms))
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx)?;

        Ok(Box::new(PgUnitOfWork { tx }))
    }
}

pub struct PgUnitOfWork {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl UnitOfWork for PgUnitOfWork {
    async fn destination(&mut self, id: Uuid) -> EngineResult<Option<Destination>> {
        let row = sqlx::query_as::<_, DestinationRow>(&format!(
            "SELECT {} FROM destinations WHERE id = $1",
            DESTINATION_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(map_sqlx)?;

        row.map(Destination::try_from).transpose()
    }

    async fn destinations(&mut self) -> EngineResult<Vec<Destination>> {
        let rows = sqlx::query_as::<_, DestinationRow>(&format!(
            "SELECT {} FROM destinations ORDER BY name",
            DESTINATION_COLUMNS
        ))
        .fetch_all(&mut *self.tx)
        .await
        .map_err(map_sqlx)?;

        convert_all(rows)
    }

    async fn insert_destination(&mut self, destination: &Destination) -> EngineResult<()> {
        sqlx::query(
            r#"
            INSERT INTO destinations (id, name, default_duration_minutes, default_capacity, calendar_id, is_active, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(destination.id)
        .bind(&destination.name)
        .bind(to_i32(destination.default_duration_minutes, "Trip duration")?)
        .bind(to_i32(destination.default_capacity, "Capacity")?)
        .bind(&destination.calendar_id)
        .bind(destination.is_active)
        .bind(destination.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(map_sqlx)?;
        Ok(())
    }

    async fn pricing_tiers(&mut self, destination_id: Uuid) -> EngineResult<Vec<PricingTier>> {
        let rows = sqlx::query_as::<_, TierRow>(
            r#"
            SELECT destination_id, passenger_count, cost_per_passenger
            FROM pricing_tiers
            WHERE destination_id = $1
            ORDER BY passenger_count
            "#,
        )
        .bind(destination_id)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(map_sqlx)?;

        rows.into_iter()
            .map(|row| {
                Ok(PricingTier::new(
                    row.destination_id,
                    to_u32(row.passenger_count, "passenger count")?,
                    row.cost_per_passenger,
                ))
            })
            .collect()
    }

    async fn replace_pricing_tiers(
        &mut self,
        destination_id: Uuid,
        tiers: &[PricingTier],
    ) -> EngineResult<()> {
        sqlx::query("DELETE FROM pricing_tiers WHERE destination_id = $1")
            .bind(destination_id)
            .execute(&mut *self.tx)
            .await
            .map_err(map_sqlx)?;

        for tier in tiers {
            sqlx::query(
                r#"
                INSERT INTO pricing_tiers (destination_id, passenger_count, cost_per_passenger)
                VALUES ($1, $2, $3)
                "#,
            )
            .bind(destination_id)
            .bind(to_i32(tier.passenger_count, "Tier passenger count")?)
            .bind(tier.cost_per_passenger)
            .execute(&mut *self.tx)
            .await
            .map_err(map_sqlx)?;
        }
        Ok(())
    }

    async fn trip(&mut self, id: Uuid) -> EngineResult<Option<Trip>> {
        let row = sqlx::query_as::<_, TripRow>(&format!(
            "SELECT {} FROM trips WHERE id = $1",
            TRIP_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(map_sqlx)?;

        row.map(Trip::try_from).transpose()
    }

    async fn lock_trip(&mut self, id: Uuid) -> EngineResult<Option<Trip>> {
        let row = sqlx::query_as::<_, TripRow>(&format!(
            "SELECT {} FROM trips WHERE id = $1 FOR UPDATE",
            TRIP_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(map_sqlx)?;

        row.map(Trip::try_from).transpose()
    }

    async fn lock_schedule_day(&mut self, day: NaiveDate) -> EngineResult<()> {
        let key = SCHEDULE_LOCK_NAMESPACE + day.num_days_from_ce() as i64;
        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(key)
            .execute(&mut *self.tx)
            .await
            .map_err(map_sqlx)?;
        Ok(())
    }

    async fn active_trips_between(
        &mut self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> EngineResult<Vec<Trip>> {
        let rows = sqlx::query_as::<_, TripRow>(&format!(
            r#"
            SELECT {} FROM trips
            WHERE status <> 'CANCELLED' AND start_time < $2 AND end_time > $1
            ORDER BY start_time
            "#,
            TRIP_COLUMNS
        ))
        .bind(from)
        .bind(to)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(map_sqlx)?;

        convert_all(rows)
    }

    async fn insert_trip(&mut self, trip: &Trip) -> EngineResult<()> {
        sqlx::query(
            r#"
            INSERT INTO trips (id, destination_id, start_time, end_time, capacity, status, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(trip.id)
        .bind(trip.destination_id)
        .bind(trip.start_time)
        .bind(trip.end_time)
        .bind(to_i32(trip.capacity, "Capacity")?)
        .bind(trip.status.to_string())
        .bind(trip.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(map_sqlx)?;
        Ok(())
    }

    async fn update_trip_status(&mut self, id: Uuid, status: TripStatus) -> EngineResult<()> {
        sqlx::query("UPDATE trips SET status = $2 WHERE id = $1")
            .bind(id)
            .bind(status.to_string())
            .execute(&mut *self.tx)
            .await
            .map_err(map_sqlx)?;
        Ok(())
    }

    async fn booking(&mut self, id: Uuid) -> EngineResult<Option<Booking>> {
        let row = sqlx::query_as::<_, BookingRow>(&format!(
            "SELECT {} FROM bookings WHERE id = $1",
            BOOKING_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(map_sqlx)?;

        row.map(Booking::try_from).transpose()
    }

    async fn confirmed_bookings(&mut self, trip_id: Uuid) -> EngineResult<Vec<Booking>> {
        let rows = sqlx::query_as::<_, BookingRow>(&format!(
            "SELECT {} FROM bookings WHERE trip_id = $1 AND status = 'CONFIRMED' ORDER BY created_at",
            BOOKING_COLUMNS
        ))
        .bind(trip_id)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(map_sqlx)?;

        convert_all(rows)
    }

    async fn user_bookings(&mut self, user_id: Uuid) -> EngineResult<Vec<Booking>> {
        let rows = sqlx::query_as::<_, BookingRow>(&format!(
            "SELECT {} FROM bookings WHERE user_id = $1 ORDER BY created_at DESC",
            BOOKING_COLUMNS
        ))
        .bind(user_id)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(map_sqlx)?;

        convert_all(rows)
    }

    async fn insert_booking(&mut self, booking: &Booking) -> EngineResult<()> {
        sqlx::query(
            r#"
            INSERT INTO bookings (id, user_id, trip_id, passenger_count, pickup, dropoff, status, credits_cost_paid, created_at, cancelled_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(booking.id)
        .bind(booking.user_id)
        .bind(booking.trip_id)
        .bind(to_i32(booking.passenger_count, "Passenger count")?)
        .bind(&booking.pickup)
        .bind(&booking.dropoff)
        .bind(booking.status.to_string())
        .bind(booking.credits_cost_paid)
        .bind(booking.created_at)
        .bind(booking.cancelled_at)
        .execute(&mut *self.tx)
        .await
        .map_err(map_sqlx)?;
        Ok(())
    }

    async fn update_booking(&mut self, booking: &Booking) -> EngineResult<()> {
        sqlx::query(
            r#"
            UPDATE bookings
            SET status = $2, credits_cost_paid = $3, cancelled_at = $4
            WHERE id = $1
            "#,
        )
        .bind(booking.id)
        .bind(booking.status.to_string())
        .bind(booking.credits_cost_paid)
        .bind(booking.cancelled_at)
        .execute(&mut *self.tx)
        .await
        .map_err(map_sqlx)?;
        Ok(())
    }

    async fn lock_balance(&mut self, user_id: Uuid) -> EngineResult<i64> {
        sqlx::query(
            "INSERT INTO credit_balances (user_id, credits) VALUES ($1, 0) ON CONFLICT (user_id) DO NOTHING",
        )
        .bind(user_id)
        .execute(&mut *self.tx)
        .await
        .map_err(map_sqlx)?;

        sqlx::query_scalar::<_, i64>(
            "SELECT credits FROM credit_balances WHERE user_id = $1 FOR UPDATE",
        )
        .bind(user_id)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(map_sqlx)
    }

    async fn store_balance(&mut self, user_id: Uuid, credits: i64) -> EngineResult<()> {
        sqlx::query("UPDATE credit_balances SET credits = $2, updated_at = NOW() WHERE user_id = $1")
            .bind(user_id)
            .bind(credits)
            .execute(&mut *self.tx)
            .await
            .map_err(map_sqlx)?;
        Ok(())
    }

    async fn balance(&mut self, user_id: Uuid) -> EngineResult<Option<i64>> {
        sqlx::query_scalar::<_, i64>("SELECT credits FROM credit_balances WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(map_sqlx)
    }

    async fn append_transaction(&mut self, transaction: &CreditTransaction) -> EngineResult<()> {
        sqlx::query(
            r#"
            INSERT INTO credit_transactions (id, user_id, amount, transaction_type, description, booking_id, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(transaction.id)
        .bind(transaction.user_id)
        .bind(transaction.amount)
        .bind(transaction.transaction_type.to_string())
        .bind(&transaction.description)
        .bind(transaction.booking_id)
        .bind(transaction.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(map_sqlx)?;
        Ok(())
    }

    async fn transactions(
        &mut self,
        user_id: Uuid,
        page: PageRequest,
    ) -> EngineResult<Page<CreditTransaction>> {
        let total = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM credit_transactions WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(map_sqlx)?;

        let rows = sqlx::query_as::<_, TransactionRow>(&format!(
            r#"
            SELECT {} FROM credit_transactions
            WHERE user_id = $1
            ORDER BY created_at DESC, id DESC
            LIMIT $2 OFFSET $3
            "#,
            TRANSACTION_COLUMNS
        ))
        .bind(user_id)
        .bind(page.per_page as i64)
        .bind(page.offset() as i64)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(map_sqlx)?;

        Ok(Page {
            items: convert_all(rows)?,
            page: page.page,
            per_page: page.per_page,
            total: total.max(0) as u64,
        })
    }

    async fn transaction_sum(&mut self, user_id: Uuid) -> EngineResult<i64> {
        sqlx::query_scalar::<_, i64>(
            "SELECT COALESCE(SUM(amount), 0)::BIGINT FROM credit_transactions WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(map_sqlx)
    }

    async fn commit(self: Box<Self>) -> EngineResult<()> {
        let PgUnitOfWork { tx } = *self;
        tx.commit().await.map_err(map_sqlx)
    }

    async fn rollback(self: Box<Self>) -> EngineResult<()> {
        let PgUnitOfWork { tx } = *self;
        tx.rollback().await.map_err(map_sqlx)
    }
}
