use serde::Serialize;
use shuttle_catalog::ResolvedRate;
use shuttle_core::Booking;
use uuid::Uuid;

/// One settlement owed by an existing booking after the trip's rate moved.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Adjustment {
    pub booking_id: Uuid,
    pub user_id: Uuid,
    pub previous_cost: i64,
    pub new_cost: i64,
}

impl Adjustment {
    /// Positive: the user owes more. Negative: the user is refunded.
    pub fn delta(&self) -> i64 {
        self.new_cost - self.previous_cost
    }
}

/// Work out which confirmed bookings must be settled to `rate`.
///
/// Bookings already paying exactly `passenger_count x rate` are left out.
pub fn plan(bookings: &[Booking], rate: &ResolvedRate) -> Vec<Adjustment> {
    bookings
        .iter()
        .filter(|b| b.is_confirmed())
        .filter_map(|b| {
            let new_cost = b.cost_at(rate.per_passenger);
            (new_cost != b.credits_cost_paid).then(|| Adjustment {
                booking_id: b.id,
                user_id: b.user_id,
                previous_cost: b.credits_cost_paid,
                new_cost,
            })
        })
        .collect()
}
