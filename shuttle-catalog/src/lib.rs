pub mod capacity;
pub mod pricing;
pub mod schedule;

pub use capacity::CapacityTracker;
pub use pricing::{PricingConfig, RateSource, ResolvedRate, TierReport, TierResolver};
pub use schedule::{is_blocked, is_reservable, Slot, SlotAvailability, SlotCalendar};
