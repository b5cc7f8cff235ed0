pub mod ledger;
pub mod metrics;
pub mod orchestrator;
pub mod repricing;
mod unit_of_work;

pub use ledger::{ApplyPolicy, CreditLedger, LedgerAudit, Posting};
pub use metrics::EngineMetrics;
pub use orchestrator::{
    BookingOrchestrator, BookingPolicy, BookingReceipt, CancellationReceipt, Clock,
    DayAvailability, SlotReservation, SlotView, TripCancellation, TripManifest,
};
pub use repricing::Adjustment;
