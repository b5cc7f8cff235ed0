#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc, Weekday};
use shuttle_catalog::SlotCalendar;
use shuttle_core::payment::PurchaseNotice;
use shuttle_core::{
    BusyCalendar, Destination, ExternalBusyWindow, Identity, Notifier, Store, Trip,
};
use shuttle_order::{BookingOrchestrator, BookingPolicy, CreditLedger, EngineMetrics};
use shuttle_shared::NotificationEvent;
use shuttle_store::InMemoryStore;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

/// Monday 2026-03-02, 06:00 in Johannesburg.
pub fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 4, 0, 0).unwrap()
}

/// Monday 2026-03-02, 10:00 in Johannesburg.
pub fn departure() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 8, 0, 0).unwrap()
}

pub const SCENARIO_TIERS: [(u32, i64); 4] = [(1, 120), (2, 90), (3, 80), (4, 70)];

#[derive(Default)]
pub struct RecordingNotifier {
    pub events: Mutex<Vec<NotificationEvent>>,
}

impl RecordingNotifier {
    pub fn snapshot(&self) -> Vec<NotificationEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Delivery runs on a spawned task; poll until `count` events arrived.
    pub async fn wait_for(&self, count: usize) -> Vec<NotificationEvent> {
        for _ in 0..100 {
            let events = self.snapshot();
            if events.len() >= count {
                return events;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.snapshot()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(
        &self,
        event: &NotificationEvent,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}

/// Calendar returning fixed windows, or failing on every call.
pub struct StaticCalendar {
    pub windows: Vec<ExternalBusyWindow>,
    pub fail: bool,
}

#[async_trait]
impl BusyCalendar for StaticCalendar {
    async fn busy_windows(
        &self,
        _calendar_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<ExternalBusyWindow>, Box<dyn std::error::Error + Send + Sync>> {
        if self.fail {
            return Err("calendar service down".into());
        }
        Ok(self
            .windows
            .iter()
            .filter(|w| w.start < to && w.end > from)
            .cloned()
            .collect())
    }
}

pub struct Harness {
    pub store: Arc<InMemoryStore>,
    pub orchestrator: Arc<BookingOrchestrator>,
    pub ledger: CreditLedger,
    pub notifier: Arc<RecordingNotifier>,
    pub metrics: Arc<EngineMetrics>,
    pub admin: Identity,
}

pub fn slot_calendar() -> SlotCalendar {
    SlotCalendar::new(chrono_tz::Africa::Johannesburg, vec![Weekday::Sat, Weekday::Sun])
}

pub fn harness() -> Harness {
    harness_with_calendar(None)
}

pub fn harness_with_calendar(calendar: Option<Arc<dyn BusyCalendar>>) -> Harness {
    let store = Arc::new(InMemoryStore::new());
    let notifier = Arc::new(RecordingNotifier::default());
    let metrics = Arc::new(EngineMetrics::new().unwrap());

    let mut orchestrator = BookingOrchestrator::new(
        store.clone() as Arc<dyn Store>,
        slot_calendar(),
        BookingPolicy::default(),
    )
    .with_notifier(notifier.clone())
    .with_metrics(metrics.clone())
    .with_clock(Arc::new(now));
    if let Some(calendar) = calendar {
        orchestrator = orchestrator
            .with_calendar(calendar)
            .with_default_calendar("ops");
    }

    Harness {
        ledger: CreditLedger::new(store.clone() as Arc<dyn Store>),
        store,
        orchestrator: Arc::new(orchestrator),
        notifier,
        metrics,
        admin: Identity::admin(Uuid::new_v4()),
    }
}

impl Harness {
    pub async fn destination(&self, capacity: u32, tiers: &[(u32, i64)]) -> Destination {
        let destination = Destination::new("Airport", 90, capacity).unwrap();
        let destination = self
            .orchestrator
            .create_destination(&self.admin, destination)
            .await
            .unwrap();
        if !tiers.is_empty() {
            self.orchestrator
                .set_pricing_tiers(&self.admin, destination.id, tiers.iter().copied())
                .await
                .unwrap();
        }
        destination
    }

    pub async fn trip(&self, destination: &Destination) -> Trip {
        self.orchestrator
            .schedule_trip(&self.admin, destination.id, departure(), None)
            .await
            .unwrap()
    }

    pub async fn customer(&self, credits: i64) -> Identity {
        let identity = Identity::customer(Uuid::new_v4());
        if credits > 0 {
            self.ledger
                .record_purchase(&PurchaseNotice {
                    user_id: identity.user_id,
                    credits,
                    reference: format!("seed-{}", identity.user_id),
                })
                .await
                .unwrap();
        }
        identity
    }

    pub async fn balance(&self, identity: &Identity) -> i64 {
        self.ledger.balance(identity.user_id).await.unwrap()
    }

    pub async fn assert_ledger_consistent(&self, identity: &Identity) {
        let audit = self.ledger.audit(identity.user_id).await.unwrap();
        assert!(
            audit.consistent,
            "balance {} != transaction sum {}",
            audit.balance, audit.transaction_sum
        );
    }
}
