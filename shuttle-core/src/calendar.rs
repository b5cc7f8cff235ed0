use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A time window the external calendar reports as busy. Read-only.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExternalBusyWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl ExternalBusyWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }
}

/// Best-effort feed of busy windows for a calendar.
#[async_trait]
pub trait BusyCalendar: Send + Sync {
    async fn busy_windows(
        &self,
        calendar_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<ExternalBusyWindow>, Box<dyn std::error::Error + Send + Sync>>;
}

/// Used when no calendar is configured: nothing is ever busy.
pub struct NoCalendar;

#[async_trait]
impl BusyCalendar for NoCalendar {
    async fn busy_windows(
        &self,
        _calendar_id: &str,
        _from: DateTime<Utc>,
        _to: DateTime<Utc>,
    ) -> Result<Vec<ExternalBusyWindow>, Box<dyn std::error::Error + Send + Sync>> {
        Ok(Vec::new())
    }
}
