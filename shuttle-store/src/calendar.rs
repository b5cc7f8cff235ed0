use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use shuttle_core::{BusyCalendar, ExternalBusyWindow};
use std::error::Error;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::redis_repo::RedisClient;

#[derive(Debug, Serialize, Deserialize)]
struct BusyWindowDto {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct BusyResponse {
    busy: Vec<BusyWindowDto>,
}

/// Reads busy windows from the calendar service:
/// `GET {base_url}/calendars/{id}/busy?from=..&to=..` → `{"busy": [{"start", "end"}]}`.
pub struct HttpCalendar {
    http_client: Client,
    base_url: String,
}

impl HttpCalendar {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let http_client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl BusyCalendar for HttpCalendar {
    async fn busy_windows(
        &self,
        calendar_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<ExternalBusyWindow>, Box<dyn Error + Send + Sync>> {
        let url = format!("{}/calendars/{}/busy", self.base_url, calendar_id);
        let response = self
            .http_client
            .get(&url)
            .query(&[("from", from.to_rfc3339()), ("to", to.to_rfc3339())])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(format!("Calendar service returned {}", response.status()).into());
        }

        let body: BusyResponse = response.json().await?;
        debug!(calendar_id, windows = body.busy.len(), "Fetched external busy windows");

        Ok(body
            .busy
            .into_iter()
            .map(|w| ExternalBusyWindow::new(w.start, w.end))
            .collect())
    }
}

/// Fronts another calendar with a short-lived Redis cache.
///
/// Cache faults never fail the lookup; they fall through to the inner calendar.
pub struct CachedCalendar {
    inner: Arc<dyn BusyCalendar>,
    redis: RedisClient,
    ttl_seconds: u64,
}

impl CachedCalendar {
    pub fn new(inner: Arc<dyn BusyCalendar>, redis: RedisClient, ttl_seconds: u64) -> Self {
        Self {
            inner,
            redis,
            ttl_seconds,
        }
    }

    fn cache_key(calendar_id: &str, from: DateTime<Utc>, to: DateTime<Utc>) -> String {
        format!("calendar:{}:{}:{}", calendar_id, from.timestamp(), to.timestamp())
    }
}

#[async_trait]
impl BusyCalendar for CachedCalendar {
    async fn busy_windows(
        &self,
        calendar_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<ExternalBusyWindow>, Box<dyn Error + Send + Sync>> {
        let key = Self::cache_key(calendar_id, from, to);

        match self.redis.get_cached(&key).await {
            Ok(Some(cached)) => match serde_json::from_str::<Vec<BusyWindowDto>>(&cached) {
                Ok(windows) => {
                    return Ok(windows
                        .into_iter()
                        .map(|w| ExternalBusyWindow::new(w.start, w.end))
                        .collect())
                }
                Err(e) => warn!(key = %key, error = %e, "Discarding unreadable calendar cache entry"),
            },
            Ok(None) => {}
            Err(e) => warn!(error = %e, "Calendar cache read failed"),
        }

        let windows = self.inner.busy_windows(calendar_id, from, to).await?;

        let dto: Vec<BusyWindowDto> = windows
            .iter()
            .map(|w| BusyWindowDto {
                start: w.start,
                end: w.end,
            })
            .collect();
        match serde_json::to_string(&dto) {
            Ok(payload) => {
                if let Err(e) = self.redis.set_cached(&key, &payload, self.ttl_seconds).await {
                    warn!(error = %e, "Calendar cache write failed");
                }
            }
            Err(e) => warn!(error = %e, "Calendar cache encode failed"),
        }

        Ok(windows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_busy_response_decodes() {
        let body = r#"{"busy":[{"start":"2026-03-02T08:00:00Z","end":"2026-03-02T09:00:00Z"}]}"#;
        let decoded: BusyResponse = serde_json::from_str(body).unwrap();
        assert_eq!(decoded.busy.len(), 1);
        assert_eq!(decoded.busy[0].start.to_rfc3339(), "2026-03-02T08:00:00+00:00");
    }

    #[test]
    fn test_cache_key_is_window_specific() {
        let from = DateTime::from_timestamp(1_000, 0).unwrap();
        let to = DateTime::from_timestamp(2_000, 0).unwrap();
        assert_eq!(CachedCalendar::cache_key("ops", from, to), "calendar:ops:1000:2000");
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let calendar = HttpCalendar::new("http://calendar.local/", Duration::from_secs(1)).unwrap();
        assert_eq!(calendar.base_url, "http://calendar.local");
    }
}
