use async_trait::async_trait;
use shuttle_shared::NotificationEvent;

/// Notification collaborator. Called after commit; failures are logged by
/// the caller and never affect the booking that produced the event.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(
        &self,
        event: &NotificationEvent,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

/// Writes events to the trace log. Default when no broker is configured.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(
        &self,
        event: &NotificationEvent,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let payload = serde_json::to_string(event)?;
        tracing::info!(kind = event.kind(), trip_id = %event.trip_id(), "notification: {}", payload);
        Ok(())
    }
}
