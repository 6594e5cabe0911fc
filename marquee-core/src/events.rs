use async_trait::async_trait;
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
#[error("Event publish failed: {0}")]
pub struct PublishError(pub String);

/// Outbound notifications for downstream collaborators (mailer, reporting).
/// Delivery is best-effort: a failed publish never undoes a booking transition.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, topic: &str, key: &str, payload: &str) -> Result<(), PublishError>;
}

/// Serialize and publish, logging instead of failing
pub async fn publish_json<T: Serialize + Sync>(
    publisher: &dyn EventPublisher,
    topic: &str,
    key: &str,
    event: &T,
) {
    let payload = match serde_json::to_string(event) {
        Ok(p) => p,
        Err(e) => {
            tracing::error!("Failed to serialize event for {}: {}", topic, e);
            return;
        }
    };

    if let Err(e) = publisher.publish(topic, key, &payload).await {
        tracing::warn!("Dropping event {}/{}: {}", topic, key, e);
    }
}

/// Publisher for deployments without a broker
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopPublisher;

#[async_trait]
impl EventPublisher for NoopPublisher {
    async fn publish(&self, topic: &str, key: &str, _payload: &str) -> Result<(), PublishError> {
        tracing::debug!("Event {}/{} not published (no broker configured)", topic, key);
        Ok(())
    }
}
