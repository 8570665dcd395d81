use thiserror::Error;
use tokio::sync::broadcast;
use tracing::trace;

use parley_types::events::ChannelEvent;

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("failed to encode event: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("publish backend failed: {0}")]
    Backend(String),
}

/// Fire-and-forget notification of channel events to live connections.
pub trait EventPublisher: Send + Sync {
    fn publish(&self, topic: &str, event: &ChannelEvent) -> Result<(), PublishError>;
}

/// An encoded event on its topic.
#[derive(Debug, Clone)]
pub struct Published {
    pub topic: String,
    pub payload: String,
}

/// Fans every event out to all subscribers over a tokio broadcast channel.
/// Subscribers filter by topic. Slow subscribers lag and lose old events.
#[derive(Clone)]
pub struct BroadcastPublisher {
    tx: broadcast::Sender<Published>,
}

impl BroadcastPublisher {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Published> {
        self.tx.subscribe()
    }
}

impl EventPublisher for BroadcastPublisher {
    fn publish(&self, topic: &str, event: &ChannelEvent) -> Result<(), PublishError> {
        let payload = serde_json::to_string(event)?;
        let published = Published {
            topic: topic.to_string(),
            payload,
        };
        // No live subscribers is not a failure
        if self.tx.send(published).is_err() {
            trace!("No subscribers for {}", topic);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use parley_types::events::channel_topic;
    use parley_types::models::Message;

    fn event() -> ChannelEvent {
        let now = Utc::now();
        ChannelEvent::message_created(Message {
            id: "m1".into(),
            channel_id: "C1".into(),
            user_id: "U1".into(),
            content: "hi".into(),
            message_type: "text".into(),
            created_at: now,
            updated_at: now,
            idempotency_key: None,
        })
    }

    #[tokio::test]
    async fn subscribers_receive_topic_and_json() {
        let publisher = BroadcastPublisher::new(16);
        let mut rx = publisher.subscribe();

        publisher.publish(&channel_topic("C1"), &event()).unwrap();

        let got = rx.recv().await.unwrap();
        assert_eq!(got.topic, "channel:C1:events");
        let json: serde_json::Value = serde_json::from_str(&got.payload).unwrap();
        assert_eq!(json["type"], "message");
        assert_eq!(json["data"]["message"]["id"], "m1");
    }

    #[test]
    fn publishing_without_subscribers_succeeds() {
        let publisher = BroadcastPublisher::new(16);
        assert!(publisher.publish("channel:C1:events", &event()).is_ok());
    }
}
