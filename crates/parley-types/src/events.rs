use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::Message;

/// Payload published to live connections after a change in a channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum EventPayload {
    /// A new message was persisted
    #[serde(rename = "message")]
    MessageCreate { message: Message, channel_id: String },
}

/// Envelope sent on a channel's notification topic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelEvent {
    #[serde(flatten)]
    pub payload: EventPayload,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<String>,
}

impl ChannelEvent {
    pub fn message_created(message: Message) -> Self {
        let channel_id = message.channel_id.clone();
        Self {
            payload: EventPayload::MessageCreate {
                message,
                channel_id: channel_id.clone(),
            },
            timestamp: Utc::now(),
            channel_id: Some(channel_id),
        }
    }
}

/// Notification topic for a channel: `channel:{id}:events`.
pub fn channel_topic(channel_id: &str) -> String {
    format!("channel:{}:events", channel_id)
}
