use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Message type assigned when a create request leaves it blank.
pub const DEFAULT_MESSAGE_TYPE: &str = "text";

/// A stored channel message. Immutable once created.
///
/// Ids are opaque strings generated by the store; timestamps are assigned by
/// the store at nanosecond precision and are never taken from the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub channel_id: String,
    pub user_id: String,
    pub content: String,
    pub message_type: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Never sent over the wire.
    #[serde(skip)]
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub id: String,
    pub name: String,
    /// "public", "private" or "dm"
    #[serde(rename = "type")]
    pub channel_type: String,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelMember {
    pub channel_id: String,
    pub user_id: String,
    pub role: String,
    pub joined_at: DateTime<Utc>,
}
