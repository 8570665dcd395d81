//! Row types, mapped straight from SQLite and converted into the shared
//! `parley-types` models at the crate boundary.

use chrono::{DateTime, Utc};
use rusqlite::Row;

use parley_types::models::{Channel, DEFAULT_MESSAGE_TYPE, Message};

pub const MESSAGE_COLUMNS: &str =
    "id, channel_id, user_id, content, message_type, created_at, updated_at, idempotency_key";

pub const CHANNEL_COLUMNS: &str = "id, name, type, created_by, created_at, updated_at";

#[derive(Debug, Clone)]
pub struct MessageRow {
    pub id: String,
    pub channel_id: String,
    pub user_id: String,
    pub content: String,
    pub message_type: String,
    pub created_at: i64,
    pub updated_at: i64,
    pub idempotency_key: Option<String>,
}

impl MessageRow {
    /// Expects the columns in `MESSAGE_COLUMNS` order.
    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            channel_id: row.get(1)?,
            user_id: row.get(2)?,
            content: row.get(3)?,
            message_type: row.get(4)?,
            created_at: row.get(5)?,
            updated_at: row.get(6)?,
            idempotency_key: row.get(7)?,
        })
    }

    pub fn into_message(self) -> Message {
        Message {
            id: self.id,
            channel_id: self.channel_id,
            user_id: self.user_id,
            content: self.content,
            message_type: self.message_type,
            created_at: from_nanos(self.created_at),
            updated_at: from_nanos(self.updated_at),
            idempotency_key: self.idempotency_key,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChannelRow {
    pub id: String,
    pub name: String,
    pub channel_type: String,
    pub created_by: String,
    pub created_at: i64,
    pub updated_at: i64,
}

impl ChannelRow {
    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            channel_type: row.get(2)?,
            created_by: row.get(3)?,
            created_at: row.get(4)?,
            updated_at: row.get(5)?,
        })
    }

    pub fn into_channel(self) -> Channel {
        Channel {
            id: self.id,
            name: self.name,
            channel_type: self.channel_type,
            created_by: self.created_by,
            created_at: from_nanos(self.created_at),
            updated_at: from_nanos(self.updated_at),
        }
    }
}

/// Insert payload for a message. Ids and timestamps are assigned by the store.
#[derive(Debug, Clone, Default)]
pub struct NewMessage {
    pub channel_id: String,
    pub user_id: String,
    pub content: String,
    pub message_type: Option<String>,
    pub idempotency_key: Option<String>,
}

impl NewMessage {
    /// Blank message types become "text" and blank keys count as absent.
    pub fn normalized(mut self) -> Self {
        if self.message_type.as_deref().is_none_or(str::is_empty) {
            self.message_type = Some(DEFAULT_MESSAGE_TYPE.to_string());
        }
        self.idempotency_key = self.idempotency_key.filter(|k| !k.is_empty());
        self
    }

    pub fn message_type(&self) -> &str {
        self.message_type.as_deref().unwrap_or(DEFAULT_MESSAGE_TYPE)
    }
}

impl From<parley_types::api::SendMessageRequest> for NewMessage {
    fn from(req: parley_types::api::SendMessageRequest) -> Self {
        Self {
            channel_id: req.channel_id,
            user_id: req.user_id,
            content: req.content,
            message_type: req.message_type,
            idempotency_key: Some(req.idempotency_key),
        }
    }
}

pub fn from_nanos(nanos: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_nanos(nanos)
}

/// `None` outside the representable range (roughly 1677..2262).
pub fn to_nanos(time: &DateTime<Utc>) -> Option<i64> {
    time.timestamp_nanos_opt()
}

pub fn now_nanos() -> i64 {
    Utc::now().timestamp_nanos_opt().unwrap_or(i64::MAX)
}
