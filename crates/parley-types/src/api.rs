use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::Message;

// -- Messages --

/// Create request. `channel_id` is normally filled from the URL path.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SendMessageRequest {
    #[serde(default)]
    pub channel_id: String,
    pub user_id: String,
    pub content: String,
    pub idempotency_key: String,
    /// Defaults to "text" when absent or empty.
    #[serde(default)]
    pub message_type: Option<String>,
}

/// History read request. At most one of `cursor`, `since` and `since_id`
/// may be set.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct HistoryRequest {
    #[serde(default)]
    pub channel_id: String,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub cursor: Option<String>,
    /// Out-of-range values fall back to the default page size.
    #[serde(default)]
    pub limit: i64,
    #[serde(default)]
    pub since: Option<DateTime<Utc>>,
    #[serde(default)]
    pub since_id: Option<String>,
}

/// One page of history.
///
/// `total` is the unfiltered number of messages in the channel. It does not
/// follow the filter or limit that produced `messages`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessagePage {
    pub messages: Vec<Message>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
    pub has_more: bool,
    pub total: i64,
}

// -- Read receipts --

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ReadReceiptRequest {
    #[serde(default)]
    pub channel_id: String,
    pub user_id: String,
    #[serde(default)]
    pub message_id: String,
}

// -- Errors --

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}
