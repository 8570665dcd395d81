//! History reads: plain/cursor pagination and the two catch-up filters.
//!
//! Plain pages run newest first so a client scrolls backwards through
//! history. `since` filters run oldest first so a reconnecting client can
//! replay what it missed in order. Every query over-fetches one row to detect
//! `has_more` without a count.
//!
//! Ordering is by `created_at` alone. Rows written by this store get strictly
//! increasing creation times per channel, so ties do not occur; rows inserted
//! by other writers with equal timestamps have no defined relative order.

use chrono::{DateTime, Utc};
use rusqlite::Connection;

use parley_types::ChatError;
use parley_types::api::{HistoryRequest, MessagePage};

use crate::ShardRouter;
use crate::cursor::Cursor;
use crate::models::{MESSAGE_COLUMNS, MessageRow, to_nanos};
use crate::pool::db_err;
use crate::queries::{count_channel_messages, query_message};

pub const DEFAULT_PAGE_SIZE: i64 = 50;
pub const MAX_PAGE_SIZE: i64 = 100;

/// Limits outside `1..=100` fall back to the default instead of failing.
pub fn clamp_limit(limit: i64) -> i64 {
    if (1..=MAX_PAGE_SIZE).contains(&limit) {
        limit
    } else {
        DEFAULT_PAGE_SIZE
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HistoryFilter {
    /// Newest first, optionally continuing from a cursor.
    Latest { before: Option<Cursor> },
    /// Oldest first, strictly after the timestamp.
    Since(DateTime<Utc>),
    /// Oldest first, strictly after the referenced message's creation time.
    SinceMessage(String),
}

impl HistoryFilter {
    /// Reject requests that set more than one of cursor, since and since_id.
    /// Pure check; touches no store.
    pub fn check_combination(req: &HistoryRequest) -> Result<(), ChatError> {
        let set = [
            non_empty(req.cursor.as_deref()).is_some(),
            req.since.is_some(),
            non_empty(req.since_id.as_deref()).is_some(),
        ]
        .iter()
        .filter(|set| **set)
        .count();

        if set > 1 {
            return Err(ChatError::invalid(
                "cursor, since and since_id are mutually exclusive",
            ));
        }
        Ok(())
    }

    /// Build the filter, decoding the cursor if one is present.
    pub fn from_request(req: &HistoryRequest) -> Result<Self, ChatError> {
        Self::check_combination(req)?;

        if let Some(since) = req.since {
            return Ok(Self::Since(since));
        }
        if let Some(since_id) = non_empty(req.since_id.as_deref()) {
            return Ok(Self::SinceMessage(since_id.to_string()));
        }
        let before = non_empty(req.cursor.as_deref())
            .map(Cursor::decode)
            .transpose()?;
        Ok(Self::Latest { before })
    }

    /// Cursors are only issued for plain pagination.
    pub fn issues_cursor(&self) -> bool {
        matches!(self, Self::Latest { .. })
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}

enum Bound {
    Newest,
    Before(i64),
    After(i64),
}

impl ShardRouter {
    /// One page of a channel's history.
    ///
    /// `SinceMessage` is resolved on the channel's shard; a reference that is
    /// absent there (including one from another channel) is `NotFound`.
    /// `total` counts every message in the channel regardless of filter.
    pub async fn list_messages(
        &self,
        channel_id: &str,
        filter: HistoryFilter,
        limit: i64,
    ) -> Result<MessagePage, ChatError> {
        if channel_id.is_empty() {
            return Err(ChatError::invalid("channel_id is required"));
        }
        let limit = clamp_limit(limit);
        let channel = channel_id.to_string();
        self.shard_for_channel(channel_id)
            .run(move |conn| build_page(conn, &channel, &filter, limit))
            .await
    }

    pub async fn messages_since(
        &self,
        channel_id: &str,
        since: DateTime<Utc>,
        limit: i64,
    ) -> Result<MessagePage, ChatError> {
        self.list_messages(channel_id, HistoryFilter::Since(since), limit)
            .await
    }

    pub async fn messages_since_id(
        &self,
        channel_id: &str,
        since_id: &str,
        limit: i64,
    ) -> Result<MessagePage, ChatError> {
        self.list_messages(channel_id, HistoryFilter::SinceMessage(since_id.to_string()), limit)
            .await
    }

    /// Plain pagination from a wire cursor; an empty cursor starts at the
    /// newest message.
    pub async fn messages_with_cursor(
        &self,
        channel_id: &str,
        cursor: &str,
        limit: i64,
    ) -> Result<MessagePage, ChatError> {
        let before = non_empty(Some(cursor)).map(Cursor::decode).transpose()?;
        self.list_messages(channel_id, HistoryFilter::Latest { before }, limit)
            .await
    }
}

fn build_page(
    conn: &Connection,
    channel_id: &str,
    filter: &HistoryFilter,
    limit: i64,
) -> Result<MessagePage, ChatError> {
    let bound = match filter {
        HistoryFilter::Latest { before: None } => Bound::Newest,
        HistoryFilter::Latest { before: Some(cursor) } => Bound::Before(cursor.nanos()),
        HistoryFilter::Since(since) => Bound::After(since_nanos(since)),
        HistoryFilter::SinceMessage(since_id) => {
            let reference = query_message(conn, since_id, channel_id)
                .map_err(db_err)?
                .ok_or_else(|| ChatError::not_found(format!("since message {}", since_id)))?;
            Bound::After(reference.created_at)
        }
    };

    let mut rows = query_rows(conn, channel_id, &bound, limit + 1).map_err(db_err)?;
    let has_more = rows.len() as i64 > limit;
    if has_more {
        rows.truncate(limit as usize);
    }

    let next_cursor = match rows.last() {
        Some(last) if has_more && filter.issues_cursor() => {
            Some(Cursor::from_nanos(last.created_at).encode())
        }
        _ => None,
    };

    let total = count_channel_messages(conn, channel_id).map_err(db_err)?;

    Ok(MessagePage {
        messages: rows.into_iter().map(MessageRow::into_message).collect(),
        next_cursor,
        has_more,
        total,
    })
}

/// Times outside the nanosecond range clamp to its ends: anything earlier
/// matches every row, anything later matches none.
fn since_nanos(since: &DateTime<Utc>) -> i64 {
    to_nanos(since).unwrap_or(if since.timestamp() < 0 { i64::MIN } else { i64::MAX })
}

fn query_rows(
    conn: &Connection,
    channel_id: &str,
    bound: &Bound,
    fetch: i64,
) -> rusqlite::Result<Vec<MessageRow>> {
    let (condition, order, ts) = match bound {
        Bound::Newest => ("", "DESC", None),
        Bound::Before(ts) => ("AND created_at < ?3", "DESC", Some(*ts)),
        Bound::After(ts) => ("AND created_at > ?3", "ASC", Some(*ts)),
    };

    let sql = format!(
        "SELECT {MESSAGE_COLUMNS} FROM messages
         WHERE channel_id = ?1 {condition}
         ORDER BY created_at {order}
         LIMIT ?2"
    );
    let mut stmt = conn.prepare_cached(&sql)?;

    let rows = match ts {
        Some(ts) => stmt.query_map(rusqlite::params![channel_id, fetch, ts], MessageRow::from_row)?,
        None => stmt.query_map(rusqlite::params![channel_id, fetch], MessageRow::from_row)?,
    };
    rows.collect()
}
