use rusqlite::{Connection, OptionalExtension, params};
use tracing::{debug, info};
use uuid::Uuid;

use parley_types::ChatError;
use parley_types::models::{Channel, ChannelMember, Message};

use crate::ShardRouter;
use crate::models::{
    CHANNEL_COLUMNS, ChannelRow, MESSAGE_COLUMNS, MessageRow, NewMessage, now_nanos, to_nanos,
};
use crate::pool::{db_err, is_unique_violation};

impl ShardRouter {
    // -- Messages --

    /// Store a message at most once per idempotency key.
    ///
    /// A repeated key returns the stored row unchanged. Two concurrent
    /// creates with the same key both return the row that won the insert:
    /// the loser hits the UNIQUE constraint and re-reads.
    pub async fn create_message(&self, new: NewMessage) -> Result<Message, ChatError> {
        if new.channel_id.is_empty() {
            return Err(ChatError::invalid("channel_id is required"));
        }
        if new.user_id.is_empty() {
            return Err(ChatError::invalid("user_id is required"));
        }
        if new.content.is_empty() {
            return Err(ChatError::invalid("content is required"));
        }

        let new = new.normalized();
        let shard = self.shard_for_channel(&new.channel_id);
        let row = shard
            .run(move |conn| create_idempotent(conn, &new))
            .await?;
        Ok(row.into_message())
    }

    /// Point read by (id, channel). Only the channel's shard is consulted.
    pub async fn get_message(&self, message_id: &str, channel_id: &str) -> Result<Message, ChatError> {
        let shard = self.shard_for_channel(channel_id);
        let (mid, cid) = (message_id.to_string(), channel_id.to_string());
        shard
            .run(move |conn| {
                query_message(conn, &mid, &cid)
                    .map_err(db_err)?
                    .map(MessageRow::into_message)
                    .ok_or_else(|| ChatError::not_found(format!("message {}", mid)))
            })
            .await
    }

    pub async fn count_messages(&self, channel_id: &str) -> Result<i64, ChatError> {
        let cid = channel_id.to_string();
        self.shard_for_channel(channel_id)
            .run(move |conn| count_channel_messages(conn, &cid).map_err(db_err))
            .await
    }

    // -- Channels --

    pub async fn get_channel(&self, channel_id: &str) -> Result<Channel, ChatError> {
        let cid = channel_id.to_string();
        self.shard_for_channel(channel_id)
            .run(move |conn| {
                query_channel(conn, &cid)
                    .map_err(db_err)?
                    .map(ChannelRow::into_channel)
                    .ok_or_else(|| ChatError::not_found(format!("channel {}", cid)))
            })
            .await
    }

    pub async fn is_channel_member(&self, channel_id: &str, user_id: &str) -> Result<bool, ChatError> {
        let (cid, uid) = (channel_id.to_string(), user_id.to_string());
        self.shard_for_channel(channel_id)
            .run(move |conn| query_is_member(conn, &cid, &uid).map_err(db_err))
            .await
    }

    /// Bootstrap helper: write a channel onto its shard. The message path
    /// never calls this.
    pub async fn seed_channel(&self, channel: Channel) -> Result<(), ChatError> {
        let created_at = to_nanos(&channel.created_at)
            .ok_or_else(|| ChatError::invalid("channel created_at out of range"))?;
        let updated_at = to_nanos(&channel.updated_at)
            .ok_or_else(|| ChatError::invalid("channel updated_at out of range"))?;
        let shard = self.shard_for_channel(&channel.id);
        shard
            .run(move |conn| {
                conn.execute(
                    "INSERT OR REPLACE INTO channels (id, name, type, created_by, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![
                        channel.id,
                        channel.name,
                        channel.channel_type,
                        channel.created_by,
                        created_at,
                        updated_at
                    ],
                )
                .map_err(db_err)?;
                info!("Seeded channel {}", channel.id);
                Ok(())
            })
            .await
    }

    /// Bootstrap helper: add a member row on the channel's shard.
    pub async fn seed_member(&self, member: ChannelMember) -> Result<(), ChatError> {
        let joined_at = to_nanos(&member.joined_at)
            .ok_or_else(|| ChatError::invalid("member joined_at out of range"))?;
        let shard = self.shard_for_channel(&member.channel_id);
        shard
            .run(move |conn| {
                conn.execute(
                    "INSERT OR REPLACE INTO channel_members (channel_id, user_id, role, joined_at)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![member.channel_id, member.user_id, member.role, joined_at],
                )
                .map_err(db_err)?;
                Ok(())
            })
            .await
    }
}

fn create_idempotent(conn: &Connection, new: &NewMessage) -> Result<MessageRow, ChatError> {
    if let Some(key) = new.idempotency_key.as_deref() {
        if let Some(existing) = query_by_idempotency_key(conn, key).map_err(db_err)? {
            debug!("Idempotency key hit, returning message {}", existing.id);
            return owned_by_channel(existing, &new.channel_id);
        }
    }

    let id = Uuid::new_v4().to_string();
    match insert_message(conn, &id, new, now_nanos()) {
        Ok(row) => Ok(row),
        Err(err) => match new.idempotency_key.as_deref() {
            Some(key) if is_unique_violation(&err) => {
                debug!("Lost idempotency race on key {}, re-reading winner", key);
                let winner = query_by_idempotency_key(conn, key)
                    .map_err(db_err)?
                    .ok_or_else(|| {
                        ChatError::transient("idempotency key conflict but no stored row")
                    })?;
                owned_by_channel(winner, &new.channel_id)
            }
            _ => Err(db_err(err)),
        },
    }
}

/// A key only deduplicates within the channel that first used it; a stored
/// row from another channel is never handed back.
fn owned_by_channel(existing: MessageRow, channel_id: &str) -> Result<MessageRow, ChatError> {
    if existing.channel_id != channel_id {
        return Err(ChatError::invalid(
            "idempotency key already used in another channel",
        ));
    }
    Ok(existing)
}

/// Insert and return the stored row.
///
/// `created_at` is the later of `now` and one nanosecond past the channel's
/// newest message, computed inside the statement, so creation times within a
/// channel are strictly increasing.
fn insert_message(
    conn: &Connection,
    id: &str,
    new: &NewMessage,
    now: i64,
) -> rusqlite::Result<MessageRow> {
    let sql = format!(
        "INSERT INTO messages ({MESSAGE_COLUMNS})
         SELECT ?1, ?2, ?3, ?4, ?5, ts, ts, ?6
         FROM (SELECT MAX(?7, COALESCE(MAX(created_at) + 1, ?7)) AS ts
               FROM messages WHERE channel_id = ?2)
         RETURNING {MESSAGE_COLUMNS}"
    );
    conn.query_row(
        &sql,
        params![
            id,
            new.channel_id,
            new.user_id,
            new.content,
            new.message_type(),
            new.idempotency_key,
            now
        ],
        MessageRow::from_row,
    )
}

fn query_by_idempotency_key(conn: &Connection, key: &str) -> rusqlite::Result<Option<MessageRow>> {
    let sql = format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE idempotency_key = ?1");
    conn.prepare_cached(&sql)?
        .query_row([key], MessageRow::from_row)
        .optional()
}

pub(crate) fn query_message(
    conn: &Connection,
    message_id: &str,
    channel_id: &str,
) -> rusqlite::Result<Option<MessageRow>> {
    let sql = format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1 AND channel_id = ?2");
    conn.prepare_cached(&sql)?
        .query_row([message_id, channel_id], MessageRow::from_row)
        .optional()
}

pub(crate) fn count_channel_messages(conn: &Connection, channel_id: &str) -> rusqlite::Result<i64> {
    conn.prepare_cached("SELECT COUNT(*) FROM messages WHERE channel_id = ?1")?
        .query_row([channel_id], |row| row.get(0))
}

fn query_channel(conn: &Connection, channel_id: &str) -> rusqlite::Result<Option<ChannelRow>> {
    let sql = format!("SELECT {CHANNEL_COLUMNS} FROM channels WHERE id = ?1");
    conn.prepare_cached(&sql)?
        .query_row([channel_id], ChannelRow::from_row)
        .optional()
}

fn query_is_member(conn: &Connection, channel_id: &str, user_id: &str) -> rusqlite::Result<bool> {
    conn.prepare_cached(
        "SELECT EXISTS(SELECT 1 FROM channel_members WHERE channel_id = ?1 AND user_id = ?2)",
    )?
    .query_row([channel_id, user_id], |row| row.get(0))
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;

    use chrono::Utc;
    use tempfile::TempDir;

    use super::*;
    use crate::test_support::open_router;

    fn new_message(channel: &str, content: &str, key: Option<&str>) -> NewMessage {
        NewMessage {
            channel_id: channel.into(),
            user_id: "U1".into(),
            content: content.into(),
            message_type: None,
            idempotency_key: key.map(Into::into),
        }
    }

    #[tokio::test]
    async fn create_assigns_id_and_defaults() {
        let dir = TempDir::new().unwrap();
        let router = open_router(&dir, 3);

        let msg = router.create_message(new_message("C1", "hi", None)).await.unwrap();
        assert!(!msg.id.is_empty());
        assert_eq!(msg.channel_id, "C1");
        assert_eq!(msg.message_type, "text");
        assert_eq!(msg.created_at, msg.updated_at);
        assert!(msg.idempotency_key.is_none());
    }

    #[tokio::test]
    async fn repeated_key_returns_same_message() {
        let dir = TempDir::new().unwrap();
        let router = open_router(&dir, 3);

        let first = router.create_message(new_message("C1", "hi", Some("k1"))).await.unwrap();
        let second = router.create_message(new_message("C1", "hi", Some("k1"))).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(router.count_messages("C1").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn key_from_another_channel_is_rejected() {
        let dir = TempDir::new().unwrap();
        let router = open_router(&dir, 1);

        let private = router
            .create_message(new_message("private", "secret", Some("k1")))
            .await
            .unwrap();
        let err = router
            .create_message(new_message("public", "hello", Some("k1")))
            .await
            .unwrap_err();

        assert_eq!(
            err,
            ChatError::invalid("idempotency key already used in another channel")
        );
        assert_eq!(router.count_messages("public").await.unwrap(), 0);
        assert_eq!(router.get_message(&private.id, "private").await.unwrap(), private);
    }

    #[test]
    fn lost_race_to_another_channel_is_rejected() {
        let dir = TempDir::new().unwrap();
        let conn = Connection::open(dir.path().join("shard.db")).unwrap();
        crate::migrations::run(&conn).unwrap();

        let winner = create_idempotent(&conn, &new_message("private", "secret", Some("k1"))).unwrap();
        // Skip the fast path by inserting directly, as a racing writer would
        let loser = new_message("public", "hello", Some("k1"));
        let err = insert_message(&conn, "m-loser", &loser, now_nanos()).unwrap_err();
        assert!(is_unique_violation(&err));

        let reread = query_by_idempotency_key(&conn, "k1").unwrap().unwrap();
        assert_eq!(reread.id, winner.id);
        assert!(matches!(
            owned_by_channel(reread, "public").unwrap_err(),
            ChatError::InvalidArgument(_)
        ));
    }

    #[tokio::test]
    async fn messages_without_key_are_never_deduplicated() {
        let dir = TempDir::new().unwrap();
        let router = open_router(&dir, 1);

        let a = router.create_message(new_message("C1", "hi", None)).await.unwrap();
        let b = router.create_message(new_message("C1", "hi", None)).await.unwrap();
        assert_ne!(a.id, b.id);
        assert_eq!(router.count_messages("C1").await.unwrap(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_creates_with_one_key_store_one_row() {
        let dir = TempDir::new().unwrap();
        let router = Arc::new(open_router(&dir, 2));

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let router = router.clone();
                tokio::spawn(async move {
                    router
                        .create_message(new_message("C-race", "same", Some("race-key")))
                        .await
                })
            })
            .collect();

        let mut ids = HashSet::new();
        for task in tasks {
            ids.insert(task.await.unwrap().unwrap().id);
        }
        assert_eq!(ids.len(), 1);
        assert_eq!(router.count_messages("C-race").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn create_rejects_blank_fields() {
        let dir = TempDir::new().unwrap();
        let router = open_router(&dir, 1);

        for bad in [
            new_message("", "hi", None),
            new_message("C1", "", None),
            NewMessage {
                user_id: String::new(),
                ..new_message("C1", "hi", None)
            },
        ] {
            let err = router.create_message(bad).await.unwrap_err();
            assert!(matches!(err, ChatError::InvalidArgument(_)));
        }
    }

    #[tokio::test]
    async fn creation_times_strictly_increase_within_channel() {
        let dir = TempDir::new().unwrap();
        let router = open_router(&dir, 1);

        let mut last = None;
        for i in 0..50 {
            let msg = router
                .create_message(new_message("C1", &format!("m{}", i), None))
                .await
                .unwrap();
            if let Some(prev) = last {
                assert!(msg.created_at > prev);
            }
            last = Some(msg.created_at);
        }
    }

    #[tokio::test]
    async fn get_message_requires_matching_channel() {
        let dir = TempDir::new().unwrap();
        let router = open_router(&dir, 1);

        let msg = router.create_message(new_message("C1", "hi", None)).await.unwrap();
        assert_eq!(router.get_message(&msg.id, "C1").await.unwrap(), msg);

        let err = router.get_message(&msg.id, "C2").await.unwrap_err();
        assert!(matches!(err, ChatError::NotFound(_)));
        let err = router.get_message("missing", "C1").await.unwrap_err();
        assert!(matches!(err, ChatError::NotFound(_)));
    }

    #[tokio::test]
    async fn channel_and_membership_reads() {
        let dir = TempDir::new().unwrap();
        let router = open_router(&dir, 3);
        let now = Utc::now();

        router
            .seed_channel(Channel {
                id: "C1".into(),
                name: "general".into(),
                channel_type: "public".into(),
                created_by: "U1".into(),
                created_at: now,
                updated_at: now,
            })
            .await
            .unwrap();
        router
            .seed_member(ChannelMember {
                channel_id: "C1".into(),
                user_id: "U1".into(),
                role: "owner".into(),
                joined_at: now,
            })
            .await
            .unwrap();

        assert_eq!(router.get_channel("C1").await.unwrap().name, "general");
        assert!(matches!(
            router.get_channel("C404").await.unwrap_err(),
            ChatError::NotFound(_)
        ));
        assert!(router.is_channel_member("C1", "U1").await.unwrap());
        assert!(!router.is_channel_member("C1", "U2").await.unwrap());
    }
}
