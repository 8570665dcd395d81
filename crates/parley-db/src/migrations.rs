use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

/// Create the shard schema. Every shard carries the same tables; a channel's
/// rows only ever exist on the shard it routes to.
///
/// Timestamps are INTEGER unix nanoseconds.
pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS channels (
            id          TEXT PRIMARY KEY,
            name        TEXT NOT NULL,
            type        TEXT NOT NULL DEFAULT 'public',
            created_by  TEXT NOT NULL,
            created_at  INTEGER NOT NULL,
            updated_at  INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS channel_members (
            channel_id  TEXT NOT NULL REFERENCES channels(id) ON DELETE CASCADE,
            user_id     TEXT NOT NULL,
            role        TEXT NOT NULL DEFAULT 'member',
            joined_at   INTEGER NOT NULL,
            PRIMARY KEY (channel_id, user_id)
        );

        CREATE INDEX IF NOT EXISTS idx_channel_members_user
            ON channel_members(user_id);

        -- channel_id carries no foreign key: channel lookup may be served by
        -- a directory outside this shard
        CREATE TABLE IF NOT EXISTS messages (
            id               TEXT PRIMARY KEY,
            channel_id       TEXT NOT NULL,
            user_id          TEXT NOT NULL,
            content          TEXT NOT NULL,
            message_type     TEXT NOT NULL DEFAULT 'text',
            created_at       INTEGER NOT NULL,
            updated_at       INTEGER NOT NULL,
            idempotency_key  TEXT UNIQUE
        );

        CREATE INDEX IF NOT EXISTS idx_messages_channel_created
            ON messages(channel_id, created_at);
        ",
    )?;

    info!("Shard schema ready");
    Ok(())
}
