pub mod cursor;
pub mod migrations;
pub mod models;
pub mod pagination;
pub mod pool;
pub mod queries;
pub mod router;

use std::path::PathBuf;

use anyhow::{Result, bail};
use futures_util::future::join_all;
use tracing::{debug, info};

use parley_types::ChatError;

pub use cursor::Cursor;
pub use models::NewMessage;
pub use pagination::{DEFAULT_PAGE_SIZE, HistoryFilter, MAX_PAGE_SIZE, clamp_limit};
pub use pool::{PoolSettings, ShardPool};
pub use router::{RoutingKey, shard_index};

/// Owns one connection pool per shard and routes keys to them.
///
/// The shard count is fixed at construction. Pools are closed by
/// [`ShardRouter::close`] and, failing that, when the router is dropped.
pub struct ShardRouter {
    shards: Vec<ShardPool>,
}

impl ShardRouter {
    /// Open a pool per shard file, in order. Position in `paths` is the
    /// shard index and must stay stable across restarts.
    pub fn open(paths: &[PathBuf], settings: &PoolSettings) -> Result<Self> {
        if paths.is_empty() {
            bail!("at least one shard is required");
        }

        let shards = paths
            .iter()
            .enumerate()
            .map(|(index, path)| ShardPool::open(index, path, settings.clone()))
            .collect::<Result<Vec<_>>>()?;

        info!("Shard router ready with {} shards", shards.len());
        Ok(Self { shards })
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    pub fn shards(&self) -> &[ShardPool] {
        &self.shards
    }

    pub fn resolve(&self, key: RoutingKey<'_>) -> &ShardPool {
        let index = shard_index(key.as_str(), self.shards.len());
        debug!("{:?} routed to shard {}", key, index);
        &self.shards[index]
    }

    pub fn shard_for_channel(&self, channel_id: &str) -> &ShardPool {
        self.resolve(RoutingKey::Channel(channel_id))
    }

    pub fn shard_for_user(&self, user_id: &str) -> &ShardPool {
        self.resolve(RoutingKey::User(user_id))
    }

    /// Ping every shard concurrently; reports the first failing shard.
    pub async fn ping_all(&self) -> Result<(), ChatError> {
        let results = join_all(self.shards.iter().map(|shard| shard.ping())).await;
        for (index, result) in results.into_iter().enumerate() {
            if let Err(e) = result {
                return Err(ChatError::transient(format!(
                    "shard {} health check failed: {}",
                    index, e
                )));
            }
        }
        Ok(())
    }

    pub fn close(&self) {
        for shard in &self.shards {
            shard.close();
        }
    }
}

impl Drop for ShardRouter {
    fn drop(&mut self) {
        self.close();
    }
}
