use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use tracing::{info, warn};

use parley_db::ShardRouter;
use parley_types::ChatError;
use parley_types::models::Channel;

use crate::config::ChannelSeed;

/// Channel existence and membership, as seen by the history service.
/// The core only reads through this; it never changes membership.
#[async_trait]
pub trait ChannelDirectory: Send + Sync {
    /// `NotFound` when the channel does not exist.
    async fn get_channel(&self, channel_id: &str) -> Result<Channel, ChatError>;

    async fn is_member(&self, channel_id: &str, user_id: &str) -> Result<bool, ChatError>;
}

/// Reads `channels` and `channel_members` on the channel's own shard.
pub struct ShardDirectory {
    router: Arc<ShardRouter>,
}

impl ShardDirectory {
    pub fn new(router: Arc<ShardRouter>) -> Self {
        Self { router }
    }
}

#[async_trait]
impl ChannelDirectory for ShardDirectory {
    async fn get_channel(&self, channel_id: &str) -> Result<Channel, ChatError> {
        self.router.get_channel(channel_id).await
    }

    async fn is_member(&self, channel_id: &str, user_id: &str) -> Result<bool, ChatError> {
        self.router.is_channel_member(channel_id, user_id).await
    }
}

/// In-process directory for tests and single-node setups.
#[derive(Default)]
pub struct MemoryDirectory {
    channels: RwLock<HashMap<String, Channel>>,
    /// channel_id -> member user ids
    members: RwLock<HashMap<String, HashSet<String>>>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a directory holding the configured channels and members.
    pub async fn from_seeds(seeds: &[ChannelSeed]) -> Self {
        let directory = Self::new();
        if seeds.is_empty() {
            warn!("Memory directory has no channels; every channel lookup will fail");
        }

        let now = Utc::now();
        for seed in seeds {
            directory
                .add_channel(Channel {
                    id: seed.id.clone(),
                    name: seed.name.clone(),
                    channel_type: seed.channel_type.clone(),
                    created_by: seed.created_by.clone(),
                    created_at: now,
                    updated_at: now,
                })
                .await;
            for user_id in &seed.members {
                directory.add_member(&seed.id, user_id).await;
            }
        }
        info!("Memory directory loaded {} channels", seeds.len());
        directory
    }

    pub async fn add_channel(&self, channel: Channel) {
        self.channels
            .write()
            .await
            .insert(channel.id.clone(), channel);
    }

    pub async fn add_member(&self, channel_id: &str, user_id: &str) {
        self.members
            .write()
            .await
            .entry(channel_id.to_string())
            .or_default()
            .insert(user_id.to_string());
    }
}

#[async_trait]
impl ChannelDirectory for MemoryDirectory {
    async fn get_channel(&self, channel_id: &str) -> Result<Channel, ChatError> {
        self.channels
            .read()
            .await
            .get(channel_id)
            .cloned()
            .ok_or_else(|| ChatError::not_found(format!("channel {}", channel_id)))
    }

    async fn is_member(&self, channel_id: &str, user_id: &str) -> Result<bool, ChatError> {
        Ok(self
            .members
            .read()
            .await
            .get(channel_id)
            .is_some_and(|users| users.contains(user_id)))
    }
}
