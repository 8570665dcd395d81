use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use parley_db::{HistoryFilter, NewMessage, ShardRouter};
use parley_types::ChatError;
use parley_types::api::{HistoryRequest, MessagePage, ReadReceiptRequest, SendMessageRequest};
use parley_types::events::{ChannelEvent, channel_topic};
use parley_types::models::Message;

use crate::directory::ChannelDirectory;
use crate::publisher::EventPublisher;

/// Chat history and message creation on top of the sharded store.
///
/// Reads check, in order: request shape, channel existence, membership,
/// cursor and since-reference validity. The first failure is returned and
/// nothing is read from the store before membership passes.
#[derive(Clone)]
pub struct ChatService {
    router: Arc<ShardRouter>,
    directory: Arc<dyn ChannelDirectory>,
    publisher: Arc<dyn EventPublisher>,
}

impl ChatService {
    pub fn new(
        router: Arc<ShardRouter>,
        directory: Arc<dyn ChannelDirectory>,
        publisher: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            router,
            directory,
            publisher,
        }
    }

    pub fn router(&self) -> &ShardRouter {
        &self.router
    }

    // -- Writes --

    /// Store a message for a channel member and notify live connections.
    /// Publication is best effort; the stored message is returned either way.
    pub async fn send_message(&self, req: SendMessageRequest) -> Result<Message, ChatError> {
        require("channel_id", &req.channel_id)?;
        require("user_id", &req.user_id)?;
        require("content", &req.content)?;
        require("idempotency_key", &req.idempotency_key)?;

        self.ensure_member(&req.channel_id, &req.user_id).await?;

        let message = self.router.create_message(NewMessage::from(req)).await?;
        debug!("Stored message {} in channel {}", message.id, message.channel_id);

        self.publish_message_event(&message);
        Ok(message)
    }

    /// Validate that a member can see `message_id`. Receipts themselves are
    /// not persisted.
    pub async fn mark_message_read(&self, req: &ReadReceiptRequest) -> Result<(), ChatError> {
        require("channel_id", &req.channel_id)?;
        require("user_id", &req.user_id)?;
        require("message_id", &req.message_id)?;

        self.ensure_member(&req.channel_id, &req.user_id).await?;
        self.router
            .get_message(&req.message_id, &req.channel_id)
            .await?;
        debug!("{} read {} in {}", req.user_id, req.message_id, req.channel_id);
        Ok(())
    }

    // -- Reads --

    pub async fn get_message_history(&self, req: &HistoryRequest) -> Result<MessagePage, ChatError> {
        let filter = self.validate_history(req).await?;
        self.router
            .list_messages(&req.channel_id, filter, req.limit)
            .await
    }

    pub async fn get_messages_since(
        &self,
        channel_id: &str,
        user_id: &str,
        since: DateTime<Utc>,
        limit: i64,
    ) -> Result<MessagePage, ChatError> {
        self.get_message_history(&HistoryRequest {
            channel_id: channel_id.to_string(),
            user_id: user_id.to_string(),
            since: Some(since),
            limit,
            ..HistoryRequest::default()
        })
        .await
    }

    pub async fn get_messages_since_id(
        &self,
        channel_id: &str,
        user_id: &str,
        since_id: &str,
        limit: i64,
    ) -> Result<MessagePage, ChatError> {
        require("since_id", since_id)?;
        self.get_message_history(&HistoryRequest {
            channel_id: channel_id.to_string(),
            user_id: user_id.to_string(),
            since_id: Some(since_id.to_string()),
            limit,
            ..HistoryRequest::default()
        })
        .await
    }

    pub async fn get_messages_with_cursor(
        &self,
        channel_id: &str,
        user_id: &str,
        cursor: &str,
        limit: i64,
    ) -> Result<MessagePage, ChatError> {
        self.get_message_history(&HistoryRequest {
            channel_id: channel_id.to_string(),
            user_id: user_id.to_string(),
            cursor: Some(cursor.to_string()),
            limit,
            ..HistoryRequest::default()
        })
        .await
    }

    /// Point read behind the same existence and membership checks as history.
    pub async fn get_message(
        &self,
        channel_id: &str,
        user_id: &str,
        message_id: &str,
    ) -> Result<Message, ChatError> {
        require("channel_id", channel_id)?;
        require("user_id", user_id)?;
        require("message_id", message_id)?;

        self.directory.get_channel(channel_id).await?;
        self.ensure_member(channel_id, user_id).await?;
        self.router.get_message(message_id, channel_id).await
    }

    /// Ping every shard.
    pub async fn health(&self) -> Result<(), ChatError> {
        self.router.ping_all().await
    }

    async fn validate_history(&self, req: &HistoryRequest) -> Result<HistoryFilter, ChatError> {
        require("channel_id", &req.channel_id)?;
        require("user_id", &req.user_id)?;
        HistoryFilter::check_combination(req)?;

        self.directory.get_channel(&req.channel_id).await?;
        self.ensure_member(&req.channel_id, &req.user_id).await?;

        let filter = HistoryFilter::from_request(req)?;
        if let HistoryFilter::SinceMessage(since_id) = &filter {
            self.router
                .get_message(since_id, &req.channel_id)
                .await
                .map_err(|e| match e {
                    ChatError::NotFound(_) => {
                        ChatError::not_found(format!("since message {}", since_id))
                    }
                    other => other,
                })?;
        }
        Ok(filter)
    }

    /// A failed membership lookup is never treated as membership.
    async fn ensure_member(&self, channel_id: &str, user_id: &str) -> Result<(), ChatError> {
        match self.directory.is_member(channel_id, user_id).await {
            Ok(true) => Ok(()),
            Ok(false) => Err(ChatError::denied("user is not a member of the channel")),
            Err(e) => {
                warn!("Membership check for {} in {} failed: {}", user_id, channel_id, e);
                Err(ChatError::denied(format!("failed to check channel membership: {}", e)))
            }
        }
    }

    fn publish_message_event(&self, message: &Message) {
        let topic = channel_topic(&message.channel_id);
        let event = ChannelEvent::message_created(message.clone());
        if let Err(e) = self.publisher.publish(&topic, &event) {
            warn!("Failed to publish message event for {}: {}", message.id, e);
        }
    }
}

fn require(field: &str, value: &str) -> Result<(), ChatError> {
    if value.trim().is_empty() {
        return Err(ChatError::invalid(format!("{} is required", field)));
    }
    Ok(())
}
