use std::sync::Arc;

use chrono::Utc;
use tempfile::TempDir;

use parley_chat::{BroadcastPublisher, ChatService, ShardDirectory};
use parley_db::{PoolSettings, ShardRouter};
use parley_types::ChatError;
use parley_types::api::{HistoryRequest, SendMessageRequest};
use parley_types::models::{Channel, ChannelMember, Message};

async fn service(dir: &TempDir, shards: usize) -> ChatService {
    let paths: Vec<_> = (0..shards)
        .map(|i| dir.path().join(format!("shard-{}.db", i)))
        .collect();
    let router = Arc::new(ShardRouter::open(&paths, &PoolSettings::default()).unwrap());

    let now = Utc::now();
    for channel_id in ["C1", "C2"] {
        router
            .seed_channel(Channel {
                id: channel_id.into(),
                name: channel_id.to_lowercase(),
                channel_type: "public".into(),
                created_by: "U1".into(),
                created_at: now,
                updated_at: now,
            })
            .await
            .unwrap();
        router
            .seed_member(ChannelMember {
                channel_id: channel_id.into(),
                user_id: "U1".into(),
                role: "owner".into(),
                joined_at: now,
            })
            .await
            .unwrap();
    }

    ChatService::new(
        router.clone(),
        Arc::new(ShardDirectory::new(router)),
        Arc::new(BroadcastPublisher::new(64)),
    )
}

async fn send(service: &ChatService, channel_id: &str, key: &str) -> Message {
    service
        .send_message(SendMessageRequest {
            channel_id: channel_id.into(),
            user_id: "U1".into(),
            content: format!("message {}", key),
            idempotency_key: key.into(),
            message_type: None,
        })
        .await
        .unwrap()
}

fn history(channel_id: &str, limit: i64) -> HistoryRequest {
    HistoryRequest {
        channel_id: channel_id.into(),
        user_id: "U1".into(),
        limit,
        ..HistoryRequest::default()
    }
}

#[tokio::test]
async fn cursor_walk_visits_every_message_once() {
    let dir = TempDir::new().unwrap();
    let service = service(&dir, 3).await;
    let mut sent = Vec::new();
    for i in 0..7 {
        sent.push(send(&service, "C1", &format!("k{}", i)).await);
    }

    let mut seen = Vec::new();
    let mut req = history("C1", 3);
    loop {
        let page = service.get_message_history(&req).await.unwrap();
        assert_eq!(page.total, 7);
        seen.extend(page.messages.iter().map(|m| m.id.clone()));
        match page.next_cursor {
            Some(cursor) => {
                assert!(page.has_more);
                req.cursor = Some(cursor);
            }
            None => {
                assert!(!page.has_more);
                break;
            }
        }
    }

    let expected: Vec<String> = sent.iter().rev().map(|m| m.id.clone()).collect();
    assert_eq!(seen, expected);
}

#[tokio::test]
async fn repeated_send_returns_first_message() {
    let dir = TempDir::new().unwrap();
    let service = service(&dir, 2).await;

    let first = send(&service, "C1", "k1").await;
    let again = service
        .send_message(SendMessageRequest {
            channel_id: "C1".into(),
            user_id: "U1".into(),
            content: "different".into(),
            idempotency_key: "k1".into(),
            message_type: Some("system".into()),
        })
        .await
        .unwrap();

    assert_eq!(again, first);
    let page = service.get_message_history(&history("C1", 0)).await.unwrap();
    assert_eq!(page.total, 1);
    assert_eq!(page.messages[0].content, "message k1");
}

#[tokio::test]
async fn since_id_from_another_channel_is_not_found() {
    let dir = TempDir::new().unwrap();
    let service = service(&dir, 3).await;
    let other = send(&service, "C2", "k-other").await;
    send(&service, "C1", "k1").await;

    let err = service
        .get_messages_since_id("C1", "U1", &other.id, 10)
        .await
        .unwrap_err();
    assert!(matches!(err, ChatError::NotFound(_)));
}

#[tokio::test]
async fn since_id_returns_newer_messages_oldest_first() {
    let dir = TempDir::new().unwrap();
    let service = service(&dir, 3).await;
    let mut sent = Vec::new();
    for i in 0..4 {
        sent.push(send(&service, "C1", &format!("k{}", i)).await);
    }

    let page = service
        .get_messages_since_id("C1", "U1", &sent[1].id, 10)
        .await
        .unwrap();
    let ids: Vec<&str> = page.messages.iter().map(|m| m.id.as_str()).collect();
    assert_eq!(ids, vec![sent[2].id.as_str(), sent[3].id.as_str()]);
    assert!(!page.has_more);
    assert!(page.next_cursor.is_none());
    assert_eq!(page.total, 4);
}

#[tokio::test]
async fn non_member_and_unknown_channel_are_distinguished() {
    let dir = TempDir::new().unwrap();
    let service = service(&dir, 2).await;

    let mut req = history("C404", 10);
    assert!(matches!(
        service.get_message_history(&req).await.unwrap_err(),
        ChatError::NotFound(_)
    ));

    req.channel_id = "C1".into();
    req.user_id = "U9".into();
    assert!(matches!(
        service.get_message_history(&req).await.unwrap_err(),
        ChatError::PermissionDenied(_)
    ));
}
