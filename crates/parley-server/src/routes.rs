use axum::{
    Json, Router,
    extract::rejection::{JsonRejection, QueryRejection},
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use tracing::{error, warn};

use parley_chat::ChatService;
use parley_db::DEFAULT_PAGE_SIZE;
use parley_types::ChatError;
use parley_types::api::{ErrorResponse, HistoryRequest, ReadReceiptRequest, SendMessageRequest};

/// `ChatError` as an HTTP response with a JSON `{"error": ...}` body.
pub struct ApiError(ChatError);

impl From<ChatError> for ApiError {
    fn from(err: ChatError) -> Self {
        Self(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self(ChatError::invalid(rejection.body_text()))
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self(ChatError::invalid(rejection.body_text()))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        if status == StatusCode::SERVICE_UNAVAILABLE {
            error!("Storage failure: {}", self.0);
        }
        let body = ErrorResponse {
            error: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

pub fn status_for(err: &ChatError) -> StatusCode {
    match err {
        ChatError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
        ChatError::NotFound(_) => StatusCode::NOT_FOUND,
        ChatError::PermissionDenied(_) => StatusCode::FORBIDDEN,
        ChatError::TransientStorageFailure(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}

pub fn router(service: ChatService) -> Router {
    let v1 = Router::new()
        .route(
            "/channels/{channel_id}/messages",
            get(get_messages).post(send_message),
        )
        .route(
            "/channels/{channel_id}/messages/since/{timestamp}",
            get(get_messages_since),
        )
        .route(
            "/channels/{channel_id}/messages/since-id/{message_id}",
            get(get_messages_since_id),
        )
        .route(
            "/channels/{channel_id}/messages/{message_id}/read",
            post(mark_read),
        );

    Router::new()
        .nest("/v1", v1)
        .route("/health", get(health))
        .route("/health/ready", get(ready))
        .route("/health/live", get(live))
        .with_state(service)
}

// -- Messages --

#[derive(Debug, Default, Deserialize)]
pub struct HistoryQuery {
    #[serde(default)]
    pub user_id: String,
    pub cursor: Option<String>,
    pub limit: Option<String>,
    /// RFC 3339
    pub since: Option<String>,
    pub since_id: Option<String>,
}

/// Query for the `since` and `since-id` shortcuts.
#[derive(Debug, Default, Deserialize)]
pub struct MemberQuery {
    #[serde(default)]
    pub user_id: String,
    pub limit: Option<String>,
}

/// Unparseable limits get the default page size, like out-of-range ones.
fn parse_limit(raw: Option<&str>) -> i64 {
    raw.and_then(|v| v.trim().parse().ok()).unwrap_or(DEFAULT_PAGE_SIZE)
}

async fn send_message(
    State(service): State<ChatService>,
    Path(channel_id): Path<String>,
    payload: Result<Json<SendMessageRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(mut req) = payload?;
    if !req.channel_id.is_empty() && req.channel_id != channel_id {
        return Err(ChatError::invalid("channel_id does not match the path").into());
    }
    req.channel_id = channel_id;
    let message = service.send_message(req).await?;
    Ok((StatusCode::CREATED, Json(message)))
}

async fn get_messages(
    State(service): State<ChatService>,
    Path(channel_id): Path<String>,
    query: Result<Query<HistoryQuery>, QueryRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Query(query) = query?;
    let since = query.since.as_deref().map(parse_timestamp).transpose()?;
    let req = HistoryRequest {
        channel_id,
        user_id: query.user_id,
        cursor: query.cursor,
        limit: parse_limit(query.limit.as_deref()),
        since,
        since_id: query.since_id,
    };
    let page = service.get_message_history(&req).await?;
    Ok(Json(page))
}

async fn get_messages_since(
    State(service): State<ChatService>,
    Path((channel_id, timestamp)): Path<(String, String)>,
    query: Result<Query<MemberQuery>, QueryRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Query(query) = query?;
    let since = parse_timestamp(&timestamp)?;
    let limit = parse_limit(query.limit.as_deref());
    let page = service
        .get_messages_since(&channel_id, &query.user_id, since, limit)
        .await?;
    Ok(Json(page))
}

async fn get_messages_since_id(
    State(service): State<ChatService>,
    Path((channel_id, message_id)): Path<(String, String)>,
    query: Result<Query<MemberQuery>, QueryRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Query(query) = query?;
    let limit = parse_limit(query.limit.as_deref());
    let page = service
        .get_messages_since_id(&channel_id, &query.user_id, &message_id, limit)
        .await?;
    Ok(Json(page))
}

async fn mark_read(
    State(service): State<ChatService>,
    Path((channel_id, message_id)): Path<(String, String)>,
    payload: Result<Json<ReadReceiptRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(mut req) = payload?;
    req.channel_id = channel_id;
    req.message_id = message_id;
    service.mark_message_read(&req).await?;
    Ok(StatusCode::NO_CONTENT)
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, ChatError> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| ChatError::invalid(format!("invalid timestamp '{}': {}", value, e)))
}

// -- Health --

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

async fn live() -> impl IntoResponse {
    Json(json!({ "status": "alive" }))
}

async fn ready(State(service): State<ChatService>) -> Response {
    match service.health().await {
        Ok(()) => Json(json!({ "status": "ready" })).into_response(),
        Err(e) => {
            warn!("Readiness check failed: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "status": "unavailable", "error": e.to_string() })),
            )
                .into_response()
        }
    }
}
