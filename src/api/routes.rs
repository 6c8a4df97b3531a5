//! REST endpoints: webhooks, sends, status callbacks and read-side queries.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::rejection::{PathRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tower_http::trace::TraceLayer;
use tracing::warn;
use uuid::Uuid;

use super::{ApiError, parse_json};
use crate::error::ValidationError;
use crate::pipeline::types::{Conversation, Message, OutboundMessage};
use crate::pipeline::webhook::parse_iso8601;
use crate::pipeline::{ConversationQuery, MessagePipeline, MessageQuery, WebhookChannel};

/// Shared state for the messaging API.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<MessagePipeline>,
    /// Reported by `/health`.
    pub version: String,
}

type ApiResult<T> = Result<Json<T>, ApiError>;

/// Body of `POST /api/messages/{sms,email}`.
#[derive(Debug, Deserialize)]
struct SendMessageBody {
    #[serde(alias = "from")]
    from_address: String,
    #[serde(alias = "to")]
    to_address: String,
    body: String,
    #[serde(default)]
    attachments: Option<Vec<String>>,
    #[serde(default)]
    timestamp: Option<String>,
}

impl SendMessageBody {
    fn into_outbound(self) -> Result<OutboundMessage, ValidationError> {
        let mut outbound = OutboundMessage::new(self.from_address, self.to_address, self.body)
            .with_attachments(self.attachments.unwrap_or_default());
        if let Some(raw) = self.timestamp.filter(|t| !t.trim().is_empty()) {
            outbound = outbound.with_timestamp(parse_iso8601(&raw)?);
        }
        Ok(outbound)
    }
}

fn parse_id(raw: Result<Path<String>, PathRejection>, what: &str) -> Result<Uuid, ApiError> {
    let Path(raw) = raw.map_err(|e| ValidationError::InvalidQuery(e.body_text()))?;
    Uuid::parse_str(&raw)
        .map_err(|_| ValidationError::InvalidQuery(format!("invalid {what} id: {raw}")).into())
}

fn query_params<T>(query: Result<Query<T>, QueryRejection>) -> Result<T, ApiError> {
    query
        .map(|Query(q)| q)
        .map_err(|e| ValidationError::InvalidQuery(e.body_text()).into())
}

// ── Health ──────────────────────────────────────────────────────────

/// GET /health
///
/// Always answers 200; a failed database probe degrades the status.
async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let database = match state.pipeline.database().ping().await {
        Ok(()) => "connected",
        Err(e) => {
            warn!(error = %e, "Database health probe failed");
            "disconnected"
        }
    };
    let status = if database == "connected" {
        "healthy"
    } else {
        "degraded"
    };

    Json(json!({
        "status": status,
        "database": database,
        "version": state.version,
    }))
}

// ── Webhooks ────────────────────────────────────────────────────────

async fn receive(state: &AppState, channel: WebhookChannel, body: &[u8]) -> ApiResult<Message> {
    let payload = parse_json(body)?;
    Ok(Json(state.pipeline.receive_webhook(channel, &payload).await?))
}

/// POST /api/webhooks/sms
async fn sms_webhook(State(state): State<AppState>, body: Bytes) -> ApiResult<Message> {
    receive(&state, WebhookChannel::SmsMms, &body).await
}

/// POST /api/webhooks/email
async fn email_webhook(State(state): State<AppState>, body: Bytes) -> ApiResult<Message> {
    receive(&state, WebhookChannel::Email, &body).await
}

async fn status_callback(
    state: &AppState,
    channel: WebhookChannel,
    body: &[u8],
) -> ApiResult<Message> {
    let payload = parse_json(body)?;
    Ok(Json(
        state
            .pipeline
            .apply_status_callback(channel, &payload)
            .await?,
    ))
}

/// POST /api/webhooks/sms/status
async fn sms_status(State(state): State<AppState>, body: Bytes) -> ApiResult<Message> {
    status_callback(&state, WebhookChannel::SmsMms, &body).await
}

/// POST /api/webhooks/email/status
async fn email_status(State(state): State<AppState>, body: Bytes) -> ApiResult<Message> {
    status_callback(&state, WebhookChannel::Email, &body).await
}

// ── Sends ───────────────────────────────────────────────────────────

/// POST /api/messages/sms and /api/messages/email
///
/// Both paths share one handler: the provider is picked from the
/// recipient's address, not from the path.
async fn send_message(State(state): State<AppState>, body: Bytes) -> ApiResult<Message> {
    let payload = parse_json(&body)?;
    let request: SendMessageBody = serde_json::from_value(payload)
        .map_err(|e| ValidationError::MalformedPayload(e.to_string()))?;
    let outbound = request.into_outbound()?;
    Ok(Json(state.pipeline.send(outbound).await?))
}

// ── Queries ─────────────────────────────────────────────────────────

/// GET /api/conversations?limit&offset&participant
async fn list_conversations(
    State(state): State<AppState>,
    query: Result<Query<ConversationQuery>, QueryRejection>,
) -> ApiResult<Vec<Conversation>> {
    let query = query_params(query)?;
    Ok(Json(state.pipeline.list_conversations(&query).await?))
}

/// GET /api/conversations/{id}
async fn get_conversation(
    State(state): State<AppState>,
    id: Result<Path<String>, PathRejection>,
) -> ApiResult<Conversation> {
    let id = parse_id(id, "conversation")?;
    Ok(Json(state.pipeline.get_conversation(id).await?))
}

/// GET /api/conversations/{id}/messages?limit&offset&direction
async fn conversation_messages(
    State(state): State<AppState>,
    id: Result<Path<String>, PathRejection>,
    query: Result<Query<MessageQuery>, QueryRejection>,
) -> ApiResult<Vec<Message>> {
    let id = parse_id(id, "conversation")?;
    let query = query_params(query)?;
    Ok(Json(state.pipeline.conversation_messages(id, &query).await?))
}

/// GET /api/messages/{id}
async fn get_message(
    State(state): State<AppState>,
    id: Result<Path<String>, PathRejection>,
) -> ApiResult<Message> {
    let id = parse_id(id, "message")?;
    Ok(Json(state.pipeline.get_message(id).await?))
}

/// Build the messaging service router.
pub fn api_routes(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/webhooks/sms", post(sms_webhook))
        .route("/api/webhooks/email", post(email_webhook))
        .route("/api/webhooks/sms/status", post(sms_status))
        .route("/api/webhooks/email/status", post(email_status))
        .route("/api/messages/sms", post(send_message))
        .route("/api/messages/email", post(send_message))
        .route("/api/messages/{id}", get(get_message))
        .route("/api/conversations", get(list_conversations))
        .route("/api/conversations/{id}", get(get_conversation))
        .route("/api/conversations/{id}/messages", get(conversation_messages))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
