//! Twilio-like SMS/MMS provider simulator.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{Value, json};
use tower_http::trace::TraceLayer;
use tracing::info;

use super::{SendParams, SimulatorError, SimulatorState, parse_body, quote};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SendRequest {
    from: String,
    to: String,
    body: String,
    #[serde(default)]
    media_url: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct IncomingRequest {
    from: String,
    to: String,
    body: String,
    message_sid: String,
    #[serde(default)]
    media_url: Option<Vec<String>>,
    #[serde(default)]
    timestamp: Option<String>,
}

/// `"MM"` followed by the counter zero-padded to 32 digits.
fn message_sid(n: u64) -> String {
    format!("MM{n:032}")
}

fn message_type(media: Option<&[String]>) -> &'static str {
    match media {
        Some(urls) if !urls.is_empty() => "mms",
        _ => "sms",
    }
}

/// POST /messages
async fn send_message(
    State(state): State<Arc<SimulatorState>>,
    Query(params): Query<SendParams>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, SimulatorError> {
    state.authorize(&headers)?;
    let request: SendRequest = parse_body(&body)?;
    if let Some(err) = params.forced_error() {
        return Err(err);
    }

    let sid = message_sid(state.next_id());
    let now = state.now_iso();
    let record = json!({
        "sid": sid,
        "from": request.from,
        "to": request.to,
        "body": request.body,
        "status": "delivered",
        "date_created": now,
        "date_sent": now,
        "media_urls": request.media_url,
    });
    state.cache().put(sid.clone(), record.clone());
    info!(sid = %sid, to = %request.to, "Simulated SMS send");

    let reply_body = format!("Reply to: {}...", quote(&request.body));
    let (reply_from, reply_to) = (request.to, request.from);
    state.maybe_schedule_reply(move |state| {
        json!({
            "from": reply_from,
            "to": reply_to,
            "type": "sms",
            "messaging_provider_id": message_sid(state.next_id()),
            "body": reply_body,
            "attachments": null,
            "timestamp": state.now_iso(),
        })
    });

    Ok(Json(record))
}

/// GET /messages/{sid}
async fn get_message(
    State(state): State<Arc<SimulatorState>>,
    Path(sid): Path<String>,
) -> Result<Json<Value>, SimulatorError> {
    state
        .cache()
        .get(&sid)
        .map(Json)
        .map_err(|_| SimulatorError::NotFound("Message not found"))
}

/// GET /messages
async fn list_messages(State(state): State<Arc<SimulatorState>>) -> impl IntoResponse {
    Json(json!({ "messages": state.cache().values() }))
}

/// POST /simulate/incoming
///
/// Replays a provider-shaped inbound message to the messaging service in
/// the unified webhook format.
async fn simulate_incoming(
    State(state): State<Arc<SimulatorState>>,
    body: Bytes,
) -> Result<Json<Value>, SimulatorError> {
    let request: IncomingRequest = parse_body(&body)?;
    let timestamp = request.timestamp.unwrap_or_else(|| state.now_iso());
    let payload = json!({
        "from": request.from,
        "to": request.to,
        "type": message_type(request.media_url.as_deref()),
        "messaging_provider_id": request.message_sid,
        "body": request.body,
        "attachments": request.media_url,
        "timestamp": timestamp,
    });

    state.deliver_webhook(&payload).await;
    Ok(Json(json!({
        "status": "simulated_incoming_message",
        "message_sid": request.message_sid,
    })))
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "healthy", "service": "sms_provider" }))
}

/// Build the SMS/MMS simulator router.
pub fn sms_routes(state: Arc<SimulatorState>) -> Router {
    Router::new()
        .route("/messages", post(send_message).get(list_messages))
        .route("/messages/{sid}", get(get_message))
        .route("/simulate/incoming", post(simulate_incoming))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
