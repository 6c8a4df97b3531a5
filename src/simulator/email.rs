//! SendGrid-like email provider simulator.

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

const REQUIRED_KEYS: [&str; 4] = ["personalizations", "from", "subject", "content"];

#[derive(Debug, Deserialize)]
struct IncomingRequest {
    from_email: String,
    to_email: String,
    content: String,
    #[serde(default)]
    html_content: Option<String>,
    x_message_id: String,
    #[serde(default)]
    timestamp: Option<String>,
}

/// Fields of a SendGrid send request that the simulator keeps.
#[derive(Debug, PartialEq)]
struct SendGridMail {
    from_email: String,
    to_email: String,
    subject: String,
    content: String,
    html_content: Option<String>,
}

impl SendGridMail {
    fn from_payload(body: &Value) -> Result<Self, SimulatorError> {
        if REQUIRED_KEYS.iter().any(|k| body.get(k).is_none()) {
            return Err(SimulatorError::BadRequest("Missing required fields".into()));
        }

        let text = |v: Option<&Value>, field: &str| {
            v.and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| SimulatorError::BadRequest(format!("Invalid field: {field}")))
        };

        let to_email = text(body.pointer("/personalizations/0/to/0/email"), "personalizations")?;
        let from_email = text(body.pointer("/from/email"), "from")?;
        let subject = text(body.get("subject"), "subject")?;
        let content = text(body.pointer("/content/0/value"), "content")?;
        let html_content = body
            .get("content")
            .and_then(Value::as_array)
            .and_then(|items| {
                items
                    .iter()
                    .find(|item| item.get("type").and_then(Value::as_str) == Some("text/html"))
            })
            .and_then(|item| item.get("value"))
            .and_then(Value::as_str)
            .map(str::to_string);

        Ok(Self {
            from_email,
            to_email,
            subject,
            content,
            html_content,
        })
    }
}

fn message_id(n: u64, unix: i64) -> String {
    format!("msg_{n}_{unix}")
}

/// POST /mail/send
async fn send_mail(
    State(state): State<Arc<SimulatorState>>,
    Query(params): Query<SendParams>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, SimulatorError> {
    state.authorize(&headers)?;
    let payload: Value = parse_body(&body)?;
    let mail = SendGridMail::from_payload(&payload)?;
    if let Some(err) = params.forced_error() {
        return Err(err);
    }

    let id = message_id(state.next_id(), state.unix_now());
    state.cache().put(
        id.clone(),
        json!({
            "message_id": id,
            "from_email": mail.from_email,
            "to_email": mail.to_email,
            "subject": mail.subject,
            "content": mail.content,
            "html_content": mail.html_content,
            "status": "delivered",
            "timestamp": state.now_iso(),
        }),
    );
    info!(message_id = %id, to = %mail.to_email, "Simulated email send");

    let reply_body = format!(
        "Thank you for your email. This is an automated reply to: {}...",
        quote(&mail.content)
    );
    let (reply_from, reply_to) = (mail.to_email, mail.from_email);
    state.maybe_schedule_reply(move |state| {
        json!({
            "from": reply_from,
            "to": reply_to,
            "xillio_id": message_id(state.next_id(), state.unix_now()),
            "body": reply_body,
            "attachments": [],
            "timestamp": state.now_iso(),
        })
    });

    Ok(Json(json!({ "message_id": id, "status": "delivered" })))
}

/// GET /messages/{id}
async fn get_mail(
    State(state): State<Arc<SimulatorState>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, SimulatorError> {
    state
        .cache()
        .get(&id)
        .map(Json)
        .map_err(|_| SimulatorError::NotFound("Email not found"))
}

/// GET /emails
async fn list_mail(State(state): State<Arc<SimulatorState>>) -> impl IntoResponse {
    Json(json!({ "emails": state.cache().values() }))
}

/// POST /simulate/incoming
async fn simulate_incoming(
    State(state): State<Arc<SimulatorState>>,
    body: Bytes,
) -> Result<Json<Value>, SimulatorError> {
    let request: IncomingRequest = parse_body(&body)?;
    let timestamp = request.timestamp.unwrap_or_else(|| state.now_iso());
    let payload = json!({
        "from": request.from_email,
        "to": request.to_email,
        "xillio_id": request.x_message_id,
        "body": request.html_content.unwrap_or(request.content),
        "attachments": [],
        "timestamp": timestamp,
    });

    state.deliver_webhook(&payload).await;
    Ok(Json(json!({
        "status": "simulated_incoming_email",
        "message_id": request.x_message_id,
    })))
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "healthy", "service": "email_provider" }))
}

/// Build the email simulator router.
pub fn email_routes(state: Arc<SimulatorState>) -> Router {
    Router::new()
        .route("/mail/send", post(send_mail))
        .route("/messages/{id}", get(get_mail))
        .route("/emails", get(list_mail))
        .route("/simulate/incoming", post(simulate_incoming))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sendgrid() -> Value {
        json!({
            "personalizations": [{"to": [{"email": "bob@example.com"}]}],
            "from": {"email": "alice@example.com"},
            "subject": "Hi",
            "content": [
                {"type": "text/plain", "value": "plain"},
                {"type": "text/html", "value": "<p>html</p>"}
            ]
        })
    }

    #[test]
    fn extracts_sendgrid_fields() {
        let mail = SendGridMail::from_payload(&sendgrid()).unwrap();
        assert_eq!(mail.to_email, "bob@example.com");
        assert_eq!(mail.from_email, "alice@example.com");
        assert_eq!(mail.content, "plain");
        assert_eq!(mail.html_content.as_deref(), Some("<p>html</p>"));
    }

    #[test]
    fn missing_top_level_key_is_rejected() {
        let mut payload = sendgrid();
        payload.as_object_mut().unwrap().remove("subject");
        let err = SendGridMail::from_payload(&payload).unwrap_err();
        assert_eq!(err.to_string(), "Missing required fields");
    }

    #[test]
    fn empty_personalizations_is_rejected() {
        let mut payload = sendgrid();
        payload["personalizations"] = json!([]);
        assert!(SendGridMail::from_payload(&payload).is_err());
    }

    #[test]
    fn message_id_format() {
        assert_eq!(message_id(3, 1_700_000_000), "msg_3_1700000000");
    }

    #[tokio::test]
    async fn send_caches_mail_and_get_touches_it() {
        let state = super::super::tests::state(false);
        let mut headers = HeaderMap::new();
        headers.insert("authorization", "Bearer sekret".parse().unwrap());

        let Json(resp) = send_mail(
            State(state.clone()),
            Query(SendParams::default()),
            headers,
            Bytes::from(sendgrid().to_string()),
        )
        .await
        .unwrap();

        assert_eq!(resp["status"], "delivered");
        let id = resp["message_id"].as_str().unwrap().to_string();
        assert!(id.starts_with("msg_1_"));

        let Json(stored) = get_mail(State(state.clone()), Path(id.clone()))
            .await
            .unwrap();
        assert_eq!(stored["to_email"], "bob@example.com");
    }

    #[tokio::test]
    async fn forced_error_after_validation() {
        let state = super::super::tests::state(false);
        let mut headers = HeaderMap::new();
        headers.insert("authorization", "Bearer sekret".parse().unwrap());

        let err = send_mail(
            State(state.clone()),
            Query(SendParams {
                simulate_error: Some("429".into()),
            }),
            headers,
            Bytes::from(sendgrid().to_string()),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, SimulatorError::Simulated(status, _) if status.as_u16() == 429));
        assert!(state.cache().is_empty());
    }

    #[tokio::test]
    async fn unknown_mail_is_not_found() {
        let state = super::super::tests::state(false);
        let err = get_mail(State(state), Path("nope".into())).await.unwrap_err();
        assert!(matches!(err, SimulatorError::NotFound(_)));
    }
}
