//! Integration tests for the provider simulators.
//!
//! The simulators run on random ports; a small capture server stands in
//! for the messaging service so forwarded webhooks can be inspected.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use mockable::DefaultClock;
use secrecy::SecretString;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::time::timeout;

use courier::config::SimulatorConfig;
use courier::simulator::{SimulatorState, email_routes, sms_routes};

/// Maximum time any test is allowed to run before we consider it hung.
const TEST_TIMEOUT: Duration = Duration::from_secs(10);

const KEY: &str = "sim-key";

type Captured = Arc<Mutex<Vec<Value>>>;

async fn capture(State(captured): State<Captured>, Json(body): Json<Value>) -> Json<Value> {
    captured.lock().unwrap().push(body);
    Json(json!({"ok": true}))
}

async fn serve(app: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    url
}

/// Start a simulator plus a webhook capture server.
/// Returns (simulator url, captured webhooks).
async fn start(email: bool, cache_size: usize) -> (String, Captured) {
    let captured: Captured = Arc::default();
    let hook = serve(
        Router::new()
            .route("/hook", post(capture))
            .with_state(captured.clone()),
    )
    .await;

    let config = SimulatorConfig {
        host: "127.0.0.1".into(),
        port: 0,
        webhook_url: format!("{hook}/hook"),
        api_key: SecretString::from(KEY.to_string()),
        simulate_replies: false,
        cache_size,
    };
    let service = if email { "email" } else { "sms" };
    let state = Arc::new(SimulatorState::new(service, &config, Arc::new(DefaultClock)));
    let app = if email {
        email_routes(state)
    } else {
        sms_routes(state)
    };
    let url = serve(app).await;

    // Give the servers a moment to start accepting connections.
    tokio::time::sleep(Duration::from_millis(50)).await;
    (url, captured)
}

async fn send_sms(
    client: &reqwest::Client,
    url: &str,
    body: &str,
    query: &str,
) -> reqwest::Response {
    client
        .post(format!("{url}/messages{query}"))
        .bearer_auth(KEY)
        .json(&json!({"From": "+1", "To": "+2", "Body": body}))
        .send()
        .await
        .unwrap()
}

#[tokio::test]
async fn sms_cache_evicts_least_recently_used() {
    timeout(TEST_TIMEOUT, async {
        let (url, _) = start(false, 2).await;
        let client = reqwest::Client::new();

        let mut sids = Vec::new();
        for body in ["one", "two"] {
            let resp: Value = send_sms(&client, &url, body, "").await.json().await.unwrap();
            sids.push(resp["sid"].as_str().unwrap().to_string());
        }

        // Reading "one" makes "two" the eviction candidate.
        let resp = client
            .get(format!("{url}/messages/{}", sids[0]))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status().as_u16(), 200);

        send_sms(&client, &url, "three", "").await;

        let listed: Value = client
            .get(format!("{url}/messages"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        let bodies: Vec<&str> = listed["messages"]
            .as_array()
            .unwrap()
            .iter()
            .map(|m| m["body"].as_str().unwrap())
            .collect();
        assert_eq!(bodies, vec!["one", "three"]);

        let evicted = client
            .get(format!("{url}/messages/{}", sids[1]))
            .send()
            .await
            .unwrap();
        assert_eq!(evicted.status().as_u16(), 404);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn sms_forced_errors_and_auth() {
    timeout(TEST_TIMEOUT, async {
        let (url, _) = start(false, 10).await;
        let client = reqwest::Client::new();

        let resp = send_sms(&client, &url, "x", "?simulate_error=429").await;
        assert_eq!(resp.status().as_u16(), 429);
        let resp = send_sms(&client, &url, "x", "?simulate_error=500").await;
        assert_eq!(resp.status().as_u16(), 500);

        let resp = client
            .post(format!("{url}/messages"))
            .json(&json!({"From": "+1", "To": "+2", "Body": "x"}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status().as_u16(), 401);

        let health: Value = client
            .get(format!("{url}/health"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(health["service"], "sms_provider");
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn sms_simulate_incoming_forwards_unified_payload() {
    timeout(TEST_TIMEOUT, async {
        let (url, captured) = start(false, 10).await;
        let client = reqwest::Client::new();

        let resp: Value = client
            .post(format!("{url}/simulate/incoming"))
            .json(&json!({
                "From": "+5", "To": "+6", "Body": "ping", "MessageSid": "SM42",
                "Timestamp": "2024-03-01T00:00:00Z"
            }))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(resp["message_sid"], "SM42");

        let captured = captured.lock().unwrap().clone();
        assert_eq!(captured.len(), 1);
        assert_eq!(
            captured[0],
            json!({
                "from": "+5",
                "to": "+6",
                "type": "sms",
                "messaging_provider_id": "SM42",
                "body": "ping",
                "attachments": null,
                "timestamp": "2024-03-01T00:00:00Z"
            })
        );
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn email_send_validation_and_lookup() {
    timeout(TEST_TIMEOUT, async {
        let (url, _) = start(true, 10).await;
        let client = reqwest::Client::new();
        let mail = json!({
            "personalizations": [{"to": [{"email": "b@example.com"}]}],
            "from": {"email": "a@example.com"},
            "subject": "Hello",
            "content": [{"type": "text/plain", "value": "body"}]
        });

        let resp = client
            .post(format!("{url}/mail/send"))
            .bearer_auth("nope")
            .json(&mail)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status().as_u16(), 401);

        let resp = client
            .post(format!("{url}/mail/send"))
            .bearer_auth(KEY)
            .json(&json!({"from": {"email": "a@example.com"}}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status().as_u16(), 400);

        let sent: Value = client
            .post(format!("{url}/mail/send"))
            .bearer_auth(KEY)
            .json(&mail)
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(sent["status"], "delivered");
        let id = sent["message_id"].as_str().unwrap();
        assert!(id.starts_with("msg_1_"));

        let stored: Value = client
            .get(format!("{url}/messages/{id}"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(stored["subject"], "Hello");
        assert_eq!(stored["from_email"], "a@example.com");

        let listed: Value = client
            .get(format!("{url}/emails"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(listed["emails"].as_array().unwrap().len(), 1);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn email_simulate_incoming_prefers_html() {
    timeout(TEST_TIMEOUT, async {
        let (url, captured) = start(true, 10).await;
        let client = reqwest::Client::new();

        let resp = client
            .post(format!("{url}/simulate/incoming"))
            .json(&json!({
                "from_email": "a@example.com",
                "to_email": "b@example.com",
                "subject": "s",
                "content": "plain",
                "html_content": "<b>rich</b>",
                "x_message_id": "X1"
            }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status().as_u16(), 200);

        let captured = captured.lock().unwrap().clone();
        assert_eq!(captured.len(), 1);
        assert_eq!(captured[0]["xillio_id"], "X1");
        assert_eq!(captured[0]["body"], "<b>rich</b>");
        assert_eq!(captured[0]["attachments"], json!([]));
    })
    .await
    .expect("test timed out");
}
