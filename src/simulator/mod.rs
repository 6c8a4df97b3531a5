//! Mock SMS/MMS and email providers.
//!
//! Each simulator accepts sends in its provider's wire format, remembers
//! them in a [`BoundedRecencyCache`], and can replay inbound traffic to the
//! messaging service's webhook endpoint.

pub mod email;
pub mod sms;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use axum::Json;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use mockable::Clock;
use rand::Rng;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::cache::BoundedRecencyCache;
use crate::config::SimulatorConfig;

pub use email::email_routes;
pub use sms::sms_routes;

/// Timeout for webhook deliveries to the messaging service.
pub const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

/// Replies are delivered after a random delay in this range, in milliseconds.
const REPLY_DELAY_MS: std::ops::RangeInclusive<u64> = 1_000..=5_000;

/// Longest prefix of the original text quoted in a simulated reply.
const REPLY_QUOTE_CHARS: usize = 50;

/// Shared state of one simulator process.
pub struct SimulatorState {
    /// Short name used in logs.
    service: &'static str,
    cache: BoundedRecencyCache<String, Value>,
    counter: AtomicU64,
    webhook_url: String,
    api_key: SecretString,
    simulate_replies: bool,
    client: reqwest::Client,
    clock: Arc<dyn Clock + Send + Sync>,
}

impl SimulatorState {
    pub fn new(
        service: &'static str,
        config: &SimulatorConfig,
        clock: Arc<dyn Clock + Send + Sync>,
    ) -> Self {
        Self {
            service,
            cache: BoundedRecencyCache::new(config.cache_size),
            counter: AtomicU64::new(0),
            webhook_url: config.webhook_url.clone(),
            api_key: config.api_key.clone(),
            simulate_replies: config.simulate_replies,
            client: reqwest::Client::new(),
            clock,
        }
    }

    pub fn cache(&self) -> &BoundedRecencyCache<String, Value> {
        &self.cache
    }

    /// Next value of the process-wide id counter, starting at 1.
    fn next_id(&self) -> u64 {
        self.counter.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn now_iso(&self) -> String {
        self.clock.utc().to_rfc3339()
    }

    fn unix_now(&self) -> i64 {
        self.clock.utc().timestamp()
    }

    /// Check the `Authorization: Bearer <key>` header.
    fn authorize(&self, headers: &HeaderMap) -> Result<(), SimulatorError> {
        let presented = headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "));

        match presented {
            Some(key) if key == self.api_key.expose_secret() => Ok(()),
            _ => {
                warn!(service = self.service, "Rejected request with invalid API key");
                Err(SimulatorError::Unauthorized)
            }
        }
    }

    /// POST a unified-format payload to the messaging service.
    ///
    /// Delivery failures are logged, never returned.
    async fn deliver_webhook(&self, payload: &Value) {
        let result = self
            .client
            .post(&self.webhook_url)
            .timeout(WEBHOOK_TIMEOUT)
            .json(payload)
            .send()
            .await;

        match result {
            Ok(resp) => info!(
                service = self.service,
                status = resp.status().as_u16(),
                url = %self.webhook_url,
                "Webhook delivered"
            ),
            Err(e) => warn!(
                service = self.service,
                url = %self.webhook_url,
                error = %e,
                "Webhook delivery failed"
            ),
        }
    }

    /// With replies enabled, flip a coin and maybe deliver a reply webhook
    /// after a short random delay. `build` runs when the reply fires.
    fn maybe_schedule_reply<F>(self: &Arc<Self>, build: F)
    where
        F: FnOnce(&SimulatorState) -> Value + Send + 'static,
    {
        if !self.simulate_replies {
            return;
        }

        let delay = {
            let mut rng = rand::thread_rng();
            if !rng.gen_bool(0.5) {
                return;
            }
            Duration::from_millis(rng.gen_range(REPLY_DELAY_MS))
        };

        debug!(
            service = self.service,
            delay_ms = delay.as_millis() as u64,
            "Scheduling reply"
        );
        let state = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let payload = build(&state);
            state.deliver_webhook(&payload).await;
        });
    }
}

/// Query string shared by the send endpoints.
#[derive(Debug, Default, Deserialize)]
struct SendParams {
    simulate_error: Option<String>,
}

impl SendParams {
    /// Forced failure requested by the caller, if any.
    fn forced_error(&self) -> Option<SimulatorError> {
        match self.simulate_error.as_deref() {
            Some("429") => Some(SimulatorError::Simulated(
                StatusCode::TOO_MANY_REQUESTS,
                "Too many requests",
            )),
            Some("500") => Some(SimulatorError::Simulated(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error",
            )),
            _ => None,
        }
    }
}

/// Failures answered by a simulator.
#[derive(Debug, thiserror::Error)]
enum SimulatorError {
    #[error("Invalid API key")]
    Unauthorized,

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(&'static str),

    #[error("{1}")]
    Simulated(StatusCode, &'static str),
}

impl IntoResponse for SimulatorError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Simulated(status, _) => *status,
        };
        (
            status,
            Json(json!({ "errors": [{ "message": self.to_string() }] })),
        )
            .into_response()
    }
}

fn parse_body<T: serde::de::DeserializeOwned>(body: &[u8]) -> Result<T, SimulatorError> {
    serde_json::from_slice(body)
        .map_err(|e| SimulatorError::BadRequest(format!("Invalid JSON: {e}")))
}

fn quote(text: &str) -> String {
    text.chars().take(REPLY_QUOTE_CHARS).collect()
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::testing::FixedClock;

    pub(super) fn state(replies: bool) -> Arc<SimulatorState> {
        let config = SimulatorConfig {
            host: "127.0.0.1".into(),
            port: 0,
            webhook_url: "http://127.0.0.1:9/unused".into(),
            api_key: SecretString::from("sekret".to_string()),
            simulate_replies: replies,
            cache_size: 2,
        };
        let clock = Arc::new(FixedClock(Utc.with_ymd_and_hms(2024, 5, 6, 7, 8, 9).unwrap()));
        Arc::new(SimulatorState::new("test", &config, clock))
    }

    fn headers(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, value.parse().unwrap());
        headers
    }

    #[test]
    fn ids_start_at_one_and_increase() {
        let state = state(false);
        assert_eq!(state.next_id(), 1);
        assert_eq!(state.next_id(), 2);
    }

    #[test]
    fn authorize_checks_bearer_key() {
        let state = state(false);
        assert!(state.authorize(&headers("Bearer sekret")).is_ok());
        assert!(state.authorize(&headers("Bearer wrong")).is_err());
        assert!(state.authorize(&headers("sekret")).is_err());
        assert!(state.authorize(&HeaderMap::new()).is_err());
    }

    #[test]
    fn forced_errors() {
        let params = |v: &str| SendParams {
            simulate_error: Some(v.into()),
        };
        assert!(matches!(
            params("429").forced_error(),
            Some(SimulatorError::Simulated(StatusCode::TOO_MANY_REQUESTS, _))
        ));
        assert!(matches!(
            params("500").forced_error(),
            Some(SimulatorError::Simulated(StatusCode::INTERNAL_SERVER_ERROR, _))
        ));
        assert!(params("418").forced_error().is_none());
        assert!(SendParams::default().forced_error().is_none());
    }

    #[test]
    fn quote_truncates_on_char_boundary() {
        let long = "é".repeat(60);
        assert_eq!(quote(&long).chars().count(), 50);
        assert_eq!(quote("short"), "short");
    }

    #[test]
    fn now_uses_injected_clock() {
        assert!(state(false).now_iso().starts_with("2024-05-06T07:08:09"));
    }
}
