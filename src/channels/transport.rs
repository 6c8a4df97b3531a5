//! Outbound HTTP capability used by the provider adapters.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::TransportError;

/// Raw provider answer: status code plus unparsed body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
    pub body: String,
}

impl TransportResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// `post(url, payload, headers) -> response`.
///
/// Any HTTP status counts as a response; only failures to get one at all
/// (connect errors, timeouts) are errors.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn post_json(
        &self,
        url: &str,
        payload: &serde_json::Value,
        headers: &[(&str, &str)],
    ) -> Result<TransportResponse, TransportError>;
}

/// `reqwest`-backed transport with a per-request timeout.
pub struct ReqwestTransport {
    client: reqwest::Client,
    timeout: Duration,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            timeout,
        }
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn post_json(
        &self,
        url: &str,
        payload: &serde_json::Value,
        headers: &[(&str, &str)],
    ) -> Result<TransportResponse, TransportError> {
        let mut request = self.client.post(url).timeout(self.timeout).json(payload);
        for (name, value) in headers {
            request = request.header(*name, *value);
        }

        let resp = request.send().await.map_err(|e| {
            if e.is_timeout() {
                TransportError::Timeout(self.timeout)
            } else {
                TransportError::Request(e.to_string())
            }
        })?;

        let status = resp.status().as_u16();
        let body = resp
            .text()
            .await
            .map_err(|e| TransportError::Request(format!("reading body: {e}")))?;

        Ok(TransportResponse { status, body })
    }
}
