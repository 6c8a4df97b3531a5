//! Provider adapters: per-channel wire formats for outbound sends.
//!
//! Each adapter builds the provider request for an [`OutboundMessage`],
//! posts it through an [`HttpTransport`], and maps the provider's answer
//! back to canonical values. Retrying is left to the caller.

pub mod email;
pub mod sms;
pub mod transport;

use std::sync::Arc;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;

use crate::error::ProviderError;
use crate::pipeline::types::{AddressType, MessageStatus, OutboundMessage, ProviderType};

pub use email::EmailAdapter;
pub use sms::SmsMmsAdapter;
pub use transport::{HttpTransport, ReqwestTransport, TransportResponse};

/// Capability set shared by every provider.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Provider name used in logs and errors.
    fn name(&self) -> &str;

    /// Build the provider payload and POST it. Non-2xx answers become
    /// [`ProviderError::Status`].
    async fn send(&self, message: &OutboundMessage) -> Result<Value, ProviderError>;

    /// Channel the message will travel on.
    fn classify(&self, message: &OutboundMessage) -> ProviderType;

    /// Provider message id from a send response.
    fn extract_id(&self, response: &Value) -> String;

    /// Canonical status from a send response or a status callback.
    fn extract_status(&self, response: &Value) -> MessageStatus {
        let raw = response
            .get("status")
            .and_then(Value::as_str)
            .unwrap_or("unknown");
        self.map_status(raw)
    }

    /// Map one provider status word to the canonical vocabulary.
    fn map_status(&self, raw: &str) -> MessageStatus;
}

/// Pick the adapter for a recipient: email when the address contains `@`,
/// SMS/MMS otherwise.
pub fn select_adapter<'a>(
    to_address: &str,
    sms: &'a Arc<dyn ProviderAdapter>,
    email: &'a Arc<dyn ProviderAdapter>,
) -> &'a Arc<dyn ProviderAdapter> {
    match AddressType::classify(to_address) {
        AddressType::Email => email,
        AddressType::Phone => sms,
    }
}

/// Shared POST-and-check step used by both adapters.
pub(crate) async fn post_to_provider(
    transport: &dyn HttpTransport,
    provider: &str,
    url: &str,
    api_key: &SecretString,
    payload: &Value,
) -> Result<Value, ProviderError> {
    let auth = format!("Bearer {}", api_key.expose_secret());
    let headers = [
        ("Content-Type", "application/json"),
        ("Authorization", auth.as_str()),
    ];

    let resp = transport
        .post_json(url, payload, &headers)
        .await
        .map_err(|e| ProviderError::Transport {
            provider: provider.to_string(),
            reason: e.to_string(),
        })?;

    if !resp.is_success() {
        return Err(ProviderError::Status {
            provider: provider.to_string(),
            status_code: resp.status,
            body: resp.body,
        });
    }

    serde_json::from_str(&resp.body).map_err(|e| ProviderError::Transport {
        provider: provider.to_string(),
        reason: format!("invalid JSON response: {e}"),
    })
}

/// String field from a provider response, stringifying scalars. Missing
/// fields read as empty.
pub(crate) fn response_text(response: &Value, key: &str) -> String {
    match response.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}
