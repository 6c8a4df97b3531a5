//! Email provider adapter (SendGrid-shaped API).

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::channels::{HttpTransport, ProviderAdapter, post_to_provider, response_text};
use crate::config::ProviderConfig;
use crate::error::ProviderError;
use crate::pipeline::types::{MessageStatus, OutboundMessage, ProviderType};

/// Subject line used for every outbound email.
const OUTBOUND_SUBJECT: &str = "Message";

/// Canonical status for an email provider status word.
pub fn map_email_status(raw: &str) -> MessageStatus {
    match raw {
        "pending" | "deferred" => MessageStatus::Pending,
        "processed" => MessageStatus::Sent,
        "delivered" => MessageStatus::Delivered,
        "dropped" | "bounce" | "blocked" => MessageStatus::Failed,
        _ => MessageStatus::Unknown,
    }
}

pub struct EmailAdapter {
    config: ProviderConfig,
    transport: Arc<dyn HttpTransport>,
}

impl EmailAdapter {
    pub fn new(config: ProviderConfig, transport: Arc<dyn HttpTransport>) -> Self {
        Self { config, transport }
    }

    /// Attachments are not part of the payload; the provider API has no
    /// URL-attachment form.
    fn payload(message: &OutboundMessage) -> Value {
        json!({
            "personalizations": [{"to": [{"email": message.to_address}]}],
            "from": {"email": message.from_address},
            "subject": OUTBOUND_SUBJECT,
            "content": [{"type": "text/plain", "value": message.body}],
        })
    }
}

#[async_trait]
impl ProviderAdapter for EmailAdapter {
    fn name(&self) -> &str {
        "email"
    }

    async fn send(&self, message: &OutboundMessage) -> Result<Value, ProviderError> {
        if !message.attachments.is_empty() {
            warn!(
                count = message.attachments.len(),
                to = %message.to_address,
                "Email attachments are not transmitted"
            );
        }

        let url = format!("{}/mail/send", self.config.base_url);
        debug!(url = %url, to = %message.to_address, "Sending email");

        post_to_provider(
            self.transport.as_ref(),
            self.name(),
            &url,
            &self.config.api_key,
            &Self::payload(message),
        )
        .await
    }

    fn classify(&self, _message: &OutboundMessage) -> ProviderType {
        ProviderType::Email
    }

    fn extract_id(&self, response: &Value) -> String {
        response_text(response, "message_id")
    }

    fn map_status(&self, raw: &str) -> MessageStatus {
        map_email_status(raw)
    }
}
