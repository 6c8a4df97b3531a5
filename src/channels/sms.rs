//! SMS/MMS provider adapter (Twilio-shaped API).

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::debug;

use crate::channels::{HttpTransport, ProviderAdapter, post_to_provider, response_text};
use crate::config::ProviderConfig;
use crate::error::ProviderError;
use crate::pipeline::types::{MessageStatus, OutboundMessage, ProviderType};

/// Canonical status for an SMS provider status word.
pub fn map_sms_status(raw: &str) -> MessageStatus {
    match raw {
        "queued" | "sending" => MessageStatus::Pending,
        "sent" => MessageStatus::Sent,
        "delivered" => MessageStatus::Delivered,
        "undelivered" | "failed" => MessageStatus::Failed,
        _ => MessageStatus::Unknown,
    }
}

pub struct SmsMmsAdapter {
    config: ProviderConfig,
    transport: Arc<dyn HttpTransport>,
}

impl SmsMmsAdapter {
    pub fn new(config: ProviderConfig, transport: Arc<dyn HttpTransport>) -> Self {
        Self { config, transport }
    }

    fn payload(message: &OutboundMessage) -> Value {
        json!({
            "From": message.from_address,
            "To": message.to_address,
            "Body": message.body,
            "MediaUrl": message.attachments,
        })
    }
}

#[async_trait]
impl ProviderAdapter for SmsMmsAdapter {
    fn name(&self) -> &str {
        "sms"
    }

    async fn send(&self, message: &OutboundMessage) -> Result<Value, ProviderError> {
        let url = format!("{}/messages", self.config.base_url);
        debug!(
            url = %url,
            to = %message.to_address,
            media = message.attachments.len(),
            "Sending SMS/MMS"
        );

        post_to_provider(
            self.transport.as_ref(),
            self.name(),
            &url,
            &self.config.api_key,
            &Self::payload(message),
        )
        .await
    }

    fn classify(&self, message: &OutboundMessage) -> ProviderType {
        if message.attachments.is_empty() {
            ProviderType::Sms
        } else {
            ProviderType::Mms
        }
    }

    fn extract_id(&self, response: &Value) -> String {
        response_text(response, "sid")
    }

    fn map_status(&self, raw: &str) -> MessageStatus {
        map_sms_status(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingTransport;

    fn adapter(transport: Arc<RecordingTransport>) -> SmsMmsAdapter {
        SmsMmsAdapter::new(ProviderConfig::new("http://sms.test/", "secret"), transport)
    }

    #[test]
    fn status_table() {
        assert_eq!(map_sms_status("queued"), MessageStatus::Pending);
        assert_eq!(map_sms_status("sending"), MessageStatus::Pending);
        assert_eq!(map_sms_status("sent"), MessageStatus::Sent);
        assert_eq!(map_sms_status("delivered"), MessageStatus::Delivered);
        assert_eq!(map_sms_status("undelivered"), MessageStatus::Failed);
        assert_eq!(map_sms_status("failed"), MessageStatus::Failed);
        assert_eq!(map_sms_status("receiving"), MessageStatus::Unknown);
    }

    #[test]
    fn extract_status_from_response() {
        let a = adapter(Arc::new(RecordingTransport::new()));
        assert_eq!(a.extract_status(&json!({"status": "queued"})), MessageStatus::Pending);
        assert_eq!(a.extract_status(&json!({})), MessageStatus::Unknown);
        assert_eq!(a.extract_id(&json!({"sid": "SM123"})), "SM123");
    }

    #[test]
    fn classify_by_attachments() {
        let a = adapter(Arc::new(RecordingTransport::new()));
        let plain = OutboundMessage::new("+1", "+2", "hi");
        let media = plain.clone().with_attachments(vec!["http://x/1.png".into()]);
        assert_eq!(a.classify(&plain), ProviderType::Sms);
        assert_eq!(a.classify(&media), ProviderType::Mms);
    }

    #[tokio::test]
    async fn send_posts_provider_payload_with_bearer() {
        let transport = Arc::new(RecordingTransport::new());
        transport.push_json(201, json!({"sid": "SM1", "status": "queued"}));
        let a = adapter(transport.clone());

        let msg =
            OutboundMessage::new("+1", "+2", "hi").with_attachments(vec!["http://x/1.png".into()]);
        let resp = a.send(&msg).await.unwrap();
        assert_eq!(resp["sid"], "SM1");

        let requests = transport.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].url, "http://sms.test/messages");
        assert_eq!(
            requests[0].payload,
            json!({"From": "+1", "To": "+2", "Body": "hi", "MediaUrl": ["http://x/1.png"]})
        );
        assert_eq!(requests[0].header("Authorization"), Some("Bearer secret"));
    }

    #[tokio::test]
    async fn send_surfaces_status_errors() {
        let transport = Arc::new(RecordingTransport::new());
        transport.push_raw(429, "slow down");
        let a = adapter(transport);

        let err = a.send(&OutboundMessage::new("+1", "+2", "hi")).await.unwrap_err();
        assert!(err.is_rate_limited());
        assert_eq!(err.status_code(), Some(429));
    }

    #[tokio::test]
    async fn non_json_success_is_transport_error() {
        let transport = Arc::new(RecordingTransport::new());
        transport.push_raw(200, "<html>ok</html>");
        let a = adapter(transport);

        let err = a.send(&OutboundMessage::new("+1", "+2", "hi")).await.unwrap_err();
        assert!(matches!(err, ProviderError::Transport { .. }));
    }
}
