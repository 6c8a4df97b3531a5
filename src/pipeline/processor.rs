//! Message pipeline: the inbound, outbound and status-callback flows.
//!
//! Flow:
//! 1. Inbound: normalize → resolve conversation → persist → canonical message
//! 2. Outbound: resolve conversation → provider send (bounded retry) →
//!    extract id/status → persist → canonical message
//! 3. Status callback: map provider status → monotonic update of the stored message

use std::sync::Arc;
use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};
use mockable::Clock;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::channels::{ProviderAdapter, select_adapter};
use crate::config::RetryConfig;
use crate::error::{PipelineError, ProviderError, ValidationError};
use crate::pipeline::resolver::ConversationResolver;
use crate::pipeline::types::{Conversation, Direction, Message, MessageStatus, OutboundMessage};
use crate::pipeline::webhook::WebhookChannel;
use crate::store::Database;

/// Largest page any listing returns.
pub const MAX_PAGE_SIZE: i64 = 1000;

const DEFAULT_CONVERSATION_LIMIT: i64 = 50;
const DEFAULT_MESSAGE_LIMIT: i64 = 100;

/// Filters for conversation listing.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConversationQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    pub participant: Option<String>,
}

/// Filters for a conversation's message listing.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MessageQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    pub direction: Option<String>,
}

/// Validate paging parameters into `(limit, offset)`.
fn page(
    limit: Option<i64>,
    offset: Option<i64>,
    default_limit: i64,
) -> Result<(u32, u32), ValidationError> {
    let limit = limit.unwrap_or(default_limit);
    if !(1..=MAX_PAGE_SIZE).contains(&limit) {
        return Err(ValidationError::InvalidQuery(format!(
            "limit must be between 1 and {MAX_PAGE_SIZE}, got {limit}"
        )));
    }

    let offset = offset.unwrap_or(0);
    let offset = u32::try_from(offset).map_err(|_| {
        ValidationError::InvalidQuery(format!("offset must be non-negative, got {offset}"))
    })?;

    Ok((limit as u32, offset))
}

pub struct MessagePipeline {
    db: Arc<dyn Database>,
    resolver: ConversationResolver,
    sms: Arc<dyn ProviderAdapter>,
    email: Arc<dyn ProviderAdapter>,
    clock: Arc<dyn Clock + Send + Sync>,
    retry_policy: ExponentialBuilder,
}

impl MessagePipeline {
    pub fn new(
        db: Arc<dyn Database>,
        sms: Arc<dyn ProviderAdapter>,
        email: Arc<dyn ProviderAdapter>,
        clock: Arc<dyn Clock + Send + Sync>,
        retry: RetryConfig,
    ) -> Self {
        let retry_policy = ExponentialBuilder::default()
            .with_min_delay(retry.min_delay)
            .with_max_delay(retry.max_delay)
            .with_max_times(retry.max_retries)
            .with_jitter();

        Self {
            resolver: ConversationResolver::new(db.clone(), clock.clone()),
            db,
            sms,
            email,
            clock,
            retry_policy,
        }
    }

    pub fn database(&self) -> &Arc<dyn Database> {
        &self.db
    }

    // ── Inbound ─────────────────────────────────────────────────────

    /// Normalize a webhook payload, attach it to its conversation and store it.
    pub async fn receive_webhook(
        &self,
        channel: WebhookChannel,
        payload: &Value,
    ) -> Result<Message, PipelineError> {
        let inbound = match channel.normalize(payload, self.clock.as_ref()) {
            Ok(inbound) => inbound,
            Err(e) => {
                warn!(channel = ?channel, error = %e, "Rejected inbound webhook");
                return Err(e.into());
            }
        };

        let conversation = self.resolver.resolve(&inbound.participants()).await?;
        let message = Message::inbound(conversation.id, inbound, self.clock.utc());
        self.db.insert_message(&message).await?;

        info!(
            id = %message.id,
            conversation_id = %conversation.id,
            provider_type = %message.provider_type,
            "Stored inbound message"
        );
        Ok(message)
    }

    // ── Outbound ────────────────────────────────────────────────────

    /// Send a message through the provider matching its recipient and store it.
    pub async fn send(&self, request: OutboundMessage) -> Result<Message, PipelineError> {
        validate_outbound(&request)?;

        let adapter = select_adapter(&request.to_address, &self.sms, &self.email);
        let conversation = self.resolver.resolve(&request.participants()).await?;

        let response = self.send_with_retry(adapter.as_ref(), &request).await?;

        let provider_message_id = adapter.extract_id(&response);
        let status = adapter.extract_status(&response);
        let provider_type = adapter.classify(&request);
        let now = self.clock.utc();

        let message = Message {
            id: Uuid::new_v4(),
            conversation_id: conversation.id,
            provider_type,
            provider_message_id: Some(provider_message_id).filter(|id| !id.is_empty()),
            from_address: request.from_address,
            to_address: request.to_address,
            body: request.body,
            attachments: request.attachments,
            direction: Direction::Outbound,
            status,
            message_timestamp: request.timestamp.unwrap_or(now),
            created_at: now,
            updated_at: now,
        };
        self.db.insert_message(&message).await?;

        info!(
            id = %message.id,
            conversation_id = %conversation.id,
            provider = adapter.name(),
            status = %message.status,
            "Stored outbound message"
        );
        Ok(message)
    }

    async fn send_with_retry(
        &self,
        adapter: &dyn ProviderAdapter,
        request: &OutboundMessage,
    ) -> Result<Value, ProviderError> {
        let result = (|| async move { adapter.send(request).await })
            .retry(&self.retry_policy)
            .when(|err: &ProviderError| err.is_retryable())
            .notify(|err, dur: Duration| {
                warn!(
                    provider = adapter.name(),
                    delay = ?dur,
                    "Retrying provider send after error: {err}"
                );
            })
            .await;

        if let Err(e) = &result {
            log_provider_failure(e);
        }
        result
    }

    // ── Status callbacks ────────────────────────────────────────────

    /// Apply a provider delivery-status callback to the stored message.
    ///
    /// Updates that would move the status backwards are ignored and the
    /// unchanged message is returned.
    pub async fn apply_status_callback(
        &self,
        channel: WebhookChannel,
        payload: &Value,
    ) -> Result<Message, PipelineError> {
        let (id_keys, status_keys, adapter): (&[&str], &[&str], _) = match channel {
            WebhookChannel::SmsMms => (
                &["MessageSid", "sid"],
                &["MessageStatus", "status"],
                &self.sms,
            ),
            WebhookChannel::Email => (
                &["message_id", "sg_message_id"],
                &["status", "event"],
                &self.email,
            ),
        };

        if !payload.is_object() {
            return Err(ValidationError::MalformedPayload(
                "status callback must be a JSON object".into(),
            )
            .into());
        }
        let provider_id = first_text(payload, id_keys)
            .ok_or_else(|| ValidationError::MissingField("provider_message_id".into()))?;
        let raw_status = first_text(payload, status_keys)
            .ok_or_else(|| ValidationError::MissingField("status".into()))?;
        let next = adapter.map_status(&raw_status);

        let message = self
            .db
            .get_message_by_provider_id(&provider_id)
            .await?
            .ok_or_else(|| PipelineError::MessageNotFound(provider_id.clone()))?;

        if !message.status.can_transition_to(next) {
            info!(
                id = %message.id,
                current = %message.status,
                reported = %raw_status,
                "Ignoring non-monotonic status update"
            );
            return Ok(message);
        }

        let now = self.clock.utc();
        self.db.update_message_status(message.id, next, now).await?;
        info!(id = %message.id, from = %message.status, to = %next, "Message status updated");

        Ok(Message {
            status: next,
            updated_at: now,
            ..message
        })
    }

    // ── Queries ─────────────────────────────────────────────────────

    pub async fn list_conversations(
        &self,
        query: &ConversationQuery,
    ) -> Result<Vec<Conversation>, PipelineError> {
        let (limit, offset) = page(query.limit, query.offset, DEFAULT_CONVERSATION_LIMIT)?;
        let participant = query.participant.as_deref().filter(|p| !p.is_empty());
        Ok(self.db.list_conversations(limit, offset, participant).await?)
    }

    pub async fn get_conversation(&self, id: Uuid) -> Result<Conversation, PipelineError> {
        self.db
            .get_conversation(id)
            .await?
            .ok_or(PipelineError::ConversationNotFound(id))
    }

    /// Messages of one conversation, oldest first. Unknown conversations are
    /// an error rather than an empty list.
    pub async fn conversation_messages(
        &self,
        conversation_id: Uuid,
        query: &MessageQuery,
    ) -> Result<Vec<Message>, PipelineError> {
        let (limit, offset) = page(query.limit, query.offset, DEFAULT_MESSAGE_LIMIT)?;
        let direction = query
            .direction
            .as_deref()
            .filter(|d| !d.is_empty())
            .map(|d| d.parse::<Direction>().map_err(ValidationError::InvalidQuery))
            .transpose()?;

        self.get_conversation(conversation_id).await?;
        Ok(self
            .db
            .list_messages(conversation_id, limit, offset, direction)
            .await?)
    }

    pub async fn get_message(&self, id: Uuid) -> Result<Message, PipelineError> {
        self.db
            .get_message(id)
            .await?
            .ok_or_else(|| PipelineError::MessageNotFound(id.to_string()))
    }
}

fn validate_outbound(request: &OutboundMessage) -> Result<(), ValidationError> {
    for (name, value) in [
        ("from_address", &request.from_address),
        ("to_address", &request.to_address),
        ("body", &request.body),
    ] {
        if value.trim().is_empty() {
            return Err(ValidationError::MissingField(name.into()));
        }
    }
    Ok(())
}

/// First non-empty string among `keys`.
fn first_text(payload: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|k| payload.get(*k).and_then(Value::as_str))
        .find(|s| !s.is_empty())
        .map(str::to_string)
}

fn log_provider_failure(err: &ProviderError) {
    let provider = err.provider();
    if err.is_rate_limited() {
        warn!(provider, "Provider rate limited the send: {err}");
    } else if err.is_server_error() {
        error!(provider, status = err.status_code(), "Provider server error: {err}");
    } else if let Some(status) = err.status_code() {
        warn!(provider, status, "Provider rejected the send: {err}");
    } else {
        error!(provider, "Provider unreachable: {err}");
    }
    debug!(provider, retryable = err.is_retryable(), "Provider send gave up");
}
