//! Canonical types shared by every inbound and outbound path.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ── Addresses ───────────────────────────────────────────────────────

/// Kind of participant address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressType {
    Phone,
    Email,
}

impl AddressType {
    /// Anything containing `@` is an email address, everything else a phone number.
    pub fn classify(address: &str) -> Self {
        if address.contains('@') {
            Self::Email
        } else {
            Self::Phone
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Phone => "phone",
            Self::Email => "email",
        }
    }
}

impl fmt::Display for AddressType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AddressType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "phone" => Ok(Self::Phone),
            "email" => Ok(Self::Email),
            other => Err(format!("unknown address type: {other}")),
        }
    }
}

// ── Provider type ───────────────────────────────────────────────────

/// Channel that carried a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderType {
    Sms,
    Mms,
    Email,
}

impl ProviderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sms => "sms",
            Self::Mms => "mms",
            Self::Email => "email",
        }
    }
}

impl fmt::Display for ProviderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sms" => Ok(Self::Sms),
            "mms" => Ok(Self::Mms),
            "email" => Ok(Self::Email),
            other => Err(format!("unknown provider type: {other}")),
        }
    }
}

// ── Direction ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Inbound,
    Outbound,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Inbound => "inbound",
            Self::Outbound => "outbound",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "inbound" => Ok(Self::Inbound),
            "outbound" => Ok(Self::Outbound),
            other => Err(format!(
                "Direction must be 'inbound' or 'outbound', got {other:?}"
            )),
        }
    }
}

// ── Status ──────────────────────────────────────────────────────────

/// Canonical delivery status, independent of provider vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Pending,
    Sent,
    Delivered,
    Failed,
    /// Provider reported a status outside its known vocabulary.
    Unknown,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Sent => "sent",
            Self::Delivered => "delivered",
            Self::Failed => "failed",
            Self::Unknown => "unknown",
        }
    }

    /// Delivered and failed never change again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Delivered | Self::Failed)
    }

    /// Position on the pending → sent → delivered path.
    fn progress(&self) -> u8 {
        match self {
            Self::Unknown => 0,
            Self::Pending => 1,
            Self::Sent => 2,
            Self::Delivered | Self::Failed => 3,
        }
    }

    /// Whether a later status report may replace `self`.
    ///
    /// Status only moves forward: terminal states are final and `Unknown`
    /// never overwrites a known status.
    pub fn can_transition_to(&self, next: MessageStatus) -> bool {
        if self.is_terminal() || next == Self::Unknown || *self == next {
            return false;
        }
        next.progress() > self.progress()
    }
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "sent" => Ok(Self::Sent),
            "delivered" => Ok(Self::Delivered),
            "failed" => Ok(Self::Failed),
            "unknown" => Ok(Self::Unknown),
            other => Err(format!("unknown message status: {other}")),
        }
    }
}

// ── Inbound / outbound requests ─────────────────────────────────────

/// A webhook payload after normalisation, whatever its original shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundMessage {
    pub from_address: String,
    pub to_address: String,
    pub body: String,
    pub attachments: Vec<String>,
    pub provider_message_id: String,
    pub timestamp: DateTime<Utc>,
    pub provider_type: ProviderType,
}

impl InboundMessage {
    /// Sender and recipient, in that order.
    pub fn participants(&self) -> [&str; 2] {
        [&self.from_address, &self.to_address]
    }
}

/// A message the service has been asked to send.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub from_address: String,
    pub to_address: String,
    pub body: String,
    #[serde(default)]
    pub attachments: Vec<String>,
    /// Defaults to "now" when the caller does not supply one.
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

impl OutboundMessage {
    pub fn new(
        from_address: impl Into<String>,
        to_address: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            from_address: from_address.into(),
            to_address: to_address.into(),
            body: body.into(),
            attachments: Vec::new(),
            timestamp: None,
        }
    }

    pub fn with_attachments(mut self, attachments: Vec<String>) -> Self {
        self.attachments = attachments;
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn participants(&self) -> [&str; 2] {
        [&self.from_address, &self.to_address]
    }
}

// ── Persisted records ───────────────────────────────────────────────

/// A stored message, as returned by the API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub provider_type: ProviderType,
    pub provider_message_id: Option<String>,
    pub from_address: String,
    pub to_address: String,
    pub body: String,
    pub attachments: Vec<String>,
    pub direction: Direction,
    pub status: MessageStatus,
    pub message_timestamp: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Message {
    /// Record for a message received through a webhook. Such messages have
    /// already reached us, so they start out delivered.
    pub fn inbound(conversation_id: Uuid, inbound: InboundMessage, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            conversation_id,
            provider_type: inbound.provider_type,
            provider_message_id: Some(inbound.provider_message_id),
            from_address: inbound.from_address,
            to_address: inbound.to_address,
            body: inbound.body,
            attachments: inbound.attachments,
            direction: Direction::Inbound,
            status: MessageStatus::Delivered,
            message_timestamp: inbound.timestamp,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A conversation, identified by its participant set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Sorted participant addresses.
    #[serde(rename = "participants")]
    pub participant_addresses: Vec<String>,
    /// Fingerprint of the participant set this conversation was created for.
    #[serde(skip)]
    pub participant_key: String,
    pub message_count: i64,
    pub last_message_timestamp: Option<DateTime<Utc>>,
}

/// One address attached to a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Participant {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub address: String,
    pub address_type: AddressType,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_address() {
        assert_eq!(AddressType::classify("alice@example.com"), AddressType::Email);
        assert_eq!(AddressType::classify("+15551234567"), AddressType::Phone);
    }

    #[test]
    fn status_moves_forward_only() {
        use MessageStatus::*;

        assert!(Pending.can_transition_to(Sent));
        assert!(Pending.can_transition_to(Delivered));
        assert!(Sent.can_transition_to(Failed));
        assert!(Unknown.can_transition_to(Pending));

        assert!(!Sent.can_transition_to(Pending));
        assert!(!Delivered.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Delivered));
        assert!(!Sent.can_transition_to(Unknown));
        assert!(!Sent.can_transition_to(Sent));
    }

    #[test]
    fn enums_serialize_lowercase() {
        assert_eq!(serde_json::to_string(&ProviderType::Mms).unwrap(), "\"mms\"");
        assert_eq!(serde_json::to_string(&Direction::Outbound).unwrap(), "\"outbound\"");
        assert_eq!(serde_json::to_string(&MessageStatus::Unknown).unwrap(), "\"unknown\"");
    }

    #[test]
    fn direction_parse_rejects_garbage() {
        assert_eq!("inbound".parse::<Direction>().unwrap(), Direction::Inbound);
        assert!("sideways".parse::<Direction>().is_err());
    }

    #[test]
    fn conversation_serializes_participants_field() {
        let conv = Conversation {
            id: Uuid::nil(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            participant_addresses: vec!["+1".into(), "+2".into()],
            participant_key: "k".into(),
            message_count: 0,
            last_message_timestamp: None,
        };
        let json = serde_json::to_value(&conv).unwrap();
        assert_eq!(json["participants"], serde_json::json!(["+1", "+2"]));
        assert!(json.get("participant_key").is_none());
    }
}
