//! `Database` trait: the async repository capability the pipeline runs on.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::pipeline::types::{
    AddressType, Conversation, Direction, Message, MessageStatus, Participant,
};

/// Backend-agnostic persistence for conversations, participants and messages.
#[async_trait]
pub trait Database: Send + Sync {
    /// Run all pending schema migrations.
    async fn run_migrations(&self) -> Result<(), DatabaseError>;

    /// Cheap liveness probe used by the health endpoint.
    async fn ping(&self) -> Result<(), DatabaseError>;

    // ── Conversations ───────────────────────────────────────────────

    /// Insert an empty conversation owning `participant_key`.
    ///
    /// Fails with [`DatabaseError::Constraint`] when another conversation
    /// already owns the key.
    async fn create_conversation(
        &self,
        participant_key: &str,
        now: DateTime<Utc>,
    ) -> Result<Conversation, DatabaseError>;

    async fn get_conversation(&self, id: Uuid) -> Result<Option<Conversation>, DatabaseError>;

    /// Look up the conversation owning a participant-set fingerprint.
    async fn find_conversation_by_key(
        &self,
        participant_key: &str,
    ) -> Result<Option<Conversation>, DatabaseError>;

    /// Conversations with at least one participant among `addresses`.
    async fn find_conversations_by_address(
        &self,
        addresses: &[String],
    ) -> Result<Vec<Conversation>, DatabaseError>;

    /// Newest first, optionally restricted to conversations containing `participant`.
    async fn list_conversations(
        &self,
        limit: u32,
        offset: u32,
        participant: Option<&str>,
    ) -> Result<Vec<Conversation>, DatabaseError>;

    // ── Participants ────────────────────────────────────────────────

    /// Attach `address` to a conversation. Adding an existing
    /// `(conversation_id, address)` pair returns the stored participant.
    async fn add_participant(
        &self,
        conversation_id: Uuid,
        address: &str,
        address_type: AddressType,
        now: DateTime<Utc>,
    ) -> Result<Participant, DatabaseError>;

    async fn list_participants(
        &self,
        conversation_id: Uuid,
    ) -> Result<Vec<Participant>, DatabaseError>;

    // ── Messages ────────────────────────────────────────────────────

    async fn insert_message(&self, message: &Message) -> Result<(), DatabaseError>;

    async fn get_message(&self, id: Uuid) -> Result<Option<Message>, DatabaseError>;

    async fn get_message_by_provider_id(
        &self,
        provider_message_id: &str,
    ) -> Result<Option<Message>, DatabaseError>;

    /// Oldest first by message timestamp.
    async fn list_messages(
        &self,
        conversation_id: Uuid,
        limit: u32,
        offset: u32,
        direction: Option<Direction>,
    ) -> Result<Vec<Message>, DatabaseError>;

    /// Overwrite a message's status. Fails with `NotFound` when no row matches.
    async fn update_message_status(
        &self,
        id: Uuid,
        status: MessageStatus,
        updated_at: DateTime<Utc>,
    ) -> Result<(), DatabaseError>;
}
