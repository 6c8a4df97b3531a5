//! Conversation identity: one conversation per distinct participant set.
//!
//! Resolution runs find → create → attach:
//!
//! 1. Look for a conversation created for this fingerprint whose participant
//!    set is already complete. A half-attached conversation never matches.
//! 2. Otherwise insert a conversation carrying the set's fingerprint. The
//!    fingerprint column is unique, so of two racing creators one fails.
//! 3. The loser loads the winner's conversation by fingerprint.
//! 4. Either way, every participant is (re-)attached before returning, which
//!    also completes a conversation whose creator died half-way.

use std::sync::Arc;

use mockable::Clock;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::error::{DatabaseError, PipelineError, ValidationError};
use crate::pipeline::types::{AddressType, Conversation};
use crate::store::Database;

/// Sorted, de-duplicated participant addresses.
pub fn participant_set<S: AsRef<str>>(addresses: &[S]) -> Vec<String> {
    let mut set: Vec<String> = addresses.iter().map(|a| a.as_ref().to_string()).collect();
    set.sort();
    set.dedup();
    set
}

/// Stable fingerprint of a participant set: SHA-256 over the JSON array
/// of sorted addresses, hex encoded.
pub fn participant_key(set: &[String]) -> String {
    let encoded = serde_json::Value::from(set.to_vec()).to_string();
    hex::encode(Sha256::digest(encoded.as_bytes()))
}

pub struct ConversationResolver {
    db: Arc<dyn Database>,
    clock: Arc<dyn Clock + Send + Sync>,
}

impl ConversationResolver {
    pub fn new(db: Arc<dyn Database>, clock: Arc<dyn Clock + Send + Sync>) -> Self {
        Self { db, clock }
    }

    /// Map `addresses` to exactly one conversation, creating it if needed.
    pub async fn resolve<S: AsRef<str>>(
        &self,
        addresses: &[S],
    ) -> Result<Conversation, PipelineError> {
        let set = participant_set(addresses);
        if set.is_empty() {
            return Err(ValidationError::MissingField("participants".into()).into());
        }

        let key = participant_key(&set);
        if let Some(existing) = self.find_exact(&set, &key).await? {
            debug!(conversation_id = %existing.id, "Resolved existing conversation");
            return Ok(existing);
        }

        let now = self.clock.utc();
        let conversation_id = match self.db.create_conversation(&key, now).await {
            Ok(created) => {
                info!(
                    conversation_id = %created.id,
                    participants = set.len(),
                    "Created conversation"
                );
                created.id
            }
            Err(DatabaseError::Constraint(reason)) => {
                debug!(reason = %reason, "Conversation already exists for participant set");
                self.db
                    .find_conversation_by_key(&key)
                    .await?
                    .ok_or_else(|| DatabaseError::NotFound {
                        entity: "conversation".into(),
                        id: key.clone(),
                    })?
                    .id
            }
            Err(e) => return Err(e.into()),
        };

        for address in &set {
            self.db
                .add_participant(conversation_id, address, AddressType::classify(address), now)
                .await?;
        }

        self.db
            .get_conversation(conversation_id)
            .await?
            .ok_or(PipelineError::ConversationNotFound(conversation_id))
    }

    async fn find_exact(
        &self,
        set: &[String],
        key: &str,
    ) -> Result<Option<Conversation>, DatabaseError> {
        let candidates = self.db.find_conversations_by_address(set).await?;
        Ok(candidates
            .into_iter()
            .find(|c| c.participant_key == key && c.participant_addresses == set))
    }
}
