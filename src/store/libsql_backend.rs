//! libSQL backend: async `Database` trait implementation.
//!
//! Supports local file and in-memory databases over a single shared
//! connection.

use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::pipeline::types::{
    AddressType, Conversation, Direction, Message, MessageStatus, Participant,
};
use crate::store::migrations;
use crate::store::traits::Database;

/// libSQL database backend.
///
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let backend = Self::from_database(db).await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        Self::from_database(db).await
    }

    async fn from_database(db: LibSqlDatabase) -> Result<Self, DatabaseError> {
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        conn.execute("PRAGMA foreign_keys = ON", ())
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to enable foreign keys: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.run_migrations().await?;
        Ok(backend)
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }

    async fn query_conversations(
        &self,
        sql: &str,
        params: impl libsql::params::IntoParams,
        context: &str,
    ) -> Result<Vec<Conversation>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(sql, params)
            .await
            .map_err(|e| DatabaseError::Query(format!("{context}: {e}")))?;

        let mut conversations = Vec::new();
        while let Some(row) = rows.next().await.map_err(row_err)? {
            conversations.push(row_to_conversation(&row)?);
        }
        Ok(conversations)
    }

    async fn query_messages(
        &self,
        sql: &str,
        params: impl libsql::params::IntoParams,
        context: &str,
    ) -> Result<Vec<Message>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(sql, params)
            .await
            .map_err(|e| DatabaseError::Query(format!("{context}: {e}")))?;

        let mut messages = Vec::new();
        while let Some(row) = rows.next().await.map_err(row_err)? {
            messages.push(row_to_message(&row)?);
        }
        Ok(messages)
    }

    async fn get_participant(
        &self,
        conversation_id: Uuid,
        address: &str,
    ) -> Result<Option<Participant>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {PARTICIPANT_COLUMNS} FROM participants
                     WHERE conversation_id = ?1 AND address = ?2"
                ),
                params![conversation_id.to_string(), address],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_participant: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_participant(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_participant: {e}"))),
        }
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Canonical write format. Fixed-width so text ordering matches time ordering.
fn fmt_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn parse_uuid(s: &str, column: &str) -> Result<Uuid, DatabaseError> {
    Uuid::parse_str(s)
        .map_err(|e| DatabaseError::Serialization(format!("{column}: invalid uuid {s:?}: {e}")))
}

fn parse_column<T: FromStr<Err = String>>(s: &str) -> Result<T, DatabaseError> {
    s.parse().map_err(DatabaseError::Serialization)
}

/// Convert `Option<&str>` to libsql Value.
fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

/// Map a libsql error, promoting uniqueness violations to `Constraint`.
fn map_write_error(context: &str, e: libsql::Error) -> DatabaseError {
    let msg = e.to_string();
    if msg.contains("UNIQUE constraint failed") {
        DatabaseError::Constraint(format!("{context}: {msg}"))
    } else {
        DatabaseError::Query(format!("{context}: {msg}"))
    }
}

fn row_err(e: libsql::Error) -> DatabaseError {
    DatabaseError::Query(format!("row parse: {e}"))
}

const CONVERSATION_SELECT: &str = "
    SELECT
        c.id,
        c.participant_key,
        c.created_at,
        c.updated_at,
        (SELECT COUNT(*) FROM messages m WHERE m.conversation_id = c.id) AS message_count,
        (SELECT MAX(m.message_timestamp) FROM messages m WHERE m.conversation_id = c.id)
            AS last_message_timestamp,
        (SELECT json_group_array(p.address) FROM participants p
            WHERE p.conversation_id = c.id) AS participants
    FROM conversations c";

const PARTICIPANT_COLUMNS: &str = "id, conversation_id, address, address_type, created_at";

const MESSAGE_COLUMNS: &str = "id, conversation_id, provider_type, provider_message_id, \
    from_address, to_address, body, attachments, direction, status, message_timestamp, \
    created_at, updated_at";

/// Map a libsql Row to a Conversation.
///
/// Column order matches CONVERSATION_SELECT:
/// 0:id, 1:participant_key, 2:created_at, 3:updated_at, 4:message_count,
/// 5:last_message_timestamp, 6:participants (JSON array)
fn row_to_conversation(row: &libsql::Row) -> Result<Conversation, DatabaseError> {
    let id_str: String = row.get(0).map_err(row_err)?;
    let participant_key: String = row.get(1).map_err(row_err)?;
    let created_str: String = row.get(2).map_err(row_err)?;
    let updated_str: String = row.get(3).map_err(row_err)?;
    let message_count: i64 = row.get(4).unwrap_or(0);
    let last_str: Option<String> = row.get(5).ok();
    let participants_json: String = row.get(6).unwrap_or_else(|_| "[]".to_string());

    let mut participant_addresses: Vec<String> = serde_json::from_str(&participants_json)
        .map_err(|e| DatabaseError::Serialization(format!("conversation participants: {e}")))?;
    participant_addresses.sort();

    Ok(Conversation {
        id: parse_uuid(&id_str, "conversations.id")?,
        created_at: parse_datetime(&created_str),
        updated_at: parse_datetime(&updated_str),
        participant_addresses,
        participant_key,
        message_count,
        last_message_timestamp: last_str.as_deref().map(parse_datetime),
    })
}

fn row_to_participant(row: &libsql::Row) -> Result<Participant, DatabaseError> {
    let id_str: String = row.get(0).map_err(row_err)?;
    let conversation_str: String = row.get(1).map_err(row_err)?;
    let type_str: String = row.get(3).map_err(row_err)?;
    let created_str: String = row.get(4).map_err(row_err)?;

    Ok(Participant {
        id: parse_uuid(&id_str, "participants.id")?,
        conversation_id: parse_uuid(&conversation_str, "participants.conversation_id")?,
        address: row.get(2).map_err(row_err)?,
        address_type: parse_column(&type_str)?,
        created_at: parse_datetime(&created_str),
    })
}

fn row_to_message(row: &libsql::Row) -> Result<Message, DatabaseError> {
    let id_str: String = row.get(0).map_err(row_err)?;
    let conversation_str: String = row.get(1).map_err(row_err)?;
    let provider_str: String = row.get(2).map_err(row_err)?;
    let attachments_str: String = row.get(7).unwrap_or_else(|_| "[]".to_string());
    let direction_str: String = row.get(8).map_err(row_err)?;
    let status_str: String = row.get(9).map_err(row_err)?;
    let timestamp_str: String = row.get(10).map_err(row_err)?;
    let created_str: String = row.get(11).map_err(row_err)?;
    let updated_str: String = row.get(12).map_err(row_err)?;

    let attachments: Vec<String> = serde_json::from_str(&attachments_str)
        .map_err(|e| DatabaseError::Serialization(format!("messages.attachments: {e}")))?;

    Ok(Message {
        id: parse_uuid(&id_str, "messages.id")?,
        conversation_id: parse_uuid(&conversation_str, "messages.conversation_id")?,
        provider_type: parse_column(&provider_str)?,
        provider_message_id: row.get(3).ok(),
        from_address: row.get(4).map_err(row_err)?,
        to_address: row.get(5).map_err(row_err)?,
        body: row.get(6).map_err(row_err)?,
        attachments,
        direction: parse_column(&direction_str)?,
        status: parse_column(&status_str)?,
        message_timestamp: parse_datetime(&timestamp_str),
        created_at: parse_datetime(&created_str),
        updated_at: parse_datetime(&updated_str),
    })
}

// ── Trait implementation ────────────────────────────────────────────

#[async_trait]
impl Database for LibSqlBackend {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()).await
    }

    async fn ping(&self) -> Result<(), DatabaseError> {
        let mut rows = self
            .conn()
            .query("SELECT 1", ())
            .await
            .map_err(|e| DatabaseError::Query(format!("ping: {e}")))?;
        rows.next()
            .await
            .map_err(|e| DatabaseError::Query(format!("ping: {e}")))?;
        Ok(())
    }

    // ── Conversations ───────────────────────────────────────────────

    async fn create_conversation(
        &self,
        participant_key: &str,
        now: DateTime<Utc>,
    ) -> Result<Conversation, DatabaseError> {
        let id = Uuid::new_v4();
        let ts = fmt_datetime(&now);
        self.conn()
            .execute(
                "INSERT INTO conversations (id, participant_key, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?3)",
                params![id.to_string(), participant_key, ts],
            )
            .await
            .map_err(|e| map_write_error("create_conversation", e))?;

        debug!(conversation_id = %id, "Conversation inserted into DB");
        Ok(Conversation {
            id,
            created_at: now,
            updated_at: now,
            participant_addresses: Vec::new(),
            participant_key: participant_key.to_string(),
            message_count: 0,
            last_message_timestamp: None,
        })
    }

    async fn get_conversation(&self, id: Uuid) -> Result<Option<Conversation>, DatabaseError> {
        let mut found = self
            .query_conversations(
                &format!("{CONVERSATION_SELECT} WHERE c.id = ?1"),
                params![id.to_string()],
                "get_conversation",
            )
            .await?;
        Ok(found.pop())
    }

    async fn find_conversation_by_key(
        &self,
        participant_key: &str,
    ) -> Result<Option<Conversation>, DatabaseError> {
        let mut found = self
            .query_conversations(
                &format!("{CONVERSATION_SELECT} WHERE c.participant_key = ?1"),
                params![participant_key],
                "find_conversation_by_key",
            )
            .await?;
        Ok(found.pop())
    }

    async fn find_conversations_by_address(
        &self,
        addresses: &[String],
    ) -> Result<Vec<Conversation>, DatabaseError> {
        if addresses.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = (1..=addresses.len())
            .map(|i| format!("?{i}"))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "{CONVERSATION_SELECT}
             WHERE c.id IN (
                 SELECT conversation_id FROM participants WHERE address IN ({placeholders})
             )
             ORDER BY c.created_at ASC"
        );
        let values: Vec<libsql::Value> = addresses
            .iter()
            .map(|a| libsql::Value::Text(a.clone()))
            .collect();

        self.query_conversations(
            &sql,
            libsql::params::Params::Positional(values),
            "find_conversations_by_address",
        )
        .await
    }

    async fn list_conversations(
        &self,
        limit: u32,
        offset: u32,
        participant: Option<&str>,
    ) -> Result<Vec<Conversation>, DatabaseError> {
        match participant {
            Some(address) => {
                self.query_conversations(
                    &format!(
                        "{CONVERSATION_SELECT}
                         WHERE EXISTS (SELECT 1 FROM participants p
                                       WHERE p.conversation_id = c.id AND p.address = ?1)
                         ORDER BY c.created_at DESC LIMIT ?2 OFFSET ?3"
                    ),
                    params![address, i64::from(limit), i64::from(offset)],
                    "list_conversations",
                )
                .await
            }
            None => {
                self.query_conversations(
                    &format!("{CONVERSATION_SELECT} ORDER BY c.created_at DESC LIMIT ?1 OFFSET ?2"),
                    params![i64::from(limit), i64::from(offset)],
                    "list_conversations",
                )
                .await
            }
        }
    }

    // ── Participants ────────────────────────────────────────────────

    async fn add_participant(
        &self,
        conversation_id: Uuid,
        address: &str,
        address_type: AddressType,
        now: DateTime<Utc>,
    ) -> Result<Participant, DatabaseError> {
        let inserted = self
            .conn()
            .execute(
                "INSERT INTO participants (id, conversation_id, address, address_type, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT (conversation_id, address) DO NOTHING",
                params![
                    Uuid::new_v4().to_string(),
                    conversation_id.to_string(),
                    address,
                    address_type.as_str(),
                    fmt_datetime(&now),
                ],
            )
            .await
            .map_err(|e| map_write_error("add_participant", e))?;

        if inserted > 0 {
            debug!(conversation_id = %conversation_id, address, "Participant added");
        }

        self.get_participant(conversation_id, address)
            .await?
            .ok_or_else(|| DatabaseError::NotFound {
                entity: "participant".to_string(),
                id: format!("{conversation_id}/{address}"),
            })
    }

    async fn list_participants(
        &self,
        conversation_id: Uuid,
    ) -> Result<Vec<Participant>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {PARTICIPANT_COLUMNS} FROM participants
                     WHERE conversation_id = ?1 ORDER BY address ASC"
                ),
                params![conversation_id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_participants: {e}")))?;

        let mut participants = Vec::new();
        while let Some(row) = rows.next().await.map_err(row_err)? {
            participants.push(row_to_participant(&row)?);
        }
        Ok(participants)
    }

    // ── Messages ────────────────────────────────────────────────────

    async fn insert_message(&self, message: &Message) -> Result<(), DatabaseError> {
        let attachments = serde_json::to_string(&message.attachments)
            .map_err(|e| DatabaseError::Serialization(format!("insert_message: {e}")))?;

        self.conn()
            .execute(
                &format!(
                    "INSERT INTO messages ({MESSAGE_COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)"
                ),
                params![
                    message.id.to_string(),
                    message.conversation_id.to_string(),
                    message.provider_type.as_str(),
                    opt_text(message.provider_message_id.as_deref()),
                    message.from_address.as_str(),
                    message.to_address.as_str(),
                    message.body.as_str(),
                    attachments,
                    message.direction.as_str(),
                    message.status.as_str(),
                    fmt_datetime(&message.message_timestamp),
                    fmt_datetime(&message.created_at),
                    fmt_datetime(&message.updated_at),
                ],
            )
            .await
            .map_err(|e| map_write_error("insert_message", e))?;

        debug!(
            id = %message.id,
            conversation_id = %message.conversation_id,
            direction = %message.direction,
            "Message inserted into DB"
        );
        Ok(())
    }

    async fn get_message(&self, id: Uuid) -> Result<Option<Message>, DatabaseError> {
        let mut found = self
            .query_messages(
                &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"),
                params![id.to_string()],
                "get_message",
            )
            .await?;
        Ok(found.pop())
    }

    async fn get_message_by_provider_id(
        &self,
        provider_message_id: &str,
    ) -> Result<Option<Message>, DatabaseError> {
        let mut found = self
            .query_messages(
                &format!(
                    "SELECT {MESSAGE_COLUMNS} FROM messages
                     WHERE provider_message_id = ?1 ORDER BY created_at DESC LIMIT 1"
                ),
                params![provider_message_id],
                "get_message_by_provider_id",
            )
            .await?;
        Ok(found.pop())
    }

    async fn list_messages(
        &self,
        conversation_id: Uuid,
        limit: u32,
        offset: u32,
        direction: Option<Direction>,
    ) -> Result<Vec<Message>, DatabaseError> {
        let cid = conversation_id.to_string();
        match direction {
            Some(direction) => {
                self.query_messages(
                    &format!(
                        "SELECT {MESSAGE_COLUMNS} FROM messages
                         WHERE conversation_id = ?1 AND direction = ?2
                         ORDER BY message_timestamp ASC, created_at ASC LIMIT ?3 OFFSET ?4"
                    ),
                    params![cid, direction.as_str(), i64::from(limit), i64::from(offset)],
                    "list_messages",
                )
                .await
            }
            None => {
                self.query_messages(
                    &format!(
                        "SELECT {MESSAGE_COLUMNS} FROM messages
                         WHERE conversation_id = ?1
                         ORDER BY message_timestamp ASC, created_at ASC LIMIT ?2 OFFSET ?3"
                    ),
                    params![cid, i64::from(limit), i64::from(offset)],
                    "list_messages",
                )
                .await
            }
        }
    }

    async fn update_message_status(
        &self,
        id: Uuid,
        status: MessageStatus,
        updated_at: DateTime<Utc>,
    ) -> Result<(), DatabaseError> {
        let changed = self
            .conn()
            .execute(
                "UPDATE messages SET status = ?1, updated_at = ?2 WHERE id = ?3",
                params![status.as_str(), fmt_datetime(&updated_at), id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("update_message_status: {e}")))?;

        if changed == 0 {
            return Err(DatabaseError::NotFound {
                entity: "message".to_string(),
                id: id.to_string(),
            });
        }

        debug!(id = %id, status = %status, "Message status updated in DB");
        Ok(())
    }
}
