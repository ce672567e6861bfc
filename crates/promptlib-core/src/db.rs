//! SQLite persistence for conversations and messages.

use crate::{PersistenceAdapter, PromptlibError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use promptlib_types::{
    Conversation, ConversationMessage, ConversationPatch, ConversationStatus, MessageRole,
    NewConversation, NewConversationMessage,
};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, TransactionBehavior};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, info};
use uuid::Uuid;

/// SQLite-based conversation store.
pub struct ConversationStore {
    conn: Mutex<Connection>,
}

impl ConversationStore {
    /// Open or create the database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        info!(target: "promptlib::store", "Opened conversation store at {}", path.display());
        Self::from_connection(conn)
    }

    /// Create a store over an existing connection.
    pub fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.lock();
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS conversations (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                model_name TEXT NOT NULL,
                model_provider TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'active',
                is_favorite INTEGER NOT NULL DEFAULT 0,
                token_usage INTEGER NOT NULL DEFAULT 0,
                execution_duration_ms INTEGER NOT NULL DEFAULT 0,
                estimated_cost REAL NOT NULL DEFAULT 0.0,
                original_prompt_content TEXT NOT NULL DEFAULT '',
                metadata TEXT NOT NULL DEFAULT '{}',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_conversations_updated_at
                ON conversations(updated_at);

            CREATE TABLE IF NOT EXISTS conversation_messages (
                id TEXT PRIMARY KEY,
                conversation_id TEXT NOT NULL,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                token_count INTEGER NOT NULL DEFAULT 0,
                message_order INTEGER NOT NULL,
                metadata TEXT NOT NULL DEFAULT '{}',
                created_at TEXT NOT NULL,
                FOREIGN KEY (conversation_id) REFERENCES conversations(id) ON DELETE CASCADE
            );

            CREATE UNIQUE INDEX IF NOT EXISTS idx_messages_conversation_order
                ON conversation_messages(conversation_id, message_order);
            "#,
        )?;
        Ok(())
    }

    /// Insert a new conversation.
    pub fn insert_conversation(&self, fields: NewConversation) -> Result<Conversation> {
        let now = Utc::now();
        let conversation = Conversation {
            id: Uuid::new_v4(),
            title: fields.title,
            model_name: fields.model_name,
            model_provider: fields.model_provider,
            status: ConversationStatus::Active,
            is_favorite: false,
            token_usage: 0,
            execution_duration_ms: 0,
            estimated_cost: 0.0,
            original_prompt_content: fields.original_prompt_content,
            metadata: normalize_metadata(fields.metadata),
            created_at: now,
            updated_at: now,
        };

        let conn = self.lock();
        conn.execute(
            r#"
            INSERT INTO conversations (
                id, title, model_name, model_provider, status, is_favorite,
                token_usage, execution_duration_ms, estimated_cost,
                original_prompt_content, metadata, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
            "#,
            params![
                conversation.id.to_string(),
                conversation.title,
                conversation.model_name,
                conversation.model_provider,
                conversation.status.as_str(),
                conversation.is_favorite as i32,
                conversation.token_usage as i64,
                conversation.execution_duration_ms as i64,
                conversation.estimated_cost,
                conversation.original_prompt_content,
                serde_json::to_string(&conversation.metadata)?,
                conversation.created_at.to_rfc3339(),
                conversation.updated_at.to_rfc3339(),
            ],
        )?;

        debug!(target: "promptlib::store", "Created conversation {}", conversation.id);
        Ok(conversation)
    }

    /// Get a conversation by ID.
    pub fn conversation(&self, id: Uuid) -> Result<Option<Conversation>> {
        let conn = self.lock();
        Self::conversation_with(&conn, id)
    }

    fn conversation_with(conn: &Connection, id: Uuid) -> Result<Option<Conversation>> {
        let conversation = conn
            .query_row(
                "SELECT * FROM conversations WHERE id = ?1",
                params![id.to_string()],
                |row| Self::row_to_conversation(row),
            )
            .optional()?;
        Ok(conversation)
    }

    /// List conversations that are not deleted, most recently updated first.
    pub fn list_conversations(&self, limit: u32, offset: u32) -> Result<Vec<Conversation>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            r#"
            SELECT * FROM conversations
            WHERE status != 'deleted'
            ORDER BY updated_at DESC
            LIMIT ?1 OFFSET ?2
            "#,
        )?;
        let conversations = stmt
            .query_map(params![limit as i64, offset as i64], |row| Self::row_to_conversation(row))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(conversations)
    }

    /// Apply a partial update and return the stored result.
    pub fn patch_conversation(&self, id: Uuid, patch: ConversationPatch) -> Result<Conversation> {
        let conn = self.lock();
        let mut conversation =
            Self::conversation_with(&conn, id)?.ok_or(PromptlibError::ConversationNotFound(id))?;

        if let Some(title) = patch.title {
            conversation.title = title;
        }
        if let Some(status) = patch.status {
            conversation.status = status;
        }
        if let Some(is_favorite) = patch.is_favorite {
            conversation.is_favorite = is_favorite;
        }
        if let Some(token_usage) = patch.token_usage {
            conversation.token_usage = token_usage;
        }
        if let Some(duration) = patch.execution_duration_ms {
            conversation.execution_duration_ms = duration;
        }
        if let Some(cost) = patch.estimated_cost {
            conversation.estimated_cost = cost;
        }
        if let Some(metadata) = patch.metadata {
            conversation.metadata = normalize_metadata(metadata);
        }
        conversation.updated_at = Utc::now();

        conn.execute(
            r#"
            UPDATE conversations SET
                title = ?1,
                status = ?2,
                is_favorite = ?3,
                token_usage = ?4,
                execution_duration_ms = ?5,
                estimated_cost = ?6,
                metadata = ?7,
                updated_at = ?8
            WHERE id = ?9
            "#,
            params![
                conversation.title,
                conversation.status.as_str(),
                conversation.is_favorite as i32,
                conversation.token_usage as i64,
                conversation.execution_duration_ms as i64,
                conversation.estimated_cost,
                serde_json::to_string(&conversation.metadata)?,
                conversation.updated_at.to_rfc3339(),
                id.to_string(),
            ],
        )?;

        Ok(conversation)
    }

    /// Insert a message, assigning the next `message_order` for its conversation.
    ///
    /// The order is read and written inside one immediate transaction, so writers sharing the
    /// database file are serialized by SQLite's write lock.
    pub fn insert_message(&self, message: NewConversationMessage) -> Result<ConversationMessage> {
        let mut conn = self.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let exists: bool = tx.query_row(
            "SELECT COUNT(*) > 0 FROM conversations WHERE id = ?1",
            params![message.conversation_id.to_string()],
            |row| row.get(0),
        )?;
        if !exists {
            return Err(PromptlibError::ConversationNotFound(message.conversation_id));
        }

        let next_order: i64 = tx.query_row(
            "SELECT COALESCE(MAX(message_order), 0) + 1 FROM conversation_messages WHERE conversation_id = ?1",
            params![message.conversation_id.to_string()],
            |row| row.get(0),
        )?;

        let stored = ConversationMessage {
            id: Uuid::new_v4(),
            conversation_id: message.conversation_id,
            role: message.role,
            content: message.content,
            token_count: message.token_count,
            message_order: next_order as u32,
            metadata: normalize_metadata(message.metadata),
            created_at: Utc::now(),
        };

        let inserted = tx.execute(
            r#"
            INSERT INTO conversation_messages (
                id, conversation_id, role, content, token_count, message_order, metadata, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
            params![
                stored.id.to_string(),
                stored.conversation_id.to_string(),
                stored.role.as_str(),
                stored.content,
                stored.token_count as i64,
                next_order,
                serde_json::to_string(&stored.metadata)?,
                stored.created_at.to_rfc3339(),
            ],
        );
        match inserted {
            Ok(_) => {}
            Err(rusqlite::Error::SqliteFailure(err, _)) if err.code == ErrorCode::ConstraintViolation => {
                return Err(PromptlibError::OrderConflict(stored.conversation_id));
            }
            Err(e) => return Err(e.into()),
        }

        tx.execute(
            "UPDATE conversations SET updated_at = ?1 WHERE id = ?2",
            params![stored.created_at.to_rfc3339(), stored.conversation_id.to_string()],
        )?;
        tx.commit()?;

        debug!(
            target: "promptlib::store",
            "Stored {} message #{} in conversation {}",
            stored.role.as_str(),
            stored.message_order,
            stored.conversation_id
        );
        Ok(stored)
    }

    /// Messages of a conversation, ordered by `message_order`.
    pub fn messages(&self, conversation_id: Uuid) -> Result<Vec<ConversationMessage>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            r#"
            SELECT * FROM conversation_messages
            WHERE conversation_id = ?1
            ORDER BY message_order ASC
            "#,
        )?;
        let messages = stmt
            .query_map(params![conversation_id.to_string()], |row| Self::row_to_message(row))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(messages)
    }

    /// Overwrite the token count of the most recent user message.
    pub fn set_last_user_message_tokens(&self, conversation_id: Uuid, tokens: u32) -> Result<()> {
        let conn = self.lock();
        let updated = conn.execute(
            r#"
            UPDATE conversation_messages SET token_count = ?1
            WHERE id = (
                SELECT id FROM conversation_messages
                WHERE conversation_id = ?2 AND role = 'user'
                ORDER BY message_order DESC
                LIMIT 1
            )
            "#,
            params![tokens as i64, conversation_id.to_string()],
        )?;
        if updated == 0 {
            return Err(PromptlibError::UserMessageNotFound(conversation_id));
        }
        Ok(())
    }

    fn row_to_conversation(row: &rusqlite::Row) -> rusqlite::Result<Conversation> {
        let id: String = row.get("id")?;
        let status: String = row.get("status")?;
        let is_favorite: i32 = row.get("is_favorite")?;
        let token_usage: i64 = row.get("token_usage")?;
        let execution_duration_ms: i64 = row.get("execution_duration_ms")?;
        let metadata: String = row.get("metadata")?;
        let created_at: String = row.get("created_at")?;
        let updated_at: String = row.get("updated_at")?;

        Ok(Conversation {
            id: Uuid::parse_str(&id).unwrap_or_default(),
            title: row.get("title")?,
            model_name: row.get("model_name")?,
            model_provider: row.get("model_provider")?,
            status: ConversationStatus::parse(&status),
            is_favorite: is_favorite != 0,
            token_usage: token_usage.max(0) as u64,
            execution_duration_ms: execution_duration_ms.max(0) as u64,
            estimated_cost: row.get("estimated_cost")?,
            original_prompt_content: row.get("original_prompt_content")?,
            metadata: serde_json::from_str(&metadata).unwrap_or_else(|_| empty_metadata()),
            created_at: parse_timestamp(&created_at),
            updated_at: parse_timestamp(&updated_at),
        })
    }

    fn row_to_message(row: &rusqlite::Row) -> rusqlite::Result<ConversationMessage> {
        let id: String = row.get("id")?;
        let conversation_id: String = row.get("conversation_id")?;
        let role: String = row.get("role")?;
        let token_count: i64 = row.get("token_count")?;
        let message_order: i64 = row.get("message_order")?;
        let metadata: String = row.get("metadata")?;
        let created_at: String = row.get("created_at")?;

        Ok(ConversationMessage {
            id: Uuid::parse_str(&id).unwrap_or_default(),
            conversation_id: Uuid::parse_str(&conversation_id).unwrap_or_default(),
            role: MessageRole::parse(&role).unwrap_or(MessageRole::User),
            content: row.get("content")?,
            token_count: token_count.max(0) as u32,
            message_order: message_order.max(0) as u32,
            metadata: serde_json::from_str(&metadata).unwrap_or_else(|_| empty_metadata()),
            created_at: parse_timestamp(&created_at),
        })
    }
}

fn empty_metadata() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

fn normalize_metadata(value: serde_json::Value) -> serde_json::Value {
    if value.is_null() {
        empty_metadata()
    } else {
        value
    }
}

fn parse_timestamp(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_default()
}

#[async_trait]
impl PersistenceAdapter for ConversationStore {
    async fn create_conversation(&self, fields: NewConversation) -> Result<Conversation> {
        self.insert_conversation(fields)
    }

    async fn get_conversation(&self, id: Uuid) -> Result<Option<Conversation>> {
        self.conversation(id)
    }

    async fn update_conversation(&self, id: Uuid, patch: ConversationPatch) -> Result<Conversation> {
        self.patch_conversation(id, patch)
    }

    async fn list_conversations(&self, limit: u32, offset: u32) -> Result<Vec<Conversation>> {
        ConversationStore::list_conversations(self, limit, offset)
    }

    async fn create_conversation_message(
        &self,
        message: NewConversationMessage,
    ) -> Result<ConversationMessage> {
        self.insert_message(message)
    }

    async fn get_messages_by_conversation_id(&self, id: Uuid) -> Result<Vec<ConversationMessage>> {
        self.messages(id)
    }

    async fn update_user_message_tokens(&self, conversation_id: Uuid, prompt_tokens: u32) -> Result<()> {
        self.set_last_user_message_tokens(conversation_id, prompt_tokens)
    }
}
