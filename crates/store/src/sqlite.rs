//! SQLite backend for pipeline-owned state.
//!
//! One database file with four tables: `conversations`, `messages`,
//! `cache_entries`, and `usage_records`. Schema is created at startup with
//! runtime migrations. The cache put is a single `INSERT OR REPLACE`
//! statement, so readers never observe a half-written entry.

use async_trait::async_trait;
use aula_core::error::StoreError;
use aula_core::message::{Conversation, ConversationId, Message, Role, TenantId, UserId};
use aula_core::store::{CacheEntry, CacheStore, ConversationStore, UsageStore};
use aula_core::usage::{UsageRecord, UsageSource};
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::info;

/// A production SQLite store.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Create a new SQLite store from a file path.
    ///
    /// The database and all tables are created automatically.
    /// Pass `":memory:"` for an in-process ephemeral database (tests).
    pub async fn new(path: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(path)
            .map_err(|e| StoreError::Storage(format!("Invalid SQLite path: {e}")))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .pragma("foreign_keys", "ON");

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Storage(format!("Failed to open SQLite: {e}")))?;

        let store = Self { pool };
        store.run_migrations().await?;
        info!("SQLite store initialized at {path}");
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS conversations (
                id              TEXT PRIMARY KEY,
                tenant          TEXT NOT NULL,
                user            TEXT NOT NULL,
                title           TEXT,
                context_summary TEXT,
                created_at      TEXT NOT NULL,
                updated_at      TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("conversations table: {e}")))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS messages (
                iid              INTEGER PRIMARY KEY AUTOINCREMENT,
                id               TEXT UNIQUE NOT NULL,
                conversation_id  TEXT NOT NULL,
                role             TEXT NOT NULL,
                content          TEXT NOT NULL,
                tool_calls       TEXT NOT NULL DEFAULT '[]',
                tool_call_id     TEXT,
                tool_invocations TEXT NOT NULL DEFAULT '[]',
                created_at       TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("messages table: {e}")))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_messages_conversation
             ON messages (conversation_id, iid)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("messages index: {e}")))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS cache_entries (
                key        TEXT PRIMARY KEY,
                tenant     TEXT NOT NULL,
                response   TEXT NOT NULL,
                tools_used TEXT NOT NULL DEFAULT '[]',
                created_at TEXT NOT NULL,
                expires_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("cache_entries table: {e}")))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS usage_records (
                id              TEXT PRIMARY KEY,
                message_id      TEXT NOT NULL,
                conversation_id TEXT NOT NULL,
                tenant          TEXT NOT NULL,
                model_used      TEXT,
                input_tokens    INTEGER NOT NULL,
                output_tokens   INTEGER NOT NULL,
                cached          INTEGER NOT NULL,
                source          TEXT NOT NULL,
                created_at      TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("usage_records table: {e}")))?;

        Ok(())
    }
}

fn parse_ts(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::QueryFailed(format!("bad timestamp '{raw}': {e}")))
}

fn role_to_str(role: &Role) -> &'static str {
    match role {
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::System => "system",
        Role::Tool => "tool",
    }
}

fn role_from_str(raw: &str) -> Result<Role, StoreError> {
    match raw {
        "user" => Ok(Role::User),
        "assistant" => Ok(Role::Assistant),
        "system" => Ok(Role::System),
        "tool" => Ok(Role::Tool),
        other => Err(StoreError::QueryFailed(format!("unknown role '{other}'"))),
    }
}

fn source_from_str(raw: &str) -> Result<UsageSource, StoreError> {
    match raw {
        "model" => Ok(UsageSource::Model),
        "cache" => Ok(UsageSource::Cache),
        "router" => Ok(UsageSource::Router),
        other => Err(StoreError::QueryFailed(format!("unknown source '{other}'"))),
    }
}

#[async_trait]
impl ConversationStore for SqliteStore {
    async fn create_conversation(&self, conversation: Conversation) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO conversations (id, tenant, user, title, context_summary, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(conversation.id.to_string())
        .bind(conversation.tenant.to_string())
        .bind(conversation.user.to_string())
        .bind(conversation.title)
        .bind(conversation.context_summary)
        .bind(conversation.created_at.to_rfc3339())
        .bind(conversation.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(format!("insert conversation: {e}")))?;
        Ok(())
    }

    async fn get_conversation(
        &self,
        id: &ConversationId,
    ) -> Result<Option<Conversation>, StoreError> {
        let row = sqlx::query(
            "SELECT id, tenant, user, title, context_summary, created_at, updated_at
             FROM conversations WHERE id = ?",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(format!("select conversation: {e}")))?;

        let Some(row) = row else {
            return Ok(None);
        };

        Ok(Some(Conversation {
            id: ConversationId::from(row.get::<String, _>("id").as_str()),
            tenant: TenantId::new(row.get::<String, _>("tenant")),
            user: UserId::new(row.get::<String, _>("user")),
            title: row.get::<Option<String>, _>("title"),
            context_summary: row.get::<Option<String>, _>("context_summary"),
            created_at: parse_ts(&row.get::<String, _>("created_at"))?,
            updated_at: parse_ts(&row.get::<String, _>("updated_at"))?,
        }))
    }

    async fn append_message(&self, message: Message) -> Result<(), StoreError> {
        let tool_calls = serde_json::to_string(&message.tool_calls)
            .map_err(|e| StoreError::QueryFailed(format!("serialize tool_calls: {e}")))?;
        let tool_invocations = serde_json::to_string(&message.tool_invocations)
            .map_err(|e| StoreError::QueryFailed(format!("serialize tool_invocations: {e}")))?;

        sqlx::query(
            "INSERT INTO messages (id, conversation_id, role, content, tool_calls, tool_call_id, tool_invocations, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&message.id)
        .bind(message.conversation_id.to_string())
        .bind(role_to_str(&message.role))
        .bind(&message.content)
        .bind(tool_calls)
        .bind(&message.tool_call_id)
        .bind(tool_invocations)
        .bind(message.created_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(format!("insert message: {e}")))?;

        sqlx::query("UPDATE conversations SET updated_at = ? WHERE id = ?")
            .bind(Utc::now().to_rfc3339())
            .bind(message.conversation_id.to_string())
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("touch conversation: {e}")))?;

        Ok(())
    }

    async fn messages(&self, id: &ConversationId) -> Result<Vec<Message>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, conversation_id, role, content, tool_calls, tool_call_id, tool_invocations, created_at
             FROM messages WHERE conversation_id = ? ORDER BY iid ASC",
        )
        .bind(id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(format!("select messages: {e}")))?;

        let mut messages = Vec::with_capacity(rows.len());
        for row in rows {
            let tool_calls: String = row.get("tool_calls");
            let tool_invocations: String = row.get("tool_invocations");
            messages.push(Message {
                id: row.get("id"),
                conversation_id: ConversationId::from(
                    row.get::<String, _>("conversation_id").as_str(),
                ),
                role: role_from_str(&row.get::<String, _>("role"))?,
                content: row.get("content"),
                tool_calls: serde_json::from_str(&tool_calls)
                    .map_err(|e| StoreError::QueryFailed(format!("parse tool_calls: {e}")))?,
                tool_call_id: row.get::<Option<String>, _>("tool_call_id"),
                tool_invocations: serde_json::from_str(&tool_invocations).map_err(|e| {
                    StoreError::QueryFailed(format!("parse tool_invocations: {e}"))
                })?,
                created_at: parse_ts(&row.get::<String, _>("created_at"))?,
            });
        }
        Ok(messages)
    }

    async fn update_summary(
        &self,
        id: &ConversationId,
        summary: String,
    ) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE conversations SET context_summary = ? WHERE id = ?")
            .bind(summary)
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("update summary: {e}")))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::QueryFailed(format!(
                "conversation {id} does not exist"
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl CacheStore for SqliteStore {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, StoreError> {
        let row = sqlx::query(
            "SELECT key, tenant, response, tools_used, created_at, expires_at
             FROM cache_entries WHERE key = ?",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(format!("select cache entry: {e}")))?;

        let Some(row) = row else {
            return Ok(None);
        };

        let tools_used: String = row.get("tools_used");
        let entry = CacheEntry {
            key: row.get("key"),
            tenant: TenantId::new(row.get::<String, _>("tenant")),
            response: row.get("response"),
            tools_used: serde_json::from_str(&tools_used)
                .map_err(|e| StoreError::QueryFailed(format!("parse tools_used: {e}")))?,
            created_at: parse_ts(&row.get::<String, _>("created_at"))?,
            expires_at: parse_ts(&row.get::<String, _>("expires_at"))?,
        };

        if entry.is_fresh(Utc::now()) {
            Ok(Some(entry))
        } else {
            Ok(None)
        }
    }

    async fn put(&self, entry: CacheEntry) -> Result<(), StoreError> {
        let tools_used = serde_json::to_string(&entry.tools_used)
            .map_err(|e| StoreError::QueryFailed(format!("serialize tools_used: {e}")))?;

        sqlx::query(
            "INSERT OR REPLACE INTO cache_entries (key, tenant, response, tools_used, created_at, expires_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&entry.key)
        .bind(entry.tenant.to_string())
        .bind(&entry.response)
        .bind(tools_used)
        .bind(entry.created_at.to_rfc3339())
        .bind(entry.expires_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(format!("insert cache entry: {e}")))?;
        Ok(())
    }
}

#[async_trait]
impl UsageStore for SqliteStore {
    async fn append(&self, record: UsageRecord) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO usage_records (id, message_id, conversation_id, tenant, model_used, input_tokens, output_tokens, cached, source, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.id)
        .bind(&record.message_id)
        .bind(record.conversation_id.to_string())
        .bind(record.tenant.to_string())
        .bind(&record.model_used)
        .bind(i64::from(record.input_tokens))
        .bind(i64::from(record.output_tokens))
        .bind(i64::from(record.cached))
        .bind(record.source.to_string())
        .bind(record.created_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(format!("insert usage record: {e}")))?;
        Ok(())
    }

    async fn for_tenant(&self, tenant: &TenantId) -> Result<Vec<UsageRecord>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, message_id, conversation_id, tenant, model_used, input_tokens, output_tokens, cached, source, created_at
             FROM usage_records WHERE tenant = ? ORDER BY created_at ASC",
        )
        .bind(tenant.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(format!("select usage records: {e}")))?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            records.push(UsageRecord {
                id: row.get("id"),
                message_id: row.get("message_id"),
                conversation_id: ConversationId::from(
                    row.get::<String, _>("conversation_id").as_str(),
                ),
                tenant: TenantId::new(row.get::<String, _>("tenant")),
                model_used: row.get::<Option<String>, _>("model_used"),
                input_tokens: row.get::<i64, _>("input_tokens") as u32,
                output_tokens: row.get::<i64, _>("output_tokens") as u32,
                cached: row.get::<i64, _>("cached") != 0,
                source: source_from_str(&row.get::<String, _>("source"))?,
                created_at: parse_ts(&row.get::<String, _>("created_at"))?,
            });
        }
        Ok(records)
    }
}
