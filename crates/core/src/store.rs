//! Store traits — the persistence seams the pipeline owns.
//!
//! Three narrow traits, implemented together by the backends in
//! `aula-store`: conversations and their append-only messages, the
//! tenant-scoped response cache, and the append-only usage ledger rows.
//! Implementations must support concurrent access from many turns; the
//! cache put must be atomic (a read never observes a half-written entry).

use crate::error::StoreError;
use crate::message::{Conversation, ConversationId, Message, TenantId};
use crate::usage::UsageRecord;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A cached response row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    /// SHA-256 over (tenant id, normalized message), hex-encoded.
    pub key: String,

    /// The tenant the entry belongs to.
    pub tenant: TenantId,

    /// The full response text.
    pub response: String,

    /// Names of the tools used to produce the response.
    pub tools_used: Vec<String>,

    /// When the entry was written.
    pub created_at: DateTime<Utc>,

    /// When the entry stops being served.
    pub expires_at: DateTime<Utc>,
}

impl CacheEntry {
    /// Whether the entry is still within its validity window.
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

/// Conversation and message persistence.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Create a new conversation row.
    async fn create_conversation(&self, conversation: Conversation) -> Result<(), StoreError>;

    /// Fetch a conversation by id.
    async fn get_conversation(
        &self,
        id: &ConversationId,
    ) -> Result<Option<Conversation>, StoreError>;

    /// Append a message to its conversation. Also bumps `updated_at`.
    async fn append_message(&self, message: Message) -> Result<(), StoreError>;

    /// All messages of a conversation in chronological order.
    async fn messages(&self, id: &ConversationId) -> Result<Vec<Message>, StoreError>;

    /// Replace the conversation's rolling context summary.
    async fn update_summary(
        &self,
        id: &ConversationId,
        summary: String,
    ) -> Result<(), StoreError>;
}

/// Tenant-scoped exact-match response cache.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Fetch a fresh entry by key. Expired entries are treated as absent.
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, StoreError>;

    /// Insert or overwrite an entry. Must be atomic: concurrent readers see
    /// either the old entry or the new one, never a mix.
    async fn put(&self, entry: CacheEntry) -> Result<(), StoreError>;
}

/// Append-only usage ledger rows.
#[async_trait]
pub trait UsageStore: Send + Sync {
    /// Append one record. Never updates existing rows.
    async fn append(&self, record: UsageRecord) -> Result<(), StoreError>;

    /// All records for a tenant, oldest first.
    async fn for_tenant(&self, tenant: &TenantId) -> Result<Vec<UsageRecord>, StoreError>;
}
