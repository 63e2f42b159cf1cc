//! In-memory backend — useful for testing and ephemeral sessions.

use async_trait::async_trait;
use aula_core::error::StoreError;
use aula_core::message::{Conversation, ConversationId, Message, TenantId};
use aula_core::store::{CacheEntry, CacheStore, ConversationStore, UsageStore};
use aula_core::usage::UsageRecord;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// An in-memory backend holding all pipeline-owned state behind RwLocks.
///
/// The cache put swaps the whole entry under the write lock, so readers see
/// either the previous entry or the new one — never a partial write.
pub struct InMemoryStore {
    conversations: RwLock<HashMap<String, Conversation>>,
    messages: RwLock<Vec<Message>>,
    cache: RwLock<HashMap<String, CacheEntry>>,
    usage: RwLock<Vec<UsageRecord>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            conversations: RwLock::new(HashMap::new()),
            messages: RwLock::new(Vec::new()),
            cache: RwLock::new(HashMap::new()),
            usage: RwLock::new(Vec::new()),
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConversationStore for InMemoryStore {
    async fn create_conversation(&self, conversation: Conversation) -> Result<(), StoreError> {
        self.conversations
            .write()
            .await
            .insert(conversation.id.to_string(), conversation);
        Ok(())
    }

    async fn get_conversation(
        &self,
        id: &ConversationId,
    ) -> Result<Option<Conversation>, StoreError> {
        Ok(self.conversations.read().await.get(&id.to_string()).cloned())
    }

    async fn append_message(&self, message: Message) -> Result<(), StoreError> {
        let conv_id = message.conversation_id.to_string();
        {
            let mut conversations = self.conversations.write().await;
            let Some(conv) = conversations.get_mut(&conv_id) else {
                return Err(StoreError::QueryFailed(format!(
                    "conversation {conv_id} does not exist"
                )));
            };
            conv.updated_at = Utc::now();
        }
        self.messages.write().await.push(message);
        Ok(())
    }

    async fn messages(&self, id: &ConversationId) -> Result<Vec<Message>, StoreError> {
        let messages = self.messages.read().await;
        Ok(messages
            .iter()
            .filter(|m| &m.conversation_id == id)
            .cloned()
            .collect())
    }

    async fn update_summary(
        &self,
        id: &ConversationId,
        summary: String,
    ) -> Result<(), StoreError> {
        let mut conversations = self.conversations.write().await;
        let Some(conv) = conversations.get_mut(&id.to_string()) else {
            return Err(StoreError::QueryFailed(format!(
                "conversation {id} does not exist"
            )));
        };
        conv.context_summary = Some(summary);
        Ok(())
    }
}

#[async_trait]
impl CacheStore for InMemoryStore {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, StoreError> {
        let cache = self.cache.read().await;
        Ok(cache
            .get(key)
            .filter(|e| e.is_fresh(Utc::now()))
            .cloned())
    }

    async fn put(&self, entry: CacheEntry) -> Result<(), StoreError> {
        self.cache.write().await.insert(entry.key.clone(), entry);
        Ok(())
    }
}

#[async_trait]
impl UsageStore for InMemoryStore {
    async fn append(&self, record: UsageRecord) -> Result<(), StoreError> {
        self.usage.write().await.push(record);
        Ok(())
    }

    async fn for_tenant(&self, tenant: &TenantId) -> Result<Vec<UsageRecord>, StoreError> {
        let usage = self.usage.read().await;
        Ok(usage
            .iter()
            .filter(|r| &r.tenant == tenant)
            .cloned()
            .collect())
    }
}
