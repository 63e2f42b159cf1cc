//! Usage accounting types.
//!
//! Exactly one `UsageRecord` is appended per turn, including zero-token
//! router and cache shortcuts.

use crate::message::{ConversationId, TenantId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Which stage of the pipeline produced the answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UsageSource {
    /// A model invocation (possibly after fallback).
    Model,
    /// A response-cache hit.
    Cache,
    /// An intent-router local shortcut.
    Router,
}

impl std::fmt::Display for UsageSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Model => write!(f, "model"),
            Self::Cache => write!(f, "cache"),
            Self::Router => write!(f, "router"),
        }
    }
}

/// Append-only token accounting row, one per turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageRecord {
    /// Unique record id.
    pub id: String,

    /// The assistant message this record accounts for.
    pub message_id: String,

    /// The conversation the turn belonged to.
    pub conversation_id: ConversationId,

    /// The tenant the turn belonged to.
    pub tenant: TenantId,

    /// Model that served the turn (None for shortcut paths).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_used: Option<String>,

    /// Input tokens consumed. Zero for shortcut paths.
    pub input_tokens: u32,

    /// Output tokens produced. Zero for shortcut paths.
    pub output_tokens: u32,

    /// Whether the answer came from the response cache.
    pub cached: bool,

    /// Which stage produced the answer.
    pub source: UsageSource,

    /// When the record was written.
    pub created_at: DateTime<Utc>,
}

impl UsageRecord {
    /// A record for a model-served turn.
    pub fn for_model(
        message_id: impl Into<String>,
        conversation_id: ConversationId,
        tenant: TenantId,
        model: impl Into<String>,
        input_tokens: u32,
        output_tokens: u32,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            message_id: message_id.into(),
            conversation_id,
            tenant,
            model_used: Some(model.into()),
            input_tokens,
            output_tokens,
            cached: false,
            source: UsageSource::Model,
            created_at: Utc::now(),
        }
    }

    /// A zero-token record for a shortcut path (router or cache).
    pub fn for_shortcut(
        message_id: impl Into<String>,
        conversation_id: ConversationId,
        tenant: TenantId,
        source: UsageSource,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            message_id: message_id.into(),
            conversation_id,
            tenant,
            model_used: None,
            input_tokens: 0,
            output_tokens: 0,
            cached: source == UsageSource::Cache,
            source,
            created_at: Utc::now(),
        }
    }
}
