//! Message and Conversation domain types.
//!
//! These are the value objects that flow through the entire pipeline:
//! a user sends a message → the guard and router inspect it → the model
//! (or a shortcut) produces an assistant message → both are persisted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a tenant (an institution).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TenantId(pub String);

impl TenantId {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }
}

impl std::fmt::Display for TenantId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for an end user within a tenant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub String);

impl UserId {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationId(pub String);

impl ConversationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl Default for ConversationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The role of a message sender in a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The end user
    User,
    /// The AI assistant
    Assistant,
    /// System instructions (grounding policy, injected context)
    System,
    /// Tool execution result
    Tool,
}

/// A single message in a conversation. Append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Unique message ID
    pub id: String,

    /// The conversation this message belongs to
    pub conversation_id: ConversationId,

    /// Who sent this message
    pub role: Role,

    /// The text content
    pub content: String,

    /// Tool calls requested by the assistant (if any)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<MessageToolCall>,

    /// If this is a tool result, which tool call it responds to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,

    /// Tool invocations carried out while producing this assistant message,
    /// recorded with their results or errors. Never a separate durable entity.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_invocations: Vec<ToolInvocation>,

    /// Timestamp
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Create a new user message.
    pub fn user(conversation_id: ConversationId, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            conversation_id,
            role: Role::User,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
            tool_invocations: Vec::new(),
            created_at: Utc::now(),
        }
    }

    /// Create a new assistant message.
    pub fn assistant(conversation_id: ConversationId, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            conversation_id,
            role: Role::Assistant,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
            tool_invocations: Vec::new(),
            created_at: Utc::now(),
        }
    }

    /// Create a new system message.
    pub fn system(conversation_id: ConversationId, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            conversation_id,
            role: Role::System,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
            tool_invocations: Vec::new(),
            created_at: Utc::now(),
        }
    }

    /// Create a tool result message.
    pub fn tool_result(
        conversation_id: ConversationId,
        tool_call_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            conversation_id,
            role: Role::Tool,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: Some(tool_call_id.into()),
            tool_invocations: Vec::new(),
            created_at: Utc::now(),
        }
    }

    /// Attach the tool invocation log to this message.
    pub fn with_invocations(mut self, invocations: Vec<ToolInvocation>) -> Self {
        self.tool_invocations = invocations;
        self
    }
}

/// A tool call embedded in an assistant message (provider wire shape).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageToolCall {
    /// Unique ID for this tool call
    pub id: String,

    /// Name of the tool to invoke
    pub name: String,

    /// Arguments as JSON string
    pub arguments: String,
}

/// The durable record of one tool invocation, embedded in the assistant
/// message that used it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInvocation {
    /// Tool name
    pub name: String,

    /// Arguments the model supplied
    pub arguments: serde_json::Value,

    /// Structured result on success
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,

    /// Error message on failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A conversation: one user's thread within a tenant.
///
/// Messages are stored separately (append-only) via `ConversationStore`;
/// the conversation row carries the rolling context summary, which is
/// monotonically replaced each time pruning triggers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    /// Unique conversation ID
    pub id: ConversationId,

    /// Owning tenant
    pub tenant: TenantId,

    /// Owning user
    pub user: UserId,

    /// Optional title (auto-generated or user-set)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    /// Rolling compressed summary of pruned history. Replaced, never appended.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_summary: Option<String>,

    /// When this conversation was created
    pub created_at: DateTime<Utc>,

    /// When the last message was added
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    /// Create a new empty conversation for a tenant/user pair.
    pub fn new(tenant: TenantId, user: UserId) -> Self {
        let now = Utc::now();
        Self {
            id: ConversationId::new(),
            tenant,
            user,
            title: None,
            context_summary: None,
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_user_message() {
        let conv_id = ConversationId::new();
        let msg = Message::user(conv_id.clone(), "¿Cuántos alumnos hay inscritos?");
        assert_eq!(msg.role, Role::User);
        assert_eq!(msg.conversation_id, conv_id);
        assert!(msg.tool_calls.is_empty());
        assert!(msg.tool_invocations.is_empty());
    }

    #[test]
    fn tool_result_carries_call_id() {
        let msg = Message::tool_result(ConversationId::new(), "call_1", "{\"total\": 42}");
        assert_eq!(msg.role, Role::Tool);
        assert_eq!(msg.tool_call_id.as_deref(), Some("call_1"));
    }

    #[test]
    fn message_serialization_roundtrip() {
        let msg = Message::assistant(ConversationId::new(), "Hay 42 alumnos inscritos.")
            .with_invocations(vec![ToolInvocation {
                name: "aggregate_statistics".into(),
                arguments: serde_json::json!({"metric": "enrolled"}),
                result: Some(serde_json::json!({"total": 42})),
                error: None,
            }]);
        let json = serde_json::to_string(&msg).unwrap();
        let back: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(back.content, "Hay 42 alumnos inscritos.");
        assert_eq!(back.tool_invocations.len(), 1);
        assert_eq!(back.tool_invocations[0].name, "aggregate_statistics");
    }

    #[test]
    fn conversation_starts_without_summary() {
        let conv = Conversation::new(TenantId::new("t1"), UserId::new("u1"));
        assert!(conv.context_summary.is_none());
        assert!(conv.title.is_none());
        assert_eq!(conv.tenant.0, "t1");
    }
}
