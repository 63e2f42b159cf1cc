//! History pruning — keeps the model's context window bounded.
//!
//! The pruner keeps the most recent K messages verbatim. When the full
//! history exceeds the configured token threshold, everything older is
//! compressed into a single summary via a cheap model call; the new summary
//! *replaces* the conversation's stored one, it is never concatenated.

use aula_config::ContextConfig;
use aula_core::message::{Conversation, ConversationId, Message, Role};
use aula_core::provider::{Provider, ProviderRequest};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::token;

/// The bounded context handed to the model for one turn.
#[derive(Debug, Clone)]
pub struct PrunedContext {
    /// Rolling summary of everything older than the recent window.
    pub summary: Option<String>,

    /// The most recent messages, verbatim, chronological order.
    pub recent: Vec<Message>,

    /// True when `summary` was freshly produced this turn and should be
    /// written back to the conversation row.
    pub summary_updated: bool,
}

/// Prunes conversation history down to `summary + recent window`.
pub struct ContextPruner {
    config: ContextConfig,
    provider: Arc<dyn Provider>,
    summarizer_model: String,
}

impl ContextPruner {
    pub fn new(
        config: ContextConfig,
        provider: Arc<dyn Provider>,
        summarizer_model: impl Into<String>,
    ) -> Self {
        Self {
            config,
            provider,
            summarizer_model: summarizer_model.into(),
        }
    }

    /// Prune a conversation's history.
    ///
    /// Below the threshold the history passes through untouched (with any
    /// previously stored summary). Above it, the older prefix is compressed;
    /// if the summarization call fails the pruner degrades to the recent
    /// window with no summary rather than failing the turn.
    pub async fn prune(&self, conversation: &Conversation, history: &[Message]) -> PrunedContext {
        // System messages are rebuilt per turn by the orchestrator.
        let turns: Vec<Message> = history
            .iter()
            .filter(|m| m.role != Role::System)
            .cloned()
            .collect();

        let total_tokens = token::estimate_messages_tokens(&turns);
        if total_tokens <= self.config.prune_threshold_tokens
            && turns.len() <= self.config.recent_window
        {
            return PrunedContext {
                summary: conversation.context_summary.clone(),
                recent: turns,
                summary_updated: false,
            };
        }

        if total_tokens <= self.config.prune_threshold_tokens {
            // Under the token threshold but over the window: window wins,
            // older turns stay covered by the existing summary.
            let recent = self.recent_window(&turns);
            return PrunedContext {
                summary: conversation.context_summary.clone(),
                recent,
                summary_updated: false,
            };
        }

        let split = turns.len().saturating_sub(self.config.recent_window);
        let (older, recent) = turns.split_at(split);

        debug!(
            conversation_id = %conversation.id,
            older = older.len(),
            recent = recent.len(),
            estimated_tokens = total_tokens,
            "Pruning conversation history"
        );

        match self
            .summarize(&conversation.id, conversation.context_summary.as_deref(), older)
            .await
        {
            Ok(summary) => {
                let mut recent = recent.to_vec();
                self.enforce_budget(&summary, &mut recent);
                PrunedContext {
                    summary: Some(summary),
                    recent,
                    summary_updated: true,
                }
            }
            Err(e) => {
                warn!(
                    conversation_id = %conversation.id,
                    error = %e,
                    "History summarization failed, falling back to recent window"
                );
                PrunedContext {
                    summary: None,
                    recent: recent.to_vec(),
                    summary_updated: false,
                }
            }
        }
    }

    fn recent_window(&self, turns: &[Message]) -> Vec<Message> {
        let split = turns.len().saturating_sub(self.config.recent_window);
        turns[split..].to_vec()
    }

    /// Drop the oldest recent messages while `summary + recent` exceeds the
    /// context budget. The newest message always stays.
    fn enforce_budget(&self, summary: &str, recent: &mut Vec<Message>) {
        let summary_tokens = token::estimate_tokens(summary);
        while recent.len() > 1
            && summary_tokens + token::estimate_messages_tokens(recent)
                > self.config.context_budget_tokens
        {
            recent.remove(0);
        }
    }

    async fn summarize(
        &self,
        conversation_id: &ConversationId,
        previous_summary: Option<&str>,
        older: &[Message],
    ) -> Result<String, aula_core::ProviderError> {
        let mut transcript = String::new();
        if let Some(prev) = previous_summary {
            transcript.push_str("Previous summary:\n");
            transcript.push_str(prev);
            transcript.push_str("\n\n");
        }
        transcript.push_str("Conversation to fold in:\n");
        for msg in older {
            let who = match msg.role {
                Role::User => "User",
                Role::Assistant => "Assistant",
                Role::Tool => "Tool",
                Role::System => continue,
            };
            transcript.push_str(&format!("{}: {}\n", who, msg.content));
        }

        let instruction = "Condense the conversation below into one short paragraph that \
                           preserves names, figures, and open requests. Reply with the \
                           paragraph only.";

        let request = ProviderRequest {
            model: self.summarizer_model.clone(),
            messages: vec![
                Message::system(conversation_id.clone(), instruction),
                Message::user(conversation_id.clone(), transcript),
            ],
            temperature: 0.0,
            max_tokens: Some(self.config.summary_max_tokens),
            tools: vec![],
            stream: false,
        };

        let response = self.provider.complete(request).await?;
        Ok(response.message.content.trim().to_string())
    }
}
