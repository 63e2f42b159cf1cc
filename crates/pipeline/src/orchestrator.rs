//! The chat-turn orchestrator — one request/response cycle.
//!
//! State machine: INIT → GUARDED → ROUTED → CACHE_CHECKED → CONTEXT_READY →
//! RETRIEVED → MODEL_STREAMING (with a bounded nested tool loop) → FINALIZED.
//! ROUTED and CACHE_CHECKED are early exits straight to FINALIZED; a guard
//! denial is a terminal error path that never finalizes (no assistant
//! message exists to account for).
//!
//! Finalization is modeled as a consume-once `TurnFinalizer`: whichever path
//! completes the turn moves the finalizer by value, so persistence, cache
//! population, and the usage record run exactly once.

use aula_config::PipelineConfig;
use aula_core::error::{ProviderError, TurnError};
use aula_core::message::{
    Conversation, ConversationId, Message, MessageToolCall, TenantId, ToolInvocation, UserId,
};
use aula_core::provider::{
    Provider, ProviderRequest, ProviderResponse, StreamChunk, TokenUsage,
};
use aula_core::store::ConversationStore;
use aula_core::tool::{ToolCall, ToolRegistry};
use aula_core::usage::{UsageRecord, UsageSource};
use aula_context::ContextPruner;
use aula_ledger::UsageLedger;
use aula_providers::gateway::{CommittedProvider, ModelGateway};
use aula_retrieval::{KnowledgeRetriever, RetrievedChunk};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::cache::ResponseCache;
use crate::events::TurnEvent;
use crate::guard::SessionGuard;
use crate::router::IntentRouter;

const GROUNDING_PROMPT: &str = "Eres el asistente virtual de una institución educativa. \
Respondes en el idioma del usuario, de forma breve y profesional. \
Solo afirmas datos que provengan de los resultados de herramientas o del \
contexto institucional proporcionado; si una herramienta falla o no hay \
datos, lo dices honestamente en lugar de inventar cifras.";

const TOOL_CAP_FALLBACK: &str = "No pude completar todas las consultas necesarias para \
responder con precisión. Con los datos disponibles no tengo una cifra confiable; \
¿puedes acotar la pregunta?";

/// One inbound turn.
#[derive(Debug, Clone)]
pub struct TurnRequest {
    pub tenant: TenantId,
    pub user: UserId,
    /// Omit to start a new conversation.
    pub conversation_id: Option<ConversationId>,
    pub message: String,
}

/// The orchestrator's reply: out-of-band metadata plus the event stream.
#[derive(Debug)]
pub struct TurnResponse {
    pub conversation_id: ConversationId,
    pub source: UsageSource,
    /// Provider that served the turn (model path only).
    pub provider: Option<String>,
    /// Model that served the turn (model path only).
    pub model: Option<String>,
    pub cache_hit: bool,
    pub events: mpsc::Receiver<TurnEvent>,
}

/// Adapts the gateway's ordered fallback chain to the `Provider` trait for
/// internal completions (history summarization).
pub struct GatewaySummarizer {
    gateway: Arc<ModelGateway>,
}

impl GatewaySummarizer {
    pub fn new(gateway: Arc<ModelGateway>) -> Self {
        Self { gateway }
    }
}

#[async_trait]
impl Provider for GatewaySummarizer {
    fn name(&self) -> &str {
        "gateway"
    }

    async fn complete(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ProviderResponse, ProviderError> {
        let (response, _) = self.gateway.complete_with_fallback(request).await?;
        Ok(response)
    }
}

/// Composes guard, router, cache, pruner, retriever, tools, and gateway.
pub struct ChatTurnOrchestrator {
    config: PipelineConfig,
    guard: SessionGuard,
    router: IntentRouter,
    cache: Arc<ResponseCache>,
    pruner: ContextPruner,
    retriever: KnowledgeRetriever,
    tools: Arc<ToolRegistry>,
    gateway: Arc<ModelGateway>,
    conversations: Arc<dyn ConversationStore>,
    ledger: Arc<UsageLedger>,
}

impl ChatTurnOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: PipelineConfig,
        guard: SessionGuard,
        router: IntentRouter,
        cache: ResponseCache,
        pruner: ContextPruner,
        retriever: KnowledgeRetriever,
        tools: Arc<ToolRegistry>,
        gateway: Arc<ModelGateway>,
        conversations: Arc<dyn ConversationStore>,
        ledger: Arc<UsageLedger>,
    ) -> Self {
        Self {
            config,
            guard,
            router,
            cache: Arc::new(cache),
            pruner,
            retriever,
            tools,
            gateway,
            conversations,
            ledger,
        }
    }

    /// Run one turn. Returns once the answer's first byte is available
    /// (shortcut text, or the committed provider's first token); the rest of
    /// the answer arrives over `TurnResponse::events`.
    pub async fn run(&self, request: TurnRequest) -> Result<TurnResponse, TurnError> {
        let message = request.message.trim().to_string();
        if message.is_empty() {
            return Err(TurnError::Validation("message must not be empty".into()));
        }

        // ── Conversation lookup / creation ────────────────────────────
        let conversation = match &request.conversation_id {
            Some(id) => {
                let conv = self
                    .conversations
                    .get_conversation(id)
                    .await?
                    .ok_or_else(|| TurnError::NotFound(format!("conversation {id}")))?;
                // A conversation id from another tenant is indistinguishable
                // from a missing one.
                if conv.tenant != request.tenant {
                    return Err(TurnError::NotFound(format!("conversation {id}")));
                }
                conv
            }
            None => {
                let conv = Conversation::new(request.tenant.clone(), request.user.clone());
                self.conversations.create_conversation(conv.clone()).await?;
                conv
            }
        };

        // ── GUARDED ───────────────────────────────────────────────────
        let decision = self
            .guard
            .check(&request.tenant, &request.user, &conversation.id);
        if !decision.allowed {
            info!(tenant = %request.tenant, user = %request.user, "Turn denied by session guard");
            return Err(TurnError::QuotaExceeded {
                reason: decision.reason.unwrap_or_else(|| "limit reached".into()),
            });
        }

        // The user message is durable before any model work happens.
        let user_msg = Message::user(conversation.id.clone(), &message);
        self.conversations.append_message(user_msg.clone()).await?;

        // ── ROUTED ────────────────────────────────────────────────────
        let route = self.router.classify(&message);
        if !route.proceed {
            debug!(intent = ?route.intent, "Router short-circuit");
            let text = route.local_response.unwrap_or_default();
            return self
                .finish_shortcut(conversation.id, request.tenant, text, UsageSource::Router)
                .await;
        }

        // ── CACHE_CHECKED ─────────────────────────────────────────────
        if let Some(hit) = self.cache.get(&message, &request.tenant).await {
            debug!(tenant = %request.tenant, "Response cache hit");
            return self
                .finish_shortcut(conversation.id, request.tenant, hit.response, UsageSource::Cache)
                .await;
        }

        // ── CONTEXT_READY ─────────────────────────────────────────────
        let mut history = self.conversations.messages(&conversation.id).await?;
        history.pop(); // the current user message is appended separately below
        let pruned = self.pruner.prune(&conversation, &history).await;
        if pruned.summary_updated
            && let Some(summary) = &pruned.summary
            && let Err(e) = self
                .conversations
                .update_summary(&conversation.id, summary.clone())
                .await
        {
            // Losing the stored summary costs tokens next turn, not this one.
            warn!(error = %e, "Failed to persist updated context summary");
        }

        // ── RETRIEVED ─────────────────────────────────────────────────
        let chunks = self.retriever.search(&message, &request.tenant).await;

        let system = build_system_prompt(pruned.summary.as_deref(), &chunks);
        let mut messages = vec![Message::system(conversation.id.clone(), system)];
        messages.extend(pruned.recent);
        messages.push(user_msg);

        let provider_request = ProviderRequest {
            model: String::new(), // chosen by the gateway per chain entry
            messages: messages.clone(),
            temperature: self.config.model.temperature,
            max_tokens: Some(self.config.model.max_output_tokens),
            tools: self.tools.definitions(),
            stream: true,
        };

        // ── MODEL_STREAMING ───────────────────────────────────────────
        let stream = self.gateway.stream_with_fallback(provider_request).await?;
        let provider_name = stream.committed.name.clone();
        let model_id = stream.committed.model.clone();

        let (tx, rx) = mpsc::channel(64);
        let driver = ModelTurnDriver {
            committed: stream.committed,
            tools: self.tools.clone(),
            tenant: request.tenant.clone(),
            conversation_id: conversation.id.clone(),
            user_message: message,
            temperature: self.config.model.temperature,
            max_tokens: self.config.model.max_output_tokens,
            max_tool_rounds: self.config.model.max_tool_rounds,
            finalizer: TurnFinalizer {
                conversations: self.conversations.clone(),
                ledger: self.ledger.clone(),
                cache: self.cache.clone(),
                tools: self.tools.clone(),
            },
        };
        tokio::spawn(driver.run(stream.rx, messages, tx));

        Ok(TurnResponse {
            conversation_id: conversation.id,
            source: UsageSource::Model,
            provider: Some(provider_name),
            model: Some(model_id),
            cache_hit: false,
            events: rx,
        })
    }

    /// Finalize a router/cache shortcut: persist the assistant message,
    /// record zero-token usage, and emit the full text immediately.
    async fn finish_shortcut(
        &self,
        conversation_id: ConversationId,
        tenant: TenantId,
        text: String,
        source: UsageSource,
    ) -> Result<TurnResponse, TurnError> {
        let assistant = Message::assistant(conversation_id.clone(), &text);
        let message_id = assistant.id.clone();
        // Nothing has been flushed to the client yet, so a persistence
        // failure here fails the turn cleanly.
        self.conversations.append_message(assistant).await?;

        let record =
            UsageRecord::for_shortcut(message_id, conversation_id.clone(), tenant, source);
        if let Err(e) = self.ledger.record(record).await {
            error!(error = %e, "Shortcut usage record failed");
        }

        let (tx, rx) = mpsc::channel(4);
        let _ = tx.send(TurnEvent::Delta { text }).await;
        let _ = tx.send(TurnEvent::Done).await;

        Ok(TurnResponse {
            conversation_id,
            source,
            provider: None,
            model: None,
            cache_hit: source == UsageSource::Cache,
            events: rx,
        })
    }
}

fn build_system_prompt(summary: Option<&str>, chunks: &[RetrievedChunk]) -> String {
    let mut prompt = String::from(GROUNDING_PROMPT);
    if let Some(summary) = summary {
        prompt.push_str("\n\n[Resumen de la conversación]\n");
        prompt.push_str(summary);
    }
    if !chunks.is_empty() {
        prompt.push_str("\n\n[Conocimiento institucional]\n");
        for chunk in chunks {
            prompt.push_str(&format!(
                "- ({}) {}: {}\n",
                chunk.category, chunk.title, chunk.content
            ));
        }
    }
    prompt
}

/// The exactly-once finalize handler for model-served turns.
///
/// Consumed by value: the driver can only run it once, from its single exit
/// point. Failures are logged, never raised — the stream is already flushed.
struct TurnFinalizer {
    conversations: Arc<dyn ConversationStore>,
    ledger: Arc<UsageLedger>,
    cache: Arc<ResponseCache>,
    tools: Arc<ToolRegistry>,
}

impl TurnFinalizer {
    async fn finalize(
        self,
        conversation_id: ConversationId,
        tenant: TenantId,
        user_message: &str,
        answer: String,
        invocations: Vec<ToolInvocation>,
        tools_used: Vec<String>,
        usage: TokenUsage,
        model: String,
    ) {
        let assistant =
            Message::assistant(conversation_id.clone(), &answer).with_invocations(invocations);
        let message_id = assistant.id.clone();

        if let Err(e) = self.conversations.append_message(assistant).await {
            error!(error = %e, "Failed to persist assistant message at finalize");
        }

        if self.cache.is_cacheable(user_message, &tools_used, &self.tools) {
            self.cache
                .put(user_message, &answer, &tools_used, &tenant)
                .await;
        }

        let record = UsageRecord::for_model(
            message_id,
            conversation_id,
            tenant,
            model,
            usage.input_tokens,
            usage.output_tokens,
        );
        if let Err(e) = self.ledger.record(record).await {
            error!(error = %e, "Failed to record turn usage at finalize");
        }
    }
}

/// Drives the committed stream and the bounded tool loop, then finalizes.
struct ModelTurnDriver {
    committed: CommittedProvider,
    tools: Arc<ToolRegistry>,
    tenant: TenantId,
    conversation_id: ConversationId,
    user_message: String,
    temperature: f32,
    max_tokens: u32,
    max_tool_rounds: u32,
    finalizer: TurnFinalizer,
}

impl ModelTurnDriver {
    async fn run(
        self,
        first_rx: mpsc::Receiver<Result<StreamChunk, ProviderError>>,
        mut messages: Vec<Message>,
        tx: mpsc::Sender<TurnEvent>,
    ) {
        let tool_definitions = self.tools.definitions();
        let mut rx = first_rx;
        let mut usage = TokenUsage::default();
        let mut answer = String::new();
        let mut invocations: Vec<ToolInvocation> = Vec::new();
        let mut tools_used: Vec<String> = Vec::new();
        let mut round: u32 = 1;

        loop {
            let mut round_text = String::new();
            let mut round_calls: Vec<MessageToolCall> = Vec::new();

            while let Some(item) = rx.recv().await {
                match item {
                    Ok(chunk) => {
                        if let Some(text) = chunk.content {
                            round_text.push_str(&text);
                            answer.push_str(&text);
                            if tx.send(TurnEvent::Delta { text }).await.is_err() {
                                // Client disconnected: stop the provider by
                                // dropping its stream; the partial answer is
                                // discarded, no bookkeeping runs.
                                debug!(
                                    conversation_id = %self.conversation_id,
                                    "Consumer gone mid-stream, discarding partial turn"
                                );
                                return;
                            }
                        }
                        if !chunk.tool_calls.is_empty() {
                            round_calls.extend(chunk.tool_calls);
                        }
                        if let Some(u) = chunk.usage {
                            usage.add(u);
                        }
                        if chunk.done {
                            break;
                        }
                    }
                    Err(e) => {
                        // Committed provider failed mid-stream: terminate,
                        // never restart (no duplicated or spliced output).
                        warn!(error = %e, "Provider stream terminated mid-turn");
                        let _ = tx
                            .send(TurnEvent::Error {
                                message: e.to_string(),
                            })
                            .await;
                        return;
                    }
                }
            }

            if round_calls.is_empty() {
                break; // final text answer
            }

            if round >= self.max_tool_rounds {
                warn!(
                    round,
                    cap = self.max_tool_rounds,
                    "Tool round cap reached, terminating loop with best-effort answer"
                );
                if answer.trim().is_empty() {
                    answer = TOOL_CAP_FALLBACK.to_string();
                    if tx
                        .send(TurnEvent::Delta {
                            text: answer.clone(),
                        })
                        .await
                        .is_err()
                    {
                        return;
                    }
                }
                break;
            }

            // ── TOOL_LOOP: execute sequentially, results feed the next round.
            let mut assistant_round =
                Message::assistant(self.conversation_id.clone(), round_text);
            assistant_round.tool_calls = round_calls.clone();
            messages.push(assistant_round);

            for call in &round_calls {
                let arguments: serde_json::Value =
                    serde_json::from_str(&call.arguments).unwrap_or_default();
                let tool_call = ToolCall {
                    id: call.id.clone(),
                    name: call.name.clone(),
                    arguments: arguments.clone(),
                };
                debug!(tool = %call.name, round, "Executing tool call");
                let result = self.tools.execute(&self.tenant, &tool_call).await;

                invocations.push(ToolInvocation {
                    name: call.name.clone(),
                    arguments,
                    result: result.success.then(|| {
                        result
                            .data
                            .clone()
                            .unwrap_or_else(|| serde_json::Value::String(result.output.clone()))
                    }),
                    error: (!result.success).then(|| result.output.clone()),
                });
                tools_used.push(call.name.clone());
                messages.push(Message::tool_result(
                    self.conversation_id.clone(),
                    &call.id,
                    &result.output,
                ));
            }

            round += 1;
            let next_request = ProviderRequest {
                model: String::new(), // pinned by the committed provider
                messages: messages.clone(),
                temperature: self.temperature,
                max_tokens: Some(self.max_tokens),
                tools: tool_definitions.clone(),
                stream: true,
            };
            rx = match self.committed.stream(next_request).await {
                Ok(rx) => rx,
                Err(e) => {
                    // Post-commit round failure: same policy as mid-stream.
                    warn!(error = %e, "Committed provider refused tool-loop round");
                    let _ = tx
                        .send(TurnEvent::Error {
                            message: e.to_string(),
                        })
                        .await;
                    return;
                }
            };
        }

        // ── FINALIZED: exactly once, then Done.
        let model = self.committed.model.clone();
        self.finalizer
            .finalize(
                self.conversation_id,
                self.tenant,
                &self.user_message,
                answer,
                invocations,
                tools_used,
                usage,
                model,
            )
            .await;
        let _ = tx.send(TurnEvent::Done).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_prompt_carries_summary_and_chunks() {
        let chunks = vec![RetrievedChunk {
            title: "Requisitos de admisión".into(),
            category: "admisiones".into(),
            content: "Acta de nacimiento y certificado.".into(),
            relevance: 0.9,
        }];
        let prompt = build_system_prompt(Some("El usuario pregunta por pagos."), &chunks);
        assert!(prompt.contains("asistente virtual"));
        assert!(prompt.contains("[Resumen de la conversación]"));
        assert!(prompt.contains("El usuario pregunta por pagos."));
        assert!(prompt.contains("[Conocimiento institucional]"));
        assert!(prompt.contains("Requisitos de admisión"));
    }

    #[test]
    fn system_prompt_omits_empty_sections() {
        let prompt = build_system_prompt(None, &[]);
        assert!(!prompt.contains("[Resumen"));
        assert!(!prompt.contains("[Conocimiento"));
    }
}
