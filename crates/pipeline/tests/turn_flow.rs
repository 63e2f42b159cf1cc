//! End-to-end turn scenarios against the full orchestrator with scripted
//! providers, fixture read-services, and in-memory stores.

use async_trait::async_trait;
use aula_config::PipelineConfig;
use aula_context::ContextPruner;
use aula_core::error::{ProviderError, TurnError};
use aula_core::message::{Conversation, ConversationId, Message, MessageToolCall, TenantId, UserId};
use aula_core::provider::{
    Provider, ProviderRequest, ProviderResponse, StreamChunk, TokenUsage,
};
use aula_core::store::{ConversationStore, UsageStore};
use aula_core::usage::UsageSource;
use aula_ledger::UsageLedger;
use aula_pipeline::{
    ChatTurnOrchestrator, IntentRouter, ResponseCache, SessionGuard, TurnEvent, TurnRequest,
};
use aula_providers::gateway::ModelGateway;
use aula_retrieval::{InMemoryCorpus, KnowledgeRetriever};
use aula_store::InMemoryStore;
use aula_tools::{FixtureReads, default_registry};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ── Scripted provider ─────────────────────────────────────────────────────

#[derive(Clone)]
enum ScriptItem {
    Text(&'static str),
    ToolCall {
        id: &'static str,
        name: &'static str,
        arguments: &'static str,
    },
    Done {
        input_tokens: u32,
        output_tokens: u32,
    },
    Fail(&'static str),
    Wait(u64),
}

/// Emits one pre-scripted stream per `stream()` call and records every
/// request it saw.
struct ScriptedProvider {
    name: String,
    scripts: Mutex<VecDeque<Vec<ScriptItem>>>,
    requests: Mutex<Vec<ProviderRequest>>,
    stream_calls: AtomicUsize,
}

impl ScriptedProvider {
    fn new(name: &str, scripts: Vec<Vec<ScriptItem>>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            scripts: Mutex::new(scripts.into()),
            requests: Mutex::new(Vec::new()),
            stream_calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.stream_calls.load(Ordering::SeqCst)
    }

    fn last_request(&self) -> Option<ProviderRequest> {
        self.requests.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(
        &self,
        _request: ProviderRequest,
    ) -> Result<ProviderResponse, ProviderError> {
        Err(ProviderError::NotConfigured("scripted: streaming only".into()))
    }

    async fn stream(
        &self,
        request: ProviderRequest,
    ) -> Result<
        tokio::sync::mpsc::Receiver<Result<StreamChunk, ProviderError>>,
        ProviderError,
    > {
        self.stream_calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request);

        let script = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| ProviderError::NotConfigured("script exhausted".into()))?;

        let (tx, rx) = tokio::sync::mpsc::channel(16);
        tokio::spawn(async move {
            for item in script {
                let sent = match item {
                    ScriptItem::Text(text) => {
                        tx.send(Ok(StreamChunk {
                            content: Some(text.to_string()),
                            tool_calls: vec![],
                            done: false,
                            usage: None,
                        }))
                        .await
                    }
                    ScriptItem::ToolCall {
                        id,
                        name,
                        arguments,
                    } => {
                        tx.send(Ok(StreamChunk {
                            content: None,
                            tool_calls: vec![MessageToolCall {
                                id: id.into(),
                                name: name.into(),
                                arguments: arguments.into(),
                            }],
                            done: false,
                            usage: None,
                        }))
                        .await
                    }
                    ScriptItem::Done {
                        input_tokens,
                        output_tokens,
                    } => {
                        tx.send(Ok(StreamChunk {
                            content: None,
                            tool_calls: vec![],
                            done: true,
                            usage: Some(TokenUsage {
                                input_tokens,
                                output_tokens,
                            }),
                        }))
                        .await
                    }
                    ScriptItem::Fail(reason) => {
                        tx.send(Err(ProviderError::StreamInterrupted(reason.into())))
                            .await
                    }
                    ScriptItem::Wait(ms) => {
                        tokio::time::sleep(Duration::from_millis(ms)).await;
                        Ok(())
                    }
                };
                if sent.is_err() {
                    return;
                }
            }
        });
        Ok(rx)
    }
}

/// A provider that opens a stream and never produces a first token.
struct SilentProvider;

#[async_trait]
impl Provider for SilentProvider {
    fn name(&self) -> &str {
        "silent"
    }

    async fn complete(
        &self,
        _request: ProviderRequest,
    ) -> Result<ProviderResponse, ProviderError> {
        Err(ProviderError::Timeout("silent".into()))
    }

    async fn stream(
        &self,
        _request: ProviderRequest,
    ) -> Result<
        tokio::sync::mpsc::Receiver<Result<StreamChunk, ProviderError>>,
        ProviderError,
    > {
        let (tx, rx) = tokio::sync::mpsc::channel::<Result<StreamChunk, ProviderError>>(1);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            drop(tx);
        });
        Ok(rx)
    }
}

/// Summarizer stub for the pruner (fixed reply); embeddings unsupported, so
/// retrieval degrades to no context in these tests.
struct SummarizerStub;

#[async_trait]
impl Provider for SummarizerStub {
    fn name(&self) -> &str {
        "summarizer-stub"
    }

    async fn complete(
        &self,
        request: ProviderRequest,
    ) -> Result<ProviderResponse, ProviderError> {
        let conv = request.messages[0].conversation_id.clone();
        Ok(ProviderResponse {
            message: Message::assistant(conv, "Resumen: el usuario consulta datos de la institución."),
            usage: None,
            model: request.model,
        })
    }
}

// ── Harness ───────────────────────────────────────────────────────────────

fn base_config() -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.guard.cooldown_secs = 0; // keep tests independent of wall clock
    config
}

fn build(
    gateway: ModelGateway,
    store: Arc<InMemoryStore>,
    config: PipelineConfig,
) -> ChatTurnOrchestrator {
    let tools = Arc::new(default_registry(Arc::new(FixtureReads::demo("t1"))));
    ChatTurnOrchestrator::new(
        config.clone(),
        SessionGuard::new(config.guard.clone()),
        IntentRouter::new(),
        ResponseCache::new(config.cache.clone(), store.clone()),
        ContextPruner::new(config.context.clone(), Arc::new(SummarizerStub), "summarizer"),
        KnowledgeRetriever::new(
            config.retrieval.clone(),
            Arc::new(InMemoryCorpus::new()),
            Arc::new(SummarizerStub),
        ),
        tools,
        Arc::new(gateway),
        store.clone(),
        Arc::new(UsageLedger::new(store)),
    )
}

fn turn(message: &str) -> TurnRequest {
    TurnRequest {
        tenant: TenantId::new("t1"),
        user: UserId::new("u1"),
        conversation_id: None,
        message: message.into(),
    }
}

/// Drain the event stream; returns the concatenated text and whether the
/// stream ended with Done (vs Error/closed).
async fn drain(mut rx: tokio::sync::mpsc::Receiver<TurnEvent>) -> (String, bool) {
    let mut text = String::new();
    let mut done = false;
    while let Some(event) = rx.recv().await {
        match event {
            TurnEvent::Delta { text: t } => text.push_str(&t),
            TurnEvent::Done => {
                done = true;
                break;
            }
            TurnEvent::Error { .. } => break,
        }
    }
    (text, done)
}

const REVENUE_QUESTION: &str = "¿cuánto hemos recaudado este mes?";

fn revenue_scripts() -> Vec<Vec<ScriptItem>> {
    vec![
        vec![
            ScriptItem::ToolCall {
                id: "call_1",
                name: "aggregate_statistics",
                arguments: r#"{"metric": "revenue", "month": "2026-07"}"#,
            },
            ScriptItem::Done {
                input_tokens: 640,
                output_tokens: 12,
            },
        ],
        vec![
            ScriptItem::Text("En julio se recaudaron 487250.00 MXN en 183 pagos."),
            ScriptItem::Done {
                input_tokens: 890,
                output_tokens: 41,
            },
        ],
    ]
}

// ── Scenario 1: router shortcut ───────────────────────────────────────────

#[tokio::test]
async fn hola_is_intercepted_by_the_router() {
    let store = Arc::new(InMemoryStore::new());
    let provider = ScriptedProvider::new("primary", vec![]);
    let gateway =
        ModelGateway::new(1024).add(provider.clone(), "model-a", Duration::from_secs(5));
    let orchestrator = build(gateway, store.clone(), base_config());

    let response = orchestrator.run(turn("hola")).await.unwrap();
    assert_eq!(response.source, UsageSource::Router);
    assert!(response.provider.is_none());
    assert!(!response.cache_hit);

    let (text, done) = drain(response.events).await;
    assert!(done);
    assert!(text.contains("asistente"));

    // No model work.
    assert_eq!(provider.calls(), 0);

    // Persisted assistant content equals the local response exactly.
    let messages = ConversationStore::messages(store.as_ref(), &response.conversation_id)
        .await
        .unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[1].content, text);

    // Exactly one zero-token usage record tagged as a router shortcut.
    let records = UsageStore::for_tenant(store.as_ref(), &TenantId::new("t1"))
        .await
        .unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].source, UsageSource::Router);
    assert_eq!(records[0].input_tokens, 0);
    assert_eq!(records[0].output_tokens, 0);
    assert!(!records[0].cached);
}

// ── Scenario 2: tool-assisted model turn ──────────────────────────────────

#[tokio::test]
async fn revenue_question_uses_the_statistics_tool() {
    let store = Arc::new(InMemoryStore::new());
    let provider = ScriptedProvider::new("primary", revenue_scripts());
    let gateway =
        ModelGateway::new(1024).add(provider.clone(), "model-a", Duration::from_secs(5));
    let orchestrator = build(gateway, store.clone(), base_config());

    let response = orchestrator.run(turn(REVENUE_QUESTION)).await.unwrap();
    assert_eq!(response.source, UsageSource::Model);
    assert_eq!(response.provider.as_deref(), Some("primary"));
    assert_eq!(response.model.as_deref(), Some("model-a"));

    let (text, done) = drain(response.events).await;
    assert!(done);
    assert!(text.contains("487250.00"));

    // Two model rounds: tool request, then the grounded answer.
    assert_eq!(provider.calls(), 2);
    let last = provider.last_request().unwrap();
    // The tool result was fed back into the second round's context.
    assert!(
        last.messages
            .iter()
            .any(|m| m.content.contains("collected 487250.00"))
    );

    // The assistant message embeds the tool invocation record.
    let messages = ConversationStore::messages(store.as_ref(), &response.conversation_id)
        .await
        .unwrap();
    let assistant = messages.last().unwrap();
    assert_eq!(assistant.content, text);
    assert_eq!(assistant.tool_invocations.len(), 1);
    assert_eq!(assistant.tool_invocations[0].name, "aggregate_statistics");

    // One usage record with summed nonzero tokens from the serving model.
    let records = UsageStore::for_tenant(store.as_ref(), &TenantId::new("t1"))
        .await
        .unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].source, UsageSource::Model);
    assert_eq!(records[0].model_used.as_deref(), Some("model-a"));
    assert_eq!(records[0].input_tokens, 640 + 890);
    assert_eq!(records[0].output_tokens, 12 + 41);
}

// ── Scenario 3: cache hit on the repeated query ───────────────────────────

#[tokio::test]
async fn repeated_query_is_served_from_cache() {
    let store = Arc::new(InMemoryStore::new());
    let provider = ScriptedProvider::new("primary", revenue_scripts());
    let gateway =
        ModelGateway::new(1024).add(provider.clone(), "model-a", Duration::from_secs(5));
    let orchestrator = build(gateway, store.clone(), base_config());

    let first = orchestrator.run(turn(REVENUE_QUESTION)).await.unwrap();
    let (first_text, _) = drain(first.events).await;
    let calls_after_first = provider.calls();

    let second = orchestrator.run(turn(REVENUE_QUESTION)).await.unwrap();
    assert_eq!(second.source, UsageSource::Cache);
    assert!(second.cache_hit);
    assert!(second.provider.is_none());

    let (second_text, done) = drain(second.events).await;
    assert!(done);
    // Byte-identical response, and no further provider calls.
    assert_eq!(second_text, first_text);
    assert_eq!(provider.calls(), calls_after_first);

    let records = UsageStore::for_tenant(store.as_ref(), &TenantId::new("t1"))
        .await
        .unwrap();
    assert_eq!(records.len(), 2);
    assert!(records[1].cached);
    assert_eq!(records[1].input_tokens, 0);
}

// ── Scenario 4: fallback before first token ───────────────────────────────

#[tokio::test]
async fn silent_primary_falls_back_to_secondary() {
    let store = Arc::new(InMemoryStore::new());
    let secondary = ScriptedProvider::new(
        "secondary",
        vec![vec![
            ScriptItem::Text("Respuesta del proveedor de respaldo."),
            ScriptItem::Done {
                input_tokens: 300,
                output_tokens: 20,
            },
        ]],
    );
    let gateway = ModelGateway::new(1024)
        .add(Arc::new(SilentProvider), "model-a", Duration::from_millis(50))
        .add(secondary.clone(), "model-b", Duration::from_secs(5));
    let orchestrator = build(gateway, store.clone(), base_config());

    let response = orchestrator
        .run(turn("¿qué programas tienen inscripción abierta?"))
        .await
        .unwrap();
    assert_eq!(response.provider.as_deref(), Some("secondary"));
    assert_eq!(response.model.as_deref(), Some("model-b"));

    let (text, done) = drain(response.events).await;
    assert!(done);
    // The full stream comes from the secondary — nothing duplicated.
    assert_eq!(text, "Respuesta del proveedor de respaldo.");
}

// ── Scenario 5: long conversation gets pruned ─────────────────────────────

#[tokio::test]
async fn long_history_reaches_the_model_pruned() {
    let store = Arc::new(InMemoryStore::new());
    let provider = ScriptedProvider::new(
        "primary",
        vec![vec![
            ScriptItem::Text("Claro, seguimos."),
            ScriptItem::Done {
                input_tokens: 500,
                output_tokens: 10,
            },
        ]],
    );
    let gateway =
        ModelGateway::new(1024).add(provider.clone(), "model-a", Duration::from_secs(5));

    let mut config = base_config();
    config.context.recent_window = 6;
    config.context.prune_threshold_tokens = 200;
    let orchestrator = build(gateway, store.clone(), config);

    // Seed a 50-turn conversation.
    let conversation = Conversation::new(TenantId::new("t1"), UserId::new("u1"));
    let conv_id = conversation.id.clone();
    ConversationStore::create_conversation(store.as_ref(), conversation)
        .await
        .unwrap();
    for i in 0..50 {
        ConversationStore::append_message(
            store.as_ref(),
            Message::user(conv_id.clone(), format!("Pregunta {i} sobre pagos y programas")),
        )
        .await
        .unwrap();
        ConversationStore::append_message(
            store.as_ref(),
            Message::assistant(conv_id.clone(), format!("Respuesta {i} con detalle")),
        )
        .await
        .unwrap();
    }

    let mut request = turn("¿y cuál es el siguiente paso?");
    request.conversation_id = Some(conv_id.clone());
    let response = orchestrator.run(request).await.unwrap();
    let (_, done) = drain(response.events).await;
    assert!(done);

    let sent = provider.last_request().unwrap();
    // system + at most recent_window history + current user message
    assert!(sent.messages.len() <= 1 + 6 + 1);
    // The summary landed in the system prompt and was persisted.
    assert!(sent.messages[0].content.contains("[Resumen de la conversación]"));
    let conv = ConversationStore::get_conversation(store.as_ref(), &conv_id)
        .await
        .unwrap()
        .unwrap();
    assert!(conv.context_summary.is_some());
}

// ── Guard, validation, cap, and failure properties ────────────────────────

#[tokio::test]
async fn empty_message_is_a_validation_error() {
    let store = Arc::new(InMemoryStore::new());
    let gateway = ModelGateway::new(1024);
    let orchestrator = build(gateway, store, base_config());

    let err = orchestrator.run(turn("   ")).await.unwrap_err();
    assert!(matches!(err, TurnError::Validation(_)));
}

#[tokio::test]
async fn unknown_conversation_is_not_found() {
    let store = Arc::new(InMemoryStore::new());
    let orchestrator = build(ModelGateway::new(1024), store, base_config());

    let mut request = turn("hola");
    request.conversation_id = Some(ConversationId::new());
    let err = orchestrator.run(request).await.unwrap_err();
    assert!(matches!(err, TurnError::NotFound(_)));
}

#[tokio::test]
async fn cross_tenant_conversation_reads_as_not_found() {
    let store = Arc::new(InMemoryStore::new());
    let conversation = Conversation::new(TenantId::new("otro"), UserId::new("u9"));
    let conv_id = conversation.id.clone();
    ConversationStore::create_conversation(store.as_ref(), conversation)
        .await
        .unwrap();
    let orchestrator = build(ModelGateway::new(1024), store, base_config());

    let mut request = turn("hola");
    request.conversation_id = Some(conv_id);
    let err = orchestrator.run(request).await.unwrap_err();
    assert!(matches!(err, TurnError::NotFound(_)));
}

#[tokio::test]
async fn guard_denial_persists_nothing_and_calls_no_model() {
    let store = Arc::new(InMemoryStore::new());
    let provider = ScriptedProvider::new("primary", vec![]);
    let gateway =
        ModelGateway::new(1024).add(provider.clone(), "model-a", Duration::from_secs(5));

    let mut config = base_config();
    config.guard.daily_message_quota = 1;
    let orchestrator = build(gateway, store.clone(), config);

    let first = orchestrator.run(turn("hola")).await.unwrap();
    let conv_id = first.conversation_id.clone();
    drain(first.events).await;
    let count_before = ConversationStore::messages(store.as_ref(), &conv_id)
        .await
        .unwrap()
        .len();

    let mut request = turn(REVENUE_QUESTION);
    request.conversation_id = Some(conv_id.clone());
    let err = orchestrator.run(request).await.unwrap_err();
    assert!(matches!(err, TurnError::QuotaExceeded { .. }));

    // Zero tool/model invocations and no new messages.
    assert_eq!(provider.calls(), 0);
    let count_after = ConversationStore::messages(store.as_ref(), &conv_id)
        .await
        .unwrap()
        .len();
    assert_eq!(count_after, count_before);

    // Still exactly one usage record (the first, router-served turn).
    let records = UsageStore::for_tenant(store.as_ref(), &TenantId::new("t1"))
        .await
        .unwrap();
    assert_eq!(records.len(), 1);
}

#[tokio::test]
async fn runaway_tool_loop_stops_at_the_cap() {
    let store = Arc::new(InMemoryStore::new());
    // Every round asks for another tool call; the script never ends on text.
    let greedy_round = vec![
        ScriptItem::ToolCall {
            id: "call_n",
            name: "program_catalog",
            arguments: "{}",
        },
        ScriptItem::Done {
            input_tokens: 100,
            output_tokens: 5,
        },
    ];
    let provider = ScriptedProvider::new(
        "primary",
        vec![greedy_round.clone(), greedy_round.clone(), greedy_round],
    );
    let gateway =
        ModelGateway::new(1024).add(provider.clone(), "model-a", Duration::from_secs(5));

    let mut config = base_config();
    config.model.max_tool_rounds = 2;
    let orchestrator = build(gateway, store.clone(), config);

    let response = orchestrator
        .run(turn("dame todo el catálogo con cifras"))
        .await
        .unwrap();
    let (text, done) = drain(response.events).await;
    assert!(done);
    // Terminated with a best-effort answer, not an endless loop.
    assert!(!text.is_empty());
    assert_eq!(provider.calls(), 2);

    // Exactly one assistant message and one usage record despite the cap.
    let messages = ConversationStore::messages(store.as_ref(), &response.conversation_id)
        .await
        .unwrap();
    let assistants = messages
        .iter()
        .filter(|m| m.content == text)
        .count();
    assert_eq!(assistants, 1);
    let records = UsageStore::for_tenant(store.as_ref(), &TenantId::new("t1"))
        .await
        .unwrap();
    assert_eq!(records.len(), 1);
}

#[tokio::test]
async fn mid_stream_failure_terminates_without_bookkeeping() {
    let store = Arc::new(InMemoryStore::new());
    let provider = ScriptedProvider::new(
        "primary",
        vec![vec![
            ScriptItem::Text("Respuesta par"),
            ScriptItem::Fail("connection reset"),
        ]],
    );
    let gateway =
        ModelGateway::new(1024).add(provider.clone(), "model-a", Duration::from_secs(5));
    let orchestrator = build(gateway, store.clone(), base_config());

    let response = orchestrator.run(turn(REVENUE_QUESTION)).await.unwrap();
    let conv_id = response.conversation_id.clone();
    let (text, done) = drain(response.events).await;
    assert_eq!(text, "Respuesta par");
    assert!(!done); // stream ended with Error, not Done

    // The partial turn left no assistant message and no usage record.
    let messages = ConversationStore::messages(store.as_ref(), &conv_id)
        .await
        .unwrap();
    assert_eq!(messages.len(), 1); // only the user message
    let records = UsageStore::for_tenant(store.as_ref(), &TenantId::new("t1"))
        .await
        .unwrap();
    assert!(records.is_empty());
}

#[tokio::test]
async fn client_disconnect_discards_the_partial_turn() {
    let store = Arc::new(InMemoryStore::new());
    let provider = ScriptedProvider::new(
        "primary",
        vec![vec![
            ScriptItem::Text("Texto que el cliente "),
            ScriptItem::Wait(300),
            ScriptItem::Text("nunca leerá"),
            ScriptItem::Done {
                input_tokens: 100,
                output_tokens: 10,
            },
        ]],
    );
    let gateway =
        ModelGateway::new(1024).add(provider.clone(), "model-a", Duration::from_secs(5));
    let orchestrator = build(gateway, store.clone(), base_config());

    let response = orchestrator.run(turn(REVENUE_QUESTION)).await.unwrap();
    let conv_id = response.conversation_id.clone();
    // The consumer goes away while the stream is still in flight.
    drop(response.events);
    tokio::time::sleep(Duration::from_millis(500)).await;

    // Documented policy: partial text is discarded entirely — no truncated
    // assistant message, no usage record.
    let messages = ConversationStore::messages(store.as_ref(), &conv_id)
        .await
        .unwrap();
    assert_eq!(messages.len(), 1);
    let records = UsageStore::for_tenant(store.as_ref(), &TenantId::new("t1"))
        .await
        .unwrap();
    assert!(records.is_empty());
}

#[tokio::test]
async fn volatile_tool_turns_are_not_cached() {
    let store = Arc::new(InMemoryStore::new());
    let scripts = vec![
        vec![
            ScriptItem::ToolCall {
                id: "call_1",
                name: "student_search",
                arguments: r#"{"query": "gonzalez"}"#,
            },
            ScriptItem::Done {
                input_tokens: 400,
                output_tokens: 8,
            },
        ],
        vec![
            ScriptItem::Text("María Fernanda González está activa en LAE."),
            ScriptItem::Done {
                input_tokens: 600,
                output_tokens: 25,
            },
        ],
        // The repeat goes back to the model: two more rounds.
        vec![
            ScriptItem::ToolCall {
                id: "call_2",
                name: "student_search",
                arguments: r#"{"query": "gonzalez"}"#,
            },
            ScriptItem::Done {
                input_tokens: 400,
                output_tokens: 8,
            },
        ],
        vec![
            ScriptItem::Text("María Fernanda González está activa en LAE."),
            ScriptItem::Done {
                input_tokens: 600,
                output_tokens: 25,
            },
        ],
    ];
    let provider = ScriptedProvider::new("primary", scripts);
    let gateway =
        ModelGateway::new(1024).add(provider.clone(), "model-a", Duration::from_secs(5));
    let orchestrator = build(gateway, store.clone(), base_config());

    let question = "busca a la alumna gonzález";
    let first = orchestrator.run(turn(question)).await.unwrap();
    drain(first.events).await;

    let second = orchestrator.run(turn(question)).await.unwrap();
    // Per-student lookups are time-sensitive: never served from cache.
    assert_eq!(second.source, UsageSource::Model);
    assert!(!second.cache_hit);
    drain(second.events).await;
    assert_eq!(provider.calls(), 4);
}
