//! The model gateway — ordered provider fallback with first-token commit.
//!
//! The gateway tries the chain in order. A provider that fails *before its
//! first chunk arrives* (handshake error, pre-first-token error, timeout)
//! is skipped and the next one is tried. The moment one chunk has been
//! observed the turn is committed to that provider: a later mid-stream
//! failure is surfaced to the consumer as a terminated stream and is never
//! silently restarted, so output can be neither duplicated nor spliced.

use aula_core::error::ProviderError;
use aula_core::provider::{Provider, ProviderRequest, ProviderResponse, StreamChunk};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// One entry in the fallback chain.
struct GatewayEntry {
    provider: Arc<dyn Provider>,
    model: String,
    timeout: Duration,
}

/// The provider a turn has committed to. Subsequent tool-loop rounds of the
/// same turn go straight to it — no further fallback.
#[derive(Clone)]
pub struct CommittedProvider {
    provider: Arc<dyn Provider>,
    /// Provider name for response metadata.
    pub name: String,
    /// Model id for response metadata.
    pub model: String,
}

impl std::fmt::Debug for CommittedProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommittedProvider")
            .field("name", &self.name)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

impl CommittedProvider {
    /// Stream another round from the committed provider.
    pub async fn stream(
        &self,
        mut request: ProviderRequest,
    ) -> Result<mpsc::Receiver<Result<StreamChunk, ProviderError>>, ProviderError> {
        request.model = self.model.clone();
        self.provider.stream(request).await
    }

    /// Non-streaming round from the committed provider.
    pub async fn complete(
        &self,
        mut request: ProviderRequest,
    ) -> Result<ProviderResponse, ProviderError> {
        request.model = self.model.clone();
        self.provider.complete(request).await
    }
}

/// A committed stream, plus the metadata the caller reports out-of-band.
pub struct GatewayStream {
    /// The chunks, first one included.
    pub rx: mpsc::Receiver<Result<StreamChunk, ProviderError>>,
    /// The committed provider, for subsequent rounds of this turn.
    pub committed: CommittedProvider,
}

impl std::fmt::Debug for GatewayStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayStream")
            .field("committed", &self.committed)
            .finish_non_exhaustive()
    }
}

/// Ordered multi-provider invocation with per-use-case output caps.
pub struct ModelGateway {
    chain: Vec<GatewayEntry>,
    max_output_tokens: u32,
}

impl ModelGateway {
    pub fn new(max_output_tokens: u32) -> Self {
        Self {
            chain: Vec::new(),
            max_output_tokens,
        }
    }

    /// Append a provider to the chain.
    pub fn add(
        mut self,
        provider: Arc<dyn Provider>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        self.chain.push(GatewayEntry {
            provider,
            model: model.into(),
            timeout,
        });
        self
    }

    pub fn len(&self) -> usize {
        self.chain.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chain.is_empty()
    }

    /// Clamp the request to the configured output budget.
    fn capped(&self, mut request: ProviderRequest, model: &str) -> ProviderRequest {
        request.model = model.to_string();
        request.max_tokens = Some(
            request
                .max_tokens
                .map_or(self.max_output_tokens, |m| m.min(self.max_output_tokens)),
        );
        request
    }

    /// Stream with fallback. Returns the committed stream once any provider
    /// has produced its first chunk; errors only when the whole chain failed
    /// pre-first-token.
    pub async fn stream_with_fallback(
        &self,
        request: ProviderRequest,
    ) -> Result<GatewayStream, ProviderError> {
        let mut last_error = ProviderError::NotConfigured("No providers in fallback chain".into());

        for (i, entry) in self.chain.iter().enumerate() {
            let provider_name = entry.provider.name().to_string();
            info!(
                provider = %provider_name,
                model = %entry.model,
                attempt = i + 1,
                total = self.chain.len(),
                "Gateway: trying provider"
            );

            let req = self.capped(request.clone(), &entry.model);
            let mut rx = match entry.provider.stream(req).await {
                Ok(rx) => rx,
                Err(e) => {
                    warn!(provider = %provider_name, error = %e, "Gateway: stream handshake failed, trying next");
                    last_error = e;
                    continue;
                }
            };

            // The commit point: wait for the first chunk under the
            // per-provider timeout.
            match tokio::time::timeout(entry.timeout, rx.recv()).await {
                Err(_) => {
                    warn!(
                        provider = %provider_name,
                        timeout_secs = entry.timeout.as_secs(),
                        "Gateway: no first token before timeout, trying next"
                    );
                    last_error = ProviderError::Timeout(format!(
                        "Provider '{}' produced no output within {}s",
                        provider_name,
                        entry.timeout.as_secs()
                    ));
                }
                Ok(None) => {
                    warn!(provider = %provider_name, "Gateway: stream closed before first token, trying next");
                    last_error = ProviderError::StreamInterrupted(format!(
                        "Provider '{provider_name}' closed its stream before the first token"
                    ));
                }
                Ok(Some(Err(e))) => {
                    warn!(provider = %provider_name, error = %e, "Gateway: pre-first-token error, trying next");
                    last_error = e;
                }
                Ok(Some(Ok(first))) => {
                    info!(provider = %provider_name, model = %entry.model, "Gateway: committed");
                    let (tx, out_rx) = mpsc::channel(64);
                    tokio::spawn(async move {
                        if tx.send(Ok(first)).await.is_err() {
                            return;
                        }
                        while let Some(item) = rx.recv().await {
                            if tx.send(item).await.is_err() {
                                return; // consumer went away, drop the stream
                            }
                        }
                    });
                    return Ok(GatewayStream {
                        rx: out_rx,
                        committed: CommittedProvider {
                            provider: entry.provider.clone(),
                            name: provider_name,
                            model: entry.model.clone(),
                        },
                    });
                }
            }
        }

        Err(last_error)
    }

    /// Non-streaming completion with the same ordered fallback. Used for
    /// internal calls (summarization) where streaming adds nothing.
    pub async fn complete_with_fallback(
        &self,
        request: ProviderRequest,
    ) -> Result<(ProviderResponse, CommittedProvider), ProviderError> {
        let mut last_error = ProviderError::NotConfigured("No providers in fallback chain".into());

        for entry in &self.chain {
            let provider_name = entry.provider.name().to_string();
            let req = self.capped(request.clone(), &entry.model);

            match tokio::time::timeout(entry.timeout, entry.provider.complete(req)).await {
                Ok(Ok(response)) => {
                    return Ok((
                        response,
                        CommittedProvider {
                            provider: entry.provider.clone(),
                            name: provider_name,
                            model: entry.model.clone(),
                        },
                    ));
                }
                Ok(Err(e)) => {
                    warn!(provider = %provider_name, error = %e, "Gateway: completion failed, trying next");
                    last_error = e;
                }
                Err(_) => {
                    warn!(
                        provider = %provider_name,
                        timeout_secs = entry.timeout.as_secs(),
                        "Gateway: completion timed out, trying next"
                    );
                    last_error = ProviderError::Timeout(format!(
                        "Provider '{}' timed out after {}s",
                        provider_name,
                        entry.timeout.as_secs()
                    ));
                }
            }
        }

        Err(last_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use aula_core::message::{ConversationId, Message};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// A provider whose stream handshake fails outright.
    struct HandshakeFailProvider {
        name: String,
        calls: AtomicUsize,
    }

    impl HandshakeFailProvider {
        fn new(name: &str) -> Self {
            Self {
                name: name.into(),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Provider for HandshakeFailProvider {
        fn name(&self) -> &str {
            &self.name
        }

        async fn complete(
            &self,
            _request: ProviderRequest,
        ) -> Result<ProviderResponse, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(ProviderError::ApiError {
                status_code: 503,
                message: "upstream unavailable".into(),
            })
        }

        async fn stream(
            &self,
            _request: ProviderRequest,
        ) -> Result<mpsc::Receiver<Result<StreamChunk, ProviderError>>, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(ProviderError::ApiError {
                status_code: 503,
                message: "upstream unavailable".into(),
            })
        }
    }

    /// A provider that opens a stream but errors before any token.
    struct PreTokenErrorProvider;

    #[async_trait]
    impl Provider for PreTokenErrorProvider {
        fn name(&self) -> &str {
            "pre-token-error"
        }

        async fn complete(
            &self,
            _request: ProviderRequest,
        ) -> Result<ProviderResponse, ProviderError> {
            unreachable!()
        }

        async fn stream(
            &self,
            _request: ProviderRequest,
        ) -> Result<mpsc::Receiver<Result<StreamChunk, ProviderError>>, ProviderError> {
            let (tx, rx) = mpsc::channel(1);
            tokio::spawn(async move {
                let _ = tx
                    .send(Err(ProviderError::Timeout("gateway timeout".into())))
                    .await;
            });
            Ok(rx)
        }
    }

    /// A provider that opens a stream and never produces anything.
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
            tokio::time::sleep(Duration::from_secs(3600)).await;
            unreachable!()
        }

        async fn stream(
            &self,
            _request: ProviderRequest,
        ) -> Result<mpsc::Receiver<Result<StreamChunk, ProviderError>>, ProviderError> {
            let (tx, rx) = mpsc::channel::<Result<StreamChunk, ProviderError>>(1);
            tokio::spawn(async move {
                // hold the sender open forever
                tokio::time::sleep(Duration::from_secs(3600)).await;
                drop(tx);
            });
            Ok(rx)
        }
    }

    /// A provider that emits a scripted sequence of items.
    struct ScriptedProvider {
        name: String,
        script: Mutex<Vec<Result<StreamChunk, ProviderError>>>,
        max_tokens_seen: Mutex<Option<u32>>,
    }

    impl ScriptedProvider {
        fn new(name: &str, script: Vec<Result<StreamChunk, ProviderError>>) -> Self {
            Self {
                name: name.into(),
                script: Mutex::new(script),
                max_tokens_seen: Mutex::new(None),
            }
        }

        fn text_chunk(text: &str) -> Result<StreamChunk, ProviderError> {
            Ok(StreamChunk {
                content: Some(text.into()),
                tool_calls: vec![],
                done: false,
                usage: None,
            })
        }

        fn done_chunk() -> Result<StreamChunk, ProviderError> {
            Ok(StreamChunk {
                content: None,
                tool_calls: vec![],
                done: true,
                usage: None,
            })
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
            unreachable!()
        }

        async fn stream(
            &self,
            request: ProviderRequest,
        ) -> Result<mpsc::Receiver<Result<StreamChunk, ProviderError>>, ProviderError> {
            *self.max_tokens_seen.lock().unwrap() = request.max_tokens;
            let script: Vec<_> = self.script.lock().unwrap().drain(..).collect();
            let (tx, rx) = mpsc::channel(8);
            tokio::spawn(async move {
                for item in script {
                    if tx.send(item).await.is_err() {
                        return;
                    }
                }
            });
            Ok(rx)
        }
    }

    fn request() -> ProviderRequest {
        let conv = ConversationId::new();
        ProviderRequest {
            model: "unset".into(),
            messages: vec![Message::user(conv, "¿cuánto hemos recaudado este mes?")],
            temperature: 0.3,
            max_tokens: None,
            tools: vec![],
            stream: true,
        }
    }

    async fn drain(mut rx: mpsc::Receiver<Result<StreamChunk, ProviderError>>) -> Vec<String> {
        let mut texts = Vec::new();
        while let Some(item) = rx.recv().await {
            match item {
                Ok(chunk) => {
                    if let Some(text) = chunk.content {
                        texts.push(text);
                    }
                    if chunk.done {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
        texts
    }

    #[tokio::test]
    async fn first_provider_serves_when_healthy() {
        let p1 = Arc::new(ScriptedProvider::new(
            "primary",
            vec![
                ScriptedProvider::text_chunk("Hola "),
                ScriptedProvider::text_chunk("mundo"),
                ScriptedProvider::done_chunk(),
            ],
        ));
        let gateway = ModelGateway::new(1024).add(p1, "model-a", Duration::from_secs(5));

        let stream = gateway.stream_with_fallback(request()).await.unwrap();
        assert_eq!(stream.committed.name, "primary");
        assert_eq!(stream.committed.model, "model-a");
        let texts = drain(stream.rx).await;
        assert_eq!(texts.join(""), "Hola mundo");
    }

    #[tokio::test]
    async fn handshake_failure_falls_through() {
        let p1 = Arc::new(HandshakeFailProvider::new("primary"));
        let p2 = Arc::new(ScriptedProvider::new(
            "secondary",
            vec![
                ScriptedProvider::text_chunk("respuesta"),
                ScriptedProvider::done_chunk(),
            ],
        ));
        let gateway = ModelGateway::new(1024)
            .add(p1.clone(), "model-a", Duration::from_secs(5))
            .add(p2, "model-b", Duration::from_secs(5));

        let stream = gateway.stream_with_fallback(request()).await.unwrap();
        assert_eq!(stream.committed.name, "secondary");
        assert_eq!(stream.committed.model, "model-b");
        assert_eq!(p1.calls.load(Ordering::SeqCst), 1);

        // No duplicated text: only the second provider's output appears.
        let texts = drain(stream.rx).await;
        assert_eq!(texts.join(""), "respuesta");
    }

    #[tokio::test]
    async fn pre_first_token_error_falls_through() {
        let p1 = Arc::new(PreTokenErrorProvider);
        let p2 = Arc::new(ScriptedProvider::new(
            "secondary",
            vec![
                ScriptedProvider::text_chunk("ok"),
                ScriptedProvider::done_chunk(),
            ],
        ));
        let gateway = ModelGateway::new(1024)
            .add(p1, "model-a", Duration::from_secs(5))
            .add(p2, "model-b", Duration::from_secs(5));

        let stream = gateway.stream_with_fallback(request()).await.unwrap();
        assert_eq!(stream.committed.name, "secondary");
    }

    #[tokio::test]
    async fn first_token_timeout_falls_through() {
        let p1 = Arc::new(SilentProvider);
        let p2 = Arc::new(ScriptedProvider::new(
            "secondary",
            vec![
                ScriptedProvider::text_chunk("tarde pero seguro"),
                ScriptedProvider::done_chunk(),
            ],
        ));
        let gateway = ModelGateway::new(1024)
            .add(p1, "model-a", Duration::from_millis(50))
            .add(p2, "model-b", Duration::from_secs(5));

        let stream = gateway.stream_with_fallback(request()).await.unwrap();
        assert_eq!(stream.committed.name, "secondary");
    }

    #[tokio::test]
    async fn mid_stream_failure_is_surfaced_not_restarted() {
        let p1 = Arc::new(ScriptedProvider::new(
            "primary",
            vec![
                ScriptedProvider::text_chunk("parcial"),
                Err(ProviderError::StreamInterrupted("connection reset".into())),
            ],
        ));
        let p2 = Arc::new(HandshakeFailProvider::new("secondary"));
        let gateway = ModelGateway::new(1024)
            .add(p1, "model-a", Duration::from_secs(5))
            .add(p2.clone(), "model-b", Duration::from_secs(5));

        let mut stream = gateway.stream_with_fallback(request()).await.unwrap();
        assert_eq!(stream.committed.name, "primary");

        let first = stream.rx.recv().await.unwrap().unwrap();
        assert_eq!(first.content.as_deref(), Some("parcial"));
        let second = stream.rx.recv().await.unwrap();
        assert!(matches!(second, Err(ProviderError::StreamInterrupted(_))));

        // The second provider was never consulted: committed means committed.
        assert_eq!(p2.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn exhausted_chain_reports_last_error() {
        let gateway = ModelGateway::new(1024)
            .add(
                Arc::new(HandshakeFailProvider::new("a")),
                "model-a",
                Duration::from_secs(5),
            )
            .add(
                Arc::new(PreTokenErrorProvider),
                "model-b",
                Duration::from_secs(5),
            );

        let err = gateway.stream_with_fallback(request()).await.unwrap_err();
        assert!(matches!(err, ProviderError::Timeout(_)));
    }

    #[tokio::test]
    async fn empty_chain_is_not_configured() {
        let gateway = ModelGateway::new(1024);
        let err = gateway.stream_with_fallback(request()).await.unwrap_err();
        assert!(matches!(err, ProviderError::NotConfigured(_)));
    }

    #[tokio::test]
    async fn completion_fallback_advances_past_failures() {
        struct CompleteOk;

        #[async_trait]
        impl Provider for CompleteOk {
            fn name(&self) -> &str {
                "ok"
            }

            async fn complete(
                &self,
                request: ProviderRequest,
            ) -> Result<ProviderResponse, ProviderError> {
                let conv = request.messages[0].conversation_id.clone();
                Ok(ProviderResponse {
                    message: Message::assistant(conv, "resumen"),
                    usage: None,
                    model: request.model,
                })
            }
        }

        let gateway = ModelGateway::new(512)
            .add(
                Arc::new(HandshakeFailProvider::new("bad")),
                "model-a",
                Duration::from_secs(5),
            )
            .add(Arc::new(CompleteOk), "model-b", Duration::from_secs(5));

        let mut req = request();
        req.stream = false;
        let (response, committed) = gateway.complete_with_fallback(req).await.unwrap();
        assert_eq!(committed.name, "ok");
        assert_eq!(committed.model, "model-b");
        assert_eq!(response.model, "model-b");
        assert_eq!(response.message.content, "resumen");
    }

    #[tokio::test]
    async fn output_budget_is_enforced() {
        let p1 = Arc::new(ScriptedProvider::new(
            "primary",
            vec![
                ScriptedProvider::text_chunk("x"),
                ScriptedProvider::done_chunk(),
            ],
        ));
        let gateway = ModelGateway::new(256).add(p1.clone(), "model-a", Duration::from_secs(5));

        let mut req = request();
        req.max_tokens = Some(9999);
        let stream = gateway.stream_with_fallback(req).await.unwrap();
        drain(stream.rx).await;
        assert_eq!(*p1.max_tokens_seen.lock().unwrap(), Some(256));
    }
}
