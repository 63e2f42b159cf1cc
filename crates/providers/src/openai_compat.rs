//! OpenAI-compatible provider adapter.
//!
//! Works against any `/v1/chat/completions` endpoint (OpenAI, OpenRouter,
//! vLLM, LM Studio): Bearer authentication, function-calling tools, SSE
//! streaming with `data: [DONE]` termination. Also serves `/v1/embeddings`
//! for the retrieval layer.

use async_trait::async_trait;
use aula_core::error::ProviderError;
use aula_core::message::{ConversationId, Message, MessageToolCall, Role};
use aula_core::provider::{
    EmbeddingRequest, EmbeddingResponse, Provider, ProviderRequest, ProviderResponse, StreamChunk,
    TokenUsage, ToolDefinition,
};
use futures::StreamExt;
use tracing::{debug, trace, warn};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// OpenAI-compatible chat-completions provider.
pub struct OpenAiCompatProvider {
    name: String,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    pub fn new(name: impl Into<String>, api_key: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(300))
            .build()
            .unwrap_or_default();

        Self {
            name: name.into(),
            base_url: DEFAULT_BASE_URL.into(),
            api_key: api_key.into(),
            client,
        }
    }

    /// Use a custom base URL (proxies, test servers, OpenRouter).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn to_api_messages(messages: &[Message]) -> Vec<serde_json::Value> {
        messages
            .iter()
            .map(|msg| match msg.role {
                Role::User => serde_json::json!({"role": "user", "content": msg.content}),
                Role::System => serde_json::json!({"role": "system", "content": msg.content}),
                Role::Assistant => {
                    if msg.tool_calls.is_empty() {
                        serde_json::json!({"role": "assistant", "content": msg.content})
                    } else {
                        let tool_calls: Vec<serde_json::Value> = msg
                            .tool_calls
                            .iter()
                            .map(|tc| {
                                serde_json::json!({
                                    "id": tc.id,
                                    "type": "function",
                                    "function": {"name": tc.name, "arguments": tc.arguments},
                                })
                            })
                            .collect();
                        serde_json::json!({
                            "role": "assistant",
                            "content": msg.content,
                            "tool_calls": tool_calls,
                        })
                    }
                }
                Role::Tool => serde_json::json!({
                    "role": "tool",
                    "tool_call_id": msg.tool_call_id.clone().unwrap_or_default(),
                    "content": msg.content,
                }),
            })
            .collect()
    }

    fn to_api_tools(tools: &[ToolDefinition]) -> Vec<serde_json::Value> {
        tools
            .iter()
            .map(|t| {
                serde_json::json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters,
                    },
                })
            })
            .collect()
    }

    fn build_body(request: &ProviderRequest, stream: bool) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": request.model,
            "messages": Self::to_api_messages(&request.messages),
            "temperature": request.temperature,
        });
        if let Some(max) = request.max_tokens {
            body["max_tokens"] = serde_json::json!(max);
        }
        if !request.tools.is_empty() {
            body["tools"] = serde_json::json!(Self::to_api_tools(&request.tools));
        }
        if stream {
            body["stream"] = serde_json::json!(true);
            body["stream_options"] = serde_json::json!({"include_usage": true});
        }
        body
    }

    async fn post(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<reqwest::Response, ProviderError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        let status = response.status().as_u16();
        if status == 429 {
            return Err(ProviderError::RateLimited { retry_after_secs: 5 });
        }
        if status == 401 || status == 403 {
            return Err(ProviderError::AuthenticationFailed(
                "Invalid API key".into(),
            ));
        }
        if status == 404 {
            return Err(ProviderError::ModelNotFound(
                body["model"].as_str().unwrap_or_default().to_string(),
            ));
        }
        if status != 200 {
            let error_body = response.text().await.unwrap_or_default();
            warn!(status, body = %error_body, "OpenAI-compatible API error");
            return Err(ProviderError::ApiError {
                status_code: status,
                message: error_body,
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl Provider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ProviderResponse, ProviderError> {
        let conversation_id = conversation_of(&request)?;
        let body = Self::build_body(&request, false);
        debug!(provider = %self.name, model = %request.model, "Sending completion request");

        let response = self.post("/chat/completions", &body).await?;
        let api_resp: serde_json::Value =
            response.json().await.map_err(|e| ProviderError::ApiError {
                status_code: 200,
                message: format!("Failed to parse response: {e}"),
            })?;

        let choice = &api_resp["choices"][0]["message"];
        let content = choice["content"].as_str().unwrap_or("").to_string();
        let tool_calls: Vec<MessageToolCall> = choice["tool_calls"]
            .as_array()
            .into_iter()
            .flatten()
            .map(|tc| MessageToolCall {
                id: tc["id"].as_str().unwrap_or("").to_string(),
                name: tc["function"]["name"].as_str().unwrap_or("").to_string(),
                arguments: tc["function"]["arguments"]
                    .as_str()
                    .unwrap_or("{}")
                    .to_string(),
            })
            .collect();

        let usage = api_resp.get("usage").map(|u| TokenUsage {
            input_tokens: u["prompt_tokens"].as_u64().unwrap_or(0) as u32,
            output_tokens: u["completion_tokens"].as_u64().unwrap_or(0) as u32,
        });

        let mut message = Message::assistant(conversation_id, content);
        message.tool_calls = tool_calls;

        Ok(ProviderResponse {
            message,
            usage,
            model: api_resp["model"]
                .as_str()
                .unwrap_or(&request.model)
                .to_string(),
        })
    }

    async fn stream(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<
        tokio::sync::mpsc::Receiver<std::result::Result<StreamChunk, ProviderError>>,
        ProviderError,
    > {
        let body = Self::build_body(&request, true);
        debug!(provider = %self.name, model = %request.model, "Sending streaming request");

        let response = self.post("/chat/completions", &body).await?;
        let (tx, rx) = tokio::sync::mpsc::channel(64);

        tokio::spawn(async move {
            let mut byte_stream = response.bytes_stream();
            let mut buffer = String::new();
            let mut assembler = DeltaAssembler::default();

            while let Some(chunk_result) = byte_stream.next().await {
                let bytes = match chunk_result {
                    Ok(b) => b,
                    Err(e) => {
                        let _ = tx
                            .send(Err(ProviderError::StreamInterrupted(e.to_string())))
                            .await;
                        return;
                    }
                };

                buffer.push_str(&String::from_utf8_lossy(&bytes));

                while let Some(line_end) = buffer.find('\n') {
                    let line = buffer[..line_end].trim_end_matches('\r').to_string();
                    buffer = buffer[line_end + 1..].to_string();

                    let Some(data) = line.strip_prefix("data: ") else {
                        continue;
                    };
                    let data = data.trim();
                    if data.is_empty() {
                        continue;
                    }
                    if data == "[DONE]" {
                        let _ = tx.send(Ok(assembler.finish())).await;
                        return;
                    }
                    let event: serde_json::Value = match serde_json::from_str(data) {
                        Ok(v) => v,
                        Err(e) => {
                            trace!(error = %e, data = %data, "Ignoring unparseable SSE line");
                            continue;
                        }
                    };
                    if let Some(chunk) = assembler.handle_event(&event)
                        && tx.send(Ok(chunk)).await.is_err()
                    {
                        return; // consumer went away
                    }
                }
            }
        });

        Ok(rx)
    }

    async fn embed(
        &self,
        request: EmbeddingRequest,
    ) -> std::result::Result<EmbeddingResponse, ProviderError> {
        let body = serde_json::json!({
            "model": request.model,
            "input": request.inputs,
        });
        let response = self.post("/embeddings", &body).await?;
        let api_resp: serde_json::Value =
            response.json().await.map_err(|e| ProviderError::ApiError {
                status_code: 200,
                message: format!("Failed to parse embeddings response: {e}"),
            })?;

        let embeddings = api_resp["data"]
            .as_array()
            .into_iter()
            .flatten()
            .map(|d| {
                d["embedding"]
                    .as_array()
                    .into_iter()
                    .flatten()
                    .map(|v| v.as_f64().unwrap_or(0.0) as f32)
                    .collect()
            })
            .collect();

        Ok(EmbeddingResponse {
            embeddings,
            model: api_resp["model"]
                .as_str()
                .unwrap_or(&request.model)
                .to_string(),
        })
    }
}

fn conversation_of(request: &ProviderRequest) -> Result<ConversationId, ProviderError> {
    request
        .messages
        .last()
        .map(|m| m.conversation_id.clone())
        .ok_or_else(|| ProviderError::ApiError {
            status_code: 0,
            message: "request has no messages".into(),
        })
}

/// Accumulates OpenAI streaming deltas into chunks.
///
/// Text deltas pass through; tool-call deltas accumulate by index until the
/// stream finishes (arguments arrive as string fragments).
#[derive(Default)]
struct DeltaAssembler {
    tool_calls: Vec<MessageToolCall>,
    usage: Option<TokenUsage>,
}

impl DeltaAssembler {
    fn handle_event(&mut self, event: &serde_json::Value) -> Option<StreamChunk> {
        if let Some(u) = event.get("usage").filter(|u| !u.is_null()) {
            self.usage = Some(TokenUsage {
                input_tokens: u["prompt_tokens"].as_u64().unwrap_or(0) as u32,
                output_tokens: u["completion_tokens"].as_u64().unwrap_or(0) as u32,
            });
        }

        let delta = &event["choices"][0]["delta"];

        for tc in delta["tool_calls"].as_array().into_iter().flatten() {
            let index = tc["index"].as_u64().unwrap_or(0) as usize;
            while self.tool_calls.len() <= index {
                self.tool_calls.push(MessageToolCall {
                    id: String::new(),
                    name: String::new(),
                    arguments: String::new(),
                });
            }
            let slot = &mut self.tool_calls[index];
            if let Some(id) = tc["id"].as_str() {
                slot.id.push_str(id);
            }
            if let Some(name) = tc["function"]["name"].as_str() {
                slot.name.push_str(name);
            }
            if let Some(args) = tc["function"]["arguments"].as_str() {
                slot.arguments.push_str(args);
            }
        }

        let text = delta["content"].as_str().unwrap_or("");
        if text.is_empty() {
            None
        } else {
            Some(StreamChunk {
                content: Some(text.to_string()),
                tool_calls: vec![],
                done: false,
                usage: None,
            })
        }
    }

    fn finish(&mut self) -> StreamChunk {
        for tc in &mut self.tool_calls {
            if tc.arguments.is_empty() {
                tc.arguments = "{}".into();
            }
        }
        StreamChunk {
            content: None,
            tool_calls: std::mem::take(&mut self.tool_calls),
            done: true,
            usage: self.usage.take(),
        }
    }
}
