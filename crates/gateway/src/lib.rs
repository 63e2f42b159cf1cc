//! HTTP surface for the aula pipeline.
//!
//! Endpoints:
//!
//! - `POST /v1/turns`          — run one chat turn, streamed plain-text body
//! - `GET  /v1/usage/{tenant}` — per-tenant usage summary
//! - `GET  /v1/healthz`        — liveness
//!
//! The turn response body is plain text; metadata travels in response
//! headers (`x-conversation-id`, `x-provider`, `x-model`, `x-cache-hit`),
//! never interleaved with the stream. The tenant-resolution context is
//! represented by the `x-tenant-id` / `x-user-id` headers an upstream proxy
//! sets after authentication.

use aula_core::error::TurnError;
use aula_core::message::{ConversationId, TenantId, UserId};
use aula_ledger::UsageLedger;
use aula_pipeline::{ChatTurnOrchestrator, TurnEvent, TurnRequest};
use axum::{
    Json, Router,
    body::{Body, Bytes},
    extract::{Path, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Shared state for the HTTP layer.
pub struct AppState {
    pub orchestrator: Arc<ChatTurnOrchestrator>,
    pub ledger: Arc<UsageLedger>,
}

pub type SharedState = Arc<AppState>;

/// Build the router. Nest or serve as-is.
pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/v1/turns", post(turn_handler))
        .route("/v1/usage/{tenant}", get(usage_handler))
        .route("/v1/healthz", get(healthz_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[derive(Deserialize)]
pub struct TurnBody {
    /// Existing conversation ID (omit to create new).
    #[serde(default)]
    pub conversation_id: Option<String>,
    /// The user's message.
    pub message: String,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
        .into_response()
}

fn turn_error_response(err: TurnError) -> Response {
    let status = match &err {
        TurnError::Validation(_) => StatusCode::BAD_REQUEST,
        TurnError::QuotaExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
        TurnError::NotFound(_) => StatusCode::NOT_FOUND,
        TurnError::Provider(_) => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    error_response(status, err.to_string())
}

fn required_header(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .filter(|v| !v.is_empty())
}

async fn turn_handler(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Json(body): Json<TurnBody>,
) -> Response {
    let Some(tenant) = required_header(&headers, "x-tenant-id") else {
        return error_response(StatusCode::BAD_REQUEST, "missing x-tenant-id header");
    };
    let Some(user) = required_header(&headers, "x-user-id") else {
        return error_response(StatusCode::BAD_REQUEST, "missing x-user-id header");
    };

    info!(tenant = %tenant, "v1/turns request");

    let request = TurnRequest {
        tenant: TenantId::new(tenant),
        user: UserId::new(user),
        conversation_id: body.conversation_id.map(|id| ConversationId::from(&id)),
        message: body.message,
    };

    let turn = match state.orchestrator.run(request).await {
        Ok(turn) => turn,
        Err(e) => return turn_error_response(e),
    };

    // Body: Delta text only; the stream ends at the first Done/Error event.
    let body_stream = ReceiverStream::new(turn.events)
        .take_while(|event| matches!(event, TurnEvent::Delta { .. }))
        .map(|event| {
            let text = match event {
                TurnEvent::Delta { text } => text,
                _ => String::new(),
            };
            Ok::<Bytes, std::convert::Infallible>(Bytes::from(text))
        });

    let mut response = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/plain; charset=utf-8")
        .header("x-conversation-id", turn.conversation_id.to_string())
        .header("x-cache-hit", if turn.cache_hit { "true" } else { "false" })
        .header("x-source", turn.source.to_string());
    if let Some(provider) = &turn.provider {
        response = response.header("x-provider", provider);
    }
    if let Some(model) = &turn.model {
        response = response.header("x-model", model);
    }

    response
        .body(Body::from_stream(body_stream))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

async fn usage_handler(
    State(state): State<SharedState>,
    Path(tenant): Path<String>,
) -> Response {
    match state.ledger.summary(&TenantId::new(tenant)).await {
        Ok(summary) => Json(summary).into_response(),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

async fn healthz_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}
