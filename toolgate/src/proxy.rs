// Copyright 2026 The Toolgate Project
// SPDX-License-Identifier: Apache-2.0

// HTTP surface
//
// Responsibilities:
// - POST /v1/chat/completions into the tool-call loop (SSE or complete)
// - GET /v1/models passthrough with hop-by-hop headers stripped
// - Bearer authentication when a server key is configured
// - Heartbeat endpoint
// - 404 for unknown paths

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, HeaderMap, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::StreamExt;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use crate::engine::{LoopEngine, LoopError};
use crate::message::Conversation;
use crate::upstream::{CompletionRequest, UpstreamError};

/// Largest accepted request body.
const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Response headers that describe the upstream connection, not the payload.
const HOP_BY_HOP: [&str; 5] = [
    "content-encoding",
    "transfer-encoding",
    "connection",
    "content-length",
    "keep-alive",
];

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Unauthorized (Bearer token required)")]
    Unauthorized,

    #[error("request body is empty")]
    EmptyBody,

    #[error("failed to read request body: {0}")]
    BodyRead(String),

    #[error("request body is not valid JSON: {0}")]
    MalformedJson(String),

    #[error("request body has no messages array")]
    MissingMessages,

    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    #[error("client closed request")]
    Cancelled,
}

impl From<LoopError> for GatewayError {
    fn from(err: LoopError) -> Self {
        match err {
            LoopError::Upstream(e) => GatewayError::Upstream(e),
            LoopError::Cancelled => GatewayError::Cancelled,
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let (status, public_message) = match &self {
            // Upstream error bodies are relayed as-is so clients see the
            // provider's own error shape.
            GatewayError::Upstream(err @ UpstreamError::Status { body, .. }) => {
                return (err.status_code(), body.clone()).into_response();
            }
            GatewayError::Upstream(err @ UpstreamError::Timeout(_)) => {
                (err.status_code(), "upstream request timed out".to_string())
            }
            GatewayError::Upstream(err) => {
                (err.status_code(), "upstream request failed".to_string())
            }
            GatewayError::Unauthorized => (StatusCode::UNAUTHORIZED, self.to_string()),
            GatewayError::Cancelled => (
                StatusCode::from_u16(499).unwrap_or(StatusCode::BAD_REQUEST),
                self.to_string(),
            ),
            GatewayError::EmptyBody
            | GatewayError::BodyRead(_)
            | GatewayError::MalformedJson(_)
            | GatewayError::MissingMessages => (StatusCode::BAD_REQUEST, self.to_string()),
        };
        (status, Json(json!({ "error": public_message }))).into_response()
    }
}

// ---------------------------------------------------------------------------
// Header handling
// ---------------------------------------------------------------------------

/// Remove hop-by-hop headers from a relayed upstream response.
pub fn strip_hop_by_hop_headers(headers: &mut HeaderMap) {
    for name in HOP_BY_HOP {
        headers.remove(name);
    }
}

fn authorize(expected: Option<&str>, headers: &HeaderMap) -> Result<(), GatewayError> {
    let Some(expected) = expected else {
        return Ok(());
    };
    let presented = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    match presented {
        Some(token) if token == expected => Ok(()),
        _ => Err(GatewayError::Unauthorized),
    }
}

// ---------------------------------------------------------------------------
// Shared application state
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct AppState {
    pub engine: LoopEngine,
    /// Bearer token clients must present, if any.
    pub server_key: Option<String>,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// Heartbeat endpoint: GET /v1/heartbeat -> 200 OK. Never authenticated.
pub async fn heartbeat() -> StatusCode {
    StatusCode::OK
}

pub async fn chat_completions(
    State(state): State<AppState>,
    request: Request<Body>,
) -> Result<Response, GatewayError> {
    authorize(state.server_key.as_deref(), request.headers())?;

    let body = axum::body::to_bytes(request.into_body(), MAX_BODY_BYTES)
        .await
        .map_err(|e| GatewayError::BodyRead(e.to_string()))?;
    if body.is_empty() {
        return Err(GatewayError::EmptyBody);
    }
    let Value::Object(fields) = serde_json::from_slice::<Value>(&body)
        .map_err(|e| GatewayError::MalformedJson(e.to_string()))?
    else {
        return Err(GatewayError::MalformedJson("expected a JSON object".into()));
    };
    if !fields.get("messages").is_some_and(Value::is_array) {
        return Err(GatewayError::MissingMessages);
    }
    let conversation = Conversation::from_request(&fields)
        .map_err(|e| GatewayError::MalformedJson(e.to_string()))?;
    let completion = CompletionRequest::new(fields);

    tracing::debug!(
        model = completion.model(),
        stream = completion.is_streaming(),
        messages = conversation.len(),
        "chat completion request"
    );

    let cancel = CancellationToken::new();
    if completion.is_streaming() {
        let stream = state
            .engine
            .run_stream(completion, conversation, cancel)
            .await?;
        let body = Body::from_stream(stream.map(Ok::<_, std::io::Error>));
        Ok((
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, "text/event-stream"),
                (header::CACHE_CONTROL, "no-cache"),
            ],
            body,
        )
            .into_response())
    } else {
        // Dropping this handler's future (client gone) cancels the loop.
        let _cancel_on_drop = cancel.clone().drop_guard();
        let response = state
            .engine
            .run_complete(completion, conversation, cancel)
            .await?;
        Ok(Json(response).into_response())
    }
}

pub async fn list_models(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response, GatewayError> {
    authorize(state.server_key.as_deref(), &headers)?;

    let mut upstream = state.engine.client().list_models().await?;
    strip_hop_by_hop_headers(&mut upstream.headers);

    let mut response = (upstream.status, upstream.body).into_response();
    *response.headers_mut() = upstream.headers;
    Ok(response)
}

async fn not_found() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, "unknown path")
}

// ---------------------------------------------------------------------------
// Router construction
// ---------------------------------------------------------------------------

/// Build the axum router. All collaborators arrive through `state`.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/v1/heartbeat", get(heartbeat))
        .route("/v1/chat/completions", post(chat_completions))
        .route("/v1/models", get(list_models))
        .fallback(not_found)
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
