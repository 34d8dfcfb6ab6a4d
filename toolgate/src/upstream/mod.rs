// Copyright 2026 The Toolgate Project
// SPDX-License-Identifier: Apache-2.0

// Upstream completion client
//
// Responsibilities:
// - CompletionRequest: the client's body with messages/stream overridden
// - CompletionClient trait (dependency injection point for the loop engine)
// - SSE decoding of incremental responses into frames
// - reqwest implementation against an OpenAI-compatible endpoint

mod http;
mod sse;

pub use http::ReqwestCompletionClient;
pub use sse::{
    content_frame, delta_content, encode_data, error_frame, parse_sse_line, replace_delta_content,
    SseDecoder, SseFrame, DONE_FRAME,
};

use async_trait::async_trait;
use axum::http::{HeaderMap, StatusCode};
use bytes::Bytes;
use futures_util::stream::Stream;
use serde_json::{Map, Value};
use std::pin::Pin;

use crate::message::Conversation;

/// Decoded frames of one incremental upstream response.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<SseFrame, UpstreamError>> + Send>>;

// ---------------------------------------------------------------------------
// Request
// ---------------------------------------------------------------------------

/// A chat completion request body.
///
/// Every field the client sent is preserved; the loop only swaps
/// `messages` and pins `stream` for follow-up calls.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    body: Map<String, Value>,
}

impl CompletionRequest {
    pub fn new(body: Map<String, Value>) -> Self {
        Self { body }
    }

    pub fn body(&self) -> &Map<String, Value> {
        &self.body
    }

    pub fn is_streaming(&self) -> bool {
        self.body
            .get("stream")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    pub fn model(&self) -> &str {
        self.body.get("model").and_then(Value::as_str).unwrap_or("")
    }

    /// The same request with `messages` replaced and `stream` set.
    pub fn with_conversation(&self, conversation: &Conversation, stream: bool) -> Self {
        let mut body = self.body.clone();
        body.insert("messages".to_string(), conversation.to_value());
        body.insert("stream".to_string(), Value::Bool(stream));
        Self { body }
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UpstreamError {
    #[error("upstream request failed: {0}")]
    Transport(String),

    #[error("upstream request timed out: {0}")]
    Timeout(String),

    #[error("upstream returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("upstream stream interrupted: {0}")]
    Stream(String),
}

impl UpstreamError {
    /// HTTP status reported to the client for this failure.
    pub fn status_code(&self) -> StatusCode {
        match self {
            UpstreamError::Status { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            UpstreamError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            UpstreamError::Transport(_) | UpstreamError::Stream(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

// ---------------------------------------------------------------------------
// Trait: CompletionClient
// ---------------------------------------------------------------------------

/// A response relayed to the client unchanged.
#[derive(Debug, Clone)]
pub struct PassthroughResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Abstraction over the upstream completions API.
///
/// Implementations must be Send + Sync so one client can be shared by all
/// request handlers via `Arc`.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Non-streaming call. Returns the raw (decompressed) response body.
    async fn complete(&self, request: &CompletionRequest) -> Result<Bytes, UpstreamError>;

    /// Streaming call. Errors before the first byte are returned directly;
    /// later failures arrive as `Err` items in the stream.
    async fn stream(&self, request: &CompletionRequest) -> Result<FrameStream, UpstreamError>;

    /// GET /v1/models, relayed as-is.
    async fn list_models(&self) -> Result<PassthroughResponse, UpstreamError>;
}
