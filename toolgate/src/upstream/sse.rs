// Copyright 2026 The Toolgate Project
// SPDX-License-Identifier: Apache-2.0

// SSE framing
//
// Byte-level decoding of upstream `data:` lines into frames, and the
// encoders used when relaying frames to the client.

use bytes::Bytes;
use serde_json::{json, Value};

use super::UpstreamError;

pub const DONE_FRAME: &str = "data: [DONE]\n\n";

/// One SSE event from the upstream.
#[derive(Debug, Clone, PartialEq)]
pub enum SseFrame {
    /// Raw payload after `data:`.
    Data(String),
    /// The `[DONE]` terminator.
    Done,
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

/// Parse one SSE line.
///
/// Blank lines, comments and `event:` lines yield nothing; only `data:`
/// lines carry frames.
pub fn parse_sse_line(line: &str) -> Option<SseFrame> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with(':') {
        return None;
    }
    let data = trimmed
        .strip_prefix("data: ")
        .or_else(|| trimmed.strip_prefix("data:"))?;
    if data.trim() == "[DONE]" {
        return Some(SseFrame::Done);
    }
    Some(SseFrame::Data(data.to_string()))
}

/// Reassembles lines split across network chunks.
///
/// Bytes are held until a newline arrives, so a multi-byte UTF-8 sequence
/// split by the transport is never decoded in halves.
#[derive(Debug, Default)]
pub struct SseDecoder {
    pending: Vec<u8>,
}

impl SseDecoder {
    pub fn push(&mut self, bytes: &[u8]) -> Vec<SseFrame> {
        self.pending.extend_from_slice(bytes);
        let mut frames = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            if let Some(frame) = parse_sse_line(&String::from_utf8_lossy(&line)) {
                frames.push(frame);
            }
        }
        frames
    }

    /// Decode whatever is left once the body ends without a final newline.
    pub fn finish(&mut self) -> Vec<SseFrame> {
        let rest = std::mem::take(&mut self.pending);
        parse_sse_line(&String::from_utf8_lossy(&rest))
            .into_iter()
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Chunk payload helpers
// ---------------------------------------------------------------------------

/// `choices[0].delta.content` of a chat completion chunk.
pub fn delta_content(payload: &Value) -> Option<&str> {
    payload
        .get("choices")?
        .get(0)?
        .get("delta")?
        .get("content")?
        .as_str()
}

/// Overwrite `choices[0].delta.content`. No-op when the path is absent.
pub fn replace_delta_content(payload: &mut Value, text: &str) {
    if let Some(delta) = payload
        .get_mut("choices")
        .and_then(|c| c.get_mut(0))
        .and_then(|c| c.get_mut("delta"))
        .and_then(Value::as_object_mut)
    {
        delta.insert("content".to_string(), Value::String(text.to_string()));
    }
}

/// A synthetic content chunk, borrowing id/model/created from `template`
/// so clients see a consistent stream.
pub fn content_frame(template: Option<&Value>, text: &str) -> Value {
    let field = |key: &str| {
        template
            .and_then(|t| t.get(key))
            .cloned()
            .unwrap_or(Value::Null)
    };
    let id = match field("id") {
        Value::Null => Value::String(format!("chatcmpl-{}", uuid::Uuid::new_v4())),
        id => id,
    };
    let created = match field("created") {
        Value::Null => json!(chrono::Utc::now().timestamp()),
        created => created,
    };
    json!({
        "id": id,
        "object": "chat.completion.chunk",
        "created": created,
        "model": field("model"),
        "choices": [{
            "index": 0,
            "delta": { "content": text },
            "finish_reason": null
        }]
    })
}

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

pub fn encode_data(payload: &Value) -> Bytes {
    Bytes::from(format!("data: {payload}\n\n"))
}

/// Error event for failures after the stream has started.
pub fn error_frame(err: &UpstreamError) -> Bytes {
    let status = match err {
        UpstreamError::Status { status, .. } => json!(status),
        _ => Value::Null,
    };
    encode_data(&json!({
        "error": "upstream_call_failed",
        "status": status,
        "message": err.to_string(),
    }))
}
