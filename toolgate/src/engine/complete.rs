// Copyright 2026 The Toolgate Project
// SPDX-License-Identifier: Apache-2.0

// Complete-response delivery: every upstream call is awaited in full and
// the client receives one assembled chat completion.

use bytes::Bytes;
use serde_json::{json, Map, Value};
use tokio_util::sync::CancellationToken;

use super::{race, tool_output_block, DeliveryMode, LoopEngine, LoopError, RequestContext, TurnAction};
use crate::message::Conversation;
use crate::tools::render_results;
use crate::upstream::CompletionRequest;

const FINISH_STOP: &str = "stop";
const FINISH_LENGTH: &str = "length";

impl LoopEngine {
    /// Run the loop to completion and assemble the client response.
    ///
    /// The response keeps the shape of the first upstream body; its
    /// content is every turn's text joined by newlines, with structured
    /// blocks and simple rules applied once over the whole transcript.
    pub async fn run_complete(
        &self,
        request: CompletionRequest,
        mut conversation: Conversation,
        cancel: CancellationToken,
    ) -> Result<Value, LoopError> {
        let ctx = RequestContext::new(DeliveryMode::Complete);
        let show_output = self.deps.config.show_tool_output;

        let mut template: Option<Option<Map<String, Value>>> = None;
        let mut transcript = String::new();
        let mut finish_reason = FINISH_STOP;
        let mut depth = 0;

        loop {
            let call = request.with_conversation(&conversation, false);
            let body = race(&cancel, self.deps.client.complete(&call)).await??;
            let (content, shape) = split_body(&body);
            if template.is_none() {
                template = Some(shape);
            }

            if depth > 0 {
                transcript.push('\n');
            }
            transcript.push_str(&content);

            match self.resolve_turn(&content, depth, &ctx, &cancel).await? {
                TurnAction::Finish => break,
                TurnAction::DepthExhausted => {
                    finish_reason = FINISH_LENGTH;
                    break;
                }
                TurnAction::Continue(results) => {
                    let rendered = render_results(&results);
                    if show_output {
                        transcript.push_str(&tool_output_block(&rendered));
                    }
                    conversation.push_tool_round(&content, rendered);
                    depth += 1;
                }
            }
        }

        tracing::info!(
            request_id = %ctx.request_id,
            upstream_calls = depth + 1,
            finish_reason,
            "complete response assembled"
        );

        let visible = self.deps.rules.snapshot().filter_complete(&transcript);
        Ok(assemble(
            template.flatten(),
            request.model(),
            &visible,
            finish_reason,
        ))
    }
}

/// Turn content plus the body's object shape, if it had one. A body that
/// is not a JSON object is treated as plain text.
fn split_body(body: &Bytes) -> (String, Option<Map<String, Value>>) {
    match serde_json::from_slice::<Value>(body) {
        Ok(Value::Object(map)) => {
            let content = map
                .get("choices")
                .and_then(|c| c.get(0))
                .and_then(|c| c.get("message"))
                .and_then(|m| m.get("content"))
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            (content, Some(map))
        }
        _ => (String::from_utf8_lossy(body).into_owned(), None),
    }
}

/// Put the final content and finish reason into the first body's shape, or
/// synthesize a minimal chat completion when there is none.
fn assemble(
    template: Option<Map<String, Value>>,
    model: &str,
    content: &str,
    finish_reason: &str,
) -> Value {
    let mut body = template.unwrap_or_else(|| {
        let mut map = Map::new();
        map.insert(
            "id".into(),
            json!(format!("chatcmpl-{}", uuid::Uuid::new_v4())),
        );
        map.insert("object".into(), json!("chat.completion"));
        map.insert("created".into(), json!(chrono::Utc::now().timestamp()));
        map.insert("model".into(), json!(model));
        map
    });

    let choices = body
        .entry("choices")
        .or_insert_with(|| Value::Array(Vec::new()));
    if !choices.is_array() {
        *choices = Value::Array(Vec::new());
    }
    if let Value::Array(list) = choices {
        if list.is_empty() || !list[0].is_object() {
            list.clear();
            list.push(json!({
                "index": 0,
                "message": { "role": "assistant" }
            }));
        }
        if let Some(choice) = list[0].as_object_mut() {
            let message = choice
                .entry("message")
                .or_insert_with(|| json!({ "role": "assistant" }));
            match message {
                Value::Object(fields) => {
                    fields.insert("content".into(), json!(content));
                }
                other => *other = json!({ "role": "assistant", "content": content }),
            }
            choice.insert("finish_reason".into(), json!(finish_reason));
        }
    }

    Value::Object(body)
}
