// Copyright 2026 The Toolgate Project
// SPDX-License-Identifier: Apache-2.0

// Tool-call loop engine
//
// Drives model -> tool -> model rounds for one client request:
// 1. Call upstream with the conversation so far
// 2. Parse the turn for tool-request blocks (and diary notes)
// 3. Dispatch every call, bounded by max_parallel_tools, in discovery order
// 4. Append the turn and the rendered results, repeat until no calls
//    remain or the depth limit is hit
//
// Delivery lives in `complete` (one assembled body) and `stream` (SSE).

mod complete;
mod stream;

pub use stream::ResponseStream;

use futures_util::stream::{self as futures_stream, StreamExt};
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::config::LoopConfig;
use crate::grammar::{extract_diary_notes, parse_tool_requests, BlockIssue};
use crate::rules::RuleStore;
use crate::sink::{spawn_note_writes, NoteWriter, ToolLogEvent, ToolLogSink};
use crate::tools::{ToolCall, ToolDispatcher, ToolResult};
use crate::upstream::{CompletionClient, UpstreamError};

/// Opening wrapper for tool results shown to the client.
pub const TOOL_RESULT_START: &str = "<<<[TOOL_RESULT]>>>";
pub const TOOL_RESULT_END: &str = "<<<[END_TOOL_RESULT]>>>";

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LoopError {
    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    #[error("request cancelled")]
    Cancelled,
}

// ---------------------------------------------------------------------------
// Dependencies
// ---------------------------------------------------------------------------

/// Everything the loop talks to. Injected so tests can swap any of them.
pub struct LoopDeps {
    pub client: Arc<dyn CompletionClient>,
    pub dispatcher: Arc<dyn ToolDispatcher>,
    pub rules: Arc<RuleStore>,
    pub tool_log: Arc<dyn ToolLogSink>,
    pub notes: Option<Arc<dyn NoteWriter>>,
    pub config: LoopConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMode {
    Stream,
    Complete,
}

impl DeliveryMode {
    pub fn as_str(self) -> &'static str {
        match self {
            DeliveryMode::Stream => "stream",
            DeliveryMode::Complete => "complete",
        }
    }

    fn max_depth(self, config: &LoopConfig) -> usize {
        match self {
            DeliveryMode::Stream => config.max_depth_stream,
            DeliveryMode::Complete => config.max_depth_complete,
        }
    }
}

/// Per-request identity carried into every log line.
#[derive(Debug, Clone)]
struct RequestContext {
    request_id: String,
    mode: DeliveryMode,
}

impl RequestContext {
    fn new(mode: DeliveryMode) -> Self {
        Self {
            request_id: uuid::Uuid::new_v4().to_string(),
            mode,
        }
    }
}

/// What to do after a turn has been inspected.
#[derive(Debug)]
enum TurnAction {
    /// No tool requests: the loop is done.
    Finish,
    /// Tool requests remain but the depth limit was reached.
    DepthExhausted,
    /// Results to feed back for the next round.
    Continue(Vec<ToolResult>),
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Cheap to clone; shared by all request handlers.
#[derive(Clone)]
pub struct LoopEngine {
    deps: Arc<LoopDeps>,
}

impl LoopEngine {
    pub fn new(deps: LoopDeps) -> Self {
        Self {
            deps: Arc::new(deps),
        }
    }

    pub fn config(&self) -> &LoopConfig {
        &self.deps.config
    }

    pub fn client(&self) -> &Arc<dyn CompletionClient> {
        &self.deps.client
    }

    pub fn rules(&self) -> &Arc<RuleStore> {
        &self.deps.rules
    }

    /// Inspect one finished turn: log malformed blocks, hand off diary
    /// notes, and dispatch any tool calls unless `depth` is exhausted.
    async fn resolve_turn(
        &self,
        content: &str,
        depth: usize,
        ctx: &RequestContext,
        cancel: &CancellationToken,
    ) -> Result<TurnAction, LoopError> {
        self.hand_off_notes(content, ctx);

        let parsed = parse_tool_requests(content);
        for issue in &parsed.issues {
            match issue {
                BlockIssue::Unterminated { offset } => tracing::warn!(
                    request_id = %ctx.request_id,
                    offset,
                    "tool request block without end token discarded"
                ),
                BlockIssue::MissingToolName { offset } => tracing::warn!(
                    request_id = %ctx.request_id,
                    offset,
                    "tool request block without tool_name discarded"
                ),
            }
        }

        if !parsed.has_calls() {
            return Ok(TurnAction::Finish);
        }

        let max_depth = ctx.mode.max_depth(&self.deps.config);
        if depth >= max_depth {
            tracing::info!(
                request_id = %ctx.request_id,
                mode = ctx.mode.as_str(),
                max_depth,
                pending_calls = parsed.calls.len(),
                "max tool depth reached, delivering turn unresolved"
            );
            return Ok(TurnAction::DepthExhausted);
        }

        tracing::debug!(
            request_id = %ctx.request_id,
            depth,
            calls = parsed.calls.len(),
            "dispatching tool calls"
        );
        let results = race(cancel, self.dispatch_all(parsed.calls)).await?;
        for result in &results {
            self.deps
                .tool_log
                .record(ToolLogEvent::from_result(result, ctx.mode.as_str()));
        }
        Ok(TurnAction::Continue(results))
    }

    /// Dispatch concurrently, at most `max_parallel_tools` in flight.
    /// Results come back in the order the calls were discovered.
    async fn dispatch_all(&self, calls: Vec<ToolCall>) -> Vec<ToolResult> {
        let limit = self.deps.config.max_parallel_tools.max(1);
        futures_stream::iter(calls)
            .map(|call| {
                let dispatcher = Arc::clone(&self.deps.dispatcher);
                async move {
                    let result = dispatcher.dispatch(&call.name, &call.args).await;
                    ToolResult::from_dispatch(&call.name, result)
                }
            })
            .buffered(limit)
            .collect()
            .await
    }

    fn hand_off_notes(&self, content: &str, ctx: &RequestContext) {
        let Some(writer) = &self.deps.notes else {
            return;
        };
        let (notes, skipped) = extract_diary_notes(content);
        if skipped > 0 {
            tracing::warn!(
                request_id = %ctx.request_id,
                skipped,
                "diary blocks missing Maid, Date or Content skipped"
            );
        }
        if !notes.is_empty() {
            spawn_note_writes(writer, notes, &ctx.request_id);
        }
    }
}

/// Results wrapped for display when show_tool_output is on.
fn tool_output_block(rendered: &str) -> String {
    format!("\n{TOOL_RESULT_START}\n{rendered}\n{TOOL_RESULT_END}\n")
}

/// Run `fut` unless the request is cancelled first.
async fn race<T>(cancel: &CancellationToken, fut: impl Future<Output = T>) -> Result<T, LoopError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(LoopError::Cancelled),
        out = fut => Ok(out),
    }
}
