// Copyright 2026 The Toolgate Project
// SPDX-License-Identifier: Apache-2.0

// Incremental (SSE) delivery
//
// Upstream frames are relayed as they arrive, with each content delta
// passed through the stream's block interceptor first. The turn's raw
// content is accumulated on the side for tool-request detection. The
// [DONE] sentinel is held back until the whole loop is over.

use bytes::Bytes;
use futures_util::stream::{Stream, StreamExt};
use serde_json::Value;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::{CancellationToken, DropGuard};

use super::{race, tool_output_block, DeliveryMode, LoopEngine, LoopError, RequestContext, TurnAction};
use crate::intercept::InterceptorHandle;
use crate::message::Conversation;
use crate::tools::render_results;
use crate::upstream::{
    content_frame, delta_content, encode_data, error_frame, replace_delta_content,
    CompletionRequest, FrameStream, SseFrame, UpstreamError, DONE_FRAME,
};

/// How often a buffering interceptor is checked for an expired block.
const TICK_INTERVAL: Duration = Duration::from_millis(250);

const CHANNEL_DEPTH: usize = 64;

/// SSE body handed to the client. Dropping it cancels the request.
pub struct ResponseStream {
    inner: ReceiverStream<Bytes>,
    _cancel_on_drop: DropGuard,
}

impl Stream for ResponseStream {
    type Item = Bytes;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Bytes>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

/// Why relaying a turn stopped early.
enum RelayStop {
    /// Client went away or the request was cancelled.
    Closed,
    Upstream(UpstreamError),
}

impl LoopEngine {
    /// Start the loop and return the SSE body.
    ///
    /// The first upstream call is made before returning so that a failure
    /// there can still be reported as an HTTP error. Later failures become
    /// an error frame followed by [DONE].
    pub async fn run_stream(
        &self,
        request: CompletionRequest,
        conversation: Conversation,
        cancel: CancellationToken,
    ) -> Result<ResponseStream, LoopError> {
        let ctx = RequestContext::new(DeliveryMode::Stream);
        let first_call = request.with_conversation(&conversation, true);
        let frames = race(&cancel, self.deps.client.stream(&first_call)).await??;

        let (tx, rx) = mpsc::channel::<Bytes>(CHANNEL_DEPTH);
        let engine = self.clone();
        let task_cancel = cancel.clone();
        tokio::spawn(async move {
            engine
                .drive(request, conversation, frames, tx, ctx, task_cancel)
                .await;
        });

        Ok(ResponseStream {
            inner: ReceiverStream::new(rx),
            _cancel_on_drop: cancel.drop_guard(),
        })
    }

    async fn drive(
        &self,
        request: CompletionRequest,
        mut conversation: Conversation,
        mut frames: FrameStream,
        tx: mpsc::Sender<Bytes>,
        ctx: RequestContext,
        cancel: CancellationToken,
    ) {
        let interceptor = InterceptorHandle::spawn(self.deps.rules.snapshot(), cancel.clone());
        let mut depth = 0;

        loop {
            let content = match relay_turn(frames, &interceptor, &tx, &cancel).await {
                Ok(content) => content,
                Err(RelayStop::Closed) => {
                    tracing::debug!(request_id = %ctx.request_id, "client disconnected");
                    cancel.cancel();
                    return;
                }
                Err(RelayStop::Upstream(e)) => {
                    fail(&tx, &ctx, &e).await;
                    return;
                }
            };

            let results = match self.resolve_turn(&content, depth, &ctx, &cancel).await {
                Ok(TurnAction::Continue(results)) => results,
                Ok(TurnAction::Finish | TurnAction::DepthExhausted) => break,
                Err(_) => return,
            };

            let rendered = render_results(&results);
            if self.deps.config.show_tool_output {
                let frame = content_frame(None, &tool_output_block(&rendered));
                if tx.send(encode_data(&frame)).await.is_err() {
                    cancel.cancel();
                    return;
                }
            }
            conversation.push_tool_round(&content, rendered);
            depth += 1;

            let next = request.with_conversation(&conversation, true);
            frames = match race(&cancel, self.deps.client.stream(&next)).await {
                Ok(Ok(frames)) => frames,
                Ok(Err(e)) => {
                    fail(&tx, &ctx, &e).await;
                    return;
                }
                Err(_) => return,
            };
        }

        tracing::info!(
            request_id = %ctx.request_id,
            upstream_calls = depth + 1,
            "stream finished"
        );
        let _ = tx.send(Bytes::from_static(DONE_FRAME.as_bytes())).await;
    }
}

/// Relay one upstream turn and return its raw content.
///
/// The interceptor is finished when the turn ends so a block left open
/// by the model is flushed rather than carried into the next turn.
async fn relay_turn(
    mut frames: FrameStream,
    interceptor: &InterceptorHandle,
    tx: &mpsc::Sender<Bytes>,
    cancel: &CancellationToken,
) -> Result<String, RelayStop> {
    let mut content = String::new();
    let mut template: Option<Value> = None;

    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + TICK_INTERVAL, TICK_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => return Err(RelayStop::Closed),
            _ = ticker.tick() => {
                let flushed = interceptor.tick().await.map_err(|_| RelayStop::Closed)?;
                if let Some(text) = flushed {
                    emit_text(tx, template.as_ref(), &text).await?;
                }
                continue;
            }
            frame = frames.next() => frame,
        };

        let data = match frame {
            None | Some(Ok(SseFrame::Done)) => break,
            Some(Err(e)) => return Err(RelayStop::Upstream(e)),
            Some(Ok(SseFrame::Data(data))) => data,
        };

        let Ok(mut payload) = serde_json::from_str::<Value>(&data) else {
            send(tx, Bytes::from(format!("data: {data}\n\n"))).await?;
            continue;
        };
        if template.is_none() {
            template = Some(payload.clone());
        }

        let finishing = has_finish_reason(&payload);
        let mut visible = String::new();
        if let Some(delta) = delta_content(&payload).map(str::to_owned) {
            content.push_str(&delta);
            visible = interceptor
                .submit(delta)
                .await
                .map_err(|_| RelayStop::Closed)?
                .into_text();
        } else if !finishing {
            send(tx, encode_data(&payload)).await?;
            continue;
        }

        if finishing {
            // Nothing may follow the frame that carries finish_reason.
            visible.push_str(&interceptor.finish().await.map_err(|_| RelayStop::Closed)?);
            if has_delta_object(&payload) {
                replace_delta_content(&mut payload, &visible);
            } else {
                emit_text(tx, template.as_ref(), &visible).await?;
            }
        } else if visible.is_empty() {
            continue;
        } else {
            replace_delta_content(&mut payload, &visible);
        }
        send(tx, encode_data(&payload)).await?;
    }

    let rest = interceptor.finish().await.map_err(|_| RelayStop::Closed)?;
    emit_text(tx, template.as_ref(), &rest).await?;
    Ok(content)
}

fn has_delta_object(payload: &Value) -> bool {
    payload
        .pointer("/choices/0/delta")
        .is_some_and(Value::is_object)
}

fn has_finish_reason(payload: &Value) -> bool {
    payload
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("finish_reason"))
        .is_some_and(|r| !r.is_null())
}

async fn send(tx: &mpsc::Sender<Bytes>, bytes: Bytes) -> Result<(), RelayStop> {
    tx.send(bytes).await.map_err(|_| RelayStop::Closed)
}

/// Emit interceptor output that has no upstream frame to ride on.
async fn emit_text(
    tx: &mpsc::Sender<Bytes>,
    template: Option<&Value>,
    text: &str,
) -> Result<(), RelayStop> {
    if text.is_empty() {
        return Ok(());
    }
    send(tx, encode_data(&content_frame(template, text))).await
}

async fn fail(tx: &mpsc::Sender<Bytes>, ctx: &RequestContext, err: &UpstreamError) {
    tracing::warn!(request_id = %ctx.request_id, error = %err, "upstream call failed mid-stream");
    if tx.send(error_frame(err)).await.is_ok() {
        let _ = tx.send(Bytes::from_static(DONE_FRAME.as_bytes())).await;
    }
}
