// Copyright 2026 The Toolgate Project
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use super::machine::{BlockInterceptor, Filtered, InterceptStats};
use crate::rules::RuleSet;

/// Queue depth between submitters and the worker.
const QUEUE_DEPTH: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InterceptError {
    #[error("interceptor worker stopped")]
    Closed,
}

enum Command {
    Chunk(String, oneshot::Sender<Filtered>),
    Tick(oneshot::Sender<Option<String>>),
    Finish(oneshot::Sender<String>),
    Stats(oneshot::Sender<InterceptStats>),
}

/// Cloneable front for one stream's interceptor.
///
/// Commands go through a FIFO channel drained by a single worker task that
/// owns the `BlockInterceptor`, so chunks are applied strictly in
/// submission order even when several tasks submit at once. The worker
/// exits when every handle is dropped or the token is cancelled.
#[derive(Clone)]
pub struct InterceptorHandle {
    tx: mpsc::Sender<Command>,
}

impl InterceptorHandle {
    pub fn spawn(rules: Arc<RuleSet>, cancel: CancellationToken) -> Self {
        let (tx, mut rx) = mpsc::channel::<Command>(QUEUE_DEPTH);

        tokio::spawn(async move {
            let mut machine = BlockInterceptor::new(rules);
            loop {
                let command = tokio::select! {
                    _ = cancel.cancelled() => break,
                    command = rx.recv() => match command {
                        Some(c) => c,
                        None => break,
                    },
                };
                // A dropped reply receiver only means the submitter gave up.
                match command {
                    Command::Chunk(text, reply) => {
                        let _ = reply.send(machine.push(&text));
                    }
                    Command::Tick(reply) => {
                        let _ = reply.send(machine.tick());
                    }
                    Command::Finish(reply) => {
                        let _ = reply.send(machine.finish());
                    }
                    Command::Stats(reply) => {
                        let _ = reply.send(machine.stats());
                    }
                }
            }
        });

        Self { tx }
    }

    /// Feed one chunk and wait for its visible output.
    pub async fn submit(&self, chunk: impl Into<String>) -> Result<Filtered, InterceptError> {
        self.request(|reply| Command::Chunk(chunk.into(), reply)).await
    }

    /// Flush a timed-out block, if any.
    pub async fn tick(&self) -> Result<Option<String>, InterceptError> {
        self.request(Command::Tick).await
    }

    /// Release everything still held and reset.
    pub async fn finish(&self) -> Result<String, InterceptError> {
        self.request(Command::Finish).await
    }

    pub async fn stats(&self) -> Result<InterceptStats, InterceptError> {
        self.request(Command::Stats).await
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, InterceptError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(build(reply_tx))
            .await
            .map_err(|_| InterceptError::Closed)?;
        reply_rx.await.map_err(|_| InterceptError::Closed)
    }
}
