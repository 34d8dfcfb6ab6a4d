// Copyright 2026 The Toolgate Project
// SPDX-License-Identifier: Apache-2.0

// Tool dispatch contract
//
// Responsibilities:
// - ToolCall / ToolResult types shared by the grammar and the loop engine
// - ToolDispatcher trait (the single entry point the loop engine calls)
// - Folding dispatch outcomes into model-readable text

mod registry;
mod webhook;

pub use registry::{Tool, ToolRegistry};
pub use webhook::WebhookTool;

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt;

/// Separator placed between result sections in the follow-up user message.
pub const RESULT_SEPARATOR: &str = "\n\n---\n\n";

// ---------------------------------------------------------------------------
// Calls and results
// ---------------------------------------------------------------------------

/// A normalized tool request parsed from model output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCall {
    pub name: String,
    pub args: BTreeMap<String, String>,
}

impl ToolCall {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args: BTreeMap::new(),
        }
    }

    pub fn with_arg(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.args.insert(key.into(), value.into());
        self
    }
}

/// How a single dispatch ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolOutcome {
    Success,
    ExecutionError,
    NotFound,
}

impl ToolOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            ToolOutcome::Success => "success",
            ToolOutcome::ExecutionError => "execution_error",
            ToolOutcome::NotFound => "not_found",
        }
    }
}

impl fmt::Display for ToolOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one dispatch, already rendered as text the model can read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolResult {
    pub name: String,
    pub text: String,
    pub outcome: ToolOutcome,
}

impl ToolResult {
    /// Fold a dispatcher result into a `ToolResult`. Failures become
    /// explanatory text; none of them are fatal to the loop.
    pub fn from_dispatch(name: &str, result: Result<String, DispatchError>) -> Self {
        let (text, outcome) = match result {
            Ok(text) if text.trim().is_empty() => (
                format!("Tool {name} finished without returning any content."),
                ToolOutcome::Success,
            ),
            Ok(text) => (text, ToolOutcome::Success),
            Err(DispatchError::NotFound(_)) => (
                format!("Error: no tool named \"{name}\" is registered."),
                ToolOutcome::NotFound,
            ),
            Err(DispatchError::Execution(message)) => (
                format!("Error while executing tool {name}: {message}"),
                ToolOutcome::ExecutionError,
            ),
        };
        Self {
            name: name.to_string(),
            text,
            outcome,
        }
    }

    /// The section this result contributes to the follow-up message.
    pub fn section(&self) -> String {
        format!("Result from tool \"{}\":\n{}", self.name, self.text)
    }
}

/// Join result sections in discovery order into one user-message body.
pub fn render_results(results: &[ToolResult]) -> String {
    results
        .iter()
        .map(ToolResult::section)
        .collect::<Vec<_>>()
        .join(RESULT_SEPARATOR)
}

// ---------------------------------------------------------------------------
// Dispatcher seam
// ---------------------------------------------------------------------------

/// Typed dispatch failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    #[error("no tool named \"{0}\" is registered")]
    NotFound(String),

    #[error("{0}")]
    Execution(String),
}

/// Executes a tool by name. Knows nothing about the text grammar.
#[async_trait]
pub trait ToolDispatcher: Send + Sync {
    async fn dispatch(
        &self,
        name: &str,
        args: &BTreeMap<String, String>,
    ) -> Result<String, DispatchError>;
}
