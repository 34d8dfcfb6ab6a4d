// Copyright 2026 The Toolgate Project
// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Parsed and validated gateway config.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Config version. Always "v1".
    pub version: String,
    /// Environment label (e.g. "dev", "production").
    pub environment: String,
    pub server: ServerConfig,
    pub upstream: UpstreamConfig,
    pub loop_config: LoopConfig,
    /// Structured-block and simple rule file, if any.
    pub rules_path: Option<PathBuf>,
    /// Webhook tools keyed by tool name, in name order.
    pub tools: Vec<WebhookToolConfig>,
    pub diary: Option<DiaryConfig>,
    /// SHA256 hash of the raw config text: "sha256:{hex}".
    pub config_hash: String,
}

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub port: u16,
    /// Bearer token clients must present. `None` disables authentication.
    pub key: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            key: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamConfig {
    /// Base URL without the `/v1/...` suffix, trailing slash trimmed.
    pub base_url: String,
    pub api_key: Option<String>,
    pub timeout_ms: Option<u64>,
}

/// Recursion and fan-out limits for the tool-call loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopConfig {
    /// Max recursive tool turns on the incremental (SSE) path.
    pub max_depth_stream: usize,
    /// Max recursive tool turns on the complete-response path.
    pub max_depth_complete: usize,
    /// Interleave tool results into client-visible output.
    pub show_tool_output: bool,
    /// Max tool dispatches in flight per turn.
    pub max_parallel_tools: usize,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            max_depth_stream: DEFAULT_MAX_DEPTH,
            max_depth_complete: DEFAULT_MAX_DEPTH,
            show_tool_output: false,
            max_parallel_tools: DEFAULT_MAX_PARALLEL_TOOLS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookToolConfig {
    pub name: String,
    pub url: String,
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiaryConfig {
    /// Tool the extracted notes are dispatched to.
    pub tool: String,
}

pub const DEFAULT_PORT: u16 = 6005;
pub const DEFAULT_MAX_DEPTH: usize = 5;
pub const DEFAULT_MAX_PARALLEL_TOOLS: usize = 8;
