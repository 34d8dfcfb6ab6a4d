// Copyright 2026 The Toolgate Project
// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;

use sha2::{Digest, Sha256};

use super::error::ConfigError;
use super::interpolation::{resolve_optional, resolve_variables};
use super::raw;
use super::source::ConfigSource;
use super::types::*;

/// Load and validate a gateway config from the given source.
///
/// Steps:
/// 1. Read raw YAML from source
/// 2. Compute SHA256 config hash
/// 3. Parse YAML into raw deserialization types
/// 4. Validate version and limits
/// 5. Resolve `${VAR}` interpolation in secrets and URLs
/// 6. Build typed `GatewayConfig`
pub fn load_config(source: &dyn ConfigSource) -> Result<GatewayConfig, ConfigError> {
    let raw_yaml = source.load()?;
    let config_hash = compute_hash(&raw_yaml);

    let raw: raw::RawConfig = serde_yaml::from_str(&raw_yaml)?;

    if raw.toolgate != "v1" {
        return Err(ConfigError::Validation(format!(
            "unsupported config version \"{}\", expected \"v1\"",
            raw.toolgate
        )));
    }

    let server = build_server_config(raw.server)?;
    let upstream = build_upstream_config(raw.upstream)?;
    let loop_config = build_loop_config(raw.loop_)?;

    let mut tools = Vec::with_capacity(raw.tools.len());
    for (name, tool) in raw.tools {
        if name.trim().is_empty() {
            return Err(ConfigError::Validation("tool name must not be empty".into()));
        }
        let url = resolve_variables(&tool.url)?;
        if !is_http_url(&url) {
            return Err(ConfigError::Validation(format!(
                "tool \"{name}\" url must start with http:// or https://, got \"{url}\""
            )));
        }
        tools.push(WebhookToolConfig {
            name,
            url,
            timeout_ms: tool.timeout_ms,
        });
    }

    let diary = match raw.diary {
        Some(d) if d.tool.trim().is_empty() => {
            return Err(ConfigError::Validation("diary.tool must not be empty".into()))
        }
        Some(d) => Some(DiaryConfig { tool: d.tool }),
        None => None,
    };

    let rules_path = resolve_optional(raw.rules_path.as_deref())?.map(PathBuf::from);

    Ok(GatewayConfig {
        version: raw.toolgate,
        environment: raw.environment.unwrap_or_default(),
        server,
        upstream,
        loop_config,
        rules_path,
        tools,
        diary,
        config_hash,
    })
}

pub fn compute_hash(raw_yaml: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw_yaml.as_bytes());
    let hash = hasher.finalize();
    format!("sha256:{:x}", hash)
}

fn build_server_config(raw: Option<raw::RawServerConfig>) -> Result<ServerConfig, ConfigError> {
    let raw = match raw {
        Some(r) => r,
        None => return Ok(ServerConfig::default()),
    };
    Ok(ServerConfig {
        port: raw.port.unwrap_or(DEFAULT_PORT),
        key: resolve_optional(raw.key.as_deref())?,
    })
}

fn build_upstream_config(raw: raw::RawUpstreamConfig) -> Result<UpstreamConfig, ConfigError> {
    let base_url = resolve_variables(&raw.base_url)?;
    if !is_http_url(&base_url) {
        return Err(ConfigError::Validation(format!(
            "upstream.base_url must start with http:// or https://, got \"{base_url}\""
        )));
    }
    if raw.timeout_ms == Some(0) {
        return Err(ConfigError::Validation(
            "upstream.timeout_ms must be > 0".into(),
        ));
    }
    Ok(UpstreamConfig {
        base_url: base_url.trim_end_matches('/').to_string(),
        api_key: resolve_optional(raw.api_key.as_deref())?,
        timeout_ms: raw.timeout_ms,
    })
}

fn build_loop_config(raw: Option<raw::RawLoopConfig>) -> Result<LoopConfig, ConfigError> {
    let raw = match raw {
        Some(r) => r,
        None => return Ok(LoopConfig::default()),
    };

    let max_parallel_tools = raw
        .max_parallel_tools
        .unwrap_or(DEFAULT_MAX_PARALLEL_TOOLS);
    if max_parallel_tools < 1 {
        return Err(ConfigError::Validation(
            "loop.max_parallel_tools must be >= 1".into(),
        ));
    }

    Ok(LoopConfig {
        max_depth_stream: raw.max_depth_stream.unwrap_or(DEFAULT_MAX_DEPTH),
        max_depth_complete: raw.max_depth_complete.unwrap_or(DEFAULT_MAX_DEPTH),
        show_tool_output: raw.show_tool_output.unwrap_or(false),
        max_parallel_tools,
    })
}

fn is_http_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}
