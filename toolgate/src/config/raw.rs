// Raw YAML deserialization types (internal)
// Kept apart from the public config structs: interpolation and validation
// happen between the two, and defaults are applied on conversion.

use serde::Deserialize;
use std::collections::BTreeMap;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawConfig {
    pub toolgate: String,
    pub environment: Option<String>,
    pub server: Option<RawServerConfig>,
    pub upstream: RawUpstreamConfig,
    #[serde(rename = "loop")]
    pub loop_: Option<RawLoopConfig>,
    pub rules_path: Option<String>,
    #[serde(default)]
    pub tools: BTreeMap<String, RawToolConfig>,
    pub diary: Option<RawDiaryConfig>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawServerConfig {
    pub port: Option<u16>,
    pub key: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawUpstreamConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawLoopConfig {
    pub max_depth_stream: Option<usize>,
    pub max_depth_complete: Option<usize>,
    pub show_tool_output: Option<bool>,
    pub max_parallel_tools: Option<usize>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawToolConfig {
    pub url: String,
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawDiaryConfig {
    pub tool: String,
}
