// Rule file parsing
//
// Accepted shapes (YAML or JSON):
//   { structured_rules: [...], simple_rules: [...] }
//   { rules: [...] }   entries with `type: structured_chunk` are structured
// Entries are deserialized one at a time so a bad entry is skipped with a
// warning instead of failing the whole file.

use serde::Deserialize;
use std::time::Duration;

use super::{BlockAction, RuleOptions, RuleSet, SimpleRule, StructuredRule};
use crate::config::ConfigError;

const STRUCTURED_TYPE: &str = "structured_chunk";

#[derive(Debug, Deserialize)]
struct RawRuleFile {
    #[serde(default)]
    structured_rules: Vec<serde_yaml::Value>,
    #[serde(default)]
    simple_rules: Vec<serde_yaml::Value>,
    #[serde(default)]
    rules: Vec<serde_yaml::Value>,
}

#[derive(Debug, Deserialize)]
struct RawStructuredRule {
    name: String,
    start_pattern: String,
    end_pattern: String,
    action: Option<String>,
    #[serde(default)]
    replacement: String,
    #[serde(default = "default_true")]
    enabled: bool,
    #[serde(default)]
    options: RawRuleOptions,
}

#[derive(Debug, Default, Deserialize)]
struct RawRuleOptions {
    max_chunk_size: Option<usize>,
    timeout_ms: Option<u64>,
    #[serde(default)]
    multiline: bool,
}

#[derive(Debug, Deserialize)]
struct RawSimpleRule {
    pattern: String,
    #[serde(default)]
    replacement: String,
    flags: Option<String>,
    description: Option<String>,
    #[serde(default = "default_true")]
    enabled: bool,
}

fn default_true() -> bool {
    true
}

/// Parse a rule file into a compiled `RuleSet`.
///
/// Only a document that is not a mapping of the accepted shape is an
/// error; individual entries that fail to deserialize or compile are
/// logged and skipped.
pub fn parse_rule_file(text: &str) -> Result<RuleSet, ConfigError> {
    let raw: RawRuleFile = if text.trim().is_empty() {
        RawRuleFile {
            structured_rules: Vec::new(),
            simple_rules: Vec::new(),
            rules: Vec::new(),
        }
    } else {
        serde_yaml::from_str(text)?
    };

    let mut structured_entries = raw.structured_rules;
    let mut simple_entries = raw.simple_rules;
    for entry in raw.rules {
        let is_structured = entry
            .get("type")
            .and_then(|t| t.as_str())
            .map(|t| t == STRUCTURED_TYPE)
            .unwrap_or(false);
        if is_structured {
            structured_entries.push(entry);
        } else {
            simple_entries.push(entry);
        }
    }

    let mut skipped = 0usize;
    let mut structured = Vec::with_capacity(structured_entries.len());
    for (index, entry) in structured_entries.into_iter().enumerate() {
        match build_structured(entry) {
            Ok(Some(rule)) => structured.push(rule),
            Ok(None) => {}
            Err(e) => {
                skipped += 1;
                tracing::warn!(kind = "structured", index, error = %e, "rule skipped");
            }
        }
    }

    let mut simple = Vec::with_capacity(simple_entries.len());
    for (index, entry) in simple_entries.into_iter().enumerate() {
        match build_simple(entry) {
            Ok(Some(rule)) => simple.push(rule),
            Ok(None) => {}
            Err(e) => {
                skipped += 1;
                tracing::warn!(kind = "simple", index, error = %e, "rule skipped");
            }
        }
    }

    let set = RuleSet::new(structured, simple);
    tracing::info!(
        structured = set.structured().len(),
        simple = set.simple().len(),
        skipped,
        fingerprint = %set.fingerprint(),
        "rules parsed"
    );
    Ok(set)
}

fn build_structured(entry: serde_yaml::Value) -> Result<Option<StructuredRule>, ConfigError> {
    let raw: RawStructuredRule = serde_yaml::from_value(entry)?;
    if !raw.enabled {
        tracing::debug!(rule = %raw.name, "structured rule disabled");
        return Ok(None);
    }
    let action = match raw.action.as_deref() {
        Some(a) => BlockAction::parse(a)?,
        None => BlockAction::Replace,
    };
    let defaults = RuleOptions::default();
    let options = RuleOptions {
        max_buffer_chars: raw.options.max_chunk_size.unwrap_or(defaults.max_buffer_chars),
        timeout: raw
            .options
            .timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(defaults.timeout),
        multiline: raw.options.multiline,
    };
    StructuredRule::compile(
        raw.name,
        &raw.start_pattern,
        &raw.end_pattern,
        action,
        raw.replacement,
        options,
    )
    .map(Some)
}

fn build_simple(entry: serde_yaml::Value) -> Result<Option<SimpleRule>, ConfigError> {
    let raw: RawSimpleRule = serde_yaml::from_value(entry)?;
    if !raw.enabled {
        return Ok(None);
    }
    let flags = raw.flags.as_deref().unwrap_or("g");
    let mut rule = SimpleRule::compile(&raw.pattern, raw.replacement, flags)?;
    rule.description = raw.description;
    Ok(Some(rule))
}
