// Copyright 2026 The Toolgate Project
// SPDX-License-Identifier: Apache-2.0

// Rule store
//
// Responsibilities:
// - Compiled structured-block rules (start/end pattern pairs) and simple
//   find/replace rules
// - Loading rule files, skipping malformed or invalid entries
// - Whole-text filtering for complete (non-streamed) responses
// - Atomic swap of the active rule set on reload

mod file;
mod store;

pub use file::parse_rule_file;
pub use store::{RuleStatus, RuleStore};

use std::borrow::Cow;
use std::time::Duration;

use crate::config::{compute_hash, CompiledPattern, ConfigError, PatternFlags};

pub const DEFAULT_MAX_BUFFER_CHARS: usize = 10_000;
pub const DEFAULT_TIMEOUT_MS: u64 = 5_000;

/// Window, in chars, within which a partial start marker is held back.
pub const MAX_MARKER_LOOKAHEAD: usize = 256;

// ---------------------------------------------------------------------------
// Structured-block rules
// ---------------------------------------------------------------------------

/// What happens to a completed block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockAction {
    /// Emit the rule's replacement text in place of the block.
    Replace,
    /// Emit nothing in place of the block.
    Remove,
    /// Alias of `Replace`.
    Modify,
}

impl BlockAction {
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        match s {
            "replace" => Ok(BlockAction::Replace),
            "remove" => Ok(BlockAction::Remove),
            "modify" => Ok(BlockAction::Modify),
            other => Err(ConfigError::Validation(format!(
                "unknown block action \"{other}\", expected \"replace\", \"remove\", or \"modify\""
            ))),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BlockAction::Replace => "replace",
            BlockAction::Remove => "remove",
            BlockAction::Modify => "modify",
        }
    }
}

/// Per-rule limits and matching options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuleOptions {
    pub max_buffer_chars: usize,
    pub timeout: Duration,
    pub multiline: bool,
}

impl Default for RuleOptions {
    fn default() -> Self {
        Self {
            max_buffer_chars: DEFAULT_MAX_BUFFER_CHARS,
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            multiline: false,
        }
    }
}

/// A compiled start/end rule. Immutable once built.
#[derive(Debug, Clone)]
pub struct StructuredRule {
    pub name: String,
    pub start: CompiledPattern,
    pub end: CompiledPattern,
    pub action: BlockAction,
    pub replacement: String,
    pub options: RuleOptions,
    /// What every start match begins with.
    pub start_lead: StartLead,
}

impl StructuredRule {
    pub fn compile(
        name: impl Into<String>,
        start_pattern: &str,
        end_pattern: &str,
        action: BlockAction,
        replacement: impl Into<String>,
        options: RuleOptions,
    ) -> Result<Self, ConfigError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(ConfigError::Validation("structured rule name must not be empty".into()));
        }
        if options.max_buffer_chars == 0 {
            return Err(ConfigError::Validation(format!(
                "rule \"{name}\": max_chunk_size must be > 0"
            )));
        }
        let flags = PatternFlags {
            multi_line: options.multiline,
            ..PatternFlags::default()
        };
        Ok(Self {
            start: CompiledPattern::compile_with(start_pattern, flags)?,
            end: CompiledPattern::compile_with(end_pattern, flags)?,
            start_lead: StartLead::from_pattern(start_pattern),
            name,
            action,
            replacement: replacement.into(),
            options,
        })
    }

    /// Text emitted in place of a completed block.
    pub fn replacement_text(&self) -> &str {
        match self.action {
            BlockAction::Remove => "",
            BlockAction::Replace | BlockAction::Modify => &self.replacement,
        }
    }
}

// ---------------------------------------------------------------------------
// Simple rules
// ---------------------------------------------------------------------------

/// A plain find/replace rule applied to visible text.
#[derive(Debug, Clone)]
pub struct SimpleRule {
    pub pattern: CompiledPattern,
    pub replacement: String,
    /// Replace every match (`g` flag) or only the first.
    pub global: bool,
    pub description: Option<String>,
}

impl SimpleRule {
    pub fn compile(
        pattern: &str,
        replacement: impl Into<String>,
        flags: &str,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            pattern: CompiledPattern::compile_with(pattern, PatternFlags::parse(flags)?)?,
            replacement: replacement.into(),
            global: flags.contains('g'),
            description: None,
        })
    }

    pub fn apply<'t>(&self, text: &'t str) -> Cow<'t, str> {
        let limit = if self.global { 0 } else { 1 };
        self.pattern
            .regex
            .replacen(text, limit, self.replacement.as_str())
    }
}

// ---------------------------------------------------------------------------
// Rule set
// ---------------------------------------------------------------------------

/// An immutable, ordered collection of compiled rules.
#[derive(Debug, Clone)]
pub struct RuleSet {
    structured: Vec<StructuredRule>,
    simple: Vec<SimpleRule>,
    fingerprint: String,
}

impl RuleSet {
    pub fn new(structured: Vec<StructuredRule>, simple: Vec<SimpleRule>) -> Self {
        let fingerprint = fingerprint(&structured, &simple);
        Self {
            structured,
            simple,
            fingerprint,
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new(), Vec::new())
    }

    pub fn structured(&self) -> &[StructuredRule] {
        &self.structured
    }

    pub fn simple(&self) -> &[SimpleRule] {
        &self.simple
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn is_empty(&self) -> bool {
        self.structured.is_empty() && self.simple.is_empty()
    }

    /// Apply every simple rule in order.
    pub fn apply_simple(&self, text: &str) -> String {
        let mut out = text.to_string();
        for rule in &self.simple {
            if let Cow::Owned(replaced) = rule.apply(&out) {
                out = replaced;
            }
        }
        out
    }

    /// Filter a complete text in one pass: each structured rule removes or
    /// replaces its delimited spans, then simple rules run over the result.
    /// A start match with no end match after it is left untouched.
    pub fn filter_complete(&self, text: &str) -> String {
        let mut current = text.to_string();
        for rule in &self.structured {
            current = cut_blocks(rule, &current);
        }
        self.apply_simple(&current)
    }

    /// Earliest structured-rule start match in `text`. Ties go to the rule
    /// listed first.
    pub fn find_start<'t>(&self, text: &'t str) -> Option<(usize, regex::Match<'t>)> {
        self.structured
            .iter()
            .enumerate()
            .filter_map(|(idx, rule)| rule.start.regex.find(text).map(|m| (idx, m)))
            .min_by_key(|(idx, m)| (m.start(), *idx))
    }

    /// Length of the suffix of `text` that could still become a start
    /// marker once more text arrives.
    pub fn holdback_len(&self, text: &str) -> usize {
        self.structured
            .iter()
            .map(|rule| rule.start_lead.holdback(text))
            .max()
            .unwrap_or(0)
    }
}

impl Default for RuleSet {
    fn default() -> Self {
        Self::empty()
    }
}

fn cut_blocks(rule: &StructuredRule, text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut cursor = 0;
    while let Some(start) = rule.start.regex.find_at(text, cursor) {
        let Some(end) = rule.end.regex.find_at(text, start.end()) else {
            break;
        };
        out.push_str(&text[cursor..start.start()]);
        out.push_str(rule.replacement_text());
        cursor = end.end();
        if start.start() == end.end() {
            // Empty block at this position; step over one char.
            match text[cursor..].chars().next() {
                Some(ch) => {
                    out.push(ch);
                    cursor += ch.len_utf8();
                }
                None => break,
            }
        }
    }
    out.push_str(&text[cursor..]);
    out
}

fn fingerprint(structured: &[StructuredRule], simple: &[SimpleRule]) -> String {
    let mut canonical = String::new();
    for r in structured {
        canonical.push_str(&format!(
            "S\0{}\0{}\0{}\0{}\0{}\0{}\0{}\0{}\n",
            r.name,
            r.start.pattern,
            r.end.pattern,
            r.action.as_str(),
            r.replacement,
            r.options.max_buffer_chars,
            r.options.timeout.as_millis(),
            r.options.multiline
        ));
    }
    for r in simple {
        canonical.push_str(&format!(
            "R\0{}\0{}\0{}\n",
            r.pattern.pattern, r.replacement, r.global
        ));
    }
    compute_hash(&canonical)
}

// ---------------------------------------------------------------------------
// Start-marker leads
// ---------------------------------------------------------------------------

/// What every match of a start pattern is known to begin with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartLead {
    /// Each match begins with one of `alternatives`.
    Literal {
        alternatives: Vec<String>,
        ignore_case: bool,
    },
    /// Nothing literal could be read off the pattern. The whole lookahead
    /// window is held back instead.
    Opaque,
}

impl StartLead {
    /// Read the literal lead off a start pattern.
    ///
    /// A leading inline flag group is honored (`i` makes the lead case
    /// insensitive, `x` makes it opaque). Top-level alternation yields one
    /// literal per branch; a branch with no literal makes the lead opaque.
    /// Alternation nested in a group only ends the literal at the group.
    pub fn from_pattern(pattern: &str) -> Self {
        let (body, ignore_case) = match strip_inline_flags(pattern) {
            Some(parts) => parts,
            None => return StartLead::Opaque,
        };

        let mut alternatives = Vec::new();
        for branch in split_top_level(body) {
            let lead = literal_lead(branch);
            if lead.is_empty() {
                return StartLead::Opaque;
            }
            alternatives.push(lead);
        }
        if alternatives.is_empty() {
            return StartLead::Opaque;
        }
        StartLead::Literal {
            alternatives,
            ignore_case,
        }
    }

    /// Bytes to hold back from the end of `text`.
    ///
    /// For literal leads this is the longest suffix inside the lookahead
    /// window that is a proper prefix of a lead, or that begins with a
    /// whole lead. Opaque leads hold the whole window.
    pub fn holdback(&self, text: &str) -> usize {
        let window_start = text
            .char_indices()
            .rev()
            .nth(MAX_MARKER_LOOKAHEAD.saturating_sub(1))
            .map(|(i, _)| i)
            .unwrap_or(0);

        let (alternatives, ignore_case) = match self {
            StartLead::Opaque => return text.len() - window_start,
            StartLead::Literal {
                alternatives,
                ignore_case,
            } => (alternatives, *ignore_case),
        };

        for (idx, _) in text[window_start..].char_indices() {
            let suffix = &text[window_start + idx..];
            let could_start = alternatives.iter().any(|lead| {
                has_prefix(lead, suffix, ignore_case) || has_prefix(suffix, lead, ignore_case)
            });
            if could_start {
                return suffix.len();
            }
        }
        0
    }
}

/// Literal prefix every match of a single-branch `pattern` must begin
/// with. Stops at the first construct that is not a plain character.
pub fn literal_lead(pattern: &str) -> String {
    let mut lead = String::new();
    let mut chars = pattern.chars().peekable();
    if chars.peek() == Some(&'^') {
        chars.next();
    }

    while let Some(ch) = chars.next() {
        let literal = match ch {
            '\\' => match chars.next() {
                Some(esc) if !esc.is_alphanumeric() => esc,
                _ => break,
            },
            '.' | '^' | '$' | '*' | '+' | '?' | '(' | ')' | '[' | ']' | '{' | '}' | '|' => break,
            other => other,
        };
        match chars.peek() {
            Some('*') | Some('?') | Some('{') => break,
            Some('+') => {
                lead.push(literal);
                break;
            }
            _ => lead.push(literal),
        }
    }
    lead
}

/// Split off a leading `(?flags)` group. Returns the rest and whether the
/// flags enable case-insensitive matching, or `None` when the flags change
/// how literal text is read.
fn strip_inline_flags(pattern: &str) -> Option<(&str, bool)> {
    let Some(after) = pattern.strip_prefix("(?") else {
        return Some((pattern, false));
    };
    let close = after.find(')')?;
    let flags = &after[..close];
    if !flags.chars().all(|c| c.is_ascii_alphabetic() || c == '-') {
        // `(?:...)`, `(?P<name>...)` and friends.
        return None;
    }
    let enabled = flags.split('-').next().unwrap_or("");
    if enabled.contains('x') {
        return None;
    }
    Some((&after[close + 1..], enabled.contains('i')))
}

/// Split `pattern` on `|` outside groups and character classes.
fn split_top_level(pattern: &str) -> Vec<&str> {
    let mut branches = Vec::new();
    let mut depth = 0usize;
    let mut escaped = false;
    let mut in_class = false;
    let mut from = 0;
    for (i, ch) in pattern.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '\\' => escaped = true,
            '[' if !in_class => in_class = true,
            ']' if in_class => in_class = false,
            '(' if !in_class => depth += 1,
            ')' if !in_class => depth = depth.saturating_sub(1),
            '|' if !in_class && depth == 0 => {
                branches.push(&pattern[from..i]);
                from = i + 1;
            }
            _ => {}
        }
    }
    branches.push(&pattern[from..]);
    branches
}

/// Whether `text` begins with `prefix`, optionally ignoring case.
fn has_prefix(text: &str, prefix: &str, ignore_case: bool) -> bool {
    let mut rest = text.chars();
    prefix.chars().all(|p| {
        rest.next().is_some_and(|c| {
            c == p || (ignore_case && c.to_lowercase().eq(p.to_lowercase()))
        })
    })
}

#[cfg(test)]
mod tests;
