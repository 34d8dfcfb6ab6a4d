// Copyright 2026 The Toolgate Project
// SPDX-License-Identifier: Apache-2.0

use super::*;
use crate::config::{ConfigSource, StringSource};
use std::sync::{Arc, Mutex};

fn block_rule(name: &str, start: &str, end: &str, action: BlockAction, replacement: &str) -> StructuredRule {
    StructuredRule::compile(name, start, end, action, replacement, RuleOptions::default()).unwrap()
}

fn x_rule() -> StructuredRule {
    block_rule("x", r"<<<\[X\]>>>", r"<<<\[END_X\]>>>", BlockAction::Remove, "")
}

// ---------------------------------------------------------------
// Lead literals
// ---------------------------------------------------------------

#[test]
fn lead_of_escaped_literal_marker() {
    assert_eq!(literal_lead(r"<<<\[X\]>>>"), "<<<[X]>>>");
}

#[test]
fn lead_stops_at_metacharacters() {
    assert_eq!(literal_lead(r"<<<\[TOOL:\w+\]>>>"), "<<<[TOOL:");
    assert_eq!(literal_lead(r"```json\s*\n"), "```json");
    assert_eq!(literal_lead(r"^<think>"), "<think>");
}

#[test]
fn lead_drops_optional_last_char() {
    assert_eq!(literal_lead("abc?d"), "ab");
    assert_eq!(literal_lead("ab*"), "a");
    assert_eq!(literal_lead("ab+c"), "ab");
}

fn literal(alternatives: &[&str], ignore_case: bool) -> StartLead {
    StartLead::Literal {
        alternatives: alternatives.iter().map(|a| a.to_string()).collect(),
        ignore_case,
    }
}

#[test]
fn top_level_alternation_gives_one_lead_per_branch() {
    assert_eq!(StartLead::from_pattern("<a>|<b>"), literal(&["<a>", "<b>"], false));
    assert_eq!(StartLead::from_pattern(r"<a>|\d+"), StartLead::Opaque);
}

#[test]
fn grouped_alternation_ends_the_lead_at_the_group() {
    assert_eq!(StartLead::from_pattern("<(think|reason)>"), literal(&["<"], false));
    assert_eq!(StartLead::from_pattern("<x[|]>"), literal(&["<x"], false));
}

#[test]
fn inline_flags_are_read_before_the_lead() {
    assert_eq!(StartLead::from_pattern("(?i)<a>"), literal(&["<a>"], true));
    assert_eq!(StartLead::from_pattern("(?s)<a>.*"), literal(&["<a>"], false));
    assert_eq!(StartLead::from_pattern("(?x)<a >"), StartLead::Opaque);
    assert_eq!(StartLead::from_pattern("(?:<a>)"), StartLead::Opaque);
}

#[test]
fn class_or_escape_class_at_start_is_opaque() {
    assert_eq!(StartLead::from_pattern(r"\d+<x>"), StartLead::Opaque);
    assert_eq!(StartLead::from_pattern("[<{]think"), StartLead::Opaque);
}

// ---------------------------------------------------------------
// Holdback
// ---------------------------------------------------------------

#[test]
fn holdback_covers_partial_marker_suffix() {
    let set = RuleSet::new(vec![x_rule()], Vec::new());
    assert_eq!(set.holdback_len("hello <<<["), 4);
    assert_eq!(set.holdback_len("hello <"), 1);
    assert_eq!(set.holdback_len("hello"), 0);
    assert_eq!(set.holdback_len("a < b"), 0);
}

#[test]
fn holdback_covers_lead_awaiting_rest_of_pattern() {
    let rule = block_rule("t", r"<<<\[TOOL:\w+\]>>>", "<<<END>>>", BlockAction::Remove, "");
    let set = RuleSet::new(vec![rule], Vec::new());
    assert_eq!(set.holdback_len("text <<<[TOOL:ab"), "<<<[TOOL:ab".len());
}

#[test]
fn holdback_for_grouped_alternation() {
    let rule = block_rule("t", "<(think|reason)>", "</(think|reason)>", BlockAction::Remove, "");
    let set = RuleSet::new(vec![rule], Vec::new());
    assert_eq!(set.holdback_len("a<thi"), 4);
    assert_eq!(set.holdback_len("plain"), 0);
}

#[test]
fn holdback_ignores_case_under_inline_flag() {
    let rule = block_rule("t", "(?i)<think>", "(?i)</think>", BlockAction::Remove, "");
    let set = RuleSet::new(vec![rule], Vec::new());
    assert_eq!(set.holdback_len("a<THI"), 4);
}

#[test]
fn opaque_lead_holds_the_whole_window() {
    let rule = block_rule("t", "[<{]think", "end", BlockAction::Remove, "");
    let set = RuleSet::new(vec![rule], Vec::new());
    assert_eq!(set.holdback_len("short"), 5);
    let long = "a".repeat(MAX_MARKER_LOOKAHEAD + 10);
    assert_eq!(set.holdback_len(&long), MAX_MARKER_LOOKAHEAD);
}

#[test]
fn holdback_bounded_by_lookahead_window() {
    let rule = block_rule("t", r"<<<\[TOOL:\w+\]>>>", "<<<END>>>", BlockAction::Remove, "");
    let set = RuleSet::new(vec![rule], Vec::new());
    let text = format!("<<<[TOOL:{}", "a".repeat(MAX_MARKER_LOOKAHEAD + 10));
    assert_eq!(set.holdback_len(&text), 0);
}

// ---------------------------------------------------------------
// Whole-text filtering
// ---------------------------------------------------------------

#[test]
fn filter_complete_removes_blocks() {
    let set = RuleSet::new(vec![x_rule()], Vec::new());
    assert_eq!(set.filter_complete("A<<<[X]>>>B<<<[END_X]>>>C"), "AC");
    assert_eq!(
        set.filter_complete("1<<<[X]>>>a<<<[END_X]>>>2<<<[X]>>>b<<<[END_X]>>>3"),
        "123"
    );
}

#[test]
fn filter_complete_replaces_and_keeps_unterminated() {
    let rule = block_rule("x", r"<<<\[X\]>>>", r"<<<\[END_X\]>>>", BlockAction::Replace, "[hidden]");
    let set = RuleSet::new(vec![rule], Vec::new());
    assert_eq!(set.filter_complete("A<<<[X]>>>B<<<[END_X]>>>C"), "A[hidden]C");
    assert_eq!(set.filter_complete("A<<<[X]>>>B"), "A<<<[X]>>>B");
}

#[test]
fn simple_rules_run_after_blocks() {
    let simple = SimpleRule::compile("secret", "***", "gi").unwrap();
    let set = RuleSet::new(vec![x_rule()], vec![simple]);
    assert_eq!(
        set.filter_complete("Secret<<<[X]>>>secret<<<[END_X]>>> SECRET"),
        "*** ***"
    );
}

#[test]
fn simple_rule_without_global_replaces_first_only() {
    let rule = SimpleRule::compile("a", "b", "").unwrap();
    assert_eq!(rule.apply("aaa"), "baa");
}

#[test]
fn simple_rule_supports_group_references() {
    let rule = SimpleRule::compile(r"(\w+)@example\.com", "$1@redacted", "g").unwrap();
    assert_eq!(rule.apply("mail bob@example.com"), "mail bob@redacted");
}

// ---------------------------------------------------------------
// Rule file parsing
// ---------------------------------------------------------------

const SPLIT_FILE: &str = r#"
structured_rules:
  - name: thinking
    start_pattern: "<think>"
    end_pattern: "</think>"
    action: remove
    options:
      max_chunk_size: 500
      timeout_ms: 250
  - name: disabled
    start_pattern: "<a>"
    end_pattern: "</a>"
    enabled: false
  - name: broken
    start_pattern: "(unclosed"
    end_pattern: "x"
simple_rules:
  - pattern: "foo"
    replacement: "bar"
  - pattern: "[z-a]"
    replacement: "never"
  - replacement: "missing pattern"
"#;

#[test]
fn split_file_parses_and_skips_invalid() {
    let set = parse_rule_file(SPLIT_FILE).unwrap();
    assert_eq!(set.structured().len(), 1);
    let thinking = &set.structured()[0];
    assert_eq!(thinking.name, "thinking");
    assert_eq!(thinking.action, BlockAction::Remove);
    assert_eq!(thinking.options.max_buffer_chars, 500);
    assert_eq!(thinking.options.timeout, Duration::from_millis(250));
    assert_eq!(thinking.start_lead, literal(&["<think>"], false));

    assert_eq!(set.simple().len(), 1);
    assert!(set.simple()[0].global);
}

#[test]
fn mixed_json_file_parses() {
    let json = r#"{
        "rules": [
            {"type": "structured_chunk", "name": "tool", "start_pattern": "<<<\\[TOOL_REQUEST\\]>>>",
             "end_pattern": "<<<\\[END_TOOL_REQUEST\\]>>>", "replacement": "[tool call]"},
            {"pattern": "hello", "replacement": "hi", "flags": "i", "description": "greeting"}
        ]
    }"#;
    let set = parse_rule_file(json).unwrap();
    assert_eq!(set.structured().len(), 1);
    assert_eq!(set.structured()[0].action, BlockAction::Replace);
    assert_eq!(set.structured()[0].options, RuleOptions::default());
    assert_eq!(set.simple().len(), 1);
    assert_eq!(set.simple()[0].description.as_deref(), Some("greeting"));
    assert!(!set.simple()[0].global);
}

#[test]
fn unknown_action_skips_rule() {
    let set = parse_rule_file(
        "structured_rules:\n  - {name: a, start_pattern: '<a>', end_pattern: '</a>', action: explode}\n",
    )
    .unwrap();
    assert!(set.structured().is_empty());
}

#[test]
fn empty_file_is_empty_set() {
    assert!(parse_rule_file("").unwrap().is_empty());
}

#[test]
fn non_mapping_document_is_error() {
    assert!(parse_rule_file("- just\n- a list\n").is_err());
}

// ---------------------------------------------------------------
// Store
// ---------------------------------------------------------------

struct SharedSource(Arc<Mutex<String>>);

impl ConfigSource for SharedSource {
    fn load(&self) -> Result<String, ConfigError> {
        Ok(self.0.lock().unwrap().clone())
    }

    fn describe(&self) -> String {
        "shared".into()
    }
}

#[test]
fn reload_swaps_set_and_keeps_old_snapshots() {
    let text = Arc::new(Mutex::new(
        "simple_rules:\n  - {pattern: a, replacement: b}\n".to_string(),
    ));
    let store = RuleStore::from_source(Box::new(SharedSource(text.clone()))).unwrap();
    let before = store.snapshot();
    assert_eq!(before.simple().len(), 1);

    *text.lock().unwrap() =
        "simple_rules:\n  - {pattern: a, replacement: b}\n  - {pattern: c, replacement: d}\n".into();
    let status = store.reload().unwrap();
    assert_eq!(status.simple, 2);
    assert_eq!(before.simple().len(), 1);
    assert_ne!(before.fingerprint(), status.fingerprint);
}

#[test]
fn failed_reload_keeps_current_rules() {
    let text = Arc::new(Mutex::new("simple_rules:\n  - {pattern: a}\n".to_string()));
    let store = RuleStore::from_source(Box::new(SharedSource(text.clone()))).unwrap();
    let fingerprint = store.status().fingerprint;

    *text.lock().unwrap() = "simple_rules: {not: [a list".into();
    assert!(store.reload().is_err());
    assert_eq!(store.status().fingerprint, fingerprint);
}

#[test]
fn reload_without_source_is_error() {
    let store = RuleStore::new(RuleSet::empty());
    assert!(matches!(store.reload(), Err(ConfigError::Validation(_))));
}

#[test]
fn add_and_remove_structured_rules() {
    let source = StringSource {
        content: String::new(),
    };
    let store = RuleStore::from_source(Box::new(source)).unwrap();

    store.add_structured_rule(x_rule());
    store.add_structured_rule(block_rule("y", "<y>", "</y>", BlockAction::Remove, ""));
    store.add_structured_rule(block_rule("x", "<x2>", "</x2>", BlockAction::Remove, ""));

    let set = store.snapshot();
    let names: Vec<_> = set.structured().iter().map(|r| r.name.as_str()).collect();
    assert_eq!(names, vec!["x", "y"]);
    assert_eq!(set.structured()[0].start.pattern, "<x2>");

    assert!(store.remove_structured_rule("x"));
    assert!(!store.remove_structured_rule("x"));
    assert_eq!(store.status().structured, 1);
}
