// Copyright 2026 The Toolgate Project
// SPDX-License-Identifier: Apache-2.0

// Inline tool-request grammar
//
// Model output may embed tool requests as
//
//   <<<[TOOL_REQUEST]>>>
//   tool_name: 「始」Echo「末」,
//   text: 「始」hi「末」
//   <<<[END_TOOL_REQUEST]>>>
//
// and diary notes as <<<DailyNoteStart>>> ... <<<DailyNoteEnd>>>.
// Parsing works on a complete turn; nothing here sees partial chunks.

use regex::Regex;
use std::sync::LazyLock;

use crate::tools::ToolCall;

pub const TOOL_REQUEST_START: &str = "<<<[TOOL_REQUEST]>>>";
pub const TOOL_REQUEST_END: &str = "<<<[END_TOOL_REQUEST]>>>";
pub const VALUE_OPEN: &str = "「始」";
pub const VALUE_CLOSE: &str = "「末」";
pub const TOOL_NAME_KEY: &str = "tool_name";

pub const DIARY_START: &str = "<<<DailyNoteStart>>>";
pub const DIARY_END: &str = "<<<DailyNoteEnd>>>";

static PARAM_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)(\w+)\s*:\s*「始」(.*?)「末」\s*,?").unwrap()
});

static DIARY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<<<DailyNoteStart>>>(.*?)<<<DailyNoteEnd>>>").unwrap()
});

static MAID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*Maid:\s*(.+?)\s*$").unwrap());

static DATE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*Date:\s*(.+?)\s*$").unwrap());

static CONTENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?ms)^\s*Content:\s*(.*)$").unwrap());

// ---------------------------------------------------------------------------
// Tool requests
// ---------------------------------------------------------------------------

/// Why a block was not turned into a call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockIssue {
    /// Start token with no end token before the next start token or the
    /// end of the turn. `offset` is the byte offset of the start token.
    Unterminated { offset: usize },
    /// Well-delimited block without a `tool_name` parameter.
    MissingToolName { offset: usize },
}

/// Everything found in one turn, in discovery order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedTurn {
    pub calls: Vec<ToolCall>,
    pub issues: Vec<BlockIssue>,
}

impl ParsedTurn {
    pub fn has_calls(&self) -> bool {
        !self.calls.is_empty()
    }
}

/// Scan a complete turn for tool-request blocks.
///
/// Each start token is paired with the nearest following end token. Blocks
/// do not nest: if another start token appears first, the outer block is
/// unterminated and scanning resumes at the inner one.
pub fn parse_tool_requests(content: &str) -> ParsedTurn {
    let mut parsed = ParsedTurn::default();
    let mut cursor = 0;

    while let Some(rel) = content[cursor..].find(TOOL_REQUEST_START) {
        let start = cursor + rel;
        let body_from = start + TOOL_REQUEST_START.len();
        let rest = &content[body_from..];

        let end = match rest.find(TOOL_REQUEST_END) {
            Some(end) => end,
            None => {
                parsed.issues.push(BlockIssue::Unterminated { offset: start });
                cursor = body_from;
                continue;
            }
        };
        if rest[..end].contains(TOOL_REQUEST_START) {
            parsed.issues.push(BlockIssue::Unterminated { offset: start });
            cursor = body_from;
            continue;
        }

        match parse_block_body(rest[..end].trim()) {
            Some(call) => parsed.calls.push(call),
            None => parsed.issues.push(BlockIssue::MissingToolName { offset: start }),
        }
        cursor = body_from + end + TOOL_REQUEST_END.len();
    }

    parsed
}

/// Build a call from a block interior. Later duplicate keys win.
fn parse_block_body(body: &str) -> Option<ToolCall> {
    let mut name = None;
    let mut call = ToolCall::new(String::new());

    for caps in PARAM_RE.captures_iter(body) {
        let key = &caps[1];
        let value = caps[2].trim();
        if key == TOOL_NAME_KEY {
            name = Some(value.to_string());
        } else {
            call.args.insert(key.to_string(), value.to_string());
        }
    }

    let name = name.filter(|n| !n.is_empty())?;
    call.name = name;
    Some(call)
}

// ---------------------------------------------------------------------------
// Diary notes
// ---------------------------------------------------------------------------

/// A note extracted from a diary block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiaryNote {
    pub maid: String,
    pub date: String,
    pub content: String,
}

/// Extract every well-formed diary block. Blocks missing a field are
/// reported through the returned skip count.
pub fn extract_diary_notes(content: &str) -> (Vec<DiaryNote>, usize) {
    let mut notes = Vec::new();
    let mut skipped = 0;

    for caps in DIARY_RE.captures_iter(content) {
        let body = caps[1].trim();
        let field = |re: &Regex| {
            re.captures(body)
                .map(|c| c[1].trim().to_string())
                .filter(|v| !v.is_empty())
        };
        match (field(&MAID_RE), field(&DATE_RE), field(&CONTENT_RE)) {
            (Some(maid), Some(date), Some(content)) => notes.push(DiaryNote {
                maid,
                date,
                content,
            }),
            _ => skipped += 1,
        }
    }

    (notes, skipped)
}
