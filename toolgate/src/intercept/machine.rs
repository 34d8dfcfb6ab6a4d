// Copyright 2026 The Toolgate Project
// SPDX-License-Identifier: Apache-2.0

// Block interceptor state machine
//
// NORMAL: scan for the earliest start match across rules. Text that could
// still grow into a start marker is held back in `tail` rather than
// emitted, so a marker split across chunks is matched as if whole.
// PRECISION_CUT: split the text at the start match; a block closed in the
// same text is replaced in place, otherwise the rest is buffered.
// INTERCEPTING: append to `buffer` until the end pattern matches, the rule's
// time limit passes, or the buffer grows past the rule's size limit. The
// two limits flush the buffer verbatim.

use std::sync::Arc;

use tokio::time::Instant;

use crate::rules::{RuleSet, StructuredRule};

/// Interceptor phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Normal,
    PrecisionCut,
    Intercepting,
}

/// Result of feeding one chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filtered {
    /// Visible text for this chunk (may be empty when a block was removed).
    Emit(String),
    /// Nothing visible yet; the chunk is held pending more input.
    Buffering,
}

impl Filtered {
    pub fn text(&self) -> &str {
        match self {
            Filtered::Emit(text) => text,
            Filtered::Buffering => "",
        }
    }

    pub fn into_text(self) -> String {
        match self {
            Filtered::Emit(text) => text,
            Filtered::Buffering => String::new(),
        }
    }
}

/// Why buffered text was released unfiltered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushReason {
    Timeout,
    Overflow,
    EndOfStream,
}

impl FlushReason {
    fn as_str(self) -> &'static str {
        match self {
            FlushReason::Timeout => "timeout",
            FlushReason::Overflow => "overflow",
            FlushReason::EndOfStream => "end_of_stream",
        }
    }
}

/// Counters for one interceptor's lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InterceptStats {
    pub blocks_cut: u64,
    pub timeouts: u64,
    pub overflows: u64,
    pub unterminated: u64,
}

/// Per-stream structured-block filter. Not `Sync` by use: exactly one
/// owner drives it, see `InterceptorHandle` for shared submission.
pub struct BlockInterceptor {
    rules: Arc<RuleSet>,
    phase: Phase,
    /// Suppressed text from the start marker on. Empty unless intercepting.
    buffer: String,
    buffer_chars: usize,
    /// Byte offset in `buffer` just past the start marker.
    body_from: usize,
    active: Option<usize>,
    started_at: Option<Instant>,
    /// Held-back suffix that may be the beginning of a start marker.
    tail: String,
    stats: InterceptStats,
}

impl BlockInterceptor {
    pub fn new(rules: Arc<RuleSet>) -> Self {
        Self {
            rules,
            phase: Phase::Normal,
            buffer: String::new(),
            buffer_chars: 0,
            body_from: 0,
            active: None,
            started_at: None,
            tail: String::new(),
            stats: InterceptStats::default(),
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn stats(&self) -> InterceptStats {
        self.stats
    }

    /// Name of the rule currently buffering, if any.
    pub fn active_rule(&self) -> Option<&str> {
        self.active
            .and_then(|idx| self.rules.structured().get(idx))
            .map(|r| r.name.as_str())
    }

    /// When the active block times out, if one is buffering.
    pub fn deadline(&self) -> Option<Instant> {
        let rule = self.active_rule_ref()?;
        self.started_at.map(|t| t + rule.options.timeout)
    }

    pub fn push(&mut self, chunk: &str) -> Filtered {
        self.push_at(chunk, Instant::now())
    }

    pub fn push_at(&mut self, chunk: &str, now: Instant) -> Filtered {
        let visible = match self.phase {
            Phase::Intercepting => {
                self.buffer.push_str(chunk);
                self.buffer_chars += chunk.chars().count();
                self.step_intercepting(now)
            }
            Phase::Normal | Phase::PrecisionCut => {
                let mut text = std::mem::take(&mut self.tail);
                text.push_str(chunk);
                self.scan_normal(text, now)
            }
        };

        if visible.is_empty() && (self.phase == Phase::Intercepting || !self.tail.is_empty()) {
            Filtered::Buffering
        } else {
            Filtered::Emit(self.rules.apply_simple(&visible))
        }
    }

    /// Release the buffer if the active block has outlived its time limit.
    pub fn tick(&mut self) -> Option<String> {
        self.tick_at(Instant::now())
    }

    pub fn tick_at(&mut self, now: Instant) -> Option<String> {
        if self.phase != Phase::Intercepting {
            return None;
        }
        let deadline = self.deadline()?;
        if now <= deadline {
            return None;
        }
        let flushed = self.flush(FlushReason::Timeout);
        Some(self.rules.apply_simple(&flushed))
    }

    /// End of input: release everything still held. The interceptor is
    /// back in `Normal` afterwards and may be reused.
    pub fn finish(&mut self) -> String {
        let mut out = std::mem::take(&mut self.tail);
        if self.phase == Phase::Intercepting {
            self.stats.unterminated += 1;
            out.push_str(&self.flush(FlushReason::EndOfStream));
        }
        self.reset();
        if out.is_empty() {
            out
        } else {
            self.rules.apply_simple(&out)
        }
    }

    // -----------------------------------------------------------------------
    // Transitions
    // -----------------------------------------------------------------------

    fn scan_normal(&mut self, text: String, now: Instant) -> String {
        let rules = Arc::clone(&self.rules);
        let mut out = String::with_capacity(text.len());
        let mut rest = text.as_str();

        loop {
            let Some((idx, start)) = rules.find_start(rest) else {
                let hold = rules.holdback_len(rest);
                let cut = rest.len() - hold;
                out.push_str(&rest[..cut]);
                self.tail = rest[cut..].to_string();
                break;
            };

            self.phase = Phase::PrecisionCut;
            self.active = Some(idx);
            let rule = &rules.structured()[idx];
            out.push_str(&rest[..start.start()]);

            match rule.end.regex.find_at(rest, start.end()) {
                Some(end) if end.end() > start.start() => {
                    self.stats.blocks_cut += 1;
                    tracing::debug!(
                        rule = %rule.name,
                        action = rule.action.as_str(),
                        chars = rest[start.start()..end.end()].chars().count(),
                        "block cut within chunk"
                    );
                    out.push_str(rule.replacement_text());
                    self.reset();
                    rest = &rest[end.end()..];
                }
                Some(_) => {
                    // Zero-width block; nothing to cut.
                    out.push_str(&rest[start.start()..]);
                    self.reset();
                    break;
                }
                None => {
                    self.buffer = rest[start.start()..].to_string();
                    self.buffer_chars = self.buffer.chars().count();
                    self.body_from = start.end() - start.start();
                    self.started_at = Some(now);
                    self.phase = Phase::Intercepting;
                    tracing::debug!(rule = %rule.name, "block interception started");
                    break;
                }
            }
        }

        out
    }

    fn step_intercepting(&mut self, now: Instant) -> String {
        let rules = Arc::clone(&self.rules);
        let Some(rule) = self.active.and_then(|idx| rules.structured().get(idx)) else {
            return self.flush(FlushReason::EndOfStream);
        };

        if let Some(reason) = self.bound_exceeded(rule, now) {
            return self.flush(reason);
        }

        let Some(end) = rule.end.regex.find_at(&self.buffer, self.body_from) else {
            return String::new();
        };

        self.stats.blocks_cut += 1;
        tracing::debug!(
            rule = %rule.name,
            action = rule.action.as_str(),
            chars = self.buffer_chars,
            "block intercepted"
        );
        let remainder = self.buffer[end.end()..].to_string();
        self.reset();

        let mut out = rule.replacement_text().to_string();
        out.push_str(&self.scan_normal(remainder, now));
        out
    }

    fn bound_exceeded(&self, rule: &StructuredRule, now: Instant) -> Option<FlushReason> {
        let started = self.started_at?;
        if now.saturating_duration_since(started) > rule.options.timeout {
            return Some(FlushReason::Timeout);
        }
        if self.buffer_chars > rule.options.max_buffer_chars {
            return Some(FlushReason::Overflow);
        }
        None
    }

    fn flush(&mut self, reason: FlushReason) -> String {
        match reason {
            FlushReason::Timeout => self.stats.timeouts += 1,
            FlushReason::Overflow => self.stats.overflows += 1,
            FlushReason::EndOfStream => {}
        }
        tracing::warn!(
            rule = self.active_rule().unwrap_or("<none>"),
            reason = reason.as_str(),
            chars = self.buffer_chars,
            "block interception abandoned; flushing buffer"
        );
        let flushed = std::mem::take(&mut self.buffer);
        self.reset();
        flushed
    }

    fn reset(&mut self) {
        self.phase = Phase::Normal;
        self.buffer.clear();
        self.buffer_chars = 0;
        self.body_from = 0;
        self.active = None;
        self.started_at = None;
    }

    fn active_rule_ref(&self) -> Option<&StructuredRule> {
        self.active.and_then(|idx| self.rules.structured().get(idx))
    }
}
