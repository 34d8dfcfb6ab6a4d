use std::fmt;

use regex::{Regex, RegexBuilder};

use super::error::ConfigError;

/// Longest pattern source accepted from a rule file.
pub const MAX_PATTERN_LEN: usize = 4096;

/// Upper bound on the compiled program size of a single pattern.
pub const MAX_COMPILED_SIZE: usize = 1 << 20;

/// Flags applied when compiling a pattern.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PatternFlags {
    pub case_insensitive: bool,
    pub multi_line: bool,
    pub dot_matches_new_line: bool,
}

impl PatternFlags {
    /// Parse JavaScript-style flag letters (`i`, `m`, `s`). `g` and `u` are
    /// accepted and ignored here; global replacement is decided by the caller.
    pub fn parse(flags: &str) -> Result<Self, ConfigError> {
        let mut out = Self::default();
        for ch in flags.chars() {
            match ch {
                'i' => out.case_insensitive = true,
                'm' => out.multi_line = true,
                's' => out.dot_matches_new_line = true,
                'g' | 'u' => {}
                other => {
                    return Err(ConfigError::Validation(format!(
                        "unknown regex flag '{other}' in \"{flags}\""
                    )))
                }
            }
        }
        Ok(out)
    }
}

/// A pre-compiled regex pattern. Wraps `regex::Regex` with the original
/// pattern string preserved for debugging/display.
///
/// The `regex` engine runs in linear time, so a hostile pattern can cost
/// memory at compile time but never backtrack; the length and size caps
/// bound that cost.
#[derive(Clone)]
pub struct CompiledPattern {
    pub pattern: String,
    pub regex: Regex,
}

impl CompiledPattern {
    /// Compile a regex pattern, returning `ConfigError::InvalidRegex` on failure.
    pub fn compile(pattern: &str) -> Result<Self, ConfigError> {
        Self::compile_with(pattern, PatternFlags::default())
    }

    pub fn compile_with(pattern: &str, flags: PatternFlags) -> Result<Self, ConfigError> {
        if pattern.is_empty() {
            return Err(ConfigError::InvalidRegex {
                pattern: String::new(),
                reason: "empty pattern".to_string(),
            });
        }
        if pattern.len() > MAX_PATTERN_LEN {
            return Err(ConfigError::InvalidRegex {
                pattern: pattern.chars().take(64).collect(),
                reason: format!("pattern longer than {MAX_PATTERN_LEN} bytes"),
            });
        }
        let regex = RegexBuilder::new(pattern)
            .case_insensitive(flags.case_insensitive)
            .multi_line(flags.multi_line)
            .dot_matches_new_line(flags.dot_matches_new_line)
            .size_limit(MAX_COMPILED_SIZE)
            .build()
            .map_err(|e| ConfigError::InvalidRegex {
                pattern: pattern.to_string(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            pattern: pattern.to_string(),
            regex,
        })
    }
}

impl fmt::Debug for CompiledPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledPattern")
            .field("pattern", &self.pattern)
            .finish()
    }
}

impl PartialEq for CompiledPattern {
    fn eq(&self, other: &Self) -> bool {
        self.pattern == other.pattern
    }
}
