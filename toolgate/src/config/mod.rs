// Copyright 2026 The Toolgate Project
// SPDX-License-Identifier: Apache-2.0

// Gateway config loader and validator
//
// Loads toolgate.yaml, validates structure, resolves variable interpolation,
// and computes a deterministic config hash. Also hosts the pattern
// compilation shared with the rule store.

mod error;
mod interpolation;
mod loader;
mod pattern;
mod raw;
mod source;
mod types;

pub use error::ConfigError;
pub use interpolation::{resolve_optional, resolve_variables};
pub use loader::{compute_hash, load_config};
pub use pattern::{CompiledPattern, PatternFlags, MAX_COMPILED_SIZE, MAX_PATTERN_LEN};
pub use source::{ConfigSource, FileSource, StringSource};
pub use types::*;
