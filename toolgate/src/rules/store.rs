// Copyright 2026 The Toolgate Project
// SPDX-License-Identifier: Apache-2.0

use std::sync::{Arc, RwLock};

use super::{parse_rule_file, RuleSet, StructuredRule};
use crate::config::{ConfigError, ConfigSource};

/// Counts and fingerprint of the active rule set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleStatus {
    pub structured: usize,
    pub simple: usize,
    pub fingerprint: String,
}

/// Holds the active `RuleSet` and swaps it atomically.
///
/// Readers take a snapshot `Arc` at stream start and keep it for the
/// stream's lifetime, so a reload never changes rules mid-request.
pub struct RuleStore {
    current: RwLock<Arc<RuleSet>>,
    source: Option<Box<dyn ConfigSource>>,
}

impl RuleStore {
    /// A store with a fixed initial set and no backing file.
    pub fn new(set: RuleSet) -> Self {
        Self {
            current: RwLock::new(Arc::new(set)),
            source: None,
        }
    }

    /// Load from a source. The source is kept for `reload`.
    pub fn from_source(source: Box<dyn ConfigSource>) -> Result<Self, ConfigError> {
        let set = parse_rule_file(&source.load()?)?;
        tracing::info!(source = %source.describe(), fingerprint = %set.fingerprint(), "rules loaded");
        Ok(Self {
            current: RwLock::new(Arc::new(set)),
            source: Some(source),
        })
    }

    pub fn snapshot(&self) -> Arc<RuleSet> {
        self.current
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Re-read the backing source and swap in the result. On any error the
    /// current set stays active.
    pub fn reload(&self) -> Result<RuleStatus, ConfigError> {
        let Some(source) = &self.source else {
            return Err(ConfigError::Validation(
                "rule store has no backing source to reload".into(),
            ));
        };
        let set = parse_rule_file(&source.load()?)?;
        let previous = self.snapshot();
        if previous.fingerprint() == set.fingerprint() {
            tracing::info!(source = %source.describe(), "rules unchanged on reload");
            return Ok(self.status());
        }
        self.replace(set);
        tracing::info!(
            source = %source.describe(),
            previous = %previous.fingerprint(),
            "rules reloaded"
        );
        Ok(self.status())
    }

    pub fn replace(&self, set: RuleSet) {
        let mut guard = self
            .current
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = Arc::new(set);
    }

    /// Add a structured rule, replacing any rule with the same name in place.
    pub fn add_structured_rule(&self, rule: StructuredRule) {
        self.update(|structured| {
            match structured.iter().position(|r| r.name == rule.name) {
                Some(idx) => structured[idx] = rule,
                None => structured.push(rule),
            }
            true
        });
    }

    /// Remove a structured rule by name. Returns whether one was removed.
    pub fn remove_structured_rule(&self, name: &str) -> bool {
        self.update(|structured| {
            let before = structured.len();
            structured.retain(|r| r.name != name);
            structured.len() != before
        })
    }

    pub fn status(&self) -> RuleStatus {
        let set = self.snapshot();
        RuleStatus {
            structured: set.structured().len(),
            simple: set.simple().len(),
            fingerprint: set.fingerprint().to_string(),
        }
    }

    fn update(&self, edit: impl FnOnce(&mut Vec<StructuredRule>) -> bool) -> bool {
        let mut guard = self
            .current
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut structured = guard.structured().to_vec();
        let changed = edit(&mut structured);
        if changed {
            *guard = Arc::new(RuleSet::new(structured, guard.simple().to_vec()));
        }
        changed
    }
}
