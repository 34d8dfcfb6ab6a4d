// Copyright 2026 The Toolgate Project
// SPDX-License-Identifier: Apache-2.0

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use super::{DispatchError, ToolDispatcher};

/// One executable tool. Errors are plain messages; the registry wraps them
/// as execution errors.
#[async_trait]
pub trait Tool: Send + Sync {
    async fn call(&self, args: &BTreeMap<String, String>) -> Result<String, String>;
}

/// Name-keyed tool table implementing `ToolDispatcher`.
///
/// Built once at startup and shared read-only across requests.
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool, replacing any previous tool with the same name.
    pub fn register(&mut self, name: impl Into<String>, tool: Arc<dyn Tool>) {
        let name = name.into();
        if self.tools.insert(name.clone(), tool).is_some() {
            tracing::warn!(tool = %name, "tool re-registered; previous entry replaced");
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }
}

#[async_trait]
impl ToolDispatcher for ToolRegistry {
    async fn dispatch(
        &self,
        name: &str,
        args: &BTreeMap<String, String>,
    ) -> Result<String, DispatchError> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| DispatchError::NotFound(name.to_string()))?;
        tool.call(args).await.map_err(DispatchError::Execution)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    #[async_trait]
    impl Tool for Echo {
        async fn call(&self, args: &BTreeMap<String, String>) -> Result<String, String> {
            args.get("text").cloned().ok_or_else(|| "missing text".to_string())
        }
    }

    #[tokio::test]
    async fn dispatches_registered_tool() {
        let mut registry = ToolRegistry::new();
        registry.register("Echo", Arc::new(Echo));

        let mut args = BTreeMap::new();
        args.insert("text".to_string(), "hi".to_string());
        assert_eq!(registry.dispatch("Echo", &args).await, Ok("hi".to_string()));
    }

    #[tokio::test]
    async fn unknown_tool_is_not_found() {
        let registry = ToolRegistry::new();
        let err = registry.dispatch("Ghost", &BTreeMap::new()).await.unwrap_err();
        assert_eq!(err, DispatchError::NotFound("Ghost".into()));
    }

    #[tokio::test]
    async fn tool_error_is_execution_error() {
        let mut registry = ToolRegistry::new();
        registry.register("Echo", Arc::new(Echo));
        let err = registry.dispatch("Echo", &BTreeMap::new()).await.unwrap_err();
        assert_eq!(err, DispatchError::Execution("missing text".into()));
    }

    #[test]
    fn names_are_sorted() {
        let mut registry = ToolRegistry::new();
        registry.register("b", Arc::new(Echo));
        registry.register("a", Arc::new(Echo));
        assert_eq!(registry.names(), vec!["a", "b"]);
        assert!(registry.contains("a"));
    }
}
