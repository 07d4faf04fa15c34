//! Ordered, name-addressed tool registry.

use super::{Tool, ToolDefinition};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("a tool named '{0}' is already registered")]
    DuplicateName(String),
    #[error("no tool named '{0}' is registered")]
    ToolNotFound(String),
}

/// Tools in insertion order with exact-name lookup.
///
/// Registration happens while an agent is being assembled; executors hold the
/// registry behind an `Arc` afterwards, so it is never mutated once in use.
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from a list, failing on the first duplicate name.
    pub fn with_tools<I>(tools: I) -> Result<Self, RegistryError>
    where
        I: IntoIterator<Item = Arc<dyn Tool>>,
    {
        let mut registry = Self::new();
        for tool in tools {
            registry.register(tool)?;
        }
        Ok(registry)
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) -> Result<(), RegistryError> {
        let name = tool.name().to_string();
        if self.index.contains_key(&name) {
            return Err(RegistryError::DuplicateName(name));
        }
        self.index.insert(name, self.tools.len());
        self.tools.push(tool);
        Ok(())
    }

    /// Exact lookup. No case folding or fuzzy matching.
    pub fn resolve(&self, name: &str) -> Result<Arc<dyn Tool>, RegistryError> {
        self.index
            .get(name)
            .map(|&i| self.tools[i].clone())
            .ok_or_else(|| RegistryError::ToolNotFound(name.to_string()))
    }

    /// Name/description pairs in registration order.
    pub fn describe_all(&self) -> Vec<ToolDefinition> {
        self.tools.iter().map(|t| t.definition()).collect()
    }

    pub fn names(&self) -> Vec<String> {
        self.tools.iter().map(|t| t.name().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.names())
            .finish()
    }
}
