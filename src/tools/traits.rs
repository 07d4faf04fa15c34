//! Tool trait definition.

use crate::types::ToolOutput;
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Name and description pair rendered into a selection prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
}

/// A named, described capability a reasoning loop can invoke.
///
/// Implementations take a single free-text input. Returning `Err` (or
/// panicking) is allowed: the executor records it as an observation error
/// and keeps the loop going.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Tool name, unique within a registry.
    fn name(&self) -> &str;

    /// When the model should pick this tool over its siblings.
    fn description(&self) -> &str;

    /// Run the tool on the model-supplied input.
    async fn invoke(&self, input: &str) -> Result<ToolOutput>;

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
        }
    }
}
