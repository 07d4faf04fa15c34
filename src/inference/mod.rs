//! Text-completion model collaborator.

pub mod client;

pub use client::InferenceClient;

use anyhow::Result;
use async_trait::async_trait;

/// Opaque text-completion service driving a reasoning loop.
#[async_trait]
pub trait CompletionModel: Send + Sync {
    /// Complete `prompt`, stopping before any of `stop`.
    async fn complete(&self, prompt: &str, stop: &[String]) -> Result<String>;
}
