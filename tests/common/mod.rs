#![allow(dead_code)]

use anyhow::Result;
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use taskrouter::inference::CompletionModel;
use taskrouter::sandbox::{CodeSandbox, SandboxOutput};

/// Model stub that answers each prompt with a closure and keeps every prompt.
pub struct FnModel<F> {
    reply: F,
    prompts: Mutex<Vec<String>>,
}

impl<F> FnModel<F> {
    pub fn new(reply: F) -> Arc<Self>
    where
        F: Fn(&str) -> String + Send + Sync,
    {
        Arc::new(Self {
            reply,
            prompts: Mutex::new(Vec::new()),
        })
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl<F> CompletionModel for FnModel<F>
where
    F: Fn(&str) -> String + Send + Sync,
{
    async fn complete(&self, prompt: &str, _stop: &[String]) -> Result<String> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        Ok((self.reply)(prompt))
    }
}

/// Sandbox stub that evaluates nothing; `respond` maps code to stdout.
pub struct StubSandbox {
    respond: fn(&str) -> String,
    pub calls: Mutex<Vec<String>>,
}

impl StubSandbox {
    pub fn new(respond: fn(&str) -> String) -> Arc<Self> {
        Arc::new(Self {
            respond,
            calls: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl CodeSandbox for StubSandbox {
    async fn execute(&self, code: &str) -> Result<SandboxOutput> {
        self.calls.lock().unwrap().push(code.to_string());
        Ok(SandboxOutput {
            stdout: (self.respond)(code),
            error: None,
        })
    }
}

/// The latest observation in a rendered prompt, if any step has run yet.
pub fn last_observation(prompt: &str) -> Option<String> {
    let (_, run) = prompt.split_once("\nNew input: ")?;
    let (_, tail) = run.rsplit_once("\nObservation: ")?;
    Some(tail.trim_end().trim_end_matches("Thought:").trim().to_string())
}

/// Table name announced in a dataset agent's instructions.
pub fn announced_table(prompt: &str) -> Option<String> {
    let (_, rest) = prompt.split_once("table named \"")?;
    let (table, _) = rest.split_once('"')?;
    Some(table.to_string())
}
