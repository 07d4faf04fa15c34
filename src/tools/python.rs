//! Code-evaluation tool backed by a [`CodeSandbox`].

use super::Tool;
use crate::sandbox::CodeSandbox;
use crate::types::ToolOutput;
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

pub const PYTHON_REPL_TOOL: &str = "python_repl";

const DESCRIPTION: &str = "A Python shell. Use this to execute python code. \
Input should be a valid python program. The value of a trailing expression is \
printed; use print(...) to see anything else. Each call starts from a clean \
interpreter, so include every import and variable the code needs.";

pub struct PythonReplTool {
    sandbox: Arc<dyn CodeSandbox>,
}

impl PythonReplTool {
    pub fn new(sandbox: Arc<dyn CodeSandbox>) -> Self {
        Self { sandbox }
    }
}

#[async_trait]
impl Tool for PythonReplTool {
    fn name(&self) -> &str {
        PYTHON_REPL_TOOL
    }

    fn description(&self) -> &str {
        DESCRIPTION
    }

    async fn invoke(&self, input: &str) -> Result<ToolOutput> {
        let code = sanitize_code(input);
        let out = self.sandbox.execute(&code).await?;
        Ok(match out.error {
            Some(error) => ToolOutput::failed(out.stdout, error),
            None => ToolOutput::ok(out.stdout.trim_end()),
        })
    }
}

/// Strip the markdown wrapping models tend to put around code.
pub fn sanitize_code(input: &str) -> String {
    let mut code = input.trim();
    code = code.trim_start_matches('`');
    if let Some(rest) = code.strip_prefix("python") {
        if rest.is_empty() || rest.starts_with(char::is_whitespace) {
            code = rest;
        }
    }
    code.trim_end_matches('`').trim().to_string()
}
