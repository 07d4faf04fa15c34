//! Agent-as-tool: exposes a whole executor through the [`Tool`] interface so a
//! parent agent can delegate to it.

use crate::agent::executor::AgentExecutor;
use crate::tools::Tool;
use crate::types::{AgentResult, RunStatus, ToolOutput};
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

pub struct AgentTool {
    name: String,
    description: String,
    executor: Arc<AgentExecutor>,
}

impl AgentTool {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        executor: Arc<AgentExecutor>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            executor,
        }
    }
}

#[async_trait]
impl Tool for AgentTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    /// Runs the wrapped agent with `input` as its task. A failed sub-run is
    /// reported as text, never as an error, so the parent can reason about it.
    async fn invoke(&self, input: &str) -> Result<ToolOutput> {
        let result = self.executor.run(input).await;
        info!(
            "{} finished: {} after {} steps",
            self.name,
            result.status,
            result.transcript.steps.len()
        );
        Ok(ToolOutput::ok(describe_result(&self.name, &result)))
    }
}

/// Text handed back to the parent agent for a sub-agent run.
pub fn describe_result(name: &str, result: &AgentResult) -> String {
    match result.status {
        RunStatus::Success => result.output.clone(),
        status => format!(
            "{} could not complete the task ({}): {}",
            name, status, result.output
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::executor::ExecutorSettings;
    use crate::agent::prompt::PromptTemplate;
    use crate::inference::CompletionModel;
    use crate::tools::ToolRegistry;
    use std::sync::Mutex;

    struct Fixed(Mutex<Vec<String>>, &'static str);

    #[async_trait]
    impl CompletionModel for Fixed {
        async fn complete(&self, prompt: &str, _stop: &[String]) -> Result<String> {
            self.0.lock().unwrap().push(prompt.to_string());
            Ok(self.1.to_string())
        }
    }

    fn agent(reply: &'static str) -> (AgentTool, Arc<Fixed>) {
        let model = Arc::new(Fixed(Mutex::new(Vec::new()), reply));
        let executor = AgentExecutor::new(
            "sub",
            model.clone(),
            ToolRegistry::new(),
            PromptTemplate::default(),
            ExecutorSettings {
                max_iterations: 2,
                ..ExecutorSettings::default()
            },
        );
        (
            AgentTool::new("Sub Agent", "does sub things", Arc::new(executor)),
            model,
        )
    }

    #[tokio::test]
    async fn success_returns_the_final_answer() {
        let (tool, model) = agent("Thought: Do I need to use a tool? No\nFinal Answer: 42");
        let out = tool.invoke("what is six times seven").await.unwrap();

        assert_eq!(out, ToolOutput::ok("42"));
        assert!(model.0.lock().unwrap()[0].contains("New input: what is six times seven"));
    }

    #[tokio::test]
    async fn failed_runs_come_back_as_text() {
        // Unknown tool every cycle: the sub-agent hits its iteration limit.
        let (tool, _) = agent("Action: nothing\nAction Input: x");
        let out = tool.invoke("loop").await.unwrap();

        assert!(out.error.is_none());
        assert!(out
            .output
            .starts_with("Sub Agent could not complete the task (iteration_limit_exceeded):"));
        assert!(out.output.contains("tool_not_found"));
    }

    #[test]
    fn definition_uses_the_given_name() {
        let (tool, _) = agent("Final Answer: x");
        let def = tool.definition();
        assert_eq!(def.name, "Sub Agent");
        assert_eq!(def.description, "does sub things");
    }
}
