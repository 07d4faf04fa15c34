//! Grand agent assembly.
//!
//! A [`TaskRouter`] is built once at startup: a code agent and one dataset
//! agent per configured CSV file, each wrapped as a tool, all registered on a
//! grand agent that decides per turn which of them to call. After assembly
//! nothing is mutated, so one router can serve concurrent runs behind an `Arc`.

use crate::agent::{AgentExecutor, AgentTool, ExecutorSettings, PromptTemplate};
use crate::config::{DatasetConfig, RouterConfig};
use crate::dataset::{Dataset, SqliteDataset};
use crate::inference::{CompletionModel, InferenceClient};
use crate::sandbox::{CodeSandbox, ProcessSandbox};
use crate::tools::{
    DatasetQueryTool, PythonReplTool, Tool, ToolDefinition, ToolRegistry, SQL_QUERY_TOOL,
};
use crate::types::AgentResult;
use anyhow::{Context, Result};
use std::fmt::Write as _;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// One dataset and the tool identity its agent is exposed under.
pub struct DatasetBinding {
    pub tool_name: String,
    pub description: String,
    pub dataset: Arc<dyn Dataset>,
}

impl DatasetBinding {
    pub fn from_config(config: &DatasetConfig, dataset: Arc<dyn Dataset>) -> Self {
        Self {
            tool_name: config.tool_name(),
            description: config.tool_description(),
            dataset,
        }
    }
}

/// Collaborators the router is assembled from.
pub struct RouterParts {
    pub grand_model: Arc<dyn CompletionModel>,
    pub code_model: Arc<dyn CompletionModel>,
    pub dataset_model: Arc<dyn CompletionModel>,
    pub sandbox: Arc<dyn CodeSandbox>,
    pub datasets: Vec<DatasetBinding>,
}

pub struct TaskRouter {
    grand: AgentExecutor,
}

impl TaskRouter {
    /// Build the agent tree from already-constructed collaborators.
    pub async fn assemble(config: &RouterConfig, parts: RouterParts) -> Result<Self> {
        let mut registry = ToolRegistry::new();

        // Code agent
        let code_tools = ToolRegistry::with_tools([
            Arc::new(PythonReplTool::new(parts.sandbox.clone())) as Arc<dyn Tool>
        ])?;
        let code_agent = AgentExecutor::new(
            config.code_agent.name.clone(),
            parts.code_model.clone(),
            code_tools,
            PromptTemplate::new(config.code_agent.instructions.clone()),
            ExecutorSettings::from(&config.code_agent.limits),
        );
        registry
            .register(Arc::new(AgentTool::new(
                config.code_agent.name.clone(),
                config.code_agent.description.clone(),
                Arc::new(code_agent),
            )))
            .context("Failed to register code agent")?;

        // Dataset agents, in configuration order
        let dataset_settings = ExecutorSettings::from(&config.dataset_agent.limits);
        for binding in parts.datasets {
            let instructions =
                dataset_instructions(binding.dataset.as_ref(), config.dataset_agent.preview_rows)
                    .await;
            let tools = ToolRegistry::with_tools([
                Arc::new(DatasetQueryTool::new(binding.dataset.clone())) as Arc<dyn Tool>
            ])?;
            let agent = AgentExecutor::new(
                binding.tool_name.clone(),
                parts.dataset_model.clone(),
                tools,
                PromptTemplate::new(instructions),
                dataset_settings.clone(),
            );
            registry
                .register(Arc::new(AgentTool::new(
                    binding.tool_name.clone(),
                    binding.description,
                    Arc::new(agent),
                )))
                .with_context(|| format!("Failed to register {}", binding.tool_name))?;
        }

        info!("Grand agent ready with {} tools: {}", registry.len(), registry.names().join(", "));

        let grand = AgentExecutor::new(
            "grand",
            parts.grand_model,
            registry,
            PromptTemplate::new(config.grand.instructions.clone()),
            ExecutorSettings::from(&config.grand.limits),
        );
        Ok(Self { grand })
    }

    /// Wire real collaborators: HTTP models, a process sandbox, and CSV files
    /// loaded into SQLite. Relative dataset paths resolve against `base_dir`.
    pub async fn from_config(config: &RouterConfig, base_dir: &Path) -> Result<Self> {
        let client = InferenceClient::from_config(&config.model, &config.grand.model)?;
        let grand_model: Arc<dyn CompletionModel> = Arc::new(client.clone());
        let code_model: Arc<dyn CompletionModel> =
            Arc::new(client.with_model(&config.code_agent.model));
        let dataset_model: Arc<dyn CompletionModel> =
            Arc::new(client.with_model(&config.dataset_agent.model));

        let sandbox: Arc<dyn CodeSandbox> = Arc::new(ProcessSandbox::from_config(&config.sandbox));

        let mut datasets = Vec::with_capacity(config.datasets.len());
        for entry in &config.datasets {
            let path = entry.resolved_path();
            let path = if path.is_relative() {
                base_dir.join(path)
            } else {
                path
            };
            let name = entry.display_name();
            let dataset = SqliteDataset::from_csv_path_named(&name, &path)
                .with_context(|| format!("Failed to load dataset {}", path.display()))?
                .with_max_rows(config.dataset_agent.max_result_rows)
                .with_timeout(Duration::from_secs(config.dataset_agent.query_timeout_secs));
            datasets.push(DatasetBinding::from_config(entry, Arc::new(dataset)));
        }

        if datasets.is_empty() {
            warn!("No datasets configured; only the code agent is available");
        }

        Self::assemble(
            config,
            RouterParts {
                grand_model,
                code_model,
                dataset_model,
                sandbox,
                datasets,
            },
        )
        .await
    }

    pub async fn run(&self, task: &str) -> AgentResult {
        self.grand.run(task).await
    }

    pub async fn run_with_cancel(&self, task: &str, cancel: &CancellationToken) -> AgentResult {
        self.grand.run_with_cancel(task, cancel).await
    }

    /// The grand agent's tools, in registration order.
    pub fn tools(&self) -> Vec<ToolDefinition> {
        self.grand.tools().describe_all()
    }
}

/// Prompt preamble for a dataset agent: table, schema, size, and sample rows.
pub async fn dataset_instructions(dataset: &dyn Dataset, preview_rows: usize) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "You are working with a SQLite table named \"{}\" holding the dataset {}.",
        dataset.table(),
        dataset.name()
    );
    let _ = writeln!(out, "It has {} rows and these columns:", dataset.row_count());
    for column in dataset.schema() {
        let _ = writeln!(out, "- {} ({})", column.name, column.data_type);
    }

    if preview_rows > 0 {
        match dataset.preview(preview_rows).await {
            Ok(sample) => {
                let _ = writeln!(
                    out,
                    "\nThis is the result of `SELECT * FROM \"{}\" LIMIT {}`:\n{}",
                    dataset.table(),
                    preview_rows,
                    sample.render()
                );
            }
            Err(e) => warn!("Could not preview dataset {}: {}", dataset.name(), e),
        }
    }

    let _ = write!(
        out,
        "\nUse the {} tool to answer the question posed of you. Quote column names \
         that contain spaces or symbols.",
        SQL_QUERY_TOOL
    );
    out
}
