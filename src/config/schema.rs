//! Configuration schema for router.toml.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Log level (debug, info, warn, error).
    pub log_level: String,

    /// Model endpoint shared by every agent.
    pub model: ModelConfig,

    /// Top-level agent that routes between sub-agents.
    pub grand: GrandAgentConfig,

    /// Agent that answers by writing and running code.
    pub code_agent: CodeAgentConfig,

    /// Settings shared by every dataset agent.
    pub dataset_agent: DatasetAgentConfig,

    /// Code-execution sandbox.
    pub sandbox: SandboxConfig,

    /// One dataset agent is built per entry, in this order.
    pub datasets: Vec<DatasetConfig>,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            log_level: "info".into(),
            model: ModelConfig::default(),
            grand: GrandAgentConfig::default(),
            code_agent: CodeAgentConfig::default(),
            dataset_agent: DatasetAgentConfig::default(),
            sandbox: SandboxConfig::default(),
            datasets: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// OpenAI-compatible API base URL.
    pub api_url: String,

    /// API key. Empty means read it from `api_key_env`.
    pub api_key: String,

    /// Environment variable holding the API key.
    pub api_key_env: String,

    pub temperature: f64,

    /// Maximum tokens per completion.
    pub max_tokens: u32,

    /// HTTP timeout for a single completion request.
    pub request_timeout_secs: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.openai.com".into(),
            api_key: String::new(),
            api_key_env: "OPENAI_API_KEY".into(),
            temperature: 0.0,
            max_tokens: 1024,
            request_timeout_secs: 120,
        }
    }
}

impl ModelConfig {
    /// The configured key, or the one in the environment.
    pub fn resolved_api_key(&self) -> Result<String> {
        if !self.api_key.is_empty() {
            return Ok(self.api_key.clone());
        }
        match std::env::var(&self.api_key_env) {
            Ok(key) if !key.is_empty() => Ok(key),
            _ => bail!(
                "No API key configured: set model.api_key or the {} environment variable",
                self.api_key_env
            ),
        }
    }
}

/// Loop-control knobs every agent carries.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopConfig {
    /// Maximum Thought/Action/Observation cycles per run.
    pub max_iterations: u32,

    /// Consecutive undecodable model outputs tolerated before failing.
    pub max_parse_retries: u32,

    /// Delay before the first parse retry; doubles on each further retry.
    pub parse_retry_backoff_ms: u64,

    /// Retries for failed model calls before the run fails.
    pub max_model_retries: u32,

    pub model_retry_backoff_ms: u64,

    /// Upper bound on one model call.
    pub model_timeout_secs: u64,

    /// Upper bound on one tool invocation. For the grand agent this covers a
    /// whole sub-agent run.
    pub tool_timeout_secs: u64,

    /// End the run after this many tool failures in a row. Unset means never.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_consecutive_tool_errors: Option<u32>,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            max_iterations: 15,
            max_parse_retries: 3,
            parse_retry_backoff_ms: 0,
            max_model_retries: 2,
            model_retry_backoff_ms: 1000,
            model_timeout_secs: 120,
            tool_timeout_secs: 600,
            max_consecutive_tool_errors: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GrandAgentConfig {
    pub model: String,

    /// Extra instructions placed at the top of the routing prompt.
    pub instructions: String,

    #[serde(flatten)]
    pub limits: LoopConfig,
}

impl Default for GrandAgentConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4-turbo".into(),
            instructions: String::new(),
            limits: LoopConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CodeAgentConfig {
    pub model: String,

    /// Tool name the grand agent sees.
    pub name: String,

    /// When the grand agent should pick this tool.
    pub description: String,

    pub instructions: String,

    #[serde(flatten)]
    pub limits: LoopConfig,
}

impl Default for CodeAgentConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4-turbo".into(),
            name: "Python Agent".into(),
            description: "Useful when you need to transform natural language to Python and \
                          execute the Python code, returning the results of the code execution. \
                          This tool expects natural language input, NOT raw Python code."
                .into(),
            instructions: "You are an agent designed to write and execute Python code to answer \
                           questions. You have access to a Python REPL, which you can use to \
                           execute Python code. Your job is to interpret questions, generate the \
                           appropriate Python code, and execute it to get an answer. If you cannot \
                           execute the code or it fails, debug and retry."
                .into(),
            limits: LoopConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatasetAgentConfig {
    pub model: String,

    /// Rows of sample data shown in each dataset agent's prompt.
    pub preview_rows: usize,

    /// Cap on rows a single query returns.
    pub max_result_rows: usize,

    pub query_timeout_secs: u64,

    #[serde(flatten)]
    pub limits: LoopConfig,
}

impl Default for DatasetAgentConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4".into(),
            preview_rows: 5,
            max_result_rows: 50,
            query_timeout_secs: 10,
            limits: LoopConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Interpreter program.
    pub interpreter: String,

    /// Arguments passed before the code is piped to stdin. Ignored with `python_shim`.
    pub args: Vec<String>,

    /// Run Python with a shim that prints the value of a trailing expression.
    pub python_shim: bool,

    pub timeout_secs: u64,

    pub max_output_bytes: usize,

    /// Environment variables copied into the otherwise empty child environment.
    pub env_passthrough: Vec<String>,

    /// Where per-invocation scratch directories go. Empty means the system temp dir.
    pub scratch_dir: String,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            interpreter: "python3".into(),
            args: Vec::new(),
            python_shim: true,
            timeout_secs: 30,
            max_output_bytes: 10_000,
            env_passthrough: vec!["PATH".into(), "LANG".into()],
            scratch_dir: String::new(),
        }
    }
}

/// A CSV file exposed through its own dataset agent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DatasetConfig {
    /// Dataset name. Defaults to the file name.
    pub name: String,

    pub path: String,

    /// Tool description override for the grand agent.
    pub description: String,
}

impl DatasetConfig {
    pub fn resolved_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.path).into_owned())
    }

    /// Configured name, else the file name (e.g. `UFC_Fights.csv`).
    pub fn display_name(&self) -> String {
        if !self.name.is_empty() {
            return self.name.clone();
        }
        self.resolved_path()
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("dataset")
            .to_string()
    }

    /// Tool name the grand agent uses to reach this dataset's agent.
    pub fn tool_name(&self) -> String {
        format!("CSV Agent ({})", self.display_name())
    }

    pub fn tool_description(&self) -> String {
        if self.description.is_empty() {
            format!("Useful for questions about the content of {}.", self.display_name())
        } else {
            self.description.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_toml_fills_defaults() {
        let cfg: RouterConfig = toml::from_str(
            r#"
            [grand]
            max_iterations = 4

            [[datasets]]
            path = "data/UFC_Fights.csv"
            "#,
        )
        .unwrap();

        assert_eq!(cfg.grand.limits.max_iterations, 4);
        assert_eq!(cfg.grand.limits.max_parse_retries, 3);
        assert_eq!(cfg.grand.model, "gpt-4-turbo");
        assert_eq!(cfg.dataset_agent.model, "gpt-4");
        assert_eq!(cfg.datasets[0].tool_name(), "CSV Agent (UFC_Fights.csv)");
        assert_eq!(
            cfg.datasets[0].tool_description(),
            "Useful for questions about the content of UFC_Fights.csv."
        );
    }

    #[test]
    fn unset_tool_error_limit_stays_unset() {
        let cfg: RouterConfig = toml::from_str("[code_agent]\nname = \"Coder\"\n").unwrap();
        assert_eq!(cfg.code_agent.name, "Coder");
        assert_eq!(cfg.code_agent.limits.max_consecutive_tool_errors, None);
    }

    #[test]
    fn explicit_api_key_wins() {
        let model = ModelConfig {
            api_key: "sk-test".into(),
            api_key_env: "TASKROUTER_TEST_UNSET_KEY".into(),
            ..ModelConfig::default()
        };
        assert_eq!(model.resolved_api_key().unwrap(), "sk-test");

        let model = ModelConfig {
            api_key: String::new(),
            ..model
        };
        assert!(model.resolved_api_key().is_err());
    }
}
