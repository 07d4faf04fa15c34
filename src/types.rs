//! Shared types used across the router runtime.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Sentinel action name that ends a reasoning loop.
pub const FINISH_ACTION: &str = "Finish";

// ---------------------------------------------------------------------------
// Reasoning steps
// ---------------------------------------------------------------------------

/// What a reasoning step asks the executor to do next.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "tool")]
pub enum StepAction {
    /// Invoke the named tool with the step's action input.
    Tool(String),
    /// Stop; the step's action input is the final answer.
    Finish,
}

impl fmt::Display for StepAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tool(name) => write!(f, "{}", name),
            Self::Finish => write!(f, "{}", FINISH_ACTION),
        }
    }
}

/// One decoded cycle of model output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReasoningStep {
    pub thought: String,
    pub action: StepAction,
    pub action_input: String,
    /// Raw model text the step was decoded from.
    pub log: String,
}

impl ReasoningStep {
    pub fn is_finish(&self) -> bool {
        self.action == StepAction::Finish
    }
}

// ---------------------------------------------------------------------------
// Tool results and observations
// ---------------------------------------------------------------------------

/// Uniform result of invoking any tool.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolOutput {
    pub output: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolOutput {
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            error: None,
        }
    }

    pub fn failed(output: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            error: Some(error.into()),
        }
    }
}

/// Classification of a per-step anomaly recorded on an observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The step named a tool the registry does not hold.
    ToolNotFound,
    /// The tool returned an error, failed, or panicked.
    ToolExecution,
    /// The tool did not answer within the executor's tool timeout.
    Timeout,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ToolNotFound => write!(f, "tool_not_found"),
            Self::ToolExecution => write!(f, "tool_execution_error"),
            Self::Timeout => write!(f, "timeout"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub kind: ErrorKind,
    pub message: String,
}

/// The result of acting on a step, as fed back to the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Observation {
    pub source_tool: String,
    pub output: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

impl Observation {
    pub fn from_output(source_tool: &str, result: ToolOutput) -> Self {
        let error = result.error.map(|message| ErrorInfo {
            kind: ErrorKind::ToolExecution,
            message,
        });
        Self {
            source_tool: source_tool.to_string(),
            output: result.output,
            error,
        }
    }

    pub fn failure(source_tool: &str, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            source_tool: source_tool.to_string(),
            output: String::new(),
            error: Some(ErrorInfo {
                kind,
                message: message.into(),
            }),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Text shown to the model after `Observation:`.
    pub fn render(&self) -> String {
        match &self.error {
            None => self.output.clone(),
            Some(err) if self.output.is_empty() => format!("Error ({}): {}", err.kind, err.message),
            Some(err) => format!("{}\nError ({}): {}", self.output, err.kind, err.message),
        }
    }
}

// ---------------------------------------------------------------------------
// Transcript
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub step: ReasoningStep,
    pub observation: Observation,
    pub at: DateTime<Utc>,
}

/// Ordered history of one executor run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transcript {
    pub run_id: String,
    pub task: String,
    pub steps: Vec<TranscriptEntry>,
    /// Model outputs rejected by the step decoder during this run.
    pub parse_failures: u32,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Transcript {
    pub fn new(task: &str) -> Self {
        Self {
            run_id: ulid::Ulid::new().to_string(),
            task: task.to_string(),
            steps: Vec::new(),
            parse_failures: 0,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn push(&mut self, step: ReasoningStep, observation: Observation) {
        self.steps.push(TranscriptEntry {
            step,
            observation,
            at: Utc::now(),
        });
    }

    pub fn last_observation(&self) -> Option<&Observation> {
        self.steps.last().map(|e| &e.observation)
    }
}

// ---------------------------------------------------------------------------
// Run results
// ---------------------------------------------------------------------------

/// How an executor run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Success,
    /// Loop safety valve hit; output is best-effort.
    IterationLimitExceeded,
    /// Too many consecutive tool failures.
    ToolError,
    /// Model output could not be decoded within the retry bound.
    ParseError,
    /// The model collaborator kept failing.
    ModelError,
    /// Aborted between cycles by the caller.
    Cancelled,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::IterationLimitExceeded => write!(f, "iteration_limit_exceeded"),
            Self::ToolError => write!(f, "tool_error"),
            Self::ParseError => write!(f, "parse_error"),
            Self::ModelError => write!(f, "model_error"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentResult {
    pub output: String,
    pub transcript: Transcript,
    pub status: RunStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(action: &str) -> ReasoningStep {
        ReasoningStep {
            thought: "t".into(),
            action: StepAction::Tool(action.into()),
            action_input: "x".into(),
            log: format!("Thought: t\nAction: {action}\nAction Input: x"),
        }
    }

    #[test]
    fn observation_render_includes_error_kind() {
        let obs = Observation::failure("calc", ErrorKind::ToolNotFound, "no such tool");
        assert_eq!(obs.render(), "Error (tool_not_found): no such tool");
        assert!(obs.is_error());

        let obs = Observation::from_output("calc", ToolOutput::failed("partial", "boom"));
        assert_eq!(obs.render(), "partial\nError (tool_execution_error): boom");
    }

    #[test]
    fn transcript_tracks_last_observation() {
        let mut transcript = Transcript::new("task");
        assert!(transcript.last_observation().is_none());

        transcript.push(step("calc"), Observation::from_output("calc", ToolOutput::ok("2")));
        transcript.push(step("calc"), Observation::from_output("calc", ToolOutput::ok("3")));

        assert_eq!(transcript.steps.len(), 2);
        assert_eq!(transcript.last_observation().map(|o| o.output.as_str()), Some("3"));
        assert_eq!(transcript.run_id.len(), 26);
    }

    #[test]
    fn run_status_serializes_snake_case() {
        let json = serde_json::to_string(&RunStatus::IterationLimitExceeded).unwrap();
        assert_eq!(json, "\"iteration_limit_exceeded\"");
    }
}
