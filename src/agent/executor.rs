//! Agent executor: drives Think → Act → Observe until a final answer.
//!
//! Each cycle:
//! 1. Checks for cancellation and the iteration limit
//! 2. Renders the prompt (instructions, tools, task, scratchpad)
//! 3. Calls the model and decodes one step (bounded retries on bad output)
//! 4. Finishes, or invokes the named tool
//! 5. Records the observation and repeats
//!
//! Per-step anomalies (unknown tool, tool failure, timeout) become
//! observations the model can react to. Only exhausted retries, the
//! iteration limit, cancellation, and repeated tool failures end a run early,
//! and each of those is reported through [`RunStatus`].

use crate::agent::parser::parse_step;
use crate::agent::prompt::{render_scratchpad, scratchpad_entry, stop_sequences, PromptTemplate};
use crate::config::LoopConfig;
use crate::inference::CompletionModel;
use crate::tools::ToolRegistry;
use crate::types::*;
use anyhow::{anyhow, Result};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

pub const ITERATION_LIMIT_MESSAGE: &str = "Agent stopped due to iteration limit.";
pub const CANCELLED_MESSAGE: &str = "Agent run was cancelled.";

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// Bounded retry with exponential backoff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    /// Delay before the first retry.
    pub backoff: Duration,
    /// Factor applied to the delay for every further retry.
    pub multiplier: u32,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, backoff: Duration) -> Self {
        Self {
            max_retries,
            backoff,
            multiplier: 2,
        }
    }

    pub fn none() -> Self {
        Self::new(0, Duration::ZERO)
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let factor = self.multiplier.saturating_pow(attempt - 1);
        self.backoff.saturating_mul(factor)
    }
}

#[derive(Debug, Clone)]
pub struct ExecutorSettings {
    pub max_iterations: u32,
    pub parse_retry: RetryPolicy,
    pub model_retry: RetryPolicy,
    pub model_timeout: Duration,
    pub tool_timeout: Duration,
    pub max_consecutive_tool_errors: Option<u32>,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self::from(&LoopConfig::default())
    }
}

impl From<&LoopConfig> for ExecutorSettings {
    fn from(cfg: &LoopConfig) -> Self {
        Self {
            max_iterations: cfg.max_iterations,
            parse_retry: RetryPolicy::new(
                cfg.max_parse_retries,
                Duration::from_millis(cfg.parse_retry_backoff_ms),
            ),
            model_retry: RetryPolicy::new(
                cfg.max_model_retries,
                Duration::from_millis(cfg.model_retry_backoff_ms),
            ),
            model_timeout: Duration::from_secs(cfg.model_timeout_secs),
            tool_timeout: Duration::from_secs(cfg.tool_timeout_secs),
            max_consecutive_tool_errors: cfg.max_consecutive_tool_errors,
        }
    }
}

// ---------------------------------------------------------------------------
// Executor
// ---------------------------------------------------------------------------

/// Rejected model output waiting to be shown back with a corrective note.
struct Correction {
    log: String,
    note: String,
}

/// Runs one agent's reasoning loop. Immutable after construction and safe
/// to share between concurrent runs.
pub struct AgentExecutor {
    label: String,
    model: Arc<dyn CompletionModel>,
    tools: Arc<ToolRegistry>,
    template: PromptTemplate,
    settings: ExecutorSettings,
    stop: Vec<String>,
}

impl AgentExecutor {
    pub fn new(
        label: impl Into<String>,
        model: Arc<dyn CompletionModel>,
        tools: ToolRegistry,
        template: PromptTemplate,
        settings: ExecutorSettings,
    ) -> Self {
        Self {
            label: label.into(),
            model,
            tools: Arc::new(tools),
            template,
            settings,
            stop: stop_sequences(),
        }
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    /// Run `task` to completion.
    pub async fn run(&self, task: &str) -> AgentResult {
        self.run_with_cancel(task, &CancellationToken::new()).await
    }

    /// Run `task`, stopping between cycles once `cancel` fires.
    pub async fn run_with_cancel(&self, task: &str, cancel: &CancellationToken) -> AgentResult {
        let mut transcript = Transcript::new(task);
        let span = info_span!("agent", name = %self.label, run = %transcript.run_id);

        let (status, output) = self.drive(&mut transcript, cancel).instrument(span).await;
        transcript.finished_at = Some(Utc::now());

        AgentResult {
            output,
            transcript,
            status,
        }
    }

    async fn drive(
        &self,
        transcript: &mut Transcript,
        cancel: &CancellationToken,
    ) -> (RunStatus, String) {
        info!("Starting run: {}", preview(&transcript.task));

        let definitions = self.tools.describe_all();
        let mut iteration: u32 = 0;
        let mut parse_failures: u32 = 0;
        let mut tool_errors: u32 = 0;
        let mut correction: Option<Correction> = None;

        loop {
            if cancel.is_cancelled() {
                warn!("Run cancelled after {} iterations", iteration);
                return (RunStatus::Cancelled, best_effort(transcript, CANCELLED_MESSAGE));
            }

            if iteration >= self.settings.max_iterations {
                warn!("Iteration limit ({}) reached", self.settings.max_iterations);
                return (
                    RunStatus::IterationLimitExceeded,
                    best_effort(transcript, ITERATION_LIMIT_MESSAGE),
                );
            }

            // Thinking
            let mut scratchpad = render_scratchpad(transcript);
            if let Some(c) = &correction {
                scratchpad.push_str(&scratchpad_entry(&c.log, &c.note));
            }
            let prompt = self.template.render(&definitions, &transcript.task, &scratchpad);

            let raw = match self.think(&prompt).await {
                Ok(text) => text,
                Err(e) => {
                    warn!("Model unavailable: {:#}", e);
                    return (RunStatus::ModelError, format!("Model call failed: {:#}", e));
                }
            };

            let step = match parse_step(&raw) {
                Ok(step) => {
                    parse_failures = 0;
                    correction = None;
                    step
                }
                Err(e) => {
                    parse_failures += 1;
                    transcript.parse_failures += 1;
                    warn!(
                        "Unparseable model output ({}/{}): {}",
                        parse_failures, self.settings.parse_retry.max_retries, e
                    );
                    if parse_failures > self.settings.parse_retry.max_retries {
                        return (
                            RunStatus::ParseError,
                            format!("Could not parse model output: {}", e),
                        );
                    }
                    let delay = self.settings.parse_retry.delay_for(parse_failures);
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    correction = Some(Correction {
                        log: raw,
                        note: e.corrective_note(),
                    });
                    continue;
                }
            };

            // Finishing
            let tool_name = match &step.action {
                StepAction::Finish => {
                    info!("Finished after {} iterations", iteration);
                    return (RunStatus::Success, step.action_input);
                }
                StepAction::Tool(name) => name.clone(),
            };

            // Acting + Observing
            iteration += 1;
            info!(
                "[Step {}] Action: {}({})",
                iteration,
                tool_name,
                preview(&step.action_input)
            );
            let observation = self.act(&tool_name, &step.action_input).await;

            if let Some(err) = &observation.error {
                tool_errors += 1;
                warn!("[Step {}] {} error ({}): {}", iteration, tool_name, err.kind, err.message);
            } else {
                tool_errors = 0;
                debug!("[Step {}] Observation: {} chars", iteration, observation.output.len());
            }

            transcript.push(step, observation);

            if let Some(limit) = self.settings.max_consecutive_tool_errors {
                if tool_errors >= limit {
                    warn!("{} consecutive tool errors; giving up", tool_errors);
                    return (
                        RunStatus::ToolError,
                        best_effort(transcript, "Tool calls kept failing."),
                    );
                }
            }
        }
    }

    /// One model call with timeout and bounded retries.
    async fn think(&self, prompt: &str) -> Result<String> {
        let mut attempt: u32 = 0;
        loop {
            let result = match tokio::time::timeout(
                self.settings.model_timeout,
                self.model.complete(prompt, &self.stop),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(anyhow!(
                    "model call timed out after {} s",
                    self.settings.model_timeout.as_secs()
                )),
            };

            match result {
                Ok(text) => return Ok(text),
                Err(e) if attempt < self.settings.model_retry.max_retries => {
                    attempt += 1;
                    warn!(
                        "Model call failed ({}/{}): {:#}",
                        attempt, self.settings.model_retry.max_retries, e
                    );
                    tokio::time::sleep(self.settings.model_retry.delay_for(attempt)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Resolve and invoke a tool. Never fails: every problem is an observation.
    async fn act(&self, name: &str, input: &str) -> Observation {
        let tool = match self.tools.resolve(name) {
            Ok(tool) => tool,
            Err(e) => {
                return Observation::failure(
                    name,
                    ErrorKind::ToolNotFound,
                    format!("{}. Valid tools are: {}", e, self.tools.names().join(", ")),
                );
            }
        };

        let input = input.to_string();
        let handle = tokio::spawn(async move { tool.invoke(&input).await }.in_current_span());
        let abort = handle.abort_handle();

        match tokio::time::timeout(self.settings.tool_timeout, handle).await {
            Ok(Ok(Ok(output))) => Observation::from_output(name, output),
            Ok(Ok(Err(e))) => Observation::failure(name, ErrorKind::ToolExecution, format!("{:#}", e)),
            Ok(Err(join)) if join.is_panic() => {
                Observation::failure(name, ErrorKind::ToolExecution, "tool panicked")
            }
            Ok(Err(join)) => Observation::failure(name, ErrorKind::ToolExecution, join.to_string()),
            Err(_) => {
                abort.abort();
                Observation::failure(
                    name,
                    ErrorKind::Timeout,
                    format!(
                        "tool did not finish within {} ms",
                        self.settings.tool_timeout.as_millis()
                    ),
                )
            }
        }
    }
}

/// Last observation's text, or `fallback` when there is nothing to show.
fn best_effort(transcript: &Transcript, fallback: &str) -> String {
    transcript
        .last_observation()
        .map(|o| o.render())
        .filter(|text| !text.trim().is_empty())
        .unwrap_or_else(|| fallback.to_string())
}

fn preview(text: &str) -> String {
    let line = text.lines().next().unwrap_or_default();
    if line.chars().count() > 120 || text.lines().nth(1).is_some() {
        let cut: String = line.chars().take(120).collect();
        format!("{}…", cut)
    } else {
        line.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::Tool;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Replays canned completions; repeats the last one when exhausted.
    struct Scripted {
        replies: Mutex<VecDeque<String>>,
        last: Mutex<String>,
        prompts: Mutex<Vec<String>>,
    }

    impl Scripted {
        fn new(replies: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.iter().map(|s| s.to_string()).collect()),
                last: Mutex::new(String::new()),
                prompts: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> usize {
            self.prompts.lock().unwrap().len()
        }

        fn prompt(&self, i: usize) -> String {
            self.prompts.lock().unwrap()[i].clone()
        }
    }

    #[async_trait]
    impl CompletionModel for Scripted {
        async fn complete(&self, prompt: &str, stop: &[String]) -> Result<String> {
            assert_eq!(stop, ["\nObservation:"]);
            self.prompts.lock().unwrap().push(prompt.to_string());
            let mut last = self.last.lock().unwrap();
            if let Some(next) = self.replies.lock().unwrap().pop_front() {
                *last = next;
            }
            Ok(last.clone())
        }
    }

    struct Unreachable;

    #[async_trait]
    impl CompletionModel for Unreachable {
        async fn complete(&self, _prompt: &str, _stop: &[String]) -> Result<String> {
            Err(anyhow!("connection refused"))
        }
    }

    struct Echo {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Tool for Echo {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "repeats its input"
        }
        async fn invoke(&self, input: &str) -> Result<ToolOutput> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(ToolOutput::ok(format!("echo: {input}")))
        }
    }

    struct Faulty {
        panic: bool,
    }

    #[async_trait]
    impl Tool for Faulty {
        fn name(&self) -> &str {
            "faulty"
        }
        fn description(&self) -> &str {
            "always fails"
        }
        async fn invoke(&self, _input: &str) -> Result<ToolOutput> {
            if self.panic {
                panic!("tool blew up");
            }
            Err(anyhow!("disk on fire"))
        }
    }

    struct Slow;

    #[async_trait]
    impl Tool for Slow {
        fn name(&self) -> &str {
            "slow"
        }
        fn description(&self) -> &str {
            "never answers in time"
        }
        async fn invoke(&self, _input: &str) -> Result<ToolOutput> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(ToolOutput::ok("late"))
        }
    }

    fn settings() -> ExecutorSettings {
        ExecutorSettings {
            max_iterations: 5,
            parse_retry: RetryPolicy::new(2, Duration::ZERO),
            model_retry: RetryPolicy::none(),
            model_timeout: Duration::from_secs(5),
            tool_timeout: Duration::from_secs(5),
            max_consecutive_tool_errors: None,
        }
    }

    fn executor(model: Arc<dyn CompletionModel>, tools: Vec<Arc<dyn Tool>>, settings: ExecutorSettings) -> AgentExecutor {
        AgentExecutor::new(
            "test",
            model,
            ToolRegistry::with_tools(tools).unwrap(),
            PromptTemplate::new("Answer questions."),
            settings,
        )
    }

    fn echo() -> Arc<Echo> {
        Arc::new(Echo {
            calls: AtomicUsize::new(0),
        })
    }

    #[tokio::test]
    async fn acts_then_finishes() {
        let model = Scripted::new(&[
            "Thought: Do I need to use a tool? Yes\nAction: echo\nAction Input: hi",
            "Thought: Do I need to use a tool? No\nFinal Answer: done",
        ]);
        let tool = echo();
        let result = executor(model.clone(), vec![tool.clone()], settings()).run("say hi").await;

        assert_eq!(result.status, RunStatus::Success);
        assert_eq!(result.output, "done");
        assert_eq!(result.transcript.steps.len(), 1);
        assert_eq!(result.transcript.steps[0].observation.output, "echo: hi");
        assert!(result.transcript.finished_at.is_some());
        assert_eq!(tool.calls.load(Ordering::SeqCst), 1);
        assert!(model.prompt(1).contains("Observation: echo: hi\nThought: "));
    }

    #[tokio::test]
    async fn stops_at_exactly_the_iteration_limit() {
        let model = Scripted::new(&["Action: echo\nAction Input: again"]);
        let tool = echo();
        let mut s = settings();
        s.max_iterations = 3;

        let result = executor(model.clone(), vec![tool.clone()], s).run("loop forever").await;

        assert_eq!(result.status, RunStatus::IterationLimitExceeded);
        assert_eq!(result.transcript.steps.len(), 3);
        assert_eq!(tool.calls.load(Ordering::SeqCst), 3);
        assert_eq!(model.calls(), 3);
        assert_eq!(result.output, "echo: again");
    }

    #[tokio::test]
    async fn iteration_limit_without_observations_uses_fallback_text() {
        let model = Scripted::new(&["Final Answer: unused"]);
        let mut s = settings();
        s.max_iterations = 0;
        let result = executor(model, vec![echo()], s).run("x").await;

        assert_eq!(result.status, RunStatus::IterationLimitExceeded);
        assert_eq!(result.output, ITERATION_LIMIT_MESSAGE);
    }

    #[tokio::test]
    async fn malformed_output_is_retried_with_a_note() {
        let model = Scripted::new(&["I think the answer is 4", "Final Answer: 4"]);
        let result = executor(model.clone(), vec![echo()], settings()).run("2+2").await;

        assert_eq!(result.status, RunStatus::Success);
        assert_eq!(result.output, "4");
        assert_eq!(result.transcript.parse_failures, 1);
        assert!(result.transcript.steps.is_empty());

        let retry_prompt = model.prompt(1);
        assert!(retry_prompt.contains("I think the answer is 4\nObservation: Invalid Format"));
    }

    #[tokio::test]
    async fn exhausted_parse_retries_fail_the_run() {
        let model = Scripted::new(&["no idea"]);
        let result = executor(model.clone(), vec![echo()], settings()).run("?").await;

        assert_eq!(result.status, RunStatus::ParseError);
        assert!(!result.output.is_empty());
        assert!(result.output.contains("Missing 'Action:'"));
        // First attempt plus two retries.
        assert_eq!(model.calls(), 3);
        assert_eq!(result.transcript.parse_failures, 3);
    }

    #[tokio::test]
    async fn unknown_tool_is_observed_and_the_loop_continues() {
        let model = Scripted::new(&[
            "Action: Web Search\nAction Input: ufc",
            "Action: echo\nAction Input: ufc",
            "Final Answer: ok",
        ]);
        let result = executor(model.clone(), vec![echo()], settings()).run("search").await;

        assert_eq!(result.status, RunStatus::Success);
        let first = &result.transcript.steps[0].observation;
        assert_eq!(first.source_tool, "Web Search");
        assert_eq!(first.error.as_ref().unwrap().kind, ErrorKind::ToolNotFound);
        assert!(first.render().contains("Valid tools are: echo"));
        assert!(!result.transcript.steps[1].observation.is_error());
    }

    #[tokio::test]
    async fn tool_errors_and_panics_become_observations() {
        for panic in [false, true] {
            let model = Scripted::new(&["Action: faulty\nAction Input: x", "Final Answer: recovered"]);
            let tools: Vec<Arc<dyn Tool>> = vec![Arc::new(Faulty { panic })];
            let result = executor(model, tools, settings()).run("try").await;

            assert_eq!(result.status, RunStatus::Success);
            assert_eq!(result.output, "recovered");
            let err = result.transcript.steps[0].observation.error.clone().unwrap();
            assert_eq!(err.kind, ErrorKind::ToolExecution);
            let expected = if panic { "tool panicked" } else { "disk on fire" };
            assert_eq!(err.message, expected);
        }
    }

    #[tokio::test]
    async fn slow_tools_time_out() {
        let model = Scripted::new(&["Action: slow\nAction Input: x", "Final Answer: gave up"]);
        let mut s = settings();
        s.tool_timeout = Duration::from_millis(50);
        let result = executor(model, vec![Arc::new(Slow) as Arc<dyn Tool>], s).run("wait").await;

        assert_eq!(result.status, RunStatus::Success);
        let err = result.transcript.steps[0].observation.error.clone().unwrap();
        assert_eq!(err.kind, ErrorKind::Timeout);
    }

    #[tokio::test]
    async fn repeated_tool_errors_can_end_the_run() {
        let model = Scripted::new(&["Action: faulty\nAction Input: x"]);
        let mut s = settings();
        s.max_consecutive_tool_errors = Some(2);
        let tools: Vec<Arc<dyn Tool>> = vec![Arc::new(Faulty { panic: false })];
        let result = executor(model, tools, s).run("try").await;

        assert_eq!(result.status, RunStatus::ToolError);
        assert_eq!(result.transcript.steps.len(), 2);
        assert!(result.output.contains("disk on fire"));
    }

    #[tokio::test]
    async fn unreachable_model_is_a_model_error() {
        let mut s = settings();
        s.model_retry = RetryPolicy::new(1, Duration::ZERO);
        let result = executor(Arc::new(Unreachable), vec![echo()], s).run("hi").await;

        assert_eq!(result.status, RunStatus::ModelError);
        assert!(result.output.contains("connection refused"));
    }

    #[tokio::test]
    async fn cancelled_runs_stop_before_the_next_cycle() {
        let model = Scripted::new(&["Action: echo\nAction Input: hi"]);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = executor(model.clone(), vec![echo()], settings())
            .run_with_cancel("hi", &cancel)
            .await;

        assert_eq!(result.status, RunStatus::Cancelled);
        assert_eq!(result.output, CANCELLED_MESSAGE);
        assert_eq!(model.calls(), 0);
    }

    /// Cancels the run it belongs to while it is being invoked.
    struct StopButton(CancellationToken);

    #[async_trait]
    impl Tool for StopButton {
        fn name(&self) -> &str {
            "stop"
        }
        fn description(&self) -> &str {
            "cancels the current run"
        }
        async fn invoke(&self, _input: &str) -> Result<ToolOutput> {
            self.0.cancel();
            Ok(ToolOutput::ok("stopping after this step"))
        }
    }

    #[tokio::test]
    async fn cancellation_mid_run_keeps_the_finished_step() {
        let model = Scripted::new(&["Action: stop\nAction Input: now"]);
        let cancel = CancellationToken::new();
        let tools: Vec<Arc<dyn Tool>> = vec![Arc::new(StopButton(cancel.clone()))];
        let result = executor(model.clone(), tools, settings())
            .run_with_cancel("keep going", &cancel)
            .await;

        assert_eq!(result.status, RunStatus::Cancelled);
        assert_eq!(model.calls(), 1);
        assert_eq!(result.transcript.steps.len(), 1);
        let entry = &result.transcript.steps[0];
        assert_eq!(entry.step.action, StepAction::Tool("stop".into()));
        assert_eq!(entry.observation.output, "stopping after this step");
        assert!(!entry.observation.is_error());
        assert_eq!(result.output, "stopping after this step");
        assert!(result.transcript.finished_at.is_some());
    }

    #[test]
    fn backoff_grows_exponentially() {
        let policy = RetryPolicy::new(3, Duration::from_millis(100));
        assert_eq!(policy.delay_for(0), Duration::ZERO);
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(400));
        assert_eq!(RetryPolicy::none().delay_for(5), Duration::ZERO);
    }

    #[test]
    fn settings_follow_loop_config() {
        let cfg = LoopConfig {
            max_iterations: 7,
            max_parse_retries: 1,
            parse_retry_backoff_ms: 250,
            ..LoopConfig::default()
        };
        let s = ExecutorSettings::from(&cfg);
        assert_eq!(s.max_iterations, 7);
        assert_eq!(s.parse_retry, RetryPolicy::new(1, Duration::from_millis(250)));
        assert_eq!(s.tool_timeout, Duration::from_secs(600));
    }
}
