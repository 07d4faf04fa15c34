//! Decoding model text into a [`ReasoningStep`].
//!
//! Expected shapes:
//!
//! ```text
//! Thought: Do I need to use a tool? Yes
//! Action: <tool name>
//! Action Input: <input>
//! ```
//!
//! or
//!
//! ```text
//! Thought: Do I need to use a tool? No
//! Final Answer: <answer>
//! ```

use crate::types::{ReasoningStep, StepAction, FINISH_ACTION};
use regex::Regex;
use std::sync::LazyLock;
use thiserror::Error;

const FINAL_ANSWER: &str = "Final Answer:";

static ACTION_WITH_INPUT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)Action\s*\d*\s*:\s*(.*?)\s*Action\s*\d*\s*Input\s*\d*\s*:\s*(.*)")
        .expect("action regex")
});

static ACTION_ONLY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)Action\s*\d*\s*:\s*\S").expect("action regex"));

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("model returned no output")]
    Empty,
    #[error("Invalid Format: Missing 'Action:' after 'Thought:'")]
    MissingAction,
    #[error("Invalid Format: Missing 'Action Input:' after 'Action:'")]
    MissingActionInput,
    #[error("Invalid Format: 'Action:' names no tool")]
    EmptyAction,
    #[error("Parsing LLM output produced both a final answer and a parse-able action")]
    ActionAndFinalAnswer,
}

impl ParseError {
    /// Text fed back to the model in place of an observation.
    pub fn corrective_note(&self) -> String {
        format!(
            "{}. Respond with 'Action:' and 'Action Input:' lines to use a tool, \
             or with a single 'Final Answer:' line when you are done, never both.",
            self
        )
    }
}

/// Decode one completion into a step.
pub fn parse_step(text: &str) -> Result<ReasoningStep, ParseError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(ParseError::Empty);
    }

    let final_at = text.find(FINAL_ANSWER);

    if let Some(caps) = ACTION_WITH_INPUT.captures(text) {
        if final_at.is_some() {
            return Err(ParseError::ActionAndFinalAnswer);
        }
        let (whole, action, input) = match (caps.get(0), caps.get(1), caps.get(2)) {
            (Some(w), Some(a), Some(i)) => (w, a.as_str().trim(), i.as_str()),
            _ => return Err(ParseError::MissingActionInput),
        };
        if action.is_empty() {
            return Err(ParseError::EmptyAction);
        }

        let thought = strip_thought(&text[..whole.start()]);
        let action_input = clean_input(input);
        let action = if action == FINISH_ACTION {
            StepAction::Finish
        } else {
            StepAction::Tool(action.to_string())
        };
        return Ok(ReasoningStep {
            thought,
            action,
            action_input,
            log: text.to_string(),
        });
    }

    if let Some(at) = final_at {
        return Ok(ReasoningStep {
            thought: strip_thought(&text[..at]),
            action: StepAction::Finish,
            action_input: text[at + FINAL_ANSWER.len()..].trim().to_string(),
            log: text.to_string(),
        });
    }

    if ACTION_ONLY.is_match(text) {
        Err(ParseError::MissingActionInput)
    } else {
        Err(ParseError::MissingAction)
    }
}

fn strip_thought(prefix: &str) -> String {
    let prefix = prefix.trim();
    prefix
        .strip_prefix("Thought:")
        .unwrap_or(prefix)
        .trim()
        .to_string()
}

/// Trim the input, drop a hallucinated observation, and unwrap one layer of quotes.
fn clean_input(raw: &str) -> String {
    let raw = match raw.find("\nObservation:") {
        Some(at) => &raw[..at],
        None => raw,
    };
    let trimmed = raw.trim();
    trimmed
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(trimmed)
        .to_string()
}
