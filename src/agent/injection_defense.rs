//! Keeps tool output from impersonating the step protocol.
//!
//! Observations come from code output, dataset cells, and sub-agent answers.
//! A line there that starts with `Final Answer:` or `Action:` would read to
//! the model as if it had written it, so such lines are fenced off before the
//! text reaches the scratchpad.

const PROTOCOL_MARKERS: &[&str] = &[
    "Thought:",
    "Action:",
    "Action Input:",
    "Observation:",
    "Final Answer:",
];

const ROLE_TOKENS: &[&str] = &[
    "<|im_start|>",
    "<|im_end|>",
    "<|system|>",
    "<|assistant|>",
    "<|endoftext|>",
];

/// Sanitize tool output before it is placed in a prompt.
pub fn sanitize_observation(content: &str) -> String {
    let mut cleaned = content.to_string();
    for token in ROLE_TOKENS {
        cleaned = cleaned.replace(token, "");
    }

    cleaned
        .lines()
        .map(|line| {
            let start = line.trim_start();
            if PROTOCOL_MARKERS.iter().any(|m| start.starts_with(m)) {
                format!("| {}", line)
            } else {
                line.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}
