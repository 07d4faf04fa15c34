//! Model inference over an OpenAI-compatible chat completions API.

use super::CompletionModel;
use crate::config::ModelConfig;
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// The API accepts at most this many stop sequences.
const MAX_STOP_SEQUENCES: usize = 4;

/// Inference client bound to one model name.
#[derive(Debug, Clone)]
pub struct InferenceClient {
    base_url: String,
    api_key: String,
    model: String,
    temperature: f64,
    max_tokens: u32,
    http: reqwest::Client,
}

// -- OpenAI-compatible request/response types --------------------------------

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<MessagePayload<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop: Option<&'a [String]>,
    max_tokens: u32,
    temperature: f64,
}

#[derive(Debug, Serialize)]
struct MessagePayload<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    usage: Option<UsagePayload>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UsagePayload {
    prompt_tokens: u32,
    completion_tokens: u32,
}

impl InferenceClient {
    pub fn new(base_url: &str, api_key: &str, model: &str, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
            temperature: 0.0,
            max_tokens: 1024,
            http,
        })
    }

    /// Client for `model` using the shared endpoint settings.
    pub fn from_config(config: &ModelConfig, model: &str) -> Result<Self> {
        let api_key = config.resolved_api_key()?;
        let mut client = Self::new(
            &config.api_url,
            &api_key,
            model,
            Duration::from_secs(config.request_timeout_secs),
        )?;
        client.temperature = config.temperature;
        client.max_tokens = config.max_tokens;
        Ok(client)
    }

    /// Same endpoint and credentials, different model.
    pub fn with_model(&self, model: &str) -> Self {
        Self {
            model: model.to_string(),
            ..self.clone()
        }
    }
}

#[async_trait]
impl CompletionModel for InferenceClient {
    async fn complete(&self, prompt: &str, stop: &[String]) -> Result<String> {
        let url = format!("{}/v1/chat/completions", self.base_url);

        let request = ChatRequest {
            model: &self.model,
            messages: vec![MessagePayload {
                role: "user",
                content: prompt,
            }],
            stop: (!stop.is_empty()).then(|| &stop[..stop.len().min(MAX_STOP_SEQUENCES)]),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        };

        debug!("Inference request to model: {} ({} chars)", self.model, prompt.len());

        let resp = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .context("Inference request failed")?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            bail!("Inference failed ({}): {}", status, body);
        }

        let body: ChatResponse = resp
            .json()
            .await
            .context("Failed to parse inference response")?;

        if let Some(usage) = &body.usage {
            debug!(
                "Model {} used {} prompt + {} completion tokens",
                self.model, usage.prompt_tokens, usage.completion_tokens
            );
        }

        Ok(body
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_omits_empty_stop_list() {
        let request = ChatRequest {
            model: "gpt-4",
            messages: vec![MessagePayload {
                role: "user",
                content: "hi",
            }],
            stop: None,
            max_tokens: 16,
            temperature: 0.0,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert!(json.get("stop").is_none());
        assert_eq!(json["messages"][0]["content"], "hi");
    }

    #[test]
    fn response_without_content_parses() {
        let body: ChatResponse =
            serde_json::from_str(r#"{"choices":[{"message":{"content":null}}]}"#).unwrap();
        assert!(body.choices[0].message.content.is_none());
        assert!(body.usage.is_none());
    }

    #[test]
    fn with_model_keeps_endpoint() {
        let client =
            InferenceClient::new("https://api.example.com/", "k", "gpt-4", Duration::from_secs(5)).unwrap();
        let other = client.with_model("gpt-4-turbo");
        assert_eq!(other.model, "gpt-4-turbo");
        assert_eq!(other.base_url, "https://api.example.com");
    }
}
