//! OpenAI-compatible chat-completions generator.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::Generator;
use crate::core::error::GenerationError;

/// Responses shorter than this are treated as failures
const MIN_RESPONSE_CHARS: usize = 10;

pub const DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a professional news article writer. \
Generate concise, professional news articles from press releases.";

#[derive(Serialize)]
struct Req<'a> {
    model: &'a str,
    messages: Vec<Msg<'a>>,
    max_completion_tokens: u32,
}

#[derive(Serialize)]
struct Msg<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct Resp {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMsg,
}

#[derive(Deserialize)]
struct ChoiceMsg {
    #[serde(default)]
    content: Option<String>,
}

/// Generator backed by a chat-completions endpoint
pub struct OpenAiGenerator {
    api_key: String,
    model: String,
    endpoint: String,
    system_prompt: String,
    max_tokens: u32,
    timeout: Duration,
    http: reqwest::Client,
}

impl OpenAiGenerator {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>, http: reqwest::Client) -> Self {
        Self {
            api_key: api_key.into(),
            model: model.into(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            max_tokens: 1500,
            timeout: Duration::from_secs(60),
            http,
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl Generator for OpenAiGenerator {
    fn name(&self) -> &str {
        "openai"
    }

    /// `context` is the instruction placed ahead of the text
    async fn generate(&self, text: &str, context: &str) -> Result<String, GenerationError> {
        let user = if context.is_empty() {
            text.to_string()
        } else {
            format!("{}\n\n{}", context, text)
        };

        let req = Req {
            model: &self.model,
            messages: vec![
                Msg {
                    role: "system",
                    content: &self.system_prompt,
                },
                Msg {
                    role: "user",
                    content: &user,
                },
            ],
            max_completion_tokens: self.max_tokens,
        };

        let resp = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .timeout(self.timeout)
            .json(&req)
            .send()
            .await
            .map_err(|e| GenerationError::Request(e.without_url().to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(GenerationError::Status {
                status: status.as_u16(),
                body: body.chars().take(300).collect(),
            });
        }

        let body: Resp = resp
            .json()
            .await
            .map_err(|e| GenerationError::Request(e.to_string()))?;

        let content = body
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();
        let content = content.trim().to_string();

        let len = content.chars().count();
        if len < MIN_RESPONSE_CHARS {
            return Err(GenerationError::TooShort(len));
        }
        Ok(content)
    }
}
