use std::fmt;

use async_trait::async_trait;
use autoterm_core::AssistantContext;
use autoterm_core::Goal;
use autoterm_core::OpenAiConfig;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;
use tracing::warn;

use crate::SuggestError;
use crate::SuggestionProvider;
use crate::prompt::system_instruction;
use crate::prompt::user_prompt;

pub const TEMPERATURE: f64 = 0.6;
pub const MAX_TOKENS: u32 = 50;

/// Returned in place of a suggestion when the service answers with JSON that
/// lacks `choices[0].message.content`.
pub const UNEXPECTED_RESPONSE_MESSAGE: &str = "Error: Unexpected response format from OpenAI API.";

const PROVIDER_NAME: &str = "openai";
const ERROR_BODY_MAX_CHARS: usize = 400;

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: [ChatMessage; 2],
    temperature: f64,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

/// Chat-completions client for OpenAI and API-compatible services.
#[derive(Clone)]
pub struct OpenAiProvider {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    language: String,
}

impl fmt::Debug for OpenAiProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenAiProvider")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .field("language", &self.language)
            .finish_non_exhaustive()
    }
}

impl OpenAiProvider {
    pub fn new(config: &OpenAiConfig, language: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            language: language.into(),
        }
    }

    pub fn from_context(context: &AssistantContext) -> Self {
        Self::new(&context.config.openai, context.language.clone())
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn request_body<'a>(&'a self, goal: &Goal) -> ChatCompletionRequest<'a> {
        ChatCompletionRequest {
            model: &self.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: system_instruction(&self.language),
                },
                ChatMessage {
                    role: "user",
                    content: user_prompt(goal),
                },
            ],
            temperature: TEMPERATURE,
            max_tokens: MAX_TOKENS,
        }
    }
}

#[async_trait]
impl SuggestionProvider for OpenAiProvider {
    fn provider_name(&self) -> &'static str {
        PROVIDER_NAME
    }

    async fn suggest(&self, goal: &Goal) -> Result<String, SuggestError> {
        let body = self.request_body(goal);
        debug!(endpoint = %self.endpoint, model = %self.model, "requesting suggestion");

        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|source| SuggestError::Transport {
                provider: PROVIDER_NAME,
                source,
            })?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|source| SuggestError::Transport {
                provider: PROVIDER_NAME,
                source,
            })?;

        if !status.is_success() {
            return Err(SuggestError::HttpStatus {
                provider: PROVIDER_NAME,
                status: status.as_u16(),
                body: truncate_chars(&text, ERROR_BODY_MAX_CHARS),
            });
        }

        let value: Value =
            serde_json::from_str(&text).map_err(|source| SuggestError::InvalidBody {
                provider: PROVIDER_NAME,
                source,
            })?;

        match message_content(&value) {
            Some(content) => Ok(content.trim().to_string()),
            None => {
                warn!("completion response has no choices[0].message.content");
                Ok(UNEXPECTED_RESPONSE_MESSAGE.to_string())
            }
        }
    }
}

fn message_content(value: &Value) -> Option<&str> {
    value.pointer("/choices/0/message/content")?.as_str()
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    let mut truncated: String = text.chars().take(max_chars).collect();
    if text.chars().count() > max_chars {
        truncated.push_str("...");
    }
    truncated
}
