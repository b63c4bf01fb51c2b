use async_trait::async_trait;
use autoterm_core::Goal;
use thiserror::Error;

pub mod openai;
pub mod prompt;

pub use openai::MAX_TOKENS;
pub use openai::OpenAiProvider;
pub use openai::TEMPERATURE;
pub use openai::UNEXPECTED_RESPONSE_MESSAGE;
pub use prompt::extract_command;
pub use prompt::system_instruction;
pub use prompt::user_prompt;

#[derive(Debug, Error)]
pub enum SuggestError {
    #[error("request to provider `{provider}` failed: {source}")]
    Transport {
        provider: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("provider `{provider}` returned HTTP {status}: {body}")]
    HttpStatus {
        provider: &'static str,
        status: u16,
        body: String,
    },
    #[error("provider `{provider}` returned a body that is not JSON: {source}")]
    InvalidBody {
        provider: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("{0}")]
    Internal(String),
}

/// A completion service that turns a goal into a suggested next step.
///
/// One call issues exactly one request; implementations do not retry.
#[async_trait]
pub trait SuggestionProvider: Send + Sync {
    fn provider_name(&self) -> &'static str;

    async fn suggest(&self, goal: &Goal) -> Result<String, SuggestError>;
}
