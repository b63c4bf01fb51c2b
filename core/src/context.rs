use std::fmt;
use std::path::PathBuf;

use crate::config::AppConfig;
use crate::locale::detect_language;

/// The user's stated end objective. Stored verbatim; only a zero-length
/// goal is skipped when requesting suggestions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Goal(String);

impl Goal {
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Goal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Process-wide settings handed to both the suggestion provider and the
/// session launcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssistantContext {
    pub config: AppConfig,
    /// Language the completion service is asked to reply in.
    pub language: String,
    /// Working directory for executed commands.
    pub cwd: PathBuf,
}

impl AssistantContext {
    pub fn new(config: AppConfig, language: impl Into<String>, cwd: PathBuf) -> Self {
        Self {
            config,
            language: language.into(),
            cwd,
        }
    }

    /// Builds a context from the detected system locale and the current
    /// directory.
    pub fn from_environment(config: AppConfig) -> std::io::Result<Self> {
        let cwd = std::env::current_dir()?;
        Ok(Self::new(config, detect_language(), cwd))
    }
}
