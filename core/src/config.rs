use std::fmt;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

pub const DEFAULT_CONFIG_FILE: &str = "config.toml";
pub const DEFAULT_MODEL: &str = "gpt-3.5-turbo";
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

const OPENAI_SECTION: &str = "openai";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub openai: OpenAiConfig,
    pub terminal: TerminalConfig,
}

#[derive(Clone, PartialEq, Eq)]
pub struct OpenAiConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
}

impl fmt::Debug for OpenAiConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenAiConfig")
            .field("api_key", &"<redacted>")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .finish()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TerminalConfig {
    /// Shell used to run executed commands. Platform default when unset.
    pub shell: Option<String>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(
        "configuration file `{path}` not found; create it and add your OpenAI API key under an [openai] section"
    )]
    NotFound { path: String },
    #[error("failed to read configuration file `{path}`: {source}")]
    ReadFailed {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse configuration file `{path}`: {source}")]
    ParseFailed {
        path: String,
        #[source]
        source: toml::de::Error,
    },
    #[error("configuration file `{path}` has no [{section}] section")]
    MissingSection { path: String, section: &'static str },
    #[error("configuration file `{path}` has no api_key under [openai]")]
    MissingApiKey { path: String },
    #[error("configuration file `{path}` has an empty api_key under [openai]")]
    InvalidApiKey { path: String },
}

#[derive(Debug, Default, Deserialize)]
struct ConfigToml {
    openai: Option<OpenAiToml>,
    #[serde(default)]
    terminal: TerminalToml,
}

#[derive(Debug, Default, Deserialize)]
struct OpenAiToml {
    api_key: Option<String>,
    model: Option<String>,
    base_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct TerminalToml {
    shell: Option<String>,
}

pub fn load_config(path: &Path) -> Result<AppConfig, ConfigError> {
    let display_path = path.to_string_lossy().to_string();
    let raw_config = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(source) if source.kind() == std::io::ErrorKind::NotFound => {
            return Err(ConfigError::NotFound { path: display_path });
        }
        Err(source) => {
            return Err(ConfigError::ReadFailed {
                path: display_path,
                source,
            });
        }
    };

    parse_config(&raw_config, &display_path)
}

fn parse_config(raw_config: &str, path: &str) -> Result<AppConfig, ConfigError> {
    let parsed: ConfigToml =
        toml::from_str(raw_config).map_err(|source| ConfigError::ParseFailed {
            path: path.to_string(),
            source,
        })?;

    let Some(openai) = parsed.openai else {
        return Err(ConfigError::MissingSection {
            path: path.to_string(),
            section: OPENAI_SECTION,
        });
    };

    let Some(api_key) = openai.api_key else {
        return Err(ConfigError::MissingApiKey {
            path: path.to_string(),
        });
    };
    let api_key = api_key.trim().to_string();
    if api_key.is_empty() {
        return Err(ConfigError::InvalidApiKey {
            path: path.to_string(),
        });
    }

    let model = non_blank(openai.model).unwrap_or_else(|| DEFAULT_MODEL.to_string());
    let base_url = non_blank(openai.base_url)
        .map(|url| url.trim_end_matches('/').to_string())
        .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());

    Ok(AppConfig {
        openai: OpenAiConfig {
            api_key,
            model,
            base_url,
        },
        terminal: TerminalConfig {
            shell: non_blank(parsed.terminal.shell),
        },
    })
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    use super::AppConfig;
    use super::ConfigError;
    use super::DEFAULT_BASE_URL;
    use super::DEFAULT_MODEL;
    use super::OpenAiConfig;
    use super::TerminalConfig;
    use super::load_config;

    fn write_config(dir: &TempDir, contents: &str) -> anyhow::Result<std::path::PathBuf> {
        let path = dir.path().join("config.toml");
        std::fs::write(&path, contents)?;
        Ok(path)
    }

    #[test]
    fn loads_api_key_and_applies_defaults() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let path = write_config(&dir, "[openai]\napi_key = \"sk-test\"\n")?;

        let config = load_config(&path)?;
        assert_eq!(
            config,
            AppConfig {
                openai: OpenAiConfig {
                    api_key: "sk-test".to_string(),
                    model: DEFAULT_MODEL.to_string(),
                    base_url: DEFAULT_BASE_URL.to_string(),
                },
                terminal: TerminalConfig::default(),
            }
        );
        Ok(())
    }

    #[test]
    fn honors_optional_overrides() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let path = write_config(
            &dir,
            "[openai]\napi_key = \"sk-test\"\nmodel = \"gpt-4o-mini\"\nbase_url = \"http://127.0.0.1:9000/v1/\"\n\n[terminal]\nshell = \"/bin/bash\"\n",
        )?;

        let config = load_config(&path)?;
        assert_eq!(config.openai.model, "gpt-4o-mini");
        assert_eq!(config.openai.base_url, "http://127.0.0.1:9000/v1");
        assert_eq!(config.terminal.shell.as_deref(), Some("/bin/bash"));
        Ok(())
    }

    #[test]
    fn missing_file_is_reported_with_its_path() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("absent.toml");

        let result = load_config(&path);
        assert!(matches!(
            result,
            Err(ConfigError::NotFound { ref path }) if path.ends_with("absent.toml")
        ));
        Ok(())
    }

    #[test]
    fn missing_openai_section_is_rejected() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let path = write_config(&dir, "[other]\napi_key = \"sk-test\"\n")?;

        let result = load_config(&path);
        assert!(matches!(
            result,
            Err(ConfigError::MissingSection {
                section: "openai",
                ..
            })
        ));
        Ok(())
    }

    #[test]
    fn missing_or_blank_api_key_is_rejected() -> anyhow::Result<()> {
        let dir = TempDir::new()?;

        let path = write_config(&dir, "[openai]\nmodel = \"gpt-3.5-turbo\"\n")?;
        assert!(matches!(
            load_config(&path),
            Err(ConfigError::MissingApiKey { .. })
        ));

        let path = write_config(&dir, "[openai]\napi_key = \"   \"\n")?;
        assert!(matches!(
            load_config(&path),
            Err(ConfigError::InvalidApiKey { .. })
        ));
        Ok(())
    }

    #[test]
    fn malformed_toml_and_non_string_keys_fail_to_parse() -> anyhow::Result<()> {
        let dir = TempDir::new()?;

        let path = write_config(&dir, "[openai\napi_key = \"sk-test\"\n")?;
        assert!(matches!(
            load_config(&path),
            Err(ConfigError::ParseFailed { .. })
        ));

        let path = write_config(&dir, "[openai]\napi_key = 42\n")?;
        assert!(matches!(
            load_config(&path),
            Err(ConfigError::ParseFailed { .. })
        ));
        Ok(())
    }

    #[test]
    fn debug_output_redacts_the_api_key() {
        let config = OpenAiConfig {
            api_key: "sk-secret".to_string(),
            model: DEFAULT_MODEL.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
        };

        let rendered = format!("{config:?}");
        assert!(!rendered.contains("sk-secret"));
        assert!(rendered.contains("<redacted>"));
    }
}
