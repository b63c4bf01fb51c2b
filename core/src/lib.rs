pub mod config;
pub mod context;
pub mod events;
pub mod locale;
pub mod session;

pub use config::AppConfig;
pub use config::ConfigError;
pub use config::DEFAULT_CONFIG_FILE;
pub use config::OpenAiConfig;
pub use config::TerminalConfig;
pub use config::load_config;
pub use context::AssistantContext;
pub use context::Goal;
pub use events::AssistantEvent;
pub use events::SessionEvent;
pub use locale::DEFAULT_LANGUAGE;
pub use locale::detect_language;
pub use session::SessionError;
pub use session::SessionLauncher;
pub use session::ShellSpec;
