use std::path::Path;
use std::sync::Arc;

use autoterm_core::AssistantContext;
use autoterm_core::AssistantEvent;
use autoterm_core::ConfigError;
use autoterm_core::Goal;
use autoterm_core::SessionEvent;
use autoterm_core::SessionLauncher;
use autoterm_core::load_config;
use autoterm_suggest::OpenAiProvider;
use autoterm_suggest::SuggestionProvider;
use autoterm_suggest::extract_command;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::debug;
use tracing::warn;

mod view;

pub use view::AssistantEguiView;
pub use view::phase_label;

pub const WELCOME_MESSAGE: &str = "Welcome to AI Terminal Assistant!\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerPhase {
    Idle,
    AwaitingSuggestion,
    SuggestionReady,
    Executing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionLifecycle {
    Running,
    Finished {
        exit_code: Option<u32>,
        duration_ms: u64,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRecord {
    pub session_id: u64,
    pub command: String,
    pub lifecycle: SessionLifecycle,
}

/// User intents produced by the view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UiAction {
    Start(String),
    Resuggest,
    Cancel,
    Execute,
}

/// Append-only transcript shown in the terminal pane. `\r\n` is stored as
/// `\n`; a `\r` ending a chunk is held back until the next chunk shows
/// whether a `\n` follows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutputLog {
    text: String,
    held_cr: bool,
}

impl OutputLog {
    pub fn append(&mut self, chunk: &str) {
        for ch in chunk.chars() {
            if std::mem::take(&mut self.held_cr) && ch != '\n' {
                self.text.push('\r');
            }
            if ch == '\r' {
                self.held_cr = true;
            } else {
                self.text.push(ch);
            }
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }
}

/// State behind the window: goal, suggestion history, the editable command
/// field and the transcript. Only the interface thread mutates it.
#[derive(Debug)]
pub struct AssistantStore {
    goal: Goal,
    history: Vec<String>,
    suggestion_text: String,
    command_field: String,
    output: OutputLog,
    phase: ControllerPhase,
    pending_suggestions: usize,
    sessions: Vec<SessionRecord>,
}

impl Default for AssistantStore {
    fn default() -> Self {
        Self::new()
    }
}

impl AssistantStore {
    pub fn new() -> Self {
        let mut output = OutputLog::default();
        output.append(WELCOME_MESSAGE);
        Self {
            goal: Goal::default(),
            history: Vec::new(),
            suggestion_text: String::new(),
            command_field: String::new(),
            output,
            phase: ControllerPhase::Idle,
            pending_suggestions: 0,
            sessions: Vec::new(),
        }
    }

    pub fn set_goal(&mut self, goal: Goal) {
        self.output.append(&format!("\nUser Goal: {goal}\n"));
        self.goal = goal;
        self.history.clear();
    }

    /// Marks a suggestion request as in flight and returns the goal to send,
    /// or `None` when there is no goal yet.
    pub fn begin_suggestion(&mut self) -> Option<Goal> {
        if self.goal.is_empty() {
            return None;
        }
        self.output.append("AI is thinking...\n");
        self.pending_suggestions += 1;
        self.phase = ControllerPhase::AwaitingSuggestion;
        Some(self.goal.clone())
    }

    pub fn cancel(&mut self) {
        self.command_field.clear();
        self.output.append("Command input cancelled.\n");
    }

    /// Returns the command to launch, or `None` when the field is empty.
    pub fn prepare_execute(&mut self) -> Option<String> {
        if self.command_field.is_empty() {
            return None;
        }
        let command = self.command_field.clone();
        self.output.append(&format!("Executing: {command}\n"));
        Some(command)
    }

    pub fn record_session_started(&mut self, session_id: u64, command: String) {
        self.sessions.push(SessionRecord {
            session_id,
            command,
            lifecycle: SessionLifecycle::Running,
        });
        self.phase = ControllerPhase::Executing;
    }

    pub fn record_error(&mut self, message: &str) {
        self.output.append(&format!("Error: {message}\n"));
    }

    pub fn apply(&mut self, event: AssistantEvent) {
        match event {
            AssistantEvent::SuggestionReady {
                request_id,
                suggestion,
            } => {
                debug!(request_id, "suggestion received");
                self.pending_suggestions = self.pending_suggestions.saturating_sub(1);
                let command = extract_command(&suggestion).to_string();
                self.history.push(suggestion.clone());
                self.suggestion_text = suggestion;
                self.output.append(&format!("AI Suggested Command: {command}\n"));
                self.command_field = command;
                self.phase = self.settled_phase();
            }
            AssistantEvent::SuggestionFailed {
                request_id,
                message,
            } => {
                debug!(request_id, "suggestion failed");
                self.pending_suggestions = self.pending_suggestions.saturating_sub(1);
                self.record_error(&message);
                self.phase = self.settled_phase();
            }
            AssistantEvent::Session(SessionEvent::Output { chunk, .. }) => {
                self.output.append(&chunk);
            }
            AssistantEvent::Session(SessionEvent::Finished {
                session_id,
                exit_code,
                duration_ms,
            }) => {
                if let Some(record) = self
                    .sessions
                    .iter_mut()
                    .find(|record| record.session_id == session_id)
                {
                    record.lifecycle = SessionLifecycle::Finished {
                        exit_code,
                        duration_ms,
                    };
                }
                self.phase = self.settled_phase();
            }
        }
    }

    fn settled_phase(&self) -> ControllerPhase {
        if self.pending_suggestions > 0 {
            ControllerPhase::AwaitingSuggestion
        } else if self.running_session_count() > 0 {
            ControllerPhase::Executing
        } else if self.history.is_empty() {
            ControllerPhase::Idle
        } else {
            ControllerPhase::SuggestionReady
        }
    }

    pub fn goal(&self) -> &Goal {
        &self.goal
    }

    pub fn history(&self) -> &[String] {
        &self.history
    }

    pub fn suggestion_text(&self) -> &str {
        &self.suggestion_text
    }

    pub fn command_field(&self) -> &str {
        &self.command_field
    }

    pub fn command_field_mut(&mut self) -> &mut String {
        &mut self.command_field
    }

    pub fn output_text(&self) -> &str {
        self.output.text()
    }

    pub fn phase(&self) -> ControllerPhase {
        self.phase
    }

    pub fn pending_suggestions(&self) -> usize {
        self.pending_suggestions
    }

    pub fn sessions(&self) -> &[SessionRecord] {
        &self.sessions
    }

    pub fn session(&self, session_id: u64) -> Option<&SessionRecord> {
        self.sessions
            .iter()
            .find(|record| record.session_id == session_id)
    }

    pub fn running_session_count(&self) -> usize {
        self.sessions
            .iter()
            .filter(|record| record.lifecycle == SessionLifecycle::Running)
            .count()
    }

    pub fn last_finished_session(&self) -> Option<&SessionRecord> {
        self.sessions
            .iter()
            .rev()
            .find(|record| matches!(record.lifecycle, SessionLifecycle::Finished { .. }))
    }
}

#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to resolve the working directory: {0}")]
    WorkingDirectory(#[source] std::io::Error),
}

/// Loads the configuration file and builds the shared context. Binaries
/// treat any error here as fatal.
pub fn load_context(config_path: &Path) -> Result<AssistantContext, StartupError> {
    let config = load_config(config_path)?;
    AssistantContext::from_environment(config).map_err(StartupError::WorkingDirectory)
}

pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

type RepaintHook = Arc<dyn Fn() + Send + Sync>;

/// Queue handle given to workers. Each delivered event also pokes the
/// repaint hook so an idle window wakes up.
#[derive(Clone)]
struct EventSender {
    tx: mpsc::UnboundedSender<AssistantEvent>,
    repaint: Option<RepaintHook>,
}

impl EventSender {
    fn send(&self, event: AssistantEvent) {
        if self.tx.send(event).is_ok()
            && let Some(repaint) = &self.repaint
        {
            repaint();
        }
    }
}

/// Drives the store: dispatches suggestion requests to the async runtime,
/// launches sessions, and folds worker events back in via [`pump_events`].
///
/// [`pump_events`]: AssistantRuntime::pump_events
pub struct AssistantRuntime {
    store: AssistantStore,
    provider: Arc<dyn SuggestionProvider>,
    launcher: SessionLauncher,
    handle: Handle,
    events_tx: mpsc::UnboundedSender<AssistantEvent>,
    events_rx: mpsc::UnboundedReceiver<AssistantEvent>,
    repaint: Option<RepaintHook>,
    next_request_id: u64,
}

impl AssistantRuntime {
    pub fn new(
        provider: Arc<dyn SuggestionProvider>,
        launcher: SessionLauncher,
        handle: Handle,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            store: AssistantStore::new(),
            provider,
            launcher,
            handle,
            events_tx,
            events_rx,
            repaint: None,
            next_request_id: 1,
        }
    }

    pub fn from_context(context: &AssistantContext, handle: Handle) -> Self {
        Self::new(
            Arc::new(OpenAiProvider::from_context(context)),
            SessionLauncher::from_context(context),
            handle,
        )
    }

    pub fn with_repaint_hook(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.set_repaint_hook(hook);
        self
    }

    pub fn set_repaint_hook(&mut self, hook: impl Fn() + Send + Sync + 'static) {
        self.repaint = Some(Arc::new(hook));
    }

    pub fn store(&self) -> &AssistantStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut AssistantStore {
        &mut self.store
    }

    pub fn provider_name(&self) -> &'static str {
        self.provider.provider_name()
    }

    pub fn apply(&mut self, action: UiAction) {
        match action {
            UiAction::Start(goal) => self.start(goal),
            UiAction::Resuggest => self.resuggest(),
            UiAction::Cancel => self.cancel(),
            UiAction::Execute => {
                let _ = self.execute();
            }
        }
    }

    pub fn start(&mut self, goal: impl Into<String>) {
        self.store.set_goal(Goal::new(goal));
        self.resuggest();
    }

    /// Requests another suggestion for the current goal. The history is not
    /// sent, so the reply does not depend on earlier suggestions.
    pub fn resuggest(&mut self) {
        let Some(goal) = self.store.begin_suggestion() else {
            return;
        };

        let request_id = self.next_request_id;
        self.next_request_id += 1;
        let provider = Arc::clone(&self.provider);
        let sender = self.event_sender();
        debug!(request_id, provider = provider.provider_name(), "dispatching suggestion request");

        self.handle.spawn(async move {
            let event = match provider.suggest(&goal).await {
                Ok(suggestion) => AssistantEvent::SuggestionReady {
                    request_id,
                    suggestion,
                },
                Err(error) => {
                    warn!(request_id, %error, "suggestion request failed");
                    AssistantEvent::SuggestionFailed {
                        request_id,
                        message: error.to_string(),
                    }
                }
            };
            sender.send(event);
        });
    }

    pub fn cancel(&mut self) {
        self.store.cancel();
    }

    /// Launches the command field verbatim. The field is left as is so the
    /// same command can be run again.
    pub fn execute(&mut self) -> Option<u64> {
        let command = self.store.prepare_execute()?;
        let sender = self.event_sender();
        match self
            .launcher
            .launch(&command, move |event| sender.send(event.into()))
        {
            Ok(session_id) => {
                self.store.record_session_started(session_id, command);
                Some(session_id)
            }
            Err(error) => {
                warn!(%error, "failed to launch session");
                self.store.record_error(&error.to_string());
                None
            }
        }
    }

    /// Applies every queued worker event and returns how many were applied.
    pub fn pump_events(&mut self) -> usize {
        let mut applied = 0;
        while let Ok(event) = self.events_rx.try_recv() {
            self.store.apply(event);
            applied += 1;
        }
        applied
    }

    /// True while a suggestion request is in flight or a session is running.
    pub fn has_pending_work(&self) -> bool {
        self.store.pending_suggestions() > 0 || self.store.running_session_count() > 0
    }

    /// Kills sessions that are still running.
    pub fn shutdown(&self) -> usize {
        self.launcher.terminate_all()
    }

    fn event_sender(&self) -> EventSender {
        EventSender {
            tx: self.events_tx.clone(),
            repaint: self.repaint.clone(),
        }
    }
}
