/// Events produced by pseudo-terminal sessions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Output {
        session_id: u64,
        chunk: String,
    },
    Finished {
        session_id: u64,
        /// `None` when the child could not be waited on.
        exit_code: Option<u32>,
        duration_ms: u64,
    },
}

impl SessionEvent {
    pub fn session_id(&self) -> u64 {
        match self {
            Self::Output { session_id, .. } | Self::Finished { session_id, .. } => *session_id,
        }
    }
}

/// Everything a worker can report back to the interface thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssistantEvent {
    SuggestionReady { request_id: u64, suggestion: String },
    SuggestionFailed { request_id: u64, message: String },
    Session(SessionEvent),
}

impl From<SessionEvent> for AssistantEvent {
    fn from(event: SessionEvent) -> Self {
        Self::Session(event)
    }
}
