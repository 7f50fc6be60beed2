use crate::history::UtteranceStore;
use crate::session::{SessionHandle, Voice};
use std::sync::Arc;

/// Shared application state for HTTP handlers
#[derive(Clone)]
pub struct AppState {
    /// The one session this process drives
    pub session: SessionHandle,

    /// Utterance history and favorites
    pub store: Arc<dyn UtteranceStore>,

    /// Voice used when an open request names none
    pub default_voice: Voice,

    /// Persona used when an open request names none
    pub default_prompt: Arc<str>,
}

impl AppState {
    pub fn new(session: SessionHandle, store: Arc<dyn UtteranceStore>) -> Self {
        Self {
            session,
            store,
            default_voice: Voice::default(),
            default_prompt: Arc::from(""),
        }
    }

    pub fn with_persona(mut self, voice: Voice, system_prompt: &str) -> Self {
        self.default_voice = voice;
        self.default_prompt = Arc::from(system_prompt);
        self
    }
}
