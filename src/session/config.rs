use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::Error;

/// Prebuilt voices offered by the speech service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Voice {
    #[default]
    Puck,
    Charon,
    Kore,
    Fenrir,
    Aoede,
}

impl Voice {
    pub const ALL: [Self; 5] = [Self::Puck, Self::Charon, Self::Kore, Self::Fenrir, Self::Aoede];

    /// Name as the service expects it
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Puck => "Puck",
            Self::Charon => "Charon",
            Self::Kore => "Kore",
            Self::Fenrir => "Fenrir",
            Self::Aoede => "Aoede",
        }
    }
}

impl fmt::Display for Voice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Voice {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|voice| voice.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| Error::Config(format!("unknown voice: {s}")))
    }
}

/// Parameters of one realtime session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Unique session identifier, used for log correlation
    pub session_id: String,

    /// Model identifier sent in the setup message
    pub model: String,

    /// Voice the service speaks with
    pub voice: Voice,

    /// Persona/behavior prompt, passed through verbatim
    pub system_prompt: String,

    /// How long to wait for the service to acknowledge setup
    pub handshake_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            session_id: new_session_id(),
            model: "models/gemini-2.0-flash-exp".to_string(),
            voice: Voice::default(),
            system_prompt: String::new(),
            handshake_timeout: Duration::from_secs(10),
        }
    }
}

/// Fresh session identifier
pub fn new_session_id() -> String {
    format!("session-{}", uuid::Uuid::new_v4())
}
