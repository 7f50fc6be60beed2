use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::audio::{CaptureConfig, CAPTURE_SAMPLE_RATE, CAPTURE_WINDOW, DEFAULT_CAPTURE_QUEUE};
use crate::session::{new_session_id, SessionConfig, Voice};

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub service: ServiceConfig,
    pub live: LiveConfig,
    pub text: TextConfig,
    pub persona: PersonaConfig,
    pub audio: AudioConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub name: String,
    pub http: HttpConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "live-translator".to_string(),
            http: HttpConfig::default(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub bind: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

/// Realtime speech endpoint
#[derive(Deserialize)]
#[serde(default)]
pub struct LiveConfig {
    pub url: String,
    pub api_key: String,
    pub model: String,
    pub handshake_timeout_secs: u64,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            url: "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1alpha.GenerativeService.BidiGenerateContent".to_string(),
            api_key: String::new(),
            model: "models/gemini-2.0-flash-exp".to_string(),
            handshake_timeout_secs: 10,
        }
    }
}

// Manual impl keeps the key out of logs.
impl std::fmt::Debug for LiveConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveConfig")
            .field("url", &self.url)
            .field("api_key", &redacted(&self.api_key))
            .field("model", &self.model)
            .field("handshake_timeout_secs", &self.handshake_timeout_secs)
            .finish()
    }
}

/// One-shot translate/synthesize endpoint
#[derive(Deserialize)]
#[serde(default)]
pub struct TextConfig {
    pub base_url: String,
    /// Falls back to `live.api_key` when empty
    pub api_key: String,
    pub text_model: String,
    pub speech_model: String,
    pub instruction: String,
}

impl Default for TextConfig {
    fn default() -> Self {
        Self {
            base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            api_key: String::new(),
            text_model: "gemini-2.0-flash".to_string(),
            speech_model: "gemini-2.5-flash-preview-tts".to_string(),
            instruction: "Translate the following text into English. Reply with the translation only.".to_string(),
        }
    }
}

impl std::fmt::Debug for TextConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TextConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &redacted(&self.api_key))
            .field("text_model", &self.text_model)
            .field("speech_model", &self.speech_model)
            .field("instruction", &self.instruction)
            .finish()
    }
}

fn redacted(key: &str) -> &'static str {
    if key.is_empty() {
        "<unset>"
    } else {
        "<redacted>"
    }
}

/// Default voice and persona for new sessions
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct PersonaConfig {
    pub voice: Voice,
    pub system_prompt: String,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Samples per capture window
    pub capture_window: usize,
    /// Capture windows buffered ahead of the transport before the oldest drop
    pub capture_queue: usize,
    pub mood_cadence_ms: u64,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            capture_window: CAPTURE_WINDOW,
            capture_queue: DEFAULT_CAPTURE_QUEUE,
            mood_cadence_ms: 16,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/utterances.json"),
        }
    }
}

impl Config {
    /// Load `path` (extension optional) layered under `TRANSLATOR__*` env vars
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(
                config::Environment::with_prefix("TRANSLATOR")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()
            .with_context(|| format!("Failed to read configuration from {path}"))?;

        let cfg: Self = settings
            .try_deserialize()
            .context("Invalid configuration")?;

        if cfg.audio.mood_cadence_ms == 0 {
            anyhow::bail!("audio.mood_cadence_ms must be at least 1");
        }

        Ok(cfg)
    }

    /// Parameters for the next realtime session
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            session_id: new_session_id(),
            model: self.live.model.clone(),
            voice: self.persona.voice,
            system_prompt: self.persona.system_prompt.clone(),
            handshake_timeout: Duration::from_secs(self.live.handshake_timeout_secs),
        }
    }

    pub fn capture_config(&self) -> CaptureConfig {
        CaptureConfig {
            target_sample_rate: CAPTURE_SAMPLE_RATE,
            window: self.audio.capture_window,
            queue_capacity: self.audio.capture_queue,
        }
    }

    pub fn mood_cadence(&self) -> Duration {
        Duration::from_millis(self.audio.mood_cadence_ms)
    }

    /// Key for the text endpoint
    pub fn text_api_key(&self) -> &str {
        if self.text.api_key.is_empty() {
            &self.live.api_key
        } else {
            &self.text.api_key
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_layers_file_over_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[service.http]
port = 9090

[persona]
voice = "Kore"
system_prompt = "Speak like a pirate"

[audio]
capture_queue = 8
"#
        )
        .unwrap();

        let cfg = Config::load(file.path().to_str().unwrap()).unwrap();
        assert_eq!(cfg.service.http.port, 9090);
        assert_eq!(cfg.service.http.bind, "127.0.0.1");
        assert_eq!(cfg.persona.voice, Voice::Kore);
        assert_eq!(cfg.capture_config().queue_capacity, 8);
        assert_eq!(cfg.capture_config().window, CAPTURE_WINDOW);

        let session = cfg.session_config();
        assert_eq!(session.system_prompt, "Speak like a pirate");
        assert_eq!(session.handshake_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_zero_mood_cadence_rejected() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[audio]\nmood_cadence_ms = 0").unwrap();

        let err = Config::load(file.path().to_str().unwrap()).unwrap_err();
        assert!(format!("{err:#}").contains("mood_cadence_ms"));
    }

    #[test]
    fn test_text_key_falls_back_to_live_key() {
        let mut cfg = Config::default();
        cfg.live.api_key = "live-key".to_string();
        assert_eq!(cfg.text_api_key(), "live-key");
        cfg.text.api_key = "text-key".to_string();
        assert_eq!(cfg.text_api_key(), "text-key");
    }

    #[test]
    fn test_debug_hides_keys() {
        let mut cfg = Config::default();
        cfg.live.api_key = "secret".to_string();
        assert!(!format!("{cfg:?}").contains("secret"));
    }
}
