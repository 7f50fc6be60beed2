//! One-shot translation and speech synthesis over HTTP

use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::live::{Content, GenerationConfig};
use crate::session::Voice;
use crate::{Error, Result};

/// Remote text and speech generation used by the one-shot path
#[async_trait]
pub trait TranslationService: Send + Sync {
    /// Short textual translation of `text`
    async fn translate(&self, text: &str) -> Result<String>;

    /// Full spoken rendition of `text`; returns base64 PCM16 at the output rate
    async fn synthesize(&self, text: &str, voice: Voice, system_prompt: &str) -> Result<String>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<&'a GenerationConfig>,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Content,
}

/// `generateContent` client for the speech service's REST API
pub struct GenerateClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    text_model: String,
    speech_model: String,
    instruction: String,
}

impl GenerateClient {
    /// Create a client
    ///
    /// # Errors
    ///
    /// Returns error if the API key is missing
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        text_model: impl Into<String>,
        speech_model: impl Into<String>,
        instruction: impl Into<String>,
    ) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.is_empty() {
            return Err(Error::Config("API key required for translation".to_string()));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            text_model: text_model.into(),
            speech_model: speech_model.into(),
            instruction: instruction.into(),
        })
    }

    async fn generate(&self, model: &str, request: &GenerateRequest<'_>) -> Result<Content> {
        let url = format!("{}/models/{}:generateContent", self.base_url, model);

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(request)
            .send()
            .await
            .map_err(|e| Error::Translation(format!("{model} request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Translation(format!("{model} error {status}: {body}")));
        }

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| Error::Translation(format!("{model} returned malformed body: {e}")))?;

        parsed
            .candidates
            .into_iter()
            .next()
            .map(|c| c.content)
            .ok_or_else(|| Error::Translation(format!("{model} returned no candidates")))
    }
}

/// Join the audio of every inline part into one base64 payload
///
/// # Errors
///
/// Returns `Error::Translation` if there is no audio or a part is not base64
pub fn merge_audio_parts(content: &Content) -> Result<String> {
    let engine = base64::engine::general_purpose::STANDARD;
    let mut pcm = Vec::new();
    let mut parts = 0;

    for payload in content.audio_payloads() {
        let bytes = engine
            .decode(payload.trim())
            .map_err(|e| Error::Translation(format!("synthesized audio is not base64: {e}")))?;
        pcm.extend_from_slice(&bytes);
        parts += 1;
    }

    if parts == 0 {
        return Err(Error::Translation("synthesis returned no audio".to_string()));
    }

    Ok(engine.encode(pcm))
}

#[async_trait]
impl TranslationService for GenerateClient {
    async fn translate(&self, text: &str) -> Result<String> {
        let prompt = format!("{}\n\n{}", self.instruction, text);
        let request = GenerateRequest {
            contents: vec![Content {
                role: Some("user".to_string()),
                ..Content::from_text(prompt)
            }],
            system_instruction: None,
            generation_config: None,
        };

        let content = self.generate(&self.text_model, &request).await?;
        let translated = content.joined_text().trim().to_string();
        if translated.is_empty() {
            return Err(Error::Translation("translation came back empty".to_string()));
        }

        debug!(chars = translated.len(), "translation received");
        Ok(translated)
    }

    async fn synthesize(&self, text: &str, voice: Voice, system_prompt: &str) -> Result<String> {
        let generation_config = GenerationConfig::audio(voice.as_str());
        let request = GenerateRequest {
            contents: vec![Content {
                role: Some("user".to_string()),
                ..Content::from_text(text)
            }],
            system_instruction: (!system_prompt.is_empty())
                .then(|| Content::from_text(system_prompt)),
            generation_config: Some(&generation_config),
        };

        let content = self.generate(&self.speech_model, &request).await?;
        let audio = merge_audio_parts(&content)?;

        debug!(bytes = audio.len(), "synthesis received");
        Ok(audio)
    }
}
