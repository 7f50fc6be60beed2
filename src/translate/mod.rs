//! One-shot text path: translate and synthesize the same input concurrently

mod client;

pub use client::{merge_audio_parts, GenerateClient, TranslationService};

use tracing::{info, warn};

use crate::session::Voice;
use crate::{Error, Result};

/// Result of a joint request where both halves succeeded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranslationOutcome {
    pub translated_text: String,
    /// Base64 PCM16 at the output rate
    pub audio_payload: String,
}

fn as_translation_error(stage: &str, err: Error) -> String {
    match err {
        Error::Translation(msg) => format!("{stage}: {msg}"),
        other => format!("{stage}: {other}"),
    }
}

/// Issue both requests at once and wait for both
///
/// # Errors
///
/// Returns `Error::Translation` if either request fails; the caller must not
/// persist anything in that case.
pub async fn translate_and_synthesize(
    service: &dyn TranslationService,
    text: &str,
    voice: Voice,
    system_prompt: &str,
) -> Result<TranslationOutcome> {
    info!("Translating {} chars with voice {}", text.len(), voice.as_str());

    let (translated, audio) = tokio::join!(
        service.translate(text),
        service.synthesize(text, voice, system_prompt)
    );

    match (translated, audio) {
        (Ok(translated_text), Ok(audio_payload)) => Ok(TranslationOutcome {
            translated_text,
            audio_payload,
        }),
        (Err(e), Ok(_)) => {
            warn!("Translation request failed: {}", e);
            Err(Error::Translation(as_translation_error("translation", e)))
        }
        (Ok(_), Err(e)) => {
            warn!("Synthesis request failed: {}", e);
            Err(Error::Translation(as_translation_error("synthesis", e)))
        }
        (Err(t), Err(a)) => {
            warn!("Both text-path requests failed: {} / {}", t, a);
            Err(Error::Translation(format!(
                "{}; {}",
                as_translation_error("translation", t),
                as_translation_error("synthesis", a)
            )))
        }
    }
}
