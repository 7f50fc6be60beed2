use anyhow::{Context, Result};
use base64::Engine;
use hound::WavWriter;
use std::path::Path;
use tracing::info;

use super::backend::OUTPUT_SAMPLE_RATE;

/// Write a base64 PCM16 payload (24kHz mono) to a WAV file
///
/// Returns the number of samples written.
pub fn export_pcm16_payload(payload: &str, path: impl AsRef<Path>) -> Result<usize> {
    let path = path.as_ref();
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(payload.trim())
        .context("Audio payload is not valid base64")?;

    if bytes.len() % 2 != 0 {
        anyhow::bail!("Audio payload has odd length: {} bytes", bytes.len());
    }

    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: OUTPUT_SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut writer = WavWriter::create(path, spec)
        .with_context(|| format!("Failed to create WAV file: {}", path.display()))?;

    let mut written = 0;
    for chunk in bytes.chunks_exact(2) {
        writer
            .write_sample(i16::from_le_bytes([chunk[0], chunk[1]]))
            .context("Failed to write sample to WAV")?;
        written += 1;
    }

    writer.finalize().context("Failed to finalize WAV file")?;

    info!(
        "Exported {} samples ({:.1}s) to {}",
        written,
        written as f64 / f64::from(OUTPUT_SAMPLE_RATE),
        path.display()
    );

    Ok(written)
}
