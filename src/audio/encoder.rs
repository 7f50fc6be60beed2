//! PCM16 packing and text encoding of capture windows

use base64::Engine;

use super::backend::AudioFrame;

/// A capture window ready for the wire
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedChunk {
    /// MIME-style descriptor naming encoding and rate
    pub mime_type: String,
    /// Base64 of the little-endian PCM16 bytes
    pub data: String,
    /// Samples carried by this chunk
    pub sample_count: usize,
    /// Position of this chunk within the capture stream
    pub sequence: u64,
}

/// MIME descriptor for raw PCM16 at `sample_rate`
pub fn pcm_mime_type(sample_rate: u32) -> String {
    format!("audio/pcm;rate={sample_rate}")
}

/// Convert one normalized sample to signed 16-bit PCM
///
/// Positive values scale by 32767 and negative values by 32768 so both ends
/// of the range are reachable.
#[allow(clippy::cast_possible_truncation)]
pub fn sample_to_pcm16(sample: f32) -> i16 {
    let s = if sample.is_nan() { 0.0 } else { sample.clamp(-1.0, 1.0) };
    let scaled = if s < 0.0 { s * 32768.0 } else { s * 32767.0 };
    scaled.round() as i16
}

/// Pack normalized samples as little-endian PCM16 bytes
pub fn encode_pcm16(samples: &[f32]) -> Vec<u8> {
    samples
        .iter()
        .flat_map(|&s| sample_to_pcm16(s).to_le_bytes())
        .collect()
}

/// Turns capture windows into wire chunks
#[derive(Debug)]
pub struct CaptureEncoder {
    mime_type: String,
    sequence: u64,
}

impl CaptureEncoder {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            mime_type: pcm_mime_type(sample_rate),
            sequence: 0,
        }
    }

    /// Encode one frame
    pub fn encode(&mut self, frame: &AudioFrame) -> EncodedChunk {
        let pcm_bytes = encode_pcm16(&frame.samples);
        let chunk = EncodedChunk {
            mime_type: self.mime_type.clone(),
            data: base64::engine::general_purpose::STANDARD.encode(pcm_bytes),
            sample_count: frame.samples.len(),
            sequence: self.sequence,
        };
        self.sequence += 1;
        chunk
    }

    /// Number of chunks produced so far
    pub fn chunks_encoded(&self) -> u64 {
        self.sequence
    }
}
