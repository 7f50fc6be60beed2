//! Decoding and gapless scheduling of inbound speech

use std::collections::BTreeSet;
use std::sync::Arc;

use base64::Engine;
use tracing::debug;

use super::output::{AudioOutput, CompletionCallback, ScheduledBuffer};
use crate::{Error, Result};

/// Decoded mono audio ready to schedule
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackBuffer {
    /// Samples in [-1, 1)
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    /// Length in seconds
    pub duration: f64,
}

impl PlaybackBuffer {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        let duration = if sample_rate == 0 {
            0.0
        } else {
            samples.len() as f64 / f64::from(sample_rate)
        };
        Self {
            samples,
            sample_rate,
            duration,
        }
    }
}

/// Interpret little-endian PCM16 bytes as normalized samples
///
/// # Errors
///
/// Returns `Error::Decode` if the byte count is odd
pub fn decode_pcm16(bytes: &[u8]) -> Result<Vec<f32>> {
    if bytes.len() % 2 != 0 {
        return Err(Error::Decode(format!(
            "PCM16 payload has odd length: {} bytes",
            bytes.len()
        )));
    }

    Ok(bytes
        .chunks_exact(2)
        .map(|chunk| f32::from(i16::from_le_bytes([chunk[0], chunk[1]])) / 32768.0)
        .collect())
}

/// Decode a base64 PCM16 payload into a buffer at `sample_rate`
///
/// # Errors
///
/// Returns `Error::Decode` for invalid base64, odd byte counts, or an empty payload
pub fn decode_payload(payload: &str, sample_rate: u32) -> Result<PlaybackBuffer> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(payload.trim())
        .map_err(|e| Error::Decode(format!("invalid base64 audio: {e}")))?;

    if bytes.is_empty() {
        return Err(Error::Decode("empty audio payload".to_string()));
    }

    Ok(PlaybackBuffer::new(decode_pcm16(&bytes)?, sample_rate))
}

/// Where a buffer landed on the output timeline
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledInterval {
    pub id: u64,
    pub start: f64,
    pub end: f64,
}

/// Orders decoded buffers back to back on the output clock
///
/// Every buffer starts at `max(next_start_time, now)` and pushes the cursor to
/// its end, so bursts queue up behind each other and late arrivals start
/// immediately. Total queued time is not capped.
pub struct PlaybackScheduler {
    output: Arc<dyn AudioOutput>,
    next_start_time: f64,
    next_id: u64,
    in_flight: BTreeSet<u64>,
    scheduled_total: u64,
}

impl PlaybackScheduler {
    pub fn new(output: Arc<dyn AudioOutput>) -> Self {
        Self {
            output,
            next_start_time: 0.0,
            next_id: 0,
            in_flight: BTreeSet::new(),
            scheduled_total: 0,
        }
    }

    /// Decode a payload at the output device rate
    pub fn decode(&self, payload: &str) -> Result<PlaybackBuffer> {
        decode_payload(payload, self.output.sample_rate())
    }

    /// Place `buffer` after everything already queued
    pub fn schedule(
        &mut self,
        buffer: PlaybackBuffer,
        on_complete: Option<CompletionCallback>,
    ) -> Result<ScheduledInterval> {
        let now = self.output.current_time();
        let start = self.next_start_time.max(now);
        let id = self.next_id;
        let duration = buffer.duration;

        self.output.enqueue(ScheduledBuffer {
            id,
            start,
            buffer: Arc::new(buffer),
            on_complete,
        })?;

        self.next_id += 1;
        self.next_start_time = start + duration;
        self.in_flight.insert(id);
        self.scheduled_total += 1;

        debug!(
            id,
            start,
            duration,
            queued = self.in_flight.len(),
            "buffer scheduled"
        );

        Ok(ScheduledInterval {
            id,
            start,
            end: self.next_start_time,
        })
    }

    /// Record that buffer `id` finished rendering
    ///
    /// Returns false for ids this scheduler no longer tracks, e.g. after a reset.
    pub fn complete(&mut self, id: u64) -> bool {
        self.in_flight.remove(&id)
    }

    /// Buffers scheduled but not yet finished
    pub fn pending(&self) -> usize {
        self.in_flight.len()
    }

    pub fn next_start_time(&self) -> f64 {
        self.next_start_time
    }

    /// Total buffers scheduled over the scheduler's lifetime
    pub fn scheduled_total(&self) -> u64 {
        self.scheduled_total
    }

    /// Seconds of audio queued ahead of the output clock
    pub fn queued_latency(&self) -> f64 {
        (self.next_start_time - self.output.current_time()).max(0.0)
    }

    /// Drop queued audio and rewind the cursor to zero
    pub fn reset(&mut self) {
        self.output.clear();
        self.in_flight.clear();
        self.next_start_time = 0.0;
        debug!("playback scheduler reset");
    }

    /// The output this scheduler feeds, for tapping
    pub fn output(&self) -> Arc<dyn AudioOutput> {
        Arc::clone(&self.output)
    }
}
