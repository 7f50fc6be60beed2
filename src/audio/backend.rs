use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::Result;

/// Microphone capture rate sent to the speech service (Hz)
pub const CAPTURE_SAMPLE_RATE: u32 = 16_000;

/// Rate of synthesized audio received from the speech service (Hz)
pub const OUTPUT_SAMPLE_RATE: u32 = 24_000;

/// Samples per capture window
pub const CAPTURE_WINDOW: usize = 4096;

/// Default number of windows held between capture and transport
pub const DEFAULT_CAPTURE_QUEUE: usize = 32;

/// One capture window of mono audio
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// Normalized samples in [-1, 1]
    pub samples: Vec<f32>,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Timestamp in milliseconds since capture started
    pub timestamp_ms: u64,
}

impl AudioFrame {
    /// Duration of the frame in seconds
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / f64::from(self.sample_rate)
    }
}

/// Configuration for microphone capture
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Rate the frames are delivered at
    pub target_sample_rate: u32,
    /// Samples per emitted frame
    pub window: usize,
    /// Frames retained for a slow consumer before the oldest are dropped
    pub queue_capacity: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            target_sample_rate: CAPTURE_SAMPLE_RATE,
            window: CAPTURE_WINDOW,
            queue_capacity: DEFAULT_CAPTURE_QUEUE,
        }
    }
}

/// Microphone capture source
///
/// Frames are published on a bounded broadcast channel: a consumer that
/// falls behind loses the oldest frames and observes `RecvError::Lagged`.
#[async_trait]
pub trait MicrophoneSource: Send + Sync {
    /// Acquire the device and start delivering frames
    ///
    /// Fails with `Error::DeviceUnavailable` when no input device exists or
    /// access is denied.
    async fn start(&mut self, config: CaptureConfig) -> Result<broadcast::Receiver<AudioFrame>>;

    /// Release the device; a no-op when not capturing
    async fn stop(&mut self) -> Result<()>;

    /// Check if the source is currently capturing
    fn is_capturing(&self) -> bool;

    /// Source name for logging
    fn name(&self) -> &str;
}
