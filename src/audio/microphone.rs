// Microphone capture through cpal
//
// The cpal stream lives on a dedicated thread for its whole lifetime; the
// input callback cuts the device stream into fixed windows and publishes
// them on a bounded broadcast channel without ever blocking.

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, SampleRate, StreamConfig};
use std::sync::mpsc as std_mpsc;
use std::thread::JoinHandle;
use tokio::sync::{broadcast, oneshot};
use tracing::{debug, error, info, warn};

use super::backend::{AudioFrame, CaptureConfig, MicrophoneSource};
use crate::{Error, Result};

/// Linear-interpolation rate converter for devices that cannot run at the
/// capture rate
#[derive(Debug)]
struct Resampler {
    /// Input samples consumed per output sample
    step: f64,
    /// Position of the next output between `previous` (0) and the next input (1)
    position: f64,
    previous: f32,
}

impl Resampler {
    fn new(from_rate: u32, to_rate: u32) -> Self {
        Self {
            step: f64::from(from_rate) / f64::from(to_rate.max(1)),
            position: 1.0,
            previous: 0.0,
        }
    }

    #[allow(clippy::cast_possible_truncation)]
    fn push(&mut self, sample: f32, out: &mut impl FnMut(f32)) {
        while self.position <= 1.0 {
            let t = self.position as f32;
            out(self.previous + (sample - self.previous) * t);
            self.position += self.step;
        }
        self.position -= 1.0;
        self.previous = sample;
    }
}

/// Cuts an interleaved device stream into mono windows of fixed size
#[derive(Debug)]
pub struct WindowAccumulator {
    window: usize,
    channels: usize,
    sample_rate: u32,
    resampler: Option<Resampler>,
    pending: Vec<f32>,
    emitted_samples: u64,
}

impl WindowAccumulator {
    pub fn new(window: usize, channels: u16, sample_rate: u32) -> Self {
        Self {
            window: window.max(1),
            channels: usize::from(channels.max(1)),
            sample_rate,
            resampler: None,
            pending: Vec::with_capacity(window),
            emitted_samples: 0,
        }
    }

    /// Convert from `device_rate` to the window rate on the way in
    pub fn with_device_rate(mut self, device_rate: u32) -> Self {
        self.resampler =
            (device_rate != self.sample_rate).then(|| Resampler::new(device_rate, self.sample_rate));
        self
    }

    /// Feed interleaved device samples, returning every completed window
    pub fn push_interleaved(&mut self, data: &[f32]) -> Vec<AudioFrame> {
        let mut frames = Vec::new();
        let window = self.window;
        let sample_rate = self.sample_rate;
        let pending = &mut self.pending;
        let emitted_samples = &mut self.emitted_samples;

        let mut emit = |sample: f32| {
            pending.push(sample);
            if pending.len() == window {
                let samples = std::mem::replace(pending, Vec::with_capacity(window));
                let timestamp_ms = *emitted_samples * 1000 / u64::from(sample_rate.max(1));
                *emitted_samples += samples.len() as u64;
                frames.push(AudioFrame {
                    samples,
                    sample_rate,
                    timestamp_ms,
                });
            }
        };

        for chunk in data.chunks_exact(self.channels) {
            // Average channels down to mono
            let mono = chunk.iter().sum::<f32>() / self.channels as f32;
            match self.resampler.as_mut() {
                Some(resampler) => resampler.push(mono, &mut emit),
                None => emit(mono),
            }
        }

        frames
    }

    /// Samples waiting for the window to fill
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

struct CaptureWorker {
    stop_tx: std_mpsc::Sender<()>,
    thread: JoinHandle<()>,
}

/// Captures the default input device
pub struct CpalMicrophone {
    worker: Option<CaptureWorker>,
}

impl CpalMicrophone {
    pub fn new() -> Self {
        Self { worker: None }
    }
}

impl Default for CpalMicrophone {
    fn default() -> Self {
        Self::new()
    }
}

/// Pick a float input config, fewest channels first
///
/// Prefers a config that runs at exactly `sample_rate`; otherwise takes the
/// rate closest to 48 kHz and leaves conversion to the accumulator.
fn select_input_config(device: &cpal::Device, sample_rate: u32) -> Result<StreamConfig> {
    let mut candidates: Vec<_> = device
        .supported_input_configs()
        .map_err(|e| Error::DeviceUnavailable(e.to_string()))?
        .filter(|c| c.sample_format() == SampleFormat::F32)
        .collect();

    candidates.sort_by_key(cpal::SupportedStreamConfigRange::channels);

    let exact = candidates.iter().find(|c| {
        c.min_sample_rate() <= SampleRate(sample_rate) && c.max_sample_rate() >= SampleRate(sample_rate)
    });

    if let Some(range) = exact {
        return Ok(range.clone().with_sample_rate(SampleRate(sample_rate)).config());
    }

    candidates
        .into_iter()
        .next()
        .map(|c| {
            let rate = 48_000.clamp(c.min_sample_rate().0, c.max_sample_rate().0);
            c.with_sample_rate(SampleRate(rate)).config()
        })
        .ok_or_else(|| Error::DeviceUnavailable("no float input config available".to_string()))
}

fn open_input_stream(
    config: &CaptureConfig,
    frames_tx: broadcast::Sender<AudioFrame>,
) -> Result<cpal::Stream> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| Error::DeviceUnavailable("no input device available".to_string()))?;

    let stream_config = select_input_config(&device, config.target_sample_rate)?;

    debug!(
        device = device.name().unwrap_or_default(),
        device_rate = stream_config.sample_rate.0,
        sample_rate = config.target_sample_rate,
        channels = stream_config.channels,
        "microphone config selected"
    );

    let mut accumulator =
        WindowAccumulator::new(config.window, stream_config.channels, config.target_sample_rate)
            .with_device_rate(stream_config.sample_rate.0);

    let stream = device
        .build_input_stream(
            &stream_config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                for frame in accumulator.push_interleaved(data) {
                    // No receivers just means nobody is listening yet
                    let _ = frames_tx.send(frame);
                }
            },
            |err| {
                error!(error = %err, "microphone stream error");
            },
            None,
        )
        .map_err(|e| Error::DeviceUnavailable(e.to_string()))?;

    stream
        .play()
        .map_err(|e| Error::DeviceUnavailable(e.to_string()))?;

    Ok(stream)
}

#[async_trait]
impl MicrophoneSource for CpalMicrophone {
    async fn start(&mut self, config: CaptureConfig) -> Result<broadcast::Receiver<AudioFrame>> {
        if self.worker.is_some() {
            warn!("Microphone already capturing, restarting");
            self.stop().await?;
        }

        info!(
            "Starting microphone capture ({}Hz, {} sample windows)",
            config.target_sample_rate, config.window
        );

        let (frames_tx, frames_rx) = broadcast::channel(config.queue_capacity.max(1));
        let (ready_tx, ready_rx) = oneshot::channel::<Result<()>>();
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();

        let thread = std::thread::Builder::new()
            .name("mic-capture".to_string())
            .spawn(move || match open_input_stream(&config, frames_tx) {
                Ok(stream) => {
                    let _ = ready_tx.send(Ok(()));
                    // Hold the stream until stop is requested or the owner goes away
                    let _ = stop_rx.recv();
                    drop(stream);
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                }
            })?;

        match ready_rx.await {
            Ok(Ok(())) => {
                self.worker = Some(CaptureWorker { stop_tx, thread });
                info!("Microphone capture started");
                Ok(frames_rx)
            }
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => {
                let _ = thread.join();
                Err(Error::DeviceUnavailable(
                    "capture thread exited before the device opened".to_string(),
                ))
            }
        }
    }

    async fn stop(&mut self) -> Result<()> {
        let Some(worker) = self.worker.take() else {
            return Ok(());
        };

        info!("Stopping microphone capture");

        let _ = worker.stop_tx.send(());
        tokio::task::spawn_blocking(move || worker.thread.join())
            .await
            .map_err(|e| Error::DeviceUnavailable(format!("capture thread join failed: {e}")))?
            .map_err(|_| Error::DeviceUnavailable("capture thread panicked".to_string()))?;

        info!("Microphone capture stopped");
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.worker.is_some()
    }

    fn name(&self) -> &str {
        "cpal microphone"
    }
}
