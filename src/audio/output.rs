//! Speaker output with sample-accurate start times
//!
//! The output device clock is the number of frames rendered since the stream
//! opened. Scheduled buffers wait in a [`RenderQueue`] until the clock reaches
//! their start frame; silence is rendered while nothing is due.

use std::collections::VecDeque;
use std::fmt;
use std::sync::mpsc as std_mpsc;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, SampleRate, StreamConfig};
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use super::backend::OUTPUT_SAMPLE_RATE;
use super::playback::PlaybackBuffer;
use crate::{Error, Result};

/// Samples retained for spectrum analysis (matches the analyzer FFT size)
pub const TAP_CAPACITY: usize = 2048;

/// Invoked once, from the audio thread, when a buffer's last sample renders
pub type CompletionCallback = Box<dyn FnOnce(u64) + Send + 'static>;

/// A decoded buffer with its place on the output timeline
pub struct ScheduledBuffer {
    /// Scheduler-assigned id, never reused
    pub id: u64,
    /// Start time in seconds on the output clock
    pub start: f64,
    /// Decoded samples, shared with the scheduler
    pub buffer: Arc<PlaybackBuffer>,
    /// Fired once the last sample has rendered
    pub on_complete: Option<CompletionCallback>,
}

impl ScheduledBuffer {
    /// End time in seconds on the output clock
    pub fn end(&self) -> f64 {
        self.start + self.buffer.duration
    }
}

impl fmt::Debug for ScheduledBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScheduledBuffer")
            .field("id", &self.id)
            .field("start", &self.start)
            .field("duration", &self.buffer.duration)
            .field("has_callback", &self.on_complete.is_some())
            .finish()
    }
}

/// Destination for scheduled playback
pub trait AudioOutput: Send + Sync {
    /// Current position of the output clock in seconds
    fn current_time(&self) -> f64;

    /// Queue a buffer to begin at `buffer.start`
    fn enqueue(&self, buffer: ScheduledBuffer) -> Result<()>;

    /// Drop every queued buffer without firing callbacks
    fn clear(&self);

    /// Most recent rendered samples, oldest first, zero-padded to `len`
    fn analysis_window(&self, len: usize) -> Vec<f32>;

    /// Rate of the output clock
    fn sample_rate(&self) -> u32;
}

struct QueuedBuffer {
    id: u64,
    start_frame: u64,
    buffer: Arc<PlaybackBuffer>,
    position: usize,
    on_complete: Option<CompletionCallback>,
}

/// Frame-clocked render queue shared with the device callback
pub struct RenderQueue {
    sample_rate: u32,
    clock_frames: u64,
    queue: VecDeque<QueuedBuffer>,
    tap: VecDeque<f32>,
}

impl RenderQueue {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate: sample_rate.max(1),
            clock_frames: 0,
            queue: VecDeque::new(),
            tap: VecDeque::with_capacity(TAP_CAPACITY),
        }
    }

    /// Output clock in seconds
    pub fn current_time(&self) -> f64 {
        self.clock_frames as f64 / f64::from(self.sample_rate)
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn seconds_to_frames(&self, seconds: f64) -> u64 {
        (seconds.max(0.0) * f64::from(self.sample_rate)).round() as u64
    }

    /// Insert keeping start order; the scheduler already hands them over in order
    pub fn push(&mut self, scheduled: ScheduledBuffer) {
        let start_frame = self.seconds_to_frames(scheduled.start);
        let entry = QueuedBuffer {
            id: scheduled.id,
            start_frame,
            buffer: scheduled.buffer,
            position: 0,
            on_complete: scheduled.on_complete,
        };

        let index = self
            .queue
            .iter()
            .position(|q| q.start_frame > start_frame)
            .unwrap_or(self.queue.len());
        self.queue.insert(index, entry);
    }

    pub fn clear(&mut self) {
        self.queue.clear();
    }

    /// Buffers waiting or playing
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Render mono frames into `out`, duplicated across `channels`
    ///
    /// Returns the completion callbacks of buffers that finished, so the
    /// caller can run them after releasing its lock.
    pub fn render(&mut self, out: &mut [f32], channels: usize) -> Vec<(u64, Option<CompletionCallback>)> {
        let channels = channels.max(1);
        let mut finished = Vec::new();

        for frame in out.chunks_mut(channels) {
            let mut sample = 0.0;

            if let Some(front) = self.queue.front_mut() {
                if self.clock_frames >= front.start_frame {
                    sample = front.buffer.samples.get(front.position).copied().unwrap_or(0.0);
                    front.position += 1;
                }
            }

            let clock = self.clock_frames;
            if self.queue.front().is_some_and(|front| {
                clock >= front.start_frame && front.position >= front.buffer.samples.len()
            }) {
                if let Some(done) = self.queue.pop_front() {
                    finished.push((done.id, done.on_complete));
                }
            }

            for out_sample in frame.iter_mut() {
                *out_sample = sample;
            }

            if self.tap.len() == TAP_CAPACITY {
                self.tap.pop_front();
            }
            self.tap.push_back(sample);
            self.clock_frames += 1;
        }

        finished
    }

    /// Tap contents, oldest first, left-padded with zeros to `len`
    pub fn analysis_window(&self, len: usize) -> Vec<f32> {
        let available = self.tap.len().min(len);
        let mut window = vec![0.0; len - available];
        window.extend(self.tap.iter().skip(self.tap.len() - available));
        window
    }
}

/// Run completion callbacks collected by [`RenderQueue::render`]
pub fn fire_completions(finished: Vec<(u64, Option<CompletionCallback>)>) {
    for (id, callback) in finished {
        if let Some(callback) = callback {
            callback(id);
        }
    }
}

struct OutputWorker {
    stop_tx: std_mpsc::Sender<()>,
    thread: JoinHandle<()>,
}

/// Plays scheduled buffers on the default output device
pub struct CpalOutput {
    queue: Arc<Mutex<RenderQueue>>,
    worker: Mutex<Option<OutputWorker>>,
}

fn select_output_config(device: &cpal::Device) -> Result<StreamConfig> {
    let mut candidates: Vec<_> = device
        .supported_output_configs()
        .map_err(|e| Error::DeviceUnavailable(e.to_string()))?
        .filter(|c| c.sample_format() == SampleFormat::F32)
        .collect();

    // Prefer mono, then stereo
    candidates.sort_by_key(cpal::SupportedStreamConfigRange::channels);

    let exact = candidates.iter().find(|c| {
        c.min_sample_rate() <= SampleRate(OUTPUT_SAMPLE_RATE)
            && c.max_sample_rate() >= SampleRate(OUTPUT_SAMPLE_RATE)
    });

    if let Some(range) = exact {
        return Ok(range.clone().with_sample_rate(SampleRate(OUTPUT_SAMPLE_RATE)).config());
    }

    candidates
        .into_iter()
        .next()
        .map(|c| {
            let rate = 48_000.clamp(c.min_sample_rate().0, c.max_sample_rate().0);
            c.with_sample_rate(SampleRate(rate)).config()
        })
        .ok_or_else(|| Error::DeviceUnavailable("no suitable output config found".to_string()))
}

/// Renders the queue at its own rate and interpolates onto the device rate
///
/// The queue clock keeps counting output-rate frames, so scheduling stays in
/// output-rate seconds whatever the device runs at.
pub struct RateAdapter {
    step: f64,
    position: f64,
    current: f32,
    next: f32,
    source: Vec<f32>,
}

impl RateAdapter {
    pub fn new(source_rate: u32, device_rate: u32) -> Self {
        Self {
            step: f64::from(source_rate) / f64::from(device_rate.max(1)),
            position: 1.0,
            current: 0.0,
            next: 0.0,
            source: Vec::new(),
        }
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn render(
        &mut self,
        queue: &mut RenderQueue,
        out: &mut [f32],
        channels: usize,
    ) -> Vec<(u64, Option<CompletionCallback>)> {
        let channels = channels.max(1);
        let frames = out.len() / channels;
        if frames == 0 {
            return Vec::new();
        }

        let pulls = (self.position + (frames - 1) as f64 * self.step).floor() as usize;
        self.source.clear();
        self.source.resize(pulls, 0.0);
        let finished = queue.render(&mut self.source, 1);

        let mut source = self.source.iter().copied();
        for frame in out.chunks_mut(channels) {
            while self.position >= 1.0 {
                self.current = self.next;
                self.next = source.next().unwrap_or(self.next);
                self.position -= 1.0;
            }
            let sample = self.current + (self.next - self.current) * self.position as f32;
            frame.fill(sample);
            self.position += self.step;
        }

        finished
    }
}

fn open_output_stream(queue: Arc<Mutex<RenderQueue>>) -> Result<cpal::Stream> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| Error::DeviceUnavailable("no output device available".to_string()))?;

    let config = select_output_config(&device)?;
    let channels = usize::from(config.channels);
    let device_rate = config.sample_rate.0;
    let mut adapter = (device_rate != OUTPUT_SAMPLE_RATE)
        .then(|| RateAdapter::new(OUTPUT_SAMPLE_RATE, device_rate));

    debug!(
        device = device.name().unwrap_or_default(),
        device_rate,
        sample_rate = OUTPUT_SAMPLE_RATE,
        channels = config.channels,
        "audio output initialized"
    );

    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                let finished = match queue.lock() {
                    Ok(mut q) => match adapter.as_mut() {
                        Some(adapter) => adapter.render(&mut q, data, channels),
                        None => q.render(data, channels),
                    },
                    Err(_) => {
                        data.fill(0.0);
                        return;
                    }
                };
                fire_completions(finished);
            },
            |err| {
                error!(error = %err, "audio output error");
            },
            None,
        )
        .map_err(|e| Error::DeviceUnavailable(e.to_string()))?;

    stream
        .play()
        .map_err(|e| Error::DeviceUnavailable(e.to_string()))?;

    Ok(stream)
}

impl CpalOutput {
    /// Open the default output device at the fixed output rate
    ///
    /// # Errors
    ///
    /// Returns `Error::DeviceUnavailable` if no usable device exists
    pub async fn open() -> Result<Self> {
        let queue = Arc::new(Mutex::new(RenderQueue::new(OUTPUT_SAMPLE_RATE)));
        let (ready_tx, ready_rx) = oneshot::channel::<Result<()>>();
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();

        let stream_queue = Arc::clone(&queue);
        let thread = std::thread::Builder::new()
            .name("audio-output".to_string())
            .spawn(move || match open_output_stream(stream_queue) {
                Ok(stream) => {
                    let _ = ready_tx.send(Ok(()));
                    let _ = stop_rx.recv();
                    drop(stream);
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                }
            })?;

        match ready_rx.await {
            Ok(Ok(())) => {
                info!("Audio output opened ({}Hz)", OUTPUT_SAMPLE_RATE);
                Ok(Self {
                    queue,
                    worker: Mutex::new(Some(OutputWorker { stop_tx, thread })),
                })
            }
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => {
                let _ = thread.join();
                Err(Error::DeviceUnavailable(
                    "output thread exited before the device opened".to_string(),
                ))
            }
        }
    }

    fn lock(&self) -> Option<MutexGuard<'_, RenderQueue>> {
        match self.queue.lock() {
            Ok(guard) => Some(guard),
            Err(_) => {
                warn!("Render queue lock poisoned");
                None
            }
        }
    }
}

impl AudioOutput for CpalOutput {
    fn current_time(&self) -> f64 {
        self.lock().map_or(0.0, |q| q.current_time())
    }

    fn enqueue(&self, buffer: ScheduledBuffer) -> Result<()> {
        let mut queue = self
            .lock()
            .ok_or_else(|| Error::DeviceUnavailable("render queue unavailable".to_string()))?;
        queue.push(buffer);
        Ok(())
    }

    fn clear(&self) {
        if let Some(mut queue) = self.lock() {
            queue.clear();
        }
    }

    fn analysis_window(&self, len: usize) -> Vec<f32> {
        self.lock()
            .map(|q| q.analysis_window(len))
            .unwrap_or_else(|| vec![0.0; len])
    }

    fn sample_rate(&self) -> u32 {
        OUTPUT_SAMPLE_RATE
    }
}

impl Drop for CpalOutput {
    fn drop(&mut self) {
        let worker = self.worker.get_mut().ok().and_then(Option::take);
        if let Some(worker) = worker {
            let _ = worker.stop_tx.send(());
            if worker.thread.join().is_err() {
                warn!("Audio output thread panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    fn buffer(samples: Vec<f32>) -> Arc<PlaybackBuffer> {
        Arc::new(PlaybackBuffer::new(samples, 4))
    }

    #[test]
    fn test_silence_until_start_frame() {
        let mut queue = RenderQueue::new(4);
        queue.push(ScheduledBuffer {
            id: 0,
            start: 0.5, // frame 2
            buffer: buffer(vec![0.25, 0.5]),
            on_complete: None,
        });

        let mut out = vec![1.0; 4];
        queue.render(&mut out, 1);

        assert_eq!(out, vec![0.0, 0.0, 0.25, 0.5]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_back_to_back_buffers_render_without_gap() {
        let mut queue = RenderQueue::new(4);
        queue.push(ScheduledBuffer {
            id: 0,
            start: 0.0,
            buffer: buffer(vec![0.1, 0.2]),
            on_complete: None,
        });
        queue.push(ScheduledBuffer {
            id: 1,
            start: 0.5,
            buffer: buffer(vec![0.3, 0.4]),
            on_complete: None,
        });

        let mut out = vec![0.0; 4];
        let finished = queue.render(&mut out, 1);

        assert_eq!(out, vec![0.1, 0.2, 0.3, 0.4]);
        let ids: Vec<u64> = finished.iter().map(|(id, _)| *id).collect();
        assert_eq!(ids, vec![0, 1]);
    }

    #[test]
    fn test_completion_fires_once_after_last_sample() {
        let fired = Arc::new(AtomicU64::new(u64::MAX));
        let flag = Arc::clone(&fired);

        let mut queue = RenderQueue::new(4);
        queue.push(ScheduledBuffer {
            id: 7,
            start: 0.0,
            buffer: buffer(vec![0.1, 0.2, 0.3]),
            on_complete: Some(Box::new(move |id| flag.store(id, Ordering::SeqCst))),
        });

        let mut out = vec![0.0; 2];
        fire_completions(queue.render(&mut out, 1));
        assert_eq!(fired.load(Ordering::SeqCst), u64::MAX);

        fire_completions(queue.render(&mut out, 1));
        assert_eq!(fired.load(Ordering::SeqCst), 7);
    }

    #[test]
    fn test_stereo_duplicates_mono_sample() {
        let mut queue = RenderQueue::new(4);
        queue.push(ScheduledBuffer {
            id: 0,
            start: 0.0,
            buffer: buffer(vec![0.5]),
            on_complete: None,
        });

        let mut out = vec![0.0; 2];
        queue.render(&mut out, 2);
        assert_eq!(out, vec![0.5, 0.5]);
    }

    #[test]
    fn test_tap_keeps_latest_samples() {
        let mut queue = RenderQueue::new(4);
        queue.push(ScheduledBuffer {
            id: 0,
            start: 0.0,
            buffer: buffer(vec![0.1, 0.2, 0.3]),
            on_complete: None,
        });

        let mut out = vec![0.0; 3];
        queue.render(&mut out, 1);

        assert_eq!(queue.analysis_window(2), vec![0.2, 0.3]);
        assert_eq!(queue.analysis_window(5), vec![0.0, 0.0, 0.1, 0.2, 0.3]);
    }

    #[test]
    fn test_clock_advances_with_rendered_frames() {
        let mut queue = RenderQueue::new(4);
        let mut out = vec![0.0; 6];
        queue.render(&mut out, 2);
        assert!((queue.current_time() - 0.75).abs() < f64::EPSILON);
    }

    #[test]
    fn test_rate_adapter_interpolates_onto_device_rate() {
        let mut queue = RenderQueue::new(4);
        queue.push(ScheduledBuffer {
            id: 3,
            start: 0.0,
            buffer: buffer(vec![0.4, 0.8]),
            on_complete: None,
        });

        let mut adapter = RateAdapter::new(4, 8);
        let mut out = vec![0.0; 4];
        let finished = adapter.render(&mut queue, &mut out, 1);

        let expected = [0.0, 0.2, 0.4, 0.6];
        for (got, want) in out.iter().zip(expected) {
            assert!((got - want).abs() < 1e-6, "{out:?}");
        }
        assert_eq!(finished.len(), 1);
        assert!((queue.current_time() - 0.5).abs() < f64::EPSILON);
    }
}
