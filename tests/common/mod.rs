// Test doubles for the translator's external seams
//
// Every fake records what it was asked to do so tests can assert on the
// resources a session acquired and released.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use base64::Engine;
use tokio::sync::broadcast;

use live_translator::audio::output::fire_completions;
use live_translator::audio::{
    AudioFrame, AudioOutput, CaptureConfig, EncodedChunk, MicrophoneSource, RenderQueue,
    ScheduledBuffer,
};
use live_translator::history::MemoryStore;
use live_translator::live::{
    Blob, Content, InboundEvent, InboundSink, Part, RealtimeConnection, RealtimeTransport,
    ServerContent, ServerMessage, ServiceError,
};
use live_translator::session::{SessionConfig, SessionController, SessionDeps, SessionEvent, Voice};
use live_translator::{Error, Result, TranslationService};
use tokio::sync::mpsc;

pub const OUTPUT_RATE: u32 = 24_000;

// ============================================================================
// Output
// ============================================================================

/// Output whose clock only moves when the test renders frames
pub struct ManualOutput {
    queue: Mutex<RenderQueue>,
    sample_rate: u32,
}

impl ManualOutput {
    pub fn new(sample_rate: u32) -> Arc<Self> {
        Arc::new(Self {
            queue: Mutex::new(RenderQueue::new(sample_rate)),
            sample_rate,
        })
    }

    /// Render `frames` mono frames and run completions outside the lock
    pub fn advance(&self, frames: usize) -> Vec<f32> {
        let mut out = vec![0.0; frames];
        let finished = self.queue.lock().unwrap().render(&mut out, 1);
        fire_completions(finished);
        out
    }

    pub fn advance_secs(&self, secs: f64) -> Vec<f32> {
        self.advance((secs * f64::from(self.sample_rate)).round() as usize)
    }

    pub fn queued(&self) -> usize {
        self.queue.lock().unwrap().len()
    }
}

impl AudioOutput for ManualOutput {
    fn current_time(&self) -> f64 {
        self.queue.lock().unwrap().current_time()
    }

    fn enqueue(&self, buffer: ScheduledBuffer) -> Result<()> {
        self.queue.lock().unwrap().push(buffer);
        Ok(())
    }

    fn clear(&self) {
        self.queue.lock().unwrap().clear();
    }

    fn analysis_window(&self, len: usize) -> Vec<f32> {
        self.queue.lock().unwrap().analysis_window(len)
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

/// Output whose tap always holds the same signal
pub struct FixedOutput {
    pub window: Mutex<Vec<f32>>,
}

impl FixedOutput {
    pub fn new(window: Vec<f32>) -> Arc<Self> {
        Arc::new(Self {
            window: Mutex::new(window),
        })
    }

    pub fn set(&self, window: Vec<f32>) {
        *self.window.lock().unwrap() = window;
    }
}

impl AudioOutput for FixedOutput {
    fn current_time(&self) -> f64 {
        0.0
    }

    fn enqueue(&self, _buffer: ScheduledBuffer) -> Result<()> {
        Ok(())
    }

    fn clear(&self) {}

    fn analysis_window(&self, len: usize) -> Vec<f32> {
        let mut window = self.window.lock().unwrap().clone();
        window.resize(len, 0.0);
        window
    }

    fn sample_rate(&self) -> u32 {
        OUTPUT_RATE
    }
}

/// Full-scale white noise from a fixed-seed LCG
pub fn noise(len: usize) -> Vec<f32> {
    let mut state: u32 = 0x1234_5678;
    (0..len)
        .map(|_| {
            state = state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
            (state >> 8) as f32 / (1u32 << 24) as f32 * 2.0 - 1.0
        })
        .collect()
}

// ============================================================================
// Microphone
// ============================================================================

#[derive(Default)]
pub struct MicrophoneProbe {
    pub starts: AtomicUsize,
    pub stops: AtomicUsize,
    pub capturing: AtomicBool,
    pub sender: Mutex<Option<broadcast::Sender<AudioFrame>>>,
}

impl MicrophoneProbe {
    /// Push one captured window into the running session
    pub fn push(&self, samples: Vec<f32>) -> bool {
        let frame = AudioFrame {
            samples,
            sample_rate: 16_000,
            timestamp_ms: 0,
        };
        self.sender
            .lock()
            .unwrap()
            .as_ref()
            .is_some_and(|tx| tx.send(frame).is_ok())
    }
}

pub struct FakeMicrophone {
    pub probe: Arc<MicrophoneProbe>,
    pub available: bool,
}

impl FakeMicrophone {
    pub fn new(available: bool) -> (Self, Arc<MicrophoneProbe>) {
        let probe = Arc::new(MicrophoneProbe::default());
        (
            Self {
                probe: Arc::clone(&probe),
                available,
            },
            probe,
        )
    }
}

#[async_trait]
impl MicrophoneSource for FakeMicrophone {
    async fn start(&mut self, config: CaptureConfig) -> Result<broadcast::Receiver<AudioFrame>> {
        if !self.available {
            return Err(Error::DeviceUnavailable("permission denied".to_string()));
        }
        let (tx, rx) = broadcast::channel(config.queue_capacity);
        *self.probe.sender.lock().unwrap() = Some(tx);
        self.probe.starts.fetch_add(1, Ordering::SeqCst);
        self.probe.capturing.store(true, Ordering::SeqCst);
        Ok(rx)
    }

    async fn stop(&mut self) -> Result<()> {
        self.probe.sender.lock().unwrap().take();
        self.probe.stops.fetch_add(1, Ordering::SeqCst);
        self.probe.capturing.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.probe.capturing.load(Ordering::SeqCst)
    }

    fn name(&self) -> &str {
        "fake microphone"
    }
}

// ============================================================================
// Transport
// ============================================================================

#[derive(Clone, Copy, PartialEq, Eq)]
pub enum Handshake {
    Accept,
    Reject,
    /// Never completes
    Hang,
}

#[derive(Default)]
pub struct TransportProbe {
    pub connects: AtomicUsize,
    pub closes: AtomicUsize,
    pub sent: Mutex<Vec<EncodedChunk>>,
    pub sink: Mutex<Option<InboundSink>>,
    pub last_config: Mutex<Option<SessionConfig>>,
}

impl TransportProbe {
    /// Deliver an inbound event as the connection's reader would
    pub fn inject(&self, event: InboundEvent) {
        let sink = self.sink.lock().unwrap().clone();
        if let Some(sink) = sink {
            sink(event);
        }
    }

    pub fn inject_message(&self, message: ServerMessage) {
        self.inject(InboundEvent::Message(message));
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

pub struct FakeTransport {
    pub probe: Arc<TransportProbe>,
    pub handshake: Handshake,
}

impl FakeTransport {
    pub fn new(handshake: Handshake) -> (Arc<Self>, Arc<TransportProbe>) {
        let probe = Arc::new(TransportProbe::default());
        (
            Arc::new(Self {
                probe: Arc::clone(&probe),
                handshake,
            }),
            probe,
        )
    }
}

struct FakeConnection {
    probe: Arc<TransportProbe>,
    closed: AtomicBool,
}

#[async_trait]
impl RealtimeConnection for FakeConnection {
    fn send_audio(&self, chunk: EncodedChunk) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::Connection("closed".to_string()));
        }
        self.probe.sent.lock().unwrap().push(chunk);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.probe.closes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

#[async_trait]
impl RealtimeTransport for FakeTransport {
    async fn connect(
        &self,
        config: &SessionConfig,
        inbound: InboundSink,
    ) -> Result<Arc<dyn RealtimeConnection>> {
        self.probe.connects.fetch_add(1, Ordering::SeqCst);
        *self.probe.last_config.lock().unwrap() = Some(config.clone());

        match self.handshake {
            Handshake::Accept => {}
            Handshake::Reject => {
                return Err(Error::Connection("setup rejected: invalid model".to_string()))
            }
            Handshake::Hang => std::future::pending::<()>().await,
        }

        *self.probe.sink.lock().unwrap() = Some(inbound);
        Ok(Arc::new(FakeConnection {
            probe: Arc::clone(&self.probe),
            closed: AtomicBool::new(false),
        }))
    }
}

// ============================================================================
// Translation
// ============================================================================

pub struct FakeTranslator {
    pub translation: std::result::Result<String, String>,
    pub audio: std::result::Result<String, String>,
    pub calls: AtomicUsize,
}

impl FakeTranslator {
    pub fn succeeding(translation: &str, audio_payload: String) -> Arc<Self> {
        Arc::new(Self {
            translation: Ok(translation.to_string()),
            audio: Ok(audio_payload),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn failing_audio(translation: &str) -> Arc<Self> {
        Arc::new(Self {
            translation: Ok(translation.to_string()),
            audio: Err("speech model unavailable".to_string()),
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl TranslationService for FakeTranslator {
    async fn translate(&self, _text: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.translation.clone().map_err(Error::Translation)
    }

    async fn synthesize(&self, _text: &str, _voice: Voice, _system_prompt: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.audio.clone().map_err(Error::Translation)
    }
}

// ============================================================================
// Payloads and messages
// ============================================================================

/// Base64 PCM16 payload of `secs` seconds of a constant sample
pub fn payload_secs(secs: f64, value: i16) -> String {
    let samples = (secs * f64::from(OUTPUT_RATE)).round() as usize;
    let bytes: Vec<u8> = std::iter::repeat(value.to_le_bytes())
        .take(samples)
        .flatten()
        .collect();
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

pub fn audio_message(payloads: &[String], turn_complete: bool) -> ServerMessage {
    let parts = payloads
        .iter()
        .map(|data| Part {
            text: None,
            inline_data: Some(Blob {
                mime_type: "audio/pcm;rate=24000".to_string(),
                data: data.clone(),
            }),
        })
        .collect();

    ServerMessage {
        server_content: Some(ServerContent {
            model_turn: Some(Content { role: None, parts }),
            turn_complete,
        }),
        ..ServerMessage::default()
    }
}

pub fn turn_complete_message() -> ServerMessage {
    ServerMessage {
        server_content: Some(ServerContent {
            model_turn: None,
            turn_complete: true,
        }),
        ..ServerMessage::default()
    }
}

pub fn error_message(message: &str) -> ServerMessage {
    ServerMessage {
        error: Some(ServiceError {
            code: Some(500),
            message: message.to_string(),
            status: Some("INTERNAL".to_string()),
        }),
        ..ServerMessage::default()
    }
}

// ============================================================================
// Harness
// ============================================================================

pub struct Harness {
    pub controller: SessionController,
    pub events: mpsc::UnboundedReceiver<SessionEvent>,
    pub output: Arc<ManualOutput>,
    pub microphone: Arc<MicrophoneProbe>,
    pub transport: Arc<TransportProbe>,
    pub store: Arc<MemoryStore>,
}

pub struct HarnessOptions {
    pub handshake: Handshake,
    pub microphone_available: bool,
    pub translator: Arc<FakeTranslator>,
}

impl Default for HarnessOptions {
    fn default() -> Self {
        Self {
            handshake: Handshake::Accept,
            microphone_available: true,
            translator: FakeTranslator::succeeding("hello", payload_secs(0.25, 1000)),
        }
    }
}

impl Harness {
    pub fn new(options: HarnessOptions) -> Self {
        let output = ManualOutput::new(OUTPUT_RATE);
        let (microphone, microphone_probe) = FakeMicrophone::new(options.microphone_available);
        let (transport, transport_probe) = FakeTransport::new(options.handshake);
        let store = Arc::new(MemoryStore::new());

        let deps = SessionDeps {
            transport,
            microphone: Box::new(microphone),
            output: Arc::clone(&output) as Arc<dyn AudioOutput>,
            translator: options.translator,
            store: Arc::clone(&store) as Arc<dyn live_translator::UtteranceStore>,
        };

        let (controller, events) =
            SessionController::new(SessionConfig::default(), CaptureConfig::default(), deps);

        Self {
            controller,
            events,
            output,
            microphone: microphone_probe,
            transport: transport_probe,
            store,
        }
    }

    /// Feed every queued event to the controller
    pub async fn drain(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(event) = self.events.try_recv() {
            self.controller.handle_event(event).await;
            handled += 1;
        }
        handled
    }
}
