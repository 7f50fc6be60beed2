use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::config::{new_session_id, SessionConfig, Voice};
use super::state::{SessionState, SessionStateMachine};
use super::stats::SessionStats;
use crate::audio::{
    AudioFrame, AudioOutput, CaptureConfig, CaptureEncoder, CompletionCallback, MicrophoneSource,
    PlaybackScheduler,
};
use crate::history::{Utterance, UtteranceIdGenerator, UtteranceStore, HISTORY_STORE};
use crate::live::{InboundEvent, InboundSink, RealtimeConnection, RealtimeTransport, ServerMessage};
use crate::mood::MoodState;
use crate::translate::{translate_and_synthesize, TranslationService};
use crate::{Error, Result};

/// Everything the controller reaches outside the process through
pub struct SessionDeps {
    pub transport: Arc<dyn RealtimeTransport>,
    pub microphone: Box<dyn MicrophoneSource>,
    pub output: Arc<dyn AudioOutput>,
    pub translator: Arc<dyn TranslationService>,
    pub store: Arc<dyn UtteranceStore>,
}

/// Work delivered back to the controller from other tasks
#[derive(Debug)]
pub enum SessionEvent {
    /// Something arrived on connection number `generation`
    Inbound {
        generation: u64,
        event: InboundEvent,
    },
    /// Playback buffer `id` finished rendering
    PlaybackFinished { id: u64 },
}

/// Owns the session lifecycle and every resource a session holds
///
/// All mutation happens through `&mut self`, so the controller is driven by a
/// single task (see [`spawn_session`](super::spawn_session)). Work produced
/// elsewhere (inbound messages, playback completions) comes back as
/// [`SessionEvent`]s on the channel returned by [`SessionController::new`].
pub struct SessionController {
    config: SessionConfig,
    capture: CaptureConfig,
    state: SessionStateMachine,

    transport: Arc<dyn RealtimeTransport>,
    microphone: Box<dyn MicrophoneSource>,
    translator: Arc<dyn TranslationService>,
    store: Arc<dyn UtteranceStore>,

    scheduler: PlaybackScheduler,
    mood: MoodState,
    speaking: watch::Sender<bool>,
    events: mpsc::UnboundedSender<SessionEvent>,

    connection: Option<Arc<dyn RealtimeConnection>>,
    uplink: Option<JoinHandle<()>>,
    generation: u64,

    ids: UtteranceIdGenerator,
    started_at: Option<DateTime<Utc>>,
    chunks_sent: Arc<AtomicU64>,
    chunks_dropped: Arc<AtomicU64>,
    decode_errors: u64,
    last_error: Option<String>,
}

impl SessionController {
    pub fn new(
        config: SessionConfig,
        capture: CaptureConfig,
        deps: SessionDeps,
    ) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let (speaking, _) = watch::channel(false);

        let controller = Self {
            config,
            capture,
            state: SessionStateMachine::new(),
            transport: deps.transport,
            microphone: deps.microphone,
            translator: deps.translator,
            store: deps.store,
            scheduler: PlaybackScheduler::new(deps.output),
            mood: MoodState::new(),
            speaking,
            events,
            connection: None,
            uplink: None,
            generation: 0,
            ids: UtteranceIdGenerator::new(),
            started_at: None,
            chunks_sent: Arc::new(AtomicU64::new(0)),
            chunks_dropped: Arc::new(AtomicU64::new(0)),
            decode_errors: 0,
            last_error: None,
        };

        (controller, events_rx)
    }

    /// Continue utterance ids after those already persisted
    pub fn with_id_generator(mut self, ids: UtteranceIdGenerator) -> Self {
        self.ids = ids;
        self
    }

    pub fn state(&self) -> SessionState {
        self.state.current()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn subscribe_speaking(&self) -> watch::Receiver<bool> {
        self.speaking.subscribe()
    }

    /// Shared mood state, cheap to clone
    pub fn mood(&self) -> MoodState {
        self.mood.clone()
    }

    /// The output the scheduler renders into
    pub fn output(&self) -> Arc<dyn AudioOutput> {
        self.scheduler.output()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn is_speaking(&self) -> bool {
        *self.speaking.borrow()
    }

    /// Open a realtime session with `voice` and `system_prompt`
    ///
    /// Connects and completes the setup handshake, then starts microphone
    /// capture. On any failure every partially-acquired resource is released
    /// and the session returns to `Idle`.
    ///
    /// # Errors
    ///
    /// `Error::Connection` if the handshake fails, `Error::DeviceUnavailable`
    /// if the microphone cannot be started.
    pub async fn open(&mut self, voice: Voice, system_prompt: &str) -> Result<()> {
        if self.state() == SessionState::Open {
            warn!("Session {} already open", self.config.session_id);
            return Ok(());
        }

        self.config.session_id = new_session_id();
        self.config.voice = voice;
        self.config.system_prompt = system_prompt.to_string();
        self.last_error = None;

        info!(
            "Opening session {} (voice={})",
            self.config.session_id,
            voice.as_str()
        );

        self.state.transition(SessionState::Connecting)?;
        self.generation += 1;

        let connection = match self
            .transport
            .connect(&self.config, self.inbound_sink())
            .await
        {
            Ok(connection) => connection,
            Err(e) => {
                error!("Session handshake failed: {}", e);
                self.fail(&e).await;
                return Err(e);
            }
        };
        self.connection = Some(Arc::clone(&connection));

        let frames = match self.microphone.start(self.capture.clone()).await {
            Ok(frames) => frames,
            Err(e) => {
                error!("Microphone unavailable: {}", e);
                self.fail(&e).await;
                return Err(e);
            }
        };

        self.uplink = Some(self.spawn_uplink(frames, connection));
        self.mood.reset();
        self.started_at = Some(Utc::now());
        self.state.transition(SessionState::Open)?;

        info!(
            "Session {} open, streaming from {}",
            self.config.session_id,
            self.microphone.name()
        );
        Ok(())
    }

    /// Stop capture, close the transport, drop queued playback
    ///
    /// Idempotent: calling it again from `Idle` leaves the same end state.
    pub async fn disconnect(&mut self) {
        match self.state() {
            SessionState::Connecting | SessionState::Open => {
                info!("Disconnecting session {}", self.config.session_id);
                self.teardown(SessionState::Closing).await;
            }
            SessionState::Closing | SessionState::Error | SessionState::Closed => {
                self.teardown(self.state()).await;
            }
            SessionState::Idle => {
                debug!("disconnect while idle");
                self.release().await;
            }
        }
    }

    /// Process one event from the channel returned by `new`
    pub async fn handle_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Inbound { generation, event } if generation != self.generation => {
                debug!(generation, current = self.generation, "dropping stale inbound event: {:?}", event);
            }
            SessionEvent::Inbound {
                event: InboundEvent::Message(message),
                ..
            } => self.handle_message(message).await,
            SessionEvent::Inbound {
                event: InboundEvent::Closed(reason),
                ..
            } => {
                if self.state().is_active() {
                    let reason = reason.unwrap_or_else(|| "no reason given".to_string());
                    warn!("Session connection closed by service: {}", reason);
                    let err = Error::Connection(format!("connection closed: {reason}"));
                    self.fail(&err).await;
                }
            }
            SessionEvent::PlaybackFinished { id } => {
                if self.scheduler.complete(id) && self.scheduler.pending() == 0 {
                    debug!(id, "playback drained");
                    self.speaking.send_replace(false);
                }
            }
        }
    }

    async fn handle_message(&mut self, message: ServerMessage) {
        if let Some(err) = &message.error {
            error!(
                "Service reported error {}: {}",
                err.code.unwrap_or_default(),
                err.message
            );
            let err = Error::Connection(format!("service error: {}", err.message));
            self.fail(&err).await;
            return;
        }

        for payload in message.audio_payloads() {
            self.play(payload);
        }

        if message.is_turn_complete() {
            debug!("turn complete, {} buffers pending", self.scheduler.pending());
            if self.scheduler.pending() == 0 {
                self.speaking.send_replace(false);
            }
        }
    }

    /// Translate `text` and speak the translation without a realtime session
    ///
    /// Any open session is disconnected first. The translation and the
    /// synthesized speech are requested together; only when both succeed is
    /// the result persisted to history and played.
    ///
    /// # Errors
    ///
    /// `Error::Translation` if either request fails (nothing is persisted),
    /// `Error::Storage` if the history append fails.
    pub async fn translate_text(&mut self, text: &str) -> Result<Utterance> {
        let text = text.trim();
        if text.is_empty() {
            return Err(Error::Translation("nothing to translate".to_string()));
        }

        if self.state() != SessionState::Idle {
            self.disconnect().await;
        }

        let outcome = translate_and_synthesize(
            self.translator.as_ref(),
            text,
            self.config.voice,
            &self.config.system_prompt,
        )
        .await?;

        let utterance = Utterance {
            id: self.ids.next_id(),
            source_text: text.to_string(),
            translated_text: outcome.translated_text,
            audio_payload: outcome.audio_payload,
            created_at: Utc::now(),
        };

        self.store.add(HISTORY_STORE, utterance.clone()).await?;
        info!("Stored utterance {} in {}", utterance.id, HISTORY_STORE);

        self.play(&utterance.audio_payload);
        Ok(utterance)
    }

    /// Counter snapshot
    pub fn stats(&self) -> SessionStats {
        SessionStats {
            session_id: self.config.session_id.clone(),
            state: self.state(),
            started_at: self.started_at,
            chunks_sent: self.chunks_sent.load(Ordering::Relaxed),
            chunks_dropped: self.chunks_dropped.load(Ordering::Relaxed),
            buffers_scheduled: self.scheduler.scheduled_total(),
            decode_errors: self.decode_errors,
            queued_latency_secs: self.scheduler.queued_latency(),
            speaking: self.is_speaking(),
            mood: self.mood.current().bucket,
            last_error: self.last_error.clone(),
        }
    }

    /// Decode and schedule one payload; malformed payloads are dropped
    fn play(&mut self, payload: &str) {
        let buffer = match self.scheduler.decode(payload) {
            Ok(buffer) => buffer,
            Err(e) => {
                self.decode_errors += 1;
                warn!("Dropping audio payload: {}", e);
                return;
            }
        };

        match self.scheduler.schedule(buffer, Some(self.completion())) {
            Ok(interval) => {
                debug!(id = interval.id, start = interval.start, end = interval.end, "scheduled");
                self.speaking.send_replace(true);
            }
            Err(e) => error!("Failed to schedule playback: {}", e),
        }
    }

    fn completion(&self) -> CompletionCallback {
        let events = self.events.clone();
        Box::new(move |id| {
            let _ = events.send(SessionEvent::PlaybackFinished { id });
        })
    }

    fn inbound_sink(&self) -> InboundSink {
        let events = self.events.clone();
        let generation = self.generation;
        Arc::new(move |event| {
            let _ = events.send(SessionEvent::Inbound { generation, event });
        })
    }

    fn spawn_uplink(
        &self,
        mut frames: broadcast::Receiver<AudioFrame>,
        connection: Arc<dyn RealtimeConnection>,
    ) -> JoinHandle<()> {
        let mut encoder = CaptureEncoder::new(self.capture.target_sample_rate);
        let sent = Arc::clone(&self.chunks_sent);
        let dropped = Arc::clone(&self.chunks_dropped);

        tokio::spawn(async move {
            info!("Capture uplink started");

            loop {
                match frames.recv().await {
                    Ok(frame) => {
                        let chunk = encoder.encode(&frame);
                        if let Err(e) = connection.send_audio(chunk) {
                            error!("Failed to send capture chunk: {}", e);
                            break;
                        }
                        sent.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Capture uplink fell behind, dropped {} windows", skipped);
                        dropped.fetch_add(skipped, Ordering::Relaxed);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }

            info!("Capture uplink stopped ({} chunks encoded)", encoder.chunks_encoded());
        })
    }

    /// Record a failure and tear down through `Error`
    async fn fail(&mut self, err: &Error) {
        self.last_error = Some(err.to_string());
        self.teardown(SessionState::Error).await;
    }

    /// Walk from `via` back to `Idle`, releasing resources on the way
    async fn teardown(&mut self, via: SessionState) {
        if self.state() != via {
            if let Err(e) = self.state.transition(via) {
                warn!("Skipping teardown step: {}", e);
            }
        }

        self.release().await;

        for next in [SessionState::Closed, SessionState::Idle] {
            if self.state() != next {
                if let Err(e) = self.state.transition(next) {
                    warn!("Skipping teardown step: {}", e);
                }
            }
        }

        info!("Session {} closed", self.config.session_id);
    }

    /// Drop everything a session may hold; each step tolerates absence
    async fn release(&mut self) {
        // Bumping the generation orphans events from the old connection.
        self.generation += 1;

        if self.microphone.is_capturing() {
            if let Err(e) = self.microphone.stop().await {
                warn!("Failed to stop microphone: {}", e);
            }
        }

        if let Some(uplink) = self.uplink.take() {
            uplink.abort();
        }

        if let Some(connection) = self.connection.take() {
            if let Err(e) = connection.close().await {
                warn!("Failed to close session connection: {}", e);
            }
        }

        self.scheduler.reset();
        self.mood.reset();
        self.speaking.send_replace(false);
        self.started_at = None;
    }
}
