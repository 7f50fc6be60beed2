use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::config::Voice;
use super::controller::{SessionController, SessionEvent};
use super::state::SessionState;
use super::stats::SessionStats;
use crate::history::Utterance;
use crate::mood::{MoodAnalyzer, MoodState};
use crate::{Error, Result};

const COMMAND_QUEUE: usize = 32;

/// Requests accepted by the session task
#[derive(Debug)]
pub enum SessionCommand {
    Open {
        voice: Voice,
        system_prompt: String,
        reply: oneshot::Sender<Result<()>>,
    },
    Disconnect {
        reply: oneshot::Sender<()>,
    },
    Translate {
        text: String,
        reply: oneshot::Sender<Result<Utterance>>,
    },
    Status {
        reply: oneshot::Sender<Result<SessionStats>>,
    },
}

/// Cloneable front end to a running session task
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<SessionCommand>,
    mood: MoodState,
    state: watch::Receiver<SessionState>,
    speaking: watch::Receiver<bool>,
}

fn task_gone() -> Error {
    Error::Connection("session task is not running".to_string())
}

impl SessionHandle {
    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> SessionCommand,
    ) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(command(reply))
            .await
            .map_err(|_| task_gone())?;
        rx.await.map_err(|_| task_gone())
    }

    /// Open a realtime session; resolves once the handshake and capture start
    pub async fn open(&self, voice: Voice, system_prompt: impl Into<String>) -> Result<()> {
        let system_prompt = system_prompt.into();
        self.request(|reply| SessionCommand::Open {
            voice,
            system_prompt,
            reply,
        })
        .await?
    }

    /// Tear the session down; also cancels an open still in its handshake
    pub async fn disconnect(&self) -> Result<()> {
        self.request(|reply| SessionCommand::Disconnect { reply })
            .await
    }

    /// Run the one-shot text path
    pub async fn translate(&self, text: impl Into<String>) -> Result<Utterance> {
        let text = text.into();
        self.request(|reply| SessionCommand::Translate { text, reply })
            .await?
    }

    pub async fn status(&self) -> Result<SessionStats> {
        self.request(|reply| SessionCommand::Status { reply })
            .await?
    }

    pub fn mood(&self) -> &MoodState {
        &self.mood
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    pub fn subscribe_speaking(&self) -> watch::Receiver<bool> {
        self.speaking.clone()
    }
}

/// Start the session task and the mood analyzer beside it
///
/// The task ends, disconnecting first, once every handle is dropped.
pub fn spawn_session(
    controller: SessionController,
    events: mpsc::UnboundedReceiver<SessionEvent>,
    mood_cadence: Duration,
) -> (SessionHandle, JoinHandle<()>) {
    let (commands, commands_rx) = mpsc::channel(COMMAND_QUEUE);

    let handle = SessionHandle {
        commands,
        mood: controller.mood(),
        state: controller.subscribe_state(),
        speaking: controller.subscribe_speaking(),
    };

    let analyzer = MoodAnalyzer::new(
        controller.output(),
        controller.mood(),
        controller.subscribe_speaking(),
        mood_cadence,
    )
    .spawn();

    let task = tokio::spawn(async move {
        run(controller, events, commands_rx).await;
        analyzer.abort();
    });

    (handle, task)
}

async fn run(
    mut controller: SessionController,
    mut events: mpsc::UnboundedReceiver<SessionEvent>,
    mut commands: mpsc::Receiver<SessionCommand>,
) {
    info!("Session task started");

    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(command) => handle_command(&mut controller, &mut commands, command).await,
                None => break,
            },
            Some(event) = events.recv() => controller.handle_event(event).await,
        }
    }

    controller.disconnect().await;
    info!("Session task stopped");
}

async fn handle_command(
    controller: &mut SessionController,
    commands: &mut mpsc::Receiver<SessionCommand>,
    command: SessionCommand,
) {
    match command {
        SessionCommand::Open {
            voice,
            system_prompt,
            reply,
        } => open_cancellable(controller, commands, voice, &system_prompt, reply).await,
        SessionCommand::Disconnect { reply } => {
            controller.disconnect().await;
            let _ = reply.send(());
        }
        SessionCommand::Translate { text, reply } => {
            let _ = reply.send(controller.translate_text(&text).await);
        }
        SessionCommand::Status { reply } => {
            let _ = reply.send(Ok(controller.stats()));
        }
    }
}

/// Drive an open while still listening for a disconnect
///
/// A disconnect that arrives mid-handshake drops the pending open and tears
/// down whatever it had acquired. Other commands are refused until the open
/// settles.
async fn open_cancellable(
    controller: &mut SessionController,
    commands: &mut mpsc::Receiver<SessionCommand>,
    voice: Voice,
    system_prompt: &str,
    reply: oneshot::Sender<Result<()>>,
) {
    let settled = {
        let open = controller.open(voice, system_prompt);
        tokio::pin!(open);

        loop {
            tokio::select! {
                result = &mut open => break Ok(result),
                command = commands.recv() => match command {
                    Some(SessionCommand::Disconnect { reply: done }) => break Err(Some(done)),
                    Some(other) => refuse_while_opening(other),
                    None => break Err(None),
                },
            }
        }
    };

    let done = match settled {
        Ok(result) => {
            let _ = reply.send(result);
            return;
        }
        Err(done) => done,
    };

    info!("Open cancelled during handshake");
    controller.disconnect().await;
    let _ = reply.send(Err(Error::Connection(
        "open cancelled by disconnect".to_string(),
    )));
    if let Some(done) = done {
        let _ = done.send(());
    }
}

fn refuse_while_opening(command: SessionCommand) {
    warn!("Refusing command while a session is opening");
    let busy = || Error::Busy("session is opening".to_string());
    match command {
        SessionCommand::Open { reply, .. } => {
            let _ = reply.send(Err(busy()));
        }
        SessionCommand::Translate { reply, .. } => {
            let _ = reply.send(Err(busy()));
        }
        SessionCommand::Status { reply } => {
            let _ = reply.send(Err(busy()));
        }
        SessionCommand::Disconnect { .. } => {}
    }
}
