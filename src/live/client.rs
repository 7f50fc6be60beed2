use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use super::messages::{RealtimeInputMessage, ServerMessage, SetupMessage};
use crate::audio::EncodedChunk;
use crate::session::SessionConfig;
use crate::{Error, Result};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// What the connection reports back to its owner
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    /// A parsed service message
    Message(ServerMessage),
    /// The remote side went away; carries the reason when known
    Closed(Option<String>),
}

/// Receives inbound events; called from the connection's reader task
pub type InboundSink = Arc<dyn Fn(InboundEvent) + Send + Sync>;

/// Opens realtime sessions with the speech service
#[async_trait]
pub trait RealtimeTransport: Send + Sync {
    /// Connect and complete the setup handshake
    ///
    /// Fails with `Error::Connection` if the socket cannot be opened, the
    /// service rejects the setup, or the handshake times out.
    async fn connect(
        &self,
        config: &SessionConfig,
        inbound: InboundSink,
    ) -> Result<Arc<dyn RealtimeConnection>>;
}

/// An open realtime session
#[async_trait]
pub trait RealtimeConnection: Send + Sync {
    /// Queue one capture chunk for sending; never waits on the network
    fn send_audio(&self, chunk: EncodedChunk) -> Result<()>;

    /// Close the session; safe to call more than once
    async fn close(&self) -> Result<()>;
}

/// WebSocket client for the bidirectional speech endpoint
pub struct LiveClient {
    url: String,
    api_key: String,
}

impl LiveClient {
    pub fn new(url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            api_key: api_key.into(),
        }
    }

    fn endpoint(&self) -> String {
        if self.api_key.is_empty() {
            return self.url.clone();
        }
        let separator = if self.url.contains('?') { '&' } else { '?' };
        format!("{}{}key={}", self.url, separator, self.api_key)
    }
}

fn parse_frame(message: &Message) -> Option<Result<ServerMessage>> {
    let parsed = match message {
        Message::Text(text) => serde_json::from_str(text),
        Message::Binary(bytes) => serde_json::from_slice(bytes),
        _ => return None,
    };
    Some(parsed.map_err(Error::from))
}

async fn handshake(ws: &mut WsStream, config: &SessionConfig) -> Result<()> {
    let setup = serde_json::to_string(&SetupMessage::from_config(config))?;
    ws.send(Message::text(setup))
        .await
        .map_err(|e| Error::Connection(format!("failed to send setup: {e}")))?;

    while let Some(frame) = ws.next().await {
        let frame = frame.map_err(|e| Error::Connection(format!("handshake failed: {e}")))?;

        if let Message::Close(reason) = &frame {
            return Err(Error::Connection(format!(
                "service closed during handshake: {}",
                reason.as_ref().map(|r| r.reason.to_string()).unwrap_or_default()
            )));
        }

        match parse_frame(&frame) {
            Some(Ok(msg)) if msg.is_setup_complete() => return Ok(()),
            Some(Ok(msg)) => {
                if let Some(err) = msg.error {
                    return Err(Error::Connection(format!("setup rejected: {}", err.message)));
                }
                debug!("ignoring pre-setup message");
            }
            Some(Err(e)) => warn!("Unparseable handshake frame: {}", e),
            None => {}
        }
    }

    Err(Error::Connection("connection closed before setup completed".to_string()))
}

#[async_trait]
impl RealtimeTransport for LiveClient {
    async fn connect(
        &self,
        config: &SessionConfig,
        inbound: InboundSink,
    ) -> Result<Arc<dyn RealtimeConnection>> {
        info!(
            "Connecting to {} (model={}, voice={})",
            self.url,
            config.model,
            config.voice.as_str()
        );

        let endpoint = self.endpoint();
        let opened = tokio::time::timeout(config.handshake_timeout, async {
            let (mut ws, _) = connect_async(endpoint.as_str())
                .await
                .map_err(|e| Error::Connection(format!("failed to connect: {e}")))?;
            handshake(&mut ws, config).await?;
            Ok::<_, Error>(ws)
        })
        .await
        .map_err(|_| {
            Error::Connection(format!(
                "handshake timed out after {:?}",
                config.handshake_timeout
            ))
        })??;

        info!("Session {} setup complete", config.session_id);

        Ok(Arc::new(WebSocketConnection::spawn(opened, inbound)))
    }
}

/// Socket split into a writer task and a reader task
struct WebSocketConnection {
    outbound: mpsc::UnboundedSender<Message>,
    reader: Mutex<Option<JoinHandle<()>>>,
    writer: Mutex<Option<JoinHandle<()>>>,
}

impl WebSocketConnection {
    fn spawn(ws: WsStream, inbound: InboundSink) -> Self {
        let (mut sink, mut stream) = ws.split();
        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<Message>();

        let writer = tokio::spawn(async move {
            while let Some(message) = outbound_rx.recv().await {
                let closing = matches!(message, Message::Close(_));
                if let Err(e) = sink.send(message).await {
                    error!("Failed to send on session socket: {}", e);
                    break;
                }
                if closing {
                    break;
                }
            }
            debug!("session writer stopped");
        });

        let reader = tokio::spawn(async move {
            let reason = loop {
                match stream.next().await {
                    Some(Ok(Message::Close(frame))) => {
                        break frame.map(|f| f.reason.to_string());
                    }
                    Some(Ok(frame)) => match parse_frame(&frame) {
                        Some(Ok(msg)) => inbound(InboundEvent::Message(msg)),
                        Some(Err(e)) => warn!("Dropping unparseable service message: {}", e),
                        None => {}
                    },
                    Some(Err(e)) => break Some(e.to_string()),
                    None => break None,
                }
            };
            inbound(InboundEvent::Closed(reason));
            debug!("session reader stopped");
        });

        Self {
            outbound,
            reader: Mutex::new(Some(reader)),
            writer: Mutex::new(Some(writer)),
        }
    }

    fn take(slot: &Mutex<Option<JoinHandle<()>>>) -> Option<JoinHandle<()>> {
        slot.lock().ok().and_then(|mut handle| handle.take())
    }
}

#[async_trait]
impl RealtimeConnection for WebSocketConnection {
    fn send_audio(&self, chunk: EncodedChunk) -> Result<()> {
        let payload = serde_json::to_string(&RealtimeInputMessage::from(chunk))?;
        self.outbound
            .send(Message::text(payload))
            .map_err(|_| Error::Connection("session socket is closed".to_string()))
    }

    async fn close(&self) -> Result<()> {
        if let Some(reader) = Self::take(&self.reader) {
            reader.abort();
        }

        let Some(writer) = Self::take(&self.writer) else {
            return Ok(());
        };

        let _ = self.outbound.send(Message::Close(None));
        if tokio::time::timeout(Duration::from_secs(2), writer).await.is_err() {
            warn!("Session socket did not close in time");
        }

        info!("Session socket closed");
        Ok(())
    }
}
