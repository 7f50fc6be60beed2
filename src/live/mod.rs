//! Realtime session transport
//!
//! One WebSocket per conversation: the client sends a setup message, waits for
//! the service to acknowledge it, then streams microphone chunks while the
//! service streams synthesized speech back.

pub mod client;
pub mod messages;

pub use client::{InboundEvent, InboundSink, LiveClient, RealtimeConnection, RealtimeTransport};
pub use messages::{
    Blob, Content, GenerationConfig, Part, RealtimeInputMessage, ServerContent, ServerMessage,
    ServiceError, SetupMessage, SpeechConfig,
};
