pub mod audio;
pub mod config;
pub mod error;
pub mod history;
pub mod http;
pub mod live;
pub mod mood;
pub mod session;
pub mod translate;

pub use audio::{
    AudioFrame, AudioOutput, CaptureConfig, CaptureEncoder, CpalMicrophone, CpalOutput, EncodedChunk,
    MicrophoneSource, PlaybackBuffer, PlaybackScheduler,
};
pub use config::Config;
pub use error::{Error, Result};
pub use history::{JsonFileStore, MemoryStore, Utterance, UtteranceStore};
pub use http::{create_router, AppState};
pub use live::{LiveClient, RealtimeConnection, RealtimeTransport, ServerMessage};
pub use mood::{MoodAnalyzer, MoodBucket, MoodSample, MoodState};
pub use session::{
    spawn_session, SessionConfig, SessionController, SessionDeps, SessionHandle, SessionState,
    SessionStats, Voice,
};
pub use translate::{GenerateClient, TranslationService};
