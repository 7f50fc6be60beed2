pub mod backend;
pub mod encoder;
pub mod microphone;
pub mod output;
pub mod playback;
pub mod wav;

pub use backend::{
    AudioFrame, CaptureConfig, MicrophoneSource, CAPTURE_SAMPLE_RATE, CAPTURE_WINDOW,
    DEFAULT_CAPTURE_QUEUE,
    OUTPUT_SAMPLE_RATE,
};
pub use encoder::{encode_pcm16, pcm_mime_type, sample_to_pcm16, CaptureEncoder, EncodedChunk};
pub use microphone::{CpalMicrophone, WindowAccumulator};
pub use output::{
    AudioOutput, CompletionCallback, CpalOutput, RateAdapter, RenderQueue, ScheduledBuffer,
};
pub use playback::{
    decode_payload, decode_pcm16, PlaybackBuffer, PlaybackScheduler, ScheduledInterval,
};
pub use wav::export_pcm16_payload;
