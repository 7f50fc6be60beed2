use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::state::SessionState;
use crate::mood::MoodBucket;

/// Snapshot of a session's pipeline counters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStats {
    /// Identifier of the current (or last) session
    pub session_id: String,

    /// Current lifecycle state
    pub state: SessionState,

    /// When the current session opened
    pub started_at: Option<DateTime<Utc>>,

    /// Capture chunks handed to the transport
    pub chunks_sent: u64,

    /// Capture windows dropped because the transport fell behind
    pub chunks_dropped: u64,

    /// Playback buffers scheduled since the controller was created
    pub buffers_scheduled: u64,

    /// Inbound payloads dropped as malformed
    pub decode_errors: u64,

    /// Seconds of audio queued ahead of the output clock
    pub queued_latency_secs: f64,

    /// Whether synthesized speech is rendering
    pub speaking: bool,

    /// Current mood bucket
    pub mood: MoodBucket,

    /// Most recent connection or device failure
    pub last_error: Option<String>,
}
