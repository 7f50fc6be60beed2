//! HTTP API server for external control
//!
//! This module provides a REST API for driving the translator:
//! - POST /session/open - Open a realtime session
//! - POST /session/disconnect - Tear it down
//! - GET /session/status - Session counters and state
//! - POST /translate - One-shot text path
//! - GET /mood - Current mood bucket
//! - GET/DELETE /history, DELETE /history/:id - Persisted utterances
//! - GET /health - Health check

mod handlers;
mod routes;
mod state;

pub use handlers::{OpenSessionRequest, TranslateRequest};
pub use routes::create_router;
pub use state::AppState;
