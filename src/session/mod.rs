//! Session lifecycle
//!
//! The [`SessionController`] owns everything a conversation holds (transport,
//! microphone, playback cursor, mood) and walks a strict state machine:
//!
//! ```text
//! Idle -> Connecting -> Open -> Closing -> Closed -> Idle
//!              \          \
//!               +----------+-> Error -> Closed -> Idle
//! ```
//!
//! It runs inside a single task; [`SessionHandle`] is the cloneable way in.

mod config;
mod controller;
mod state;
mod stats;
mod task;

pub use config::{new_session_id, SessionConfig, Voice};
pub use controller::{SessionController, SessionDeps, SessionEvent};
pub use state::{SessionState, SessionStateMachine};
pub use stats::SessionStats;
pub use task::{spawn_session, SessionCommand, SessionHandle};
