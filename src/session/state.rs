use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::debug;

use crate::{Error, Result};

/// Lifecycle of one conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    #[default]
    Idle,
    Connecting,
    Open,
    Closing,
    Closed,
    Error,
}

impl SessionState {
    /// Whether `to` directly follows `self`
    ///
    /// A session still connecting can be abandoned (Closing) or fail (Error)
    /// before it ever opens; every other edge follows the main sequence.
    pub fn can_transition_to(self, to: Self) -> bool {
        matches!(
            (self, to),
            (Self::Idle, Self::Connecting)
                | (Self::Connecting, Self::Open | Self::Closing | Self::Error)
                | (Self::Open, Self::Closing | Self::Error)
                | (Self::Closing | Self::Error, Self::Closed)
                | (Self::Closed, Self::Idle)
        )
    }

    /// Connecting or open
    pub fn is_active(self) -> bool {
        matches!(self, Self::Connecting | Self::Open)
    }
}

/// Owned state value that refuses to skip states and publishes each change
#[derive(Debug)]
pub struct SessionStateMachine {
    state: SessionState,
    tx: watch::Sender<SessionState>,
}

impl SessionStateMachine {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(SessionState::Idle);
        Self {
            state: SessionState::Idle,
            tx,
        }
    }

    pub fn current(&self) -> SessionState {
        self.state
    }

    /// Observe transitions
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.tx.subscribe()
    }

    /// Move to `to`
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidTransition` if `to` does not directly follow the
    /// current state; the state is left unchanged.
    pub fn transition(&mut self, to: SessionState) -> Result<()> {
        if !self.state.can_transition_to(to) {
            return Err(Error::InvalidTransition {
                from: self.state,
                to,
            });
        }

        debug!(from = ?self.state, to = ?to, "session state transition");
        self.state = to;
        self.tx.send_replace(to);
        Ok(())
    }

    /// Walk a path of transitions, stopping at the first invalid one
    #[cfg(test)]
    pub fn walk(&mut self, path: &[SessionState]) -> Result<()> {
        path.iter().try_for_each(|&to| self.transition(to))
    }
}

impl Default for SessionStateMachine {
    fn default() -> Self {
        Self::new()
    }
}
