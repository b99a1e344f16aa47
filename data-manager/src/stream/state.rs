//! Connection state machine

use std::fmt;

use parking_lot::RwLock;
use tracing::{debug, warn};

/// `Disconnected -> Connecting -> Connected -> Disconnected`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl ConnectionState {
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, next),
            (Disconnected, Connecting)
                | (Connecting, Connected)
                // handshake failed
                | (Connecting, Disconnected)
                | (Connected, Disconnected)
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidTransition {
    pub from: ConnectionState,
    pub to: ConnectionState,
}

impl fmt::Display for InvalidTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid transition {} -> {}", self.from, self.to)
    }
}

impl std::error::Error for InvalidTransition {}

/// Current state shared between the connection task and observers
#[derive(Debug)]
pub struct StateCell {
    state: RwLock<ConnectionState>,
}

impl Default for StateCell {
    fn default() -> Self {
        Self {
            state: RwLock::new(ConnectionState::Disconnected),
        }
    }
}

impl StateCell {
    pub fn get(&self) -> ConnectionState {
        *self.state.read()
    }

    /// Move to `next` if the transition is allowed. Rejected transitions are
    /// logged and leave the state untouched.
    pub fn transition(&self, next: ConnectionState) -> Result<ConnectionState, InvalidTransition> {
        let mut state = self.state.write();
        let from = *state;
        if !from.can_transition_to(next) {
            warn!(%from, to = %next, "rejected connection state transition");
            return Err(InvalidTransition { from, to: next });
        }
        *state = next;
        debug!(%from, to = %next, "connection state changed");
        Ok(from)
    }
}
