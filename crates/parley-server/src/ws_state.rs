//! Per-connection lifecycle of the realtime channel.
//!
//! - Connecting -> Open (upgrade accepted, no session bound)
//! - Open -> Idle (session bound)
//! - Idle -> Idle (rebound to another session)
//! - Idle -> Busy (submission accepted)
//! - Busy -> Idle (turn finished, successfully or not)
//! - any -> Closed (disconnect)

use std::fmt;
use thiserror::Error;

/// Lifecycle state of one realtime connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Connecting,
    Open,
    Idle,
    Busy,
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::Open => "open",
            ConnectionState::Idle => "idle",
            ConnectionState::Busy => "busy",
            ConnectionState::Closed => "closed",
        };
        f.write_str(label)
    }
}

impl ConnectionState {
    /// Returns whether a transition from `self` to `target` is valid.
    pub fn can_transition_to(&self, target: &ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, target),
            (Connecting, Open)
                | (Open, Idle)
                | (Idle, Idle)
                | (Idle, Busy)
                | (Busy, Idle)
                | (Connecting | Open | Idle | Busy, Closed)
        )
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid connection transition: {from} -> {to}")]
pub struct InvalidTransition {
    pub from: ConnectionState,
    pub to: ConnectionState,
}

/// State holder owned by the connection's receive loop.
#[derive(Debug)]
pub struct ConnectionMachine {
    state: ConnectionState,
}

impl Default for ConnectionMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionMachine {
    pub fn new() -> Self {
        Self {
            state: ConnectionState::Connecting,
        }
    }

    pub fn current(&self) -> ConnectionState {
        self.state
    }

    /// Applies `target` if the transition is allowed.
    pub fn transition(&mut self, target: ConnectionState) -> Result<(), InvalidTransition> {
        if !self.state.can_transition_to(&target) {
            return Err(InvalidTransition {
                from: self.state,
                to: target,
            });
        }
        tracing::trace!(from = %self.state, to = %target, "connection state");
        self.state = target;
        Ok(())
    }

    /// Why a submission cannot start right now, as a client error code.
    pub fn submission_blocker(&self) -> Option<&'static str> {
        match self.state {
            ConnectionState::Idle => None,
            ConnectionState::Busy => Some("session_busy"),
            ConnectionState::Connecting | ConnectionState::Open => Some("session_not_initialized"),
            ConnectionState::Closed => Some("connection_closed"),
        }
    }
}
