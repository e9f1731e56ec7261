//! Per-turn state machine.
//!
//! ```text
//! Idle ─► Processing ─┬─► Emitting ─► Processing ─┐
//!                     │                           │
//!                     └───────────────────────────┴─► Idle | Failed
//! ```

use std::fmt;

use tokio::sync::watch;
use tracing::debug;

/// Observable state of the turn currently owned by a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TurnState {
    /// Waiting for the next request
    #[default]
    Idle,
    /// A request has been accepted and the agent is running
    Processing,
    /// The agent is handing a response to the output
    Emitting,
    /// The last turn failed (turn-level or protocol)
    Failed,
}

impl TurnState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TurnState::Idle => "idle",
            TurnState::Processing => "processing",
            TurnState::Emitting => "emitting",
            TurnState::Failed => "failed",
        }
    }

    /// Whether `next` is a legal successor of `self`.
    pub fn can_transition_to(&self, next: TurnState) -> bool {
        use TurnState::*;
        matches!(
            (self, next),
            (Idle, Processing)
                | (Failed, Processing)
                | (Processing, Emitting)
                | (Emitting, Processing)
                | (Processing, Idle)
                | (Processing, Failed)
                | (Emitting, Failed)
                | (Idle, Failed)
        )
    }
}

impl fmt::Display for TurnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Moves the watched state to `next`, logging the transition.
pub(crate) fn transition(state: &watch::Sender<TurnState>, next: TurnState) {
    let prev = state.send_replace(next);
    if prev != next {
        if !prev.can_transition_to(next) {
            debug!(from = %prev, to = %next, "Unexpected turn state transition");
        } else {
            debug!(from = %prev, to = %next, "Turn state transition");
        }
    }
}
