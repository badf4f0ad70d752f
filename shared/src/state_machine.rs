//! Agent State Machine
//!
//! Defines the lifecycle of a board agent and which transitions are valid.
//!
//! ```text
//! CONNECTING -> REGISTERING -> IDLE <-> DISPATCHING -> { RUNNING_COMMAND
//!                                                      | COPYING_FILE
//!                                                      | RENAMING
//!                                                      | RESETTING } -> IDLE
//! RUNNING_COMMAND -> RESETTING                 (reset after every command)
//! ```
//! `GIVING_UP` is terminal and only the reconnect supervisor enters it.

use std::fmt;

use crate::HeartbeatState;

/// Lifecycle state of one agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AgentState {
    Connecting,
    Registering,
    Idle,
    Dispatching,
    RunningCommand,
    CopyingFile,
    Renaming,
    Resetting,
    GivingUp,
}

impl AgentState {
    /// Heartbeat value published while in this state, if any
    pub fn heartbeat(&self) -> Option<HeartbeatState> {
        match self {
            AgentState::Idle | AgentState::Dispatching => Some(HeartbeatState::Idle),
            AgentState::RunningCommand => Some(HeartbeatState::Running),
            AgentState::CopyingFile => Some(HeartbeatState::Copying),
            AgentState::Renaming => Some(HeartbeatState::Renaming),
            AgentState::Resetting => Some(HeartbeatState::Resetting),
            AgentState::Connecting | AgentState::Registering | AgentState::GivingUp => None,
        }
    }

}

impl fmt::Display for AgentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AgentState::Connecting => "CONNECTING",
            AgentState::Registering => "REGISTERING",
            AgentState::Idle => "IDLE",
            AgentState::Dispatching => "DISPATCHING",
            AgentState::RunningCommand => "RUNNING_COMMAND",
            AgentState::CopyingFile => "COPYING_FILE",
            AgentState::Renaming => "RENAMING",
            AgentState::Resetting => "RESETTING",
            AgentState::GivingUp => "GIVING_UP",
        };
        f.write_str(s)
    }
}

/// Result of a state transition attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionResult {
    /// Transition was valid and state changed (or stayed the same)
    Success(AgentState),
    /// Transition was invalid from current state
    Invalid { from: AgentState, to: AgentState },
}

/// Tracks the current state of an agent
#[derive(Debug)]
pub struct AgentStateMachine {
    current_state: AgentState,
}

impl Default for AgentStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentStateMachine {
    /// Create a new state machine in Connecting state
    pub fn new() -> Self {
        Self {
            current_state: AgentState::Connecting,
        }
    }

    /// Get current state
    pub fn state(&self) -> AgentState {
        self.current_state
    }

    /// Move to `to` if the transition is valid
    pub fn transition(&mut self, to: AgentState) -> TransitionResult {
        if is_valid_transition(self.current_state, to) {
            self.current_state = to;
            TransitionResult::Success(to)
        } else {
            TransitionResult::Invalid {
                from: self.current_state,
                to,
            }
        }
    }
}

/// Check if a transition from one state to another is valid
pub fn is_valid_transition(from: AgentState, to: AgentState) -> bool {
    use AgentState::*;

    match (from, to) {
        // Nothing leaves the terminal state
        (GivingUp, _) => false,

        // Same state is always valid
        (a, b) if a == b => true,

        // Any live state can lose its connection and start over
        (_, Connecting) => true,

        // Only the supervisor gives up, and only between attempts
        (Connecting, GivingUp) => true,

        (Connecting, Registering) => true,
        (Registering, Idle) => true,
        (Idle, Dispatching) => true,
        (Dispatching, Idle) => true, // stale key or empty pop

        // Dispatch picks exactly one handler
        (Dispatching, RunningCommand | CopyingFile | Renaming | Resetting) => true,

        // Handlers return to idle
        (RunningCommand | CopyingFile | Renaming | Resetting, Idle) => true,

        // Reset after command
        (RunningCommand, Resetting) => true,

        _ => false,
    }
}
