//! Board Agent Shared Types
//!
//! This crate provides the store key layout, the heartbeat vocabulary, the
//! RESP wire codec and the agent state machine shared by the board agent and
//! anything on the control-plane side that needs to address a board.

pub mod codec;
pub mod namespace;
pub mod state_machine;

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

pub use namespace::KeyNamespace;

/// Get current timestamp in seconds since Unix epoch
pub fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Heartbeat time-to-live values, in seconds
pub mod ttl {
    /// Written every loop iteration, must outlive one dispatch pop
    pub const IDLE_SECS: u64 = 10;

    /// Rename is quick; the board is unaddressable for its duration anyway
    pub const RENAMING_SECS: u64 = 1;

    /// Covers the gap between a reset request and re-registration
    pub const RESETTING_SECS: u64 = 5;

    /// Floor for a running command; the agent stretches it to cover the
    /// configured command timeout
    pub const RUNNING_SECS: u64 = 60;

    /// Same reasoning as running, for chunked file transfers
    pub const COPYING_SECS: u64 = 60;
}

/// Dispatch and transfer defaults
pub mod defaults {
    /// Store port used when none is configured
    pub const STORE_PORT: u16 = 18266;

    /// Bounded wait of the fan-in pop, in seconds
    pub const POP_TIMEOUT_SECS: u64 = 1;

    /// Console output buffer capacity in bytes
    pub const CONSOLE_BUFFER_SIZE: usize = 80;

    /// Byte range requested per read during a file transfer
    pub const TRANSFER_CHUNK_SIZE: usize = 256;
}

/// State published in the heartbeat record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HeartbeatState {
    Idle,
    Running,
    Copying,
    Renaming,
    Resetting,
}

impl HeartbeatState {
    /// Wire value stored under `board:<name>`
    pub fn as_str(&self) -> &'static str {
        match self {
            HeartbeatState::Idle => "idle",
            HeartbeatState::Running => "running",
            HeartbeatState::Copying => "copying",
            HeartbeatState::Renaming => "renaming",
            HeartbeatState::Resetting => "resetting",
        }
    }

    /// Default ttl for this state
    pub fn default_ttl_secs(&self) -> u64 {
        match self {
            HeartbeatState::Idle => ttl::IDLE_SECS,
            HeartbeatState::Running => ttl::RUNNING_SECS,
            HeartbeatState::Copying => ttl::COPYING_SECS,
            HeartbeatState::Renaming => ttl::RENAMING_SECS,
            HeartbeatState::Resetting => ttl::RESETTING_SECS,
        }
    }
}

impl fmt::Display for HeartbeatState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Completion codes pushed onto `repl:<name>.complete`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionCode {
    Success,
    Failure,
}

impl CompletionCode {
    pub fn as_i64(&self) -> i64 {
        match self {
            CompletionCode::Success => 0,
            CompletionCode::Failure => 1,
        }
    }
}

impl From<bool> for CompletionCode {
    fn from(ok: bool) -> Self {
        if ok {
            CompletionCode::Success
        } else {
            CompletionCode::Failure
        }
    }
}
