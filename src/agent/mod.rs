//! The per-board agent
//!
//! This module handles:
//! - Registering a board name and its key namespace
//! - The heartbeat and dispatch loop
//! - Completion signalling for user-visible operations

mod completion;
mod eventloop;
mod heartbeat;
mod session;

pub use eventloop::{AgentError, BoardAgent, LoopExit};
pub use session::Session;
