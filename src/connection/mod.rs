//! Connection lifecycle
//!
//! This module handles:
//! - Restarting the agent after resets and dropped connections
//! - Exponential reconnect backoff with a cap

mod backoff;
mod supervisor;

pub use backoff::Backoff;
pub use supervisor::ReconnectSupervisor;
