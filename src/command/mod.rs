//! Command dispatch for the board agent
//!
//! This module handles:
//! - Binding operation names to namespaced queue keys
//! - Routing a popped queue entry to its handler
//! - Running user commands through a pluggable executor

mod dispatch;
mod executor;
pub mod handlers;
mod registry;

pub use dispatch::{dispatch, HandlerOutcome};
pub use executor::{CommandExecutor, ExecError, ShellExecutor};
pub use registry::{HandlerRegistry, Operation, DEFAULT_BINDINGS};
