//! Handlers for the bound operations

mod copy;
mod exec;
mod rename;
mod reset;

pub use copy::handle_copy;
pub use exec::handle_command;
pub use rename::handle_rename;
pub use reset::handle_reset;

use cloudclient_shared::state_machine::{AgentState, AgentStateMachine, TransitionResult};
use cloudclient_shared::{ttl, HeartbeatState};
use tracing::warn;

use super::CommandExecutor;
use crate::agent::Session;
use crate::config::{ConfigProvider, Settings};
use crate::transport::StoreError;

/// Everything a handler may touch while it runs
pub struct HandlerContext<'a> {
    pub settings: &'a Settings,
    pub session: &'a mut Session,
    pub executor: &'a dyn CommandExecutor,
    pub config: &'a dyn ConfigProvider,
    pub fsm: &'a mut AgentStateMachine,
}

impl HandlerContext<'_> {
    /// Move to `state` and publish its heartbeat
    pub async fn enter(&mut self, state: AgentState) -> Result<(), StoreError> {
        if let TransitionResult::Invalid { from, to } = self.fsm.transition(state) {
            warn!("Invalid state transition {} -> {}", from, to);
        }
        if let Some(heartbeat) = state.heartbeat() {
            let ttl_secs = self.heartbeat_ttl(heartbeat);
            self.session.heartbeat(heartbeat, ttl_secs).await?;
        }
        Ok(())
    }

    /// A running command keeps its record alive until the executor's
    /// timeout has fired
    fn heartbeat_ttl(&self, heartbeat: HeartbeatState) -> u64 {
        let default = heartbeat.default_ttl_secs();
        match heartbeat {
            HeartbeatState::Running => {
                default.max(self.settings.command_timeout.as_secs() + ttl::IDLE_SECS)
            }
            _ => default,
        }
    }

    /// Back to idle
    pub async fn finish(&mut self) -> Result<(), StoreError> {
        self.enter(AgentState::Idle).await
    }
}
