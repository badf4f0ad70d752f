//! Agent event loop
//!
//! One pass of the loop publishes an idle heartbeat and then waits, bounded
//! by the pop timeout, for work on any bound queue. Handlers run to
//! completion before the next pass, so nothing inside an agent ever runs
//! concurrently.

use cloudclient_shared::state_machine::{AgentState, AgentStateMachine, TransitionResult};
use cloudclient_shared::{now_secs, ttl, HeartbeatState};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::Session;
use crate::command::handlers::HandlerContext;
use crate::command::{dispatch, CommandExecutor, HandlerOutcome};
use crate::config::{keys, ConfigProvider, Settings};
use crate::transport::{StoreClient, StoreConnector, StoreError};

/// Why [`BoardAgent::run`] handed control back without an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    /// A reset was requested; start again from connect
    Reset,
}

#[derive(Error, Debug)]
pub enum AgentError {
    /// The store could not be reached; the loop never started
    #[error("store is not running at {endpoint}: {source}")]
    NotRunning {
        endpoint: String,
        #[source]
        source: StoreError,
    },

    /// The connection broke after the loop started
    #[error("lost connection to the store: {0}")]
    Disconnected(#[source] StoreError),
}

/// A single board's agent
pub struct BoardAgent {
    settings: Settings,
    connector: Arc<dyn StoreConnector>,
    executor: Arc<dyn CommandExecutor>,
    config: Arc<dyn ConfigProvider>,
    fsm: AgentStateMachine,
    name: Option<String>,
}

impl BoardAgent {
    pub fn new(
        settings: Settings,
        connector: Arc<dyn StoreConnector>,
        executor: Arc<dyn CommandExecutor>,
        config: Arc<dyn ConfigProvider>,
    ) -> Self {
        let name = settings.name.clone();
        Self {
            settings,
            connector,
            executor,
            config,
            fsm: AgentStateMachine::new(),
            name,
        }
    }

    #[cfg(test)]
    pub fn state(&self) -> AgentState {
        self.fsm.state()
    }

    /// Current board name, once one is known
    #[cfg(test)]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn endpoint(&self) -> String {
        self.connector.endpoint()
    }

    /// Enter the terminal state
    pub fn give_up(&mut self) {
        self.transition(AgentState::GivingUp);
    }

    fn transition(&mut self, to: AgentState) {
        match self.fsm.transition(to) {
            TransitionResult::Success(state) => debug!("Agent state: {}", state),
            TransitionResult::Invalid { from, to } => {
                warn!("Invalid state transition {} -> {}", from, to)
            }
        }
    }

    /// Connect, register and serve until the connection breaks or a reset
    /// is requested
    pub async fn run(&mut self) -> Result<LoopExit, AgentError> {
        self.transition(AgentState::Connecting);

        let endpoint = self.connector.endpoint();
        info!("Connecting to the store at {}", endpoint);
        let connection = self
            .connector
            .connect()
            .await
            .map_err(|source| AgentError::NotRunning { endpoint, source })?;

        let mut session = self
            .register(StoreClient::new(connection))
            .await
            .map_err(AgentError::Disconnected)?;

        loop {
            match self.handle_queues(&mut session).await {
                Ok(Some(exit)) => return Ok(exit),
                Ok(None) => {}
                // The store refused one request; the connection is fine
                Err(e) if e.is_reply_error() => warn!("Store rejected a request: {}", e),
                Err(e) => return Err(AgentError::Disconnected(e)),
            }
        }
    }

    /// Resolve the board name and set up a fresh session under it
    pub async fn register(&mut self, client: StoreClient) -> Result<Session, StoreError> {
        self.transition(AgentState::Registering);

        let name = match self.name.clone() {
            Some(name) => name,
            None => {
                let name = self.fallback_name(&client).await;
                if let Err(e) = self.config.set(keys::NAME, &name) {
                    warn!("Failed to persist generated name {:?}: {}", name, e);
                }
                name
            }
        };
        self.name = Some(name.clone());

        let mut session = Session::new(client, &name, &self.settings);
        session.clear_stale_keys().await?;

        if session.registry().is_empty() {
            warn!("Registered as {:?} with no operations bound", name);
        } else {
            info!(
                "Registered as {:?} ({} operations)",
                name,
                session.registry().len()
            );
        }
        self.transition(AgentState::Idle);
        Ok(session)
    }

    /// `<platform>-<n>` from a store-wide counter; the clock if that fails
    async fn fallback_name(&self, client: &StoreClient) -> String {
        let platform = &self.settings.platform;
        match client.incr(&format!("board_counter:{platform}")).await {
            Ok(n) => format!("{platform}-{n}"),
            Err(e) => {
                warn!("Board counter unavailable ({}), naming by time", e);
                format!("{platform}-{}", now_secs())
            }
        }
    }

    /// One pass of the loop
    ///
    /// Returns `Some` when the session has to end.
    pub async fn handle_queues(
        &mut self,
        session: &mut Session,
    ) -> Result<Option<LoopExit>, StoreError> {
        self.transition(AgentState::Idle);
        session.heartbeat(HeartbeatState::Idle, ttl::IDLE_SECS).await?;

        let timeout_secs = self.settings.pop_timeout.as_secs().max(1);
        let popped = match session
            .client()
            .blpop(&session.registry().queue_keys(), timeout_secs)
            .await
        {
            Ok(popped) => popped,
            Err(e) if e.is_reply_error() => {
                warn!("Pop over the bound queues failed: {}", e);
                session.drop_foreign_queues().await?;
                return Ok(None);
            }
            Err(e) => return Err(e),
        };
        let Some((key, value)) = popped else {
            return Ok(None);
        };

        self.transition(AgentState::Dispatching);
        let mut ctx = HandlerContext {
            settings: &self.settings,
            session,
            executor: self.executor.as_ref(),
            config: self.config.as_ref(),
            fsm: &mut self.fsm,
        };

        match dispatch(&mut ctx, &key, value).await? {
            HandlerOutcome::Reset => return Ok(Some(LoopExit::Reset)),
            HandlerOutcome::Renamed { to, .. } => self.name = Some(to),
            HandlerOutcome::Completed(_) | HandlerOutcome::Ignored => {}
        }
        Ok(None)
    }
}
