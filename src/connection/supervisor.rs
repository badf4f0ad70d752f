//! Reconnect supervisor
//!
//! Drives [`BoardAgent::run`] forever. A store that cannot be reached is
//! retried with a doubling delay until the delay passes its cap; that is the
//! only way the supervisor returns. A reset restarts the agent at once and a
//! dropped connection restarts it after the base delay.

use std::time::Duration;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{error, info, warn};

use super::Backoff;
use crate::agent::{AgentError, BoardAgent, LoopExit};
use crate::config::Settings;

#[derive(Error, Debug)]
pub enum SupervisorError {
    #[error("giving up on the store at {endpoint} after {attempts} failed connection attempts")]
    GaveUp { endpoint: String, attempts: u32 },
}

pub struct ReconnectSupervisor {
    backoff: Backoff,
}

impl ReconnectSupervisor {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            backoff: Backoff::new(base, max),
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(settings.reconnect_delay, settings.max_reconnect_delay)
    }

    /// Keep `agent` running; returns only when retrying has been given up
    pub async fn run(&mut self, agent: &mut BoardAgent) -> SupervisorError {
        let mut failed_attempts: u32 = 0;

        loop {
            match agent.run().await {
                Ok(LoopExit::Reset) => {
                    info!("Agent reset, reconnecting");
                    failed_attempts = 0;
                    self.backoff.reset();
                }
                Err(e @ AgentError::Disconnected(_)) => {
                    warn!("{}; reconnecting", e);
                    failed_attempts = 0;
                    // The schedule restarts at base for the next failure
                    self.backoff.reset();
                    sleep(self.backoff.base()).await;
                }
                Err(e @ AgentError::NotRunning { .. }) => {
                    failed_attempts += 1;
                    match self.backoff.next_delay() {
                        Some(delay) => {
                            warn!("{}; retrying in {}s", e, delay.as_secs());
                            sleep(delay).await;
                        }
                        None => {
                            let endpoint = agent.endpoint();
                            error!("{}; giving up", e);
                            agent.give_up();
                            return SupervisorError::GaveUp {
                                endpoint,
                                attempts: failed_attempts,
                            };
                        }
                    }
                }
            }
        }
    }
}
