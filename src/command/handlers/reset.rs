//! Reset handler
//!
//! A reset drops the current connection and session; the supervisor starts
//! the agent again from connect without waiting.

use bytes::Bytes;
use cloudclient_shared::state_machine::AgentState;
use tracing::info;

use super::HandlerContext;
use crate::command::HandlerOutcome;
use crate::transport::StoreError;

/// Handle a `reset` queue entry
pub async fn handle_reset(
    ctx: &mut HandlerContext<'_>,
    _value: Bytes,
) -> Result<HandlerOutcome, StoreError> {
    begin_reset(ctx).await
}

pub(super) async fn begin_reset(ctx: &mut HandlerContext<'_>) -> Result<HandlerOutcome, StoreError> {
    ctx.enter(AgentState::Resetting).await?;
    ctx.session.console_mut().flush().await?;
    info!("Resetting");
    Ok(HandlerOutcome::Reset)
}
