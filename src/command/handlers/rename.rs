//! Rename handler
//!
//! Retires every key under the current name, rebinds the session to the new
//! one and persists it. Between the delete and the first heartbeat under the
//! new name the board cannot be addressed.

use bytes::Bytes;
use cloudclient_shared::state_machine::AgentState;
use tracing::{error, info, warn};

use super::HandlerContext;
use crate::command::HandlerOutcome;
use crate::config::keys;
use crate::transport::StoreError;

/// Handle a `rename` queue entry
pub async fn handle_rename(
    ctx: &mut HandlerContext<'_>,
    value: Bytes,
) -> Result<HandlerOutcome, StoreError> {
    let new_name = match std::str::from_utf8(&value).map(str::trim) {
        Ok(name) if !name.is_empty() => name.to_string(),
        _ => {
            warn!("Ignoring rename to {:?}", String::from_utf8_lossy(&value));
            return Ok(HandlerOutcome::Ignored);
        }
    };

    let old_name = ctx.session.name().to_string();
    if new_name == old_name {
        info!("Already named {:?}", old_name);
        return Ok(HandlerOutcome::Ignored);
    }

    ctx.enter(AgentState::Renaming).await?;

    let retired = ctx.session.owned_keys();
    ctx.session.client().del(&retired).await?;
    ctx.session.rebind(&new_name);

    if let Err(e) = ctx.config.set(keys::NAME, &new_name) {
        error!("Failed to persist board name {:?}: {}", new_name, e);
    }

    ctx.finish().await?;
    info!("Renamed {:?} -> {:?}", old_name, new_name);
    Ok(HandlerOutcome::Renamed {
        from: old_name,
        to: new_name,
    })
}
