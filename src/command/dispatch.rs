//! Routes a popped queue entry to its handler

use bytes::Bytes;
use cloudclient_shared::CompletionCode;
use tracing::{debug, warn};

use super::handlers::{self, HandlerContext};
use super::Operation;
use crate::transport::StoreError;

/// What a handler did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerOutcome {
    /// A user-visible operation finished and signalled `code`
    Completed(CompletionCode),
    /// The board now answers to `to`
    Renamed { from: String, to: String },
    /// The session has to be torn down and started again
    Reset,
    /// Nothing was done (unroutable key, unusable value)
    Ignored,
}

/// Run the handler bound to `key`
///
/// Store errors are returned as-is; every other fault is handled inside the
/// handler.
pub async fn dispatch(
    ctx: &mut HandlerContext<'_>,
    key: &str,
    value: Bytes,
) -> Result<HandlerOutcome, StoreError> {
    let Some(op) = ctx.session.registry().resolve(key) else {
        warn!("Received an event for a non-existent operation {:?}", key);
        return Ok(HandlerOutcome::Ignored);
    };

    debug!("Dispatching {} ({} bytes)", op, value.len());

    match op {
        Operation::Command => handlers::handle_command(ctx, value).await,
        Operation::Copy => handlers::handle_copy(ctx, value).await,
        Operation::Rename => handlers::handle_rename(ctx, value).await,
        Operation::Reset => handlers::handle_reset(ctx, value).await,
    }
}
