//! Liveness records
//!
//! A board is alive for as long as `board:<name>` exists. Both records are
//! written with the same ttl so the control plane never sees a platform tag
//! for a board that has already expired.

use bytes::Bytes;
use cloudclient_shared::{HeartbeatState, KeyNamespace};
use tracing::trace;

use crate::transport::{StoreClient, StoreError};

/// Publish `state` and the platform tag, both expiring after `ttl_secs`
pub async fn publish(
    client: &StoreClient,
    namespace: &KeyNamespace,
    platform: &str,
    state: HeartbeatState,
    ttl_secs: u64,
) -> Result<(), StoreError> {
    trace!("Heartbeat {} {} (ttl {}s)", namespace.heartbeat(), state, ttl_secs);
    client
        .setex(namespace.heartbeat(), ttl_secs, Bytes::from_static(state.as_str().as_bytes()))
        .await?;
    client
        .setex(
            namespace.boardinfo(),
            ttl_secs,
            Bytes::copy_from_slice(platform.as_bytes()),
        )
        .await?;
    Ok(())
}
