//! One-shot completion signal
//!
//! Cleared before a command runs and pushed to exactly once afterwards, so
//! the control plane can block on `repl:<name>.complete` for the result.

use bytes::Bytes;
use cloudclient_shared::{CompletionCode, KeyNamespace};
use tracing::debug;

use crate::transport::{StoreClient, StoreError};

pub async fn clear(client: &StoreClient, namespace: &KeyNamespace) -> Result<(), StoreError> {
    client.del(&[namespace.complete()]).await?;
    Ok(())
}

pub async fn signal(
    client: &StoreClient,
    namespace: &KeyNamespace,
    code: CompletionCode,
) -> Result<(), StoreError> {
    debug!("Completion {} -> {}", namespace.complete(), code.as_i64());
    client
        .rpush(namespace.complete(), Bytes::from(code.as_i64().to_string()))
        .await?;
    Ok(())
}
