//! Store connection abstraction for pluggable backends

use async_trait::async_trait;
use bytes::Bytes;
use cloudclient_shared::codec::Reply;

use super::StoreError;

/// One request/reply connection to the store
///
/// Calls are strictly sequential: a reply is read before the next command is
/// written, so there are never overlapping requests on one connection.
#[async_trait]
pub trait StoreConnection: Send {
    /// Send a command name plus arguments and wait for the reply
    async fn execute(&mut self, args: Vec<Bytes>) -> Result<Reply, StoreError>;
}

/// Factory for creating store connections
#[async_trait]
pub trait StoreConnector: Send + Sync {
    /// Attempt to connect, returning a connection on success
    async fn connect(&self) -> Result<Box<dyn StoreConnection>, StoreError>;

    /// Human-readable endpoint, e.g. `10.0.0.2:18266`
    fn endpoint(&self) -> String;
}
