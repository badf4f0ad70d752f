//! Store transport: connection traits, the RESP-over-TCP backend and the
//! typed client the agent talks through.

pub mod client;
pub mod error;
#[cfg(test)]
pub mod memory;
pub mod tcp;
pub mod traits;

pub use client::StoreClient;
pub use error::StoreError;
pub use tcp::TcpConnector;
pub use traits::StoreConnector;
