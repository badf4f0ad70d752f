//! Errors raised by the store transport

use cloudclient_shared::codec::CodecError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Protocol error: {0}")]
    Codec(#[from] CodecError),

    #[error("Server error: {0}")]
    Server(String),

    #[error("Unexpected reply to {command}: {reply}")]
    UnexpectedReply { command: &'static str, reply: String },

    #[error("Connection closed by server")]
    Closed,

    #[error("Timed out connecting to {0}")]
    ConnectTimeout(String),
}

impl StoreError {
    /// The server answered, so the connection is still usable
    ///
    /// Anything else means the stream is broken or out of sync and the
    /// session has to start again from connect.
    pub fn is_reply_error(&self) -> bool {
        matches!(self, StoreError::Server(_) | StoreError::UnexpectedReply { .. })
    }
}
