//! TCP transport speaking RESP to a Redis-compatible store

use crate::transport::traits::{StoreConnection, StoreConnector};
use crate::transport::StoreError;
use async_trait::async_trait;
use bytes::Bytes;
use cloudclient_shared::codec::{self, FrameDecoder, Reply};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

/// A connected store session over TCP
pub struct TcpStoreConnection {
    inner: TcpStream,
    decoder: FrameDecoder,
    read_buf: Vec<u8>,
}

impl TcpStoreConnection {
    pub fn new(stream: TcpStream) -> Self {
        Self {
            inner: stream,
            decoder: FrameDecoder::new(),
            read_buf: vec![0u8; 4096],
        }
    }

    async fn read_reply(&mut self) -> Result<Reply, StoreError> {
        loop {
            match self.decoder.decode_next() {
                Ok(Some(reply)) => return Ok(reply),
                Ok(None) => {}
                Err(e) => {
                    // The stream is out of sync; nothing after this can be trusted
                    debug!("Discarding {} buffered bytes: {}", self.decoder.buffer_len(), e);
                    self.decoder.reset();
                    return Err(e.into());
                }
            }

            let n = self.inner.read(&mut self.read_buf).await?;
            if n == 0 {
                return Err(StoreError::Closed);
            }
            self.decoder.extend(&self.read_buf[..n]);
        }
    }
}

#[async_trait]
impl StoreConnection for TcpStoreConnection {
    async fn execute(&mut self, args: Vec<Bytes>) -> Result<Reply, StoreError> {
        let encoded = codec::encode_command(&args)?;
        self.inner.write_all(&encoded).await?;

        match self.read_reply().await? {
            Reply::Error(message) => Err(StoreError::Server(message)),
            reply => Ok(reply),
        }
    }
}

/// TCP connector for a store at `host:port`
pub struct TcpConnector {
    address: String,
    connect_timeout: Duration,
}

impl TcpConnector {
    pub fn new(host: &str, port: u16, connect_timeout: Duration) -> Self {
        Self {
            address: format!("{host}:{port}"),
            connect_timeout,
        }
    }
}

#[async_trait]
impl StoreConnector for TcpConnector {
    async fn connect(&self) -> Result<Box<dyn StoreConnection>, StoreError> {
        let stream = timeout(self.connect_timeout, TcpStream::connect(&self.address))
            .await
            .map_err(|_| StoreError::ConnectTimeout(self.address.clone()))??;
        stream.set_nodelay(true)?;
        debug!("Connected to store at {}", self.address);
        Ok(Box::new(TcpStoreConnection::new(stream)))
    }

    fn endpoint(&self) -> String {
        self.address.clone()
    }
}
