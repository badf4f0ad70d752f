//! Store-backed console stream
//!
//! Output is buffered locally and appended to `<console>.stdout`; input is
//! read from `<console>.stdin` through a cursor that only moves forward.
//! The control plane sees output only once it has been flushed.

use bytes::{Bytes, BytesMut};
use std::io::Write;
use tracing::warn;

use crate::transport::{StoreClient, StoreError};

/// Buffered bidirectional stream over two string keys
pub struct ConsoleStream {
    client: StoreClient,
    stdout_key: String,
    stdin_key: String,
    buffer: BytesMut,
    buffer_size: usize,
    read_position: usize,
    mirror_local: bool,
}

impl ConsoleStream {
    /// Create a stream over `<console_key>.stdout` / `<console_key>.stdin`
    ///
    /// A `buffer_size` of 0 disables buffering: every write goes straight to
    /// the store.
    pub fn new(client: StoreClient, stdout_key: &str, stdin_key: &str, buffer_size: usize) -> Self {
        Self {
            client,
            stdout_key: stdout_key.to_string(),
            stdin_key: stdin_key.to_string(),
            buffer: BytesMut::with_capacity(buffer_size),
            buffer_size,
            read_position: 0,
            mirror_local: false,
        }
    }

    /// Also copy everything written to this process's stdout
    pub fn with_local_mirror(mut self, enabled: bool) -> Self {
        self.mirror_local = enabled;
        self
    }

    #[cfg(test)]
    pub fn stdout_key(&self) -> &str {
        &self.stdout_key
    }

    #[cfg(test)]
    pub fn stdin_key(&self) -> &str {
        &self.stdin_key
    }

    #[cfg(test)]
    /// Bytes written but not yet flushed
    pub fn buffered(&self) -> &[u8] {
        &self.buffer
    }

    #[cfg(test)]
    pub fn read_position(&self) -> usize {
        self.read_position
    }

    /// Write `data`, returning the number of bytes accepted
    pub async fn write(&mut self, data: &[u8]) -> Result<usize, StoreError> {
        if data.is_empty() {
            return Ok(0);
        }
        self.mirror(data);

        if self.buffer_size == 0 {
            self.client
                .append(&self.stdout_key, Bytes::copy_from_slice(data))
                .await?;
            return Ok(data.len());
        }

        let remaining = self.buffer_size - self.buffer.len();
        if data.len() > remaining {
            self.flush().await?;
        }

        if data.len() > self.buffer_size {
            self.client
                .append(&self.stdout_key, Bytes::copy_from_slice(data))
                .await?;
        } else {
            self.buffer.extend_from_slice(data);
            if data.contains(&b'\n') {
                self.flush().await?;
            }
        }

        Ok(data.len())
    }

    /// Append the buffered output to the store in one operation
    pub async fn flush(&mut self) -> Result<(), StoreError> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let pending = self.buffer.split().freeze();
        self.client.append(&self.stdout_key, pending).await?;
        Ok(())
    }

    /// Read up to `size` bytes of input (everything left when `None`)
    ///
    /// May return fewer bytes than requested, including none.
    pub async fn read(&mut self, size: Option<usize>) -> Result<Bytes, StoreError> {
        let start = self.read_position as i64;
        let end = match size {
            Some(0) => return Ok(Bytes::new()),
            Some(n) => start + n as i64 - 1,
            None => -1,
        };

        let data = self.client.getrange(&self.stdin_key, start, end).await?;
        self.read_position += data.len();
        Ok(data)
    }

    /// Read all remaining input
    pub async fn readall(&mut self) -> Result<Bytes, StoreError> {
        self.read(None).await
    }

    /// Bytes of input waiting to be read
    pub async fn any(&self) -> Result<usize, StoreError> {
        let len = self.client.strlen(&self.stdin_key).await?;
        Ok((len.max(0) as usize).saturating_sub(self.read_position))
    }

    /// Drop buffered output, rewind input and delete both keys
    pub async fn clear(&mut self) -> Result<(), StoreError> {
        self.buffer.clear();
        self.read_position = 0;
        self.client
            .del(&[self.stdout_key.as_str(), self.stdin_key.as_str()])
            .await?;
        Ok(())
    }

    fn mirror(&self, data: &[u8]) {
        if !self.mirror_local {
            return;
        }
        let mut stdout = std::io::stdout().lock();
        if let Err(e) = stdout.write_all(data).and_then(|_| stdout.flush()) {
            warn!("Console mirror write failed: {}", e);
        }
    }
}
