//! Typed store verbs on top of a raw connection
//!
//! The agent and its console stream share one connection through a cheap
//! clonable handle. Nothing runs concurrently inside an agent, so the lock is
//! never contended; it only lets both owners hold the same connection.

use bytes::Bytes;
use cloudclient_shared::codec::Reply;
use std::sync::Arc;
use tokio::sync::Mutex;

use super::traits::StoreConnection;
use super::StoreError;

/// Handle for issuing commands to the store
#[derive(Clone)]
pub struct StoreClient {
    connection: Arc<Mutex<Box<dyn StoreConnection>>>,
}

fn arg(s: &str) -> Bytes {
    Bytes::copy_from_slice(s.as_bytes())
}

fn unexpected(command: &'static str, reply: Reply) -> StoreError {
    StoreError::UnexpectedReply {
        command,
        reply: format!("{reply:?}"),
    }
}

impl StoreClient {
    pub fn new(connection: Box<dyn StoreConnection>) -> Self {
        Self {
            connection: Arc::new(Mutex::new(connection)),
        }
    }

    /// Send a raw command
    pub async fn call(&self, command: &'static str, args: Vec<Bytes>) -> Result<Reply, StoreError> {
        let mut full = Vec::with_capacity(args.len() + 1);
        full.push(Bytes::from_static(command.as_bytes()));
        full.extend(args);
        self.connection.lock().await.execute(full).await
    }

    async fn call_integer(&self, command: &'static str, args: Vec<Bytes>) -> Result<i64, StoreError> {
        match self.call(command, args).await? {
            Reply::Integer(n) => Ok(n),
            other => Err(unexpected(command, other)),
        }
    }

    /// `DEL key [key ...]`, returns how many keys existed
    pub async fn del<S: AsRef<[u8]>>(&self, keys: &[S]) -> Result<i64, StoreError> {
        if keys.is_empty() {
            return Ok(0);
        }
        let args = keys.iter().map(|k| Bytes::copy_from_slice(k.as_ref())).collect();
        self.call_integer("DEL", args).await
    }

    /// `SETEX key ttl value`
    pub async fn setex(&self, key: &str, ttl_secs: u64, value: Bytes) -> Result<(), StoreError> {
        match self
            .call("SETEX", vec![arg(key), arg(&ttl_secs.to_string()), value])
            .await?
        {
            Reply::Status(_) => Ok(()),
            other => Err(unexpected("SETEX", other)),
        }
    }

    /// `GETRANGE key start end` (inclusive end, negative counts from the back)
    pub async fn getrange(&self, key: &str, start: i64, end: i64) -> Result<Bytes, StoreError> {
        match self
            .call(
                "GETRANGE",
                vec![arg(key), arg(&start.to_string()), arg(&end.to_string())],
            )
            .await?
        {
            Reply::Bulk(data) => Ok(data),
            Reply::Nil => Ok(Bytes::new()),
            other => Err(unexpected("GETRANGE", other)),
        }
    }

    /// `APPEND key data`, returns the new length
    pub async fn append(&self, key: &str, data: Bytes) -> Result<i64, StoreError> {
        self.call_integer("APPEND", vec![arg(key), data]).await
    }

    /// `RPUSH key value`, returns the new list length
    pub async fn rpush(&self, key: &str, value: Bytes) -> Result<i64, StoreError> {
        self.call_integer("RPUSH", vec![arg(key), value]).await
    }

    /// `BLPOP key [key ...] timeout`
    ///
    /// Returns the key that had data and the popped value, or `None` when the
    /// timeout elapsed.
    pub async fn blpop<S: AsRef<str>>(
        &self,
        keys: &[S],
        timeout_secs: u64,
    ) -> Result<Option<(String, Bytes)>, StoreError> {
        let mut args: Vec<Bytes> = keys.iter().map(|k| arg(k.as_ref())).collect();
        args.push(arg(&timeout_secs.to_string()));

        match self.call("BLPOP", args).await? {
            Reply::Nil => Ok(None),
            Reply::Array(items) => match <[Reply; 2]>::try_from(items) {
                Ok([Reply::Bulk(key), Reply::Bulk(value)]) => {
                    Ok(Some((String::from_utf8_lossy(&key).into_owned(), value)))
                }
                Ok(other) => Err(unexpected("BLPOP", Reply::Array(other.into()))),
                Err(items) => Err(unexpected("BLPOP", Reply::Array(items))),
            },
            other => Err(unexpected("BLPOP", other)),
        }
    }

    /// `HGET key field`
    ///
    /// The key is passed through untouched, so records named by arbitrary
    /// bytes are still reachable.
    pub async fn hget<K: AsRef<[u8]>>(&self, key: K, field: &str) -> Result<Option<Bytes>, StoreError> {
        let key = Bytes::copy_from_slice(key.as_ref());
        match self.call("HGET", vec![key, arg(field)]).await? {
            Reply::Bulk(data) => Ok(Some(data)),
            Reply::Nil => Ok(None),
            other => Err(unexpected("HGET", other)),
        }
    }

    /// `INCR key`
    pub async fn incr(&self, key: &str) -> Result<i64, StoreError> {
        self.call_integer("INCR", vec![arg(key)]).await
    }

    /// `TYPE key`: `none`, `string`, `list`, `hash`, ...
    pub async fn key_type(&self, key: &str) -> Result<String, StoreError> {
        match self.call("TYPE", vec![arg(key)]).await? {
            Reply::Status(kind) => Ok(kind),
            other => Err(unexpected("TYPE", other)),
        }
    }

    /// `STRLEN key`
    pub async fn strlen(&self, key: &str) -> Result<i64, StoreError> {
        self.call_integer("STRLEN", vec![arg(key)]).await
    }
}
