//! In-memory store used by the tests
//!
//! Implements the handful of verbs the agent speaks with the store's own
//! semantics (inclusive `GETRANGE`, `BLPOP` key order, type errors) and records
//! every command so tests can assert on traffic. There is never a second
//! writer while a pop is pending, so a `BLPOP` miss just sleeps out its
//! timeout and returns nil. Tests that pop empty queues run on paused time.

use async_trait::async_trait;
use bytes::Bytes;
use cloudclient_shared::codec::Reply;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use super::client::StoreClient;
use super::traits::{StoreConnection, StoreConnector};
use super::StoreError;

#[derive(Debug, Clone)]
enum Value {
    Str(Vec<u8>),
    List(VecDeque<Bytes>),
    Hash(HashMap<Bytes, Bytes>),
}

#[derive(Debug, Default)]
struct Inner {
    data: HashMap<Bytes, Value>,
    ttls: HashMap<Bytes, u64>,
    log: Vec<Vec<Bytes>>,
    /// Connect attempts that should still fail
    failing_connects: usize,
    connect_attempts: usize,
    /// Commands after which every further command fails with `Closed`
    commands_until_drop: Option<usize>,
}

/// Shared in-memory keyspace
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

fn wrong_type() -> StoreError {
    StoreError::Server("WRONGTYPE Operation against a key holding the wrong kind of value".into())
}

fn int_arg(arg: &Bytes) -> Result<i64, StoreError> {
    std::str::from_utf8(arg)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| StoreError::Server("ERR value is not an integer or out of range".into()))
}

fn arity(args: &[Bytes], min: usize) -> Result<(), StoreError> {
    if args.len() < min {
        return Err(StoreError::Server("ERR wrong number of arguments".into()));
    }
    Ok(())
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().expect("memory store poisoned")
    }

    /// A client on a fresh connection to this store
    pub fn client(&self) -> StoreClient {
        StoreClient::new(Box::new(MemoryConnection {
            store: self.clone(),
        }))
    }

    pub fn connector(&self) -> MemoryConnector {
        MemoryConnector {
            store: self.clone(),
        }
    }

    /// Make the next `n` connect attempts fail
    pub fn fail_next_connects(&self, n: usize) {
        self.lock().failing_connects = n;
    }

    pub fn connect_attempts(&self) -> usize {
        self.lock().connect_attempts
    }

    /// Accept `n` more commands, then fail everything as a dropped connection
    pub fn drop_after_commands(&self, n: usize) {
        self.lock().commands_until_drop = Some(n);
    }

    pub fn contains(&self, key: impl AsRef<[u8]>) -> bool {
        self.lock().data.contains_key(key.as_ref())
    }

    /// String value of `key`
    pub fn get(&self, key: &str) -> Option<Bytes> {
        match self.lock().data.get(key.as_bytes()) {
            Some(Value::Str(s)) => Some(Bytes::copy_from_slice(s)),
            _ => None,
        }
    }

    pub fn set(&self, key: &str, value: impl AsRef<[u8]>) {
        self.lock().data.insert(
            Bytes::copy_from_slice(key.as_bytes()),
            Value::Str(value.as_ref().to_vec()),
        );
    }

    /// Items of the list at `key`
    pub fn list(&self, key: &str) -> Vec<Bytes> {
        match self.lock().data.get(key.as_bytes()) {
            Some(Value::List(items)) => items.iter().cloned().collect(),
            _ => Vec::new(),
        }
    }

    pub fn push(&self, key: &str, value: impl AsRef<[u8]>) {
        let mut inner = self.lock();
        let entry = inner
            .data
            .entry(Bytes::copy_from_slice(key.as_bytes()))
            .or_insert_with(|| Value::List(VecDeque::new()));
        if let Value::List(items) = entry {
            items.push_back(Bytes::copy_from_slice(value.as_ref()));
        }
    }

    pub fn hset(&self, key: impl AsRef<[u8]>, field: &str, value: impl AsRef<[u8]>) {
        let mut inner = self.lock();
        let entry = inner
            .data
            .entry(Bytes::copy_from_slice(key.as_ref()))
            .or_insert_with(|| Value::Hash(HashMap::new()));
        if let Value::Hash(fields) = entry {
            fields.insert(
                Bytes::copy_from_slice(field.as_bytes()),
                Bytes::copy_from_slice(value.as_ref()),
            );
        }
    }

    /// Last ttl written for `key` with SETEX
    pub fn ttl(&self, key: &str) -> Option<u64> {
        self.lock().ttls.get(key.as_bytes()).copied()
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .lock()
            .data
            .keys()
            .map(|k| String::from_utf8_lossy(k).into_owned())
            .collect();
        keys.sort();
        keys
    }

    /// Every recorded invocation of `command`, arguments only
    pub fn commands(&self, command: &str) -> Vec<Vec<Bytes>> {
        self.lock()
            .log
            .iter()
            .filter(|entry| entry[0].eq_ignore_ascii_case(command.as_bytes()))
            .map(|entry| entry[1..].to_vec())
            .collect()
    }

    /// Every recorded command name, in order
    pub fn command_names(&self) -> Vec<String> {
        self.lock()
            .log
            .iter()
            .map(|entry| String::from_utf8_lossy(&entry[0]).to_ascii_uppercase())
            .collect()
    }

    pub fn clear_log(&self) {
        self.lock().log.clear();
    }

    fn apply(&self, args: Vec<Bytes>) -> Result<Reply, StoreError> {
        let mut inner = self.lock();

        if let Some(remaining) = inner.commands_until_drop.as_mut() {
            if *remaining == 0 {
                return Err(StoreError::Closed);
            }
            *remaining -= 1;
        }

        arity(&args, 1)?;
        inner.log.push(args.clone());
        let command = String::from_utf8_lossy(&args[0]).to_ascii_uppercase();
        let args = &args[1..];

        match command.as_str() {
            "DEL" => {
                arity(args, 1)?;
                let mut removed = 0;
                for key in args {
                    inner.ttls.remove(key);
                    if inner.data.remove(key).is_some() {
                        removed += 1;
                    }
                }
                Ok(Reply::Integer(removed))
            }
            "SETEX" => {
                arity(args, 3)?;
                let ttl = int_arg(&args[1])?;
                if ttl <= 0 {
                    return Err(StoreError::Server("ERR invalid expire time in 'setex' command".into()));
                }
                inner.data.insert(args[0].clone(), Value::Str(args[2].to_vec()));
                inner.ttls.insert(args[0].clone(), ttl as u64);
                Ok(Reply::Status("OK".into()))
            }
            "GET" => {
                arity(args, 1)?;
                match inner.data.get(&args[0]) {
                    None => Ok(Reply::Nil),
                    Some(Value::Str(s)) => Ok(Reply::Bulk(Bytes::copy_from_slice(s))),
                    Some(_) => Err(wrong_type()),
                }
            }
            "GETRANGE" => {
                arity(args, 3)?;
                let start = int_arg(&args[1])?;
                let end = int_arg(&args[2])?;
                let value = match inner.data.get(&args[0]) {
                    None => return Ok(Reply::Bulk(Bytes::new())),
                    Some(Value::Str(s)) => s,
                    Some(_) => return Err(wrong_type()),
                };
                Ok(Reply::Bulk(byte_range(value, start, end)))
            }
            "APPEND" => {
                arity(args, 2)?;
                let entry = inner
                    .data
                    .entry(args[0].clone())
                    .or_insert_with(|| Value::Str(Vec::new()));
                match entry {
                    Value::Str(s) => {
                        s.extend_from_slice(&args[1]);
                        Ok(Reply::Integer(s.len() as i64))
                    }
                    _ => Err(wrong_type()),
                }
            }
            "RPUSH" => {
                arity(args, 2)?;
                let entry = inner
                    .data
                    .entry(args[0].clone())
                    .or_insert_with(|| Value::List(VecDeque::new()));
                match entry {
                    Value::List(items) => {
                        items.extend(args[1..].iter().cloned());
                        Ok(Reply::Integer(items.len() as i64))
                    }
                    _ => Err(wrong_type()),
                }
            }
            "BLPOP" => {
                arity(args, 2)?;
                int_arg(&args[args.len() - 1])?;
                for key in &args[..args.len() - 1] {
                    let popped = match inner.data.get_mut(key) {
                        Some(Value::List(items)) => items.pop_front().map(|v| (v, items.is_empty())),
                        Some(_) => return Err(wrong_type()),
                        None => None,
                    };
                    if let Some((value, now_empty)) = popped {
                        if now_empty {
                            inner.data.remove(key);
                        }
                        return Ok(Reply::Array(vec![Reply::Bulk(key.clone()), Reply::Bulk(value)]));
                    }
                }
                Ok(Reply::Nil)
            }
            "HGET" => {
                arity(args, 2)?;
                match inner.data.get(&args[0]) {
                    None => Ok(Reply::Nil),
                    Some(Value::Hash(fields)) => Ok(fields
                        .get(&args[1])
                        .cloned()
                        .map(Reply::Bulk)
                        .unwrap_or(Reply::Nil)),
                    Some(_) => Err(wrong_type()),
                }
            }
            "INCR" => {
                arity(args, 1)?;
                let current = match inner.data.get(&args[0]) {
                    None => 0,
                    Some(Value::Str(s)) => int_arg(&Bytes::copy_from_slice(s))?,
                    Some(_) => return Err(wrong_type()),
                };
                let next = current + 1;
                inner
                    .data
                    .insert(args[0].clone(), Value::Str(next.to_string().into_bytes()));
                Ok(Reply::Integer(next))
            }
            "TYPE" => {
                arity(args, 1)?;
                let kind = match inner.data.get(&args[0]) {
                    None => "none",
                    Some(Value::Str(_)) => "string",
                    Some(Value::List(_)) => "list",
                    Some(Value::Hash(_)) => "hash",
                };
                Ok(Reply::Status(kind.into()))
            }
            "STRLEN" => {
                arity(args, 1)?;
                match inner.data.get(&args[0]) {
                    None => Ok(Reply::Integer(0)),
                    Some(Value::Str(s)) => Ok(Reply::Integer(s.len() as i64)),
                    Some(_) => Err(wrong_type()),
                }
            }
            other => Err(StoreError::Server(format!("ERR unknown command '{other}'"))),
        }
    }
}

/// `GETRANGE` index arithmetic: inclusive end, negatives count from the back
fn byte_range(value: &[u8], start: i64, end: i64) -> Bytes {
    let len = value.len() as i64;
    if len == 0 {
        return Bytes::new();
    }

    let mut start = if start < 0 { len + start } else { start };
    let mut end = if end < 0 { len + end } else { end };
    start = start.max(0);
    end = end.max(0).min(len - 1);

    if start > end {
        return Bytes::new();
    }
    Bytes::copy_from_slice(&value[start as usize..=end as usize])
}

struct MemoryConnection {
    store: MemoryStore,
}

#[async_trait]
impl StoreConnection for MemoryConnection {
    async fn execute(&mut self, args: Vec<Bytes>) -> Result<Reply, StoreError> {
        let pop_timeout = match args.first() {
            Some(verb) if verb.eq_ignore_ascii_case(b"BLPOP") => {
                args.last().and_then(|t| int_arg(t).ok())
            }
            _ => None,
        };

        let reply = self.store.apply(args)?;
        if let (Reply::Nil, Some(secs)) = (&reply, pop_timeout) {
            tokio::time::sleep(Duration::from_secs(secs.max(0) as u64)).await;
        }
        Ok(reply)
    }
}

/// Connector handing out connections to one [`MemoryStore`]
pub struct MemoryConnector {
    store: MemoryStore,
}

#[async_trait]
impl StoreConnector for MemoryConnector {
    async fn connect(&self) -> Result<Box<dyn StoreConnection>, StoreError> {
        let mut inner = self.store.lock();
        inner.connect_attempts += 1;
        if inner.failing_connects > 0 {
            inner.failing_connects -= 1;
            return Err(StoreError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "connection refused",
            )));
        }
        // A new connection is healthy once the previous one was dropped
        if inner.commands_until_drop == Some(0) {
            inner.commands_until_drop = None;
        }
        drop(inner);

        Ok(Box::new(MemoryConnection {
            store: self.store.clone(),
        }))
    }

    fn endpoint(&self) -> String {
        "memory".into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_byte_range_semantics() {
        let v = b"0123456789";
        assert_eq!(&byte_range(v, 0, 3)[..], b"0123");
        assert_eq!(&byte_range(v, 8, 20)[..], b"89");
        assert_eq!(&byte_range(v, -3, -1)[..], b"789");
        assert_eq!(&byte_range(v, 0, -1)[..], v);
        assert_eq!(&byte_range(v, 10, 12)[..], b"");
        assert_eq!(&byte_range(v, 5, 2)[..], b"");
        assert_eq!(&byte_range(b"", 0, -1)[..], b"");
    }

    #[tokio::test(start_paused = true)]
    async fn test_blpop_miss_waits_out_timeout() {
        let store = MemoryStore::new();
        let start = tokio::time::Instant::now();
        assert_eq!(store.client().blpop(&["a"], 3).await.unwrap(), None);
        assert!(start.elapsed() >= Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_blpop_checks_keys_in_order() {
        let store = MemoryStore::new();
        store.push("a", "from-a");
        store.push("b", "from-b");

        let client = store.client();
        let (key, _) = client.blpop(&["b", "a"], 1).await.unwrap().unwrap();
        assert_eq!(key, "b");
        let (key, _) = client.blpop(&["b", "a"], 1).await.unwrap().unwrap();
        assert_eq!(key, "a");
        assert!(!store.contains("a"));
    }

    #[tokio::test]
    async fn test_connect_failures_and_drops() {
        let store = MemoryStore::new();
        store.fail_next_connects(2);
        let connector = store.connector();

        assert!(connector.connect().await.is_err());
        assert!(connector.connect().await.is_err());
        let mut conn = connector.connect().await.unwrap();
        assert_eq!(store.connect_attempts(), 3);

        store.drop_after_commands(1);
        let strlen = || vec![Bytes::from_static(b"STRLEN"), Bytes::from_static(b"k")];
        assert!(conn.execute(strlen()).await.is_ok());
        assert!(matches!(conn.execute(strlen()).await, Err(StoreError::Closed)));
    }
}
