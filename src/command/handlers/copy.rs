//! File transfer handler
//!
//! The popped value names a transaction hash holding `source` (a string key
//! in the store) and `dest` (a local path). The source is read in fixed-size
//! ranges until a read comes back short, so a source that changes size while
//! it is copied never causes a read past its end. A source whose length is an
//! exact multiple of the chunk size costs one final empty read.

use bytes::Bytes;
use cloudclient_shared::state_machine::AgentState;
use cloudclient_shared::CompletionCode;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tracing::{error, info};

use super::HandlerContext;
use crate::command::HandlerOutcome;
use crate::transport::{StoreClient, StoreError};

/// Transaction hash fields
const SOURCE_FIELD: &str = "source";
const DEST_FIELD: &str = "dest";

#[derive(Error, Debug)]
pub enum TransferError {
    #[error("transaction has no `{0}` field")]
    MissingField(&'static str),

    #[error("refusing destination {0:?}")]
    InvalidDestination(String),

    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Resolve `dest` under `root`
///
/// Leading separators are ignored so absolute destinations land inside the
/// root too. Parent components are refused.
pub(crate) fn resolve_destination(root: &Path, dest: &[u8]) -> Result<PathBuf, TransferError> {
    let raw = String::from_utf8_lossy(dest).into_owned();
    let mut relative = PathBuf::new();

    for component in Path::new(&raw).components() {
        match component {
            Component::Normal(part) => relative.push(part),
            Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
            Component::ParentDir => return Err(TransferError::InvalidDestination(raw)),
        }
    }

    if relative.as_os_str().is_empty() {
        return Err(TransferError::InvalidDestination(raw));
    }
    Ok(root.join(relative))
}

/// Copy `source` into `dest`, returning the number of bytes written
pub(crate) async fn transfer(
    client: &StoreClient,
    source: &str,
    dest: &Path,
    chunk_size: usize,
) -> Result<u64, TransferError> {
    let chunk_size = chunk_size.max(1) as i64;
    let io_err = |source| TransferError::Io {
        path: dest.to_path_buf(),
        source,
    };

    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).await.map_err(io_err)?;
    }
    let mut file = File::create(dest).await.map_err(io_err)?;

    let mut position: i64 = 0;
    loop {
        let data = client
            .getrange(source, position, position + chunk_size - 1)
            .await?;
        if !data.is_empty() {
            file.write_all(&data).await.map_err(io_err)?;
        }
        position += data.len() as i64;
        if (data.len() as i64) < chunk_size {
            break;
        }
    }

    file.flush().await.map_err(io_err)?;
    file.sync_all().await.map_err(io_err)?;
    Ok(position as u64)
}

async fn run_transaction(ctx: &HandlerContext<'_>, transaction: &[u8]) -> Result<u64, TransferError> {
    let client = ctx.session.client();
    let source = client
        .hget(transaction, SOURCE_FIELD)
        .await?
        .ok_or(TransferError::MissingField(SOURCE_FIELD))?;
    let dest = client
        .hget(transaction, DEST_FIELD)
        .await?
        .ok_or(TransferError::MissingField(DEST_FIELD))?;

    let source = String::from_utf8_lossy(&source).into_owned();
    let dest = resolve_destination(&ctx.settings.transfer_root, &dest)?;

    info!("Copying {} -> {}", source, dest.display());
    transfer(client, &source, &dest, ctx.settings.transfer_chunk_size).await
}

/// Handle a `copy` queue entry
///
/// The transaction record is deleted and completion signalled whatever the
/// transfer did, unless the connection itself is gone.
pub async fn handle_copy(
    ctx: &mut HandlerContext<'_>,
    transaction: Bytes,
) -> Result<HandlerOutcome, StoreError> {
    ctx.enter(AgentState::CopyingFile).await?;
    let label = String::from_utf8_lossy(&transaction).into_owned();

    let code = match run_transaction(ctx, &transaction).await {
        Ok(written) => {
            info!("Copied {} bytes", written);
            CompletionCode::Success
        }
        Err(TransferError::Store(e)) if !e.is_reply_error() => return Err(e),
        Err(e) => {
            error!("File transfer {} failed: {}", label, e);
            CompletionCode::Failure
        }
    };

    ctx.session.client().del(&[&transaction[..]]).await?;
    ctx.session.signal_completion(code).await?;
    ctx.finish().await?;
    Ok(HandlerOutcome::Completed(code))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::handlers::testing::Fixture;
    use crate::config::Settings;

    const COMPLETE: &str = "repl:b1.complete";

    fn fixture(root: &Path) -> Fixture {
        Fixture::with_settings(Settings {
            transfer_root: root.to_path_buf(),
            ..Settings::default()
        })
    }

    fn payload(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[tokio::test]
    async fn test_copy_reads_ceil_n_over_c_ranges() {
        let dir = tempfile::tempdir().unwrap();
        let mut fx = fixture(dir.path());
        let data = payload(1000);
        fx.store.set("file:1", &data);
        fx.store.hset("tx:1", "source", "file:1");
        fx.store.hset("tx:1", "dest", "out/firmware.bin");

        let outcome = handle_copy(&mut fx.ctx(), Bytes::from_static(b"tx:1"))
            .await
            .unwrap();

        assert_eq!(outcome, HandlerOutcome::Completed(CompletionCode::Success));
        assert_eq!(fx.store.commands("GETRANGE").len(), 4);
        let written = std::fs::read(dir.path().join("out/firmware.bin")).unwrap();
        assert_eq!(written, data);
        assert!(!fx.store.contains("tx:1"));
        assert_eq!(fx.store.list(COMPLETE), vec![Bytes::from_static(b"0")]);
        assert_eq!(fx.heartbeats(), vec!["copying", "idle"]);
    }

    #[tokio::test]
    async fn test_exact_multiple_costs_one_empty_read() {
        let dir = tempfile::tempdir().unwrap();
        let fx = fixture(dir.path());
        fx.store.set("file:1", payload(512));

        let dest = dir.path().join("a.bin");
        let written = transfer(&fx.store.client(), "file:1", &dest, 256).await.unwrap();

        assert_eq!(written, 512);
        let ranges = fx.store.commands("GETRANGE");
        assert_eq!(ranges.len(), 3);
        assert_eq!(&ranges[2][1][..], b"512");
        assert_eq!(&ranges[2][2][..], b"767");
    }

    #[tokio::test]
    async fn test_empty_source_creates_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let fx = fixture(dir.path());

        let dest = dir.path().join("empty.bin");
        let written = transfer(&fx.store.client(), "missing", &dest, 256).await.unwrap();

        assert_eq!(written, 0);
        assert_eq!(fx.store.commands("GETRANGE").len(), 1);
        assert!(std::fs::read(dest).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unwritable_destination_signals_failure() {
        let dir = tempfile::tempdir().unwrap();
        // A file where a directory is needed
        std::fs::write(dir.path().join("blocker"), b"x").unwrap();
        let mut fx = fixture(dir.path());
        fx.store.set("file:1", "data");
        fx.store.hset("tx:1", "source", "file:1");
        fx.store.hset("tx:1", "dest", "blocker/out.bin");

        let outcome = handle_copy(&mut fx.ctx(), Bytes::from_static(b"tx:1"))
            .await
            .unwrap();

        assert_eq!(outcome, HandlerOutcome::Completed(CompletionCode::Failure));
        assert!(!fx.store.contains("tx:1"));
        assert_eq!(fx.store.list(COMPLETE), vec![Bytes::from_static(b"1")]);
        assert_eq!(fx.store.get("board:b1").as_deref(), Some(&b"idle"[..]));
    }

    #[tokio::test]
    async fn test_missing_fields_signal_failure() {
        let dir = tempfile::tempdir().unwrap();
        let mut fx = fixture(dir.path());
        fx.store.hset("tx:1", "source", "file:1");

        let outcome = handle_copy(&mut fx.ctx(), Bytes::from_static(b"tx:1"))
            .await
            .unwrap();

        assert_eq!(outcome, HandlerOutcome::Completed(CompletionCode::Failure));
        assert!(!fx.store.contains("tx:1"));
        assert!(fx.store.commands("GETRANGE").is_empty());
    }

    #[tokio::test]
    async fn test_transaction_of_wrong_type_signals_failure() {
        let dir = tempfile::tempdir().unwrap();
        let mut fx = fixture(dir.path());
        fx.store.set("tx:1", "not a hash");

        let outcome = handle_copy(&mut fx.ctx(), Bytes::from_static(b"tx:1"))
            .await
            .unwrap();

        assert_eq!(outcome, HandlerOutcome::Completed(CompletionCode::Failure));
        assert!(!fx.store.contains("tx:1"));
        assert_eq!(fx.store.list(COMPLETE), vec![Bytes::from_static(b"1")]);
        assert_eq!(fx.heartbeats(), vec!["copying", "idle"]);
    }

    #[tokio::test]
    async fn test_source_of_wrong_type_signals_failure() {
        let dir = tempfile::tempdir().unwrap();
        let mut fx = fixture(dir.path());
        fx.store.push("file:1", "a list");
        fx.store.hset("tx:1", "source", "file:1");
        fx.store.hset("tx:1", "dest", "out.bin");

        let outcome = handle_copy(&mut fx.ctx(), Bytes::from_static(b"tx:1"))
            .await
            .unwrap();

        assert_eq!(outcome, HandlerOutcome::Completed(CompletionCode::Failure));
        assert!(!fx.store.contains("tx:1"));
        assert_eq!(fx.store.list(COMPLETE), vec![Bytes::from_static(b"1")]);
    }

    #[tokio::test]
    async fn test_dropped_connection_aborts_transfer() {
        let dir = tempfile::tempdir().unwrap();
        let mut fx = fixture(dir.path());
        fx.store.hset("tx:1", "source", "file:1");
        fx.store.hset("tx:1", "dest", "out.bin");
        // The copying heartbeat goes through, the first HGET does not
        fx.store.drop_after_commands(2);

        let err = handle_copy(&mut fx.ctx(), Bytes::from_static(b"tx:1"))
            .await
            .unwrap_err();

        assert!(matches!(err, StoreError::Closed));
        assert!(fx.store.contains("tx:1"));
    }

    #[tokio::test]
    async fn test_binary_transaction_key_is_deleted() {
        let dir = tempfile::tempdir().unwrap();
        let mut fx = fixture(dir.path());
        let key: &[u8] = b"tx:\xff\xfe";
        fx.store.set("file:1", "data");
        fx.store.hset(key, "source", "file:1");
        fx.store.hset(key, "dest", "out.bin");

        let outcome = handle_copy(&mut fx.ctx(), Bytes::copy_from_slice(key))
            .await
            .unwrap();

        assert_eq!(outcome, HandlerOutcome::Completed(CompletionCode::Success));
        assert!(!fx.store.contains(key));
        assert_eq!(std::fs::read(dir.path().join("out.bin")).unwrap(), b"data");
    }

    #[test]
    fn test_resolve_destination() {
        let root = Path::new("/srv/board");
        assert_eq!(
            resolve_destination(root, b"lib/app.py").unwrap(),
            root.join("lib/app.py")
        );
        assert_eq!(
            resolve_destination(root, b"/main.py").unwrap(),
            root.join("main.py")
        );
        assert!(matches!(
            resolve_destination(root, b"../etc/passwd"),
            Err(TransferError::InvalidDestination(_))
        ));
        assert!(resolve_destination(root, b"/").is_err());
    }
}
