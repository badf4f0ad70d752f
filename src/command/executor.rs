//! Pluggable command executor
//!
//! The agent does not know what a "command" means. It hands the raw bytes
//! popped from the command queue to a [`CommandExecutor`] together with the
//! console, and only records whether execution succeeded.

use async_trait::async_trait;
use bytes::Bytes;
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;

use crate::console::ConsoleStream;
use crate::transport::StoreError;

/// Output beyond this many bytes per stream is cut off
const MAX_OUTPUT_SIZE: usize = 64 * 1024;

/// Default command timeout
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Why a command did not succeed
#[derive(Error, Debug)]
pub enum ExecError {
    #[error("command is not valid UTF-8")]
    InvalidEncoding,

    #[error("failed to run command: {0}")]
    Io(#[source] std::io::Error),

    #[error("command exited with status {0}")]
    ExitStatus(i32),

    #[error("command killed by signal")]
    Killed,

    #[error("command timed out after {0:?}")]
    Timeout(Duration),

    /// The command failed and said why on stderr
    #[error("{0}")]
    Raised(String),

    /// The console itself failed; the store connection is gone
    #[error("console unavailable: {0}")]
    Console(#[from] StoreError),
}

/// Runs one command, writing anything it prints to `console`
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn execute(&self, code: &[u8], console: &mut ConsoleStream) -> Result<(), ExecError>;
}

/// Runs commands with `sh -c`
///
/// Input already waiting on the console is handed to the command's stdin.
#[derive(Debug, Clone)]
pub struct ShellExecutor {
    timeout: Duration,
}

impl Default for ShellExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl ShellExecutor {
    pub fn new() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Set the command timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Last non-blank line of `stderr`
fn last_error_line(stderr: &[u8]) -> Option<String> {
    String::from_utf8_lossy(stderr)
        .lines()
        .rev()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(str::to_string)
}

fn truncate(mut output: Vec<u8>) -> Vec<u8> {
    if output.len() > MAX_OUTPUT_SIZE {
        output.truncate(MAX_OUTPUT_SIZE);
        output.extend_from_slice(b"\n... (output truncated)\n");
    }
    output
}

#[async_trait]
impl CommandExecutor for ShellExecutor {
    async fn execute(&self, code: &[u8], console: &mut ConsoleStream) -> Result<(), ExecError> {
        let script = std::str::from_utf8(code).map_err(|_| ExecError::InvalidEncoding)?;
        let input = if console.any().await? > 0 {
            console.readall().await?
        } else {
            Bytes::new()
        };

        let mut child = Command::new("sh")
            .arg("-c")
            .arg(script)
            .stdin(if input.is_empty() { Stdio::null() } else { Stdio::piped() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(ExecError::Io)?;

        let child_stdin = child.stdin.take();
        let mut child_stdout = child.stdout.take();
        let mut child_stderr = child.stderr.take();

        let run = async {
            let mut out = Vec::new();
            let mut err = Vec::new();

            let feed = async {
                if let Some(mut pipe) = child_stdin {
                    // The command may exit without reading its input
                    match pipe.write_all(&input).await {
                        Err(e) if e.kind() != std::io::ErrorKind::BrokenPipe => return Err(e),
                        _ => {}
                    }
                }
                Ok::<_, std::io::Error>(())
            };
            let read_out = async {
                if let Some(pipe) = child_stdout.as_mut() {
                    pipe.read_to_end(&mut out).await?;
                }
                Ok::<_, std::io::Error>(())
            };
            let read_err = async {
                if let Some(pipe) = child_stderr.as_mut() {
                    pipe.read_to_end(&mut err).await?;
                }
                Ok::<_, std::io::Error>(())
            };
            futures::try_join!(feed, read_out, read_err)?;

            let status = child.wait().await?;
            Ok::<_, std::io::Error>((status, out, err))
        };

        let (status, out, err) = match tokio::time::timeout(self.timeout, run).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => return Err(ExecError::Io(e)),
            // Dropping the child kills it
            Err(_) => return Err(ExecError::Timeout(self.timeout)),
        };

        let reason = last_error_line(&err);
        console.write(&truncate(out)).await?;
        console.write(&truncate(err)).await?;

        if status.success() {
            return Ok(());
        }
        match (status.code(), reason) {
            (None, _) => Err(ExecError::Killed),
            (Some(_), Some(reason)) => Err(ExecError::Raised(reason)),
            (Some(code), None) => Err(ExecError::ExitStatus(code)),
        }
    }
}
