//! Store key layout for a single board
//!
//! Every key a board touches is derived from its name:
//! ```text
//! repl:<name>                   base
//! repl:<name>.<operation>       work queue per operation (command, copy, ...)
//! repl:<name>.console.stdout    console output
//! repl:<name>.console.stdin     console input
//! repl:<name>.complete          completion signal queue
//! board:<name>                  heartbeat (expiring)
//! boardinfo:<name>              platform tag (expiring)
//! ```
//!
//! The control plane relies on these exact names.

const REPL_PREFIX: &str = "repl:";
const HEARTBEAT_PREFIX: &str = "board:";
const BOARDINFO_PREFIX: &str = "boardinfo:";

/// Keys derived from one board name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyNamespace {
    name: String,
    base: String,
    command: String,
    console: String,
    stdout: String,
    stdin: String,
    complete: String,
    heartbeat: String,
    boardinfo: String,
}

impl KeyNamespace {
    /// Derive the namespace for `name`
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let base = format!("{REPL_PREFIX}{name}");
        let console = format!("{base}.console");

        Self {
            command: format!("{base}.command"),
            stdout: format!("{console}.stdout"),
            stdin: format!("{console}.stdin"),
            complete: format!("{base}.complete"),
            heartbeat: format!("{HEARTBEAT_PREFIX}{name}"),
            boardinfo: format!("{BOARDINFO_PREFIX}{name}"),
            console,
            base,
            name,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn console(&self) -> &str {
        &self.console
    }

    pub fn stdout(&self) -> &str {
        &self.stdout
    }

    pub fn stdin(&self) -> &str {
        &self.stdin
    }

    pub fn complete(&self) -> &str {
        &self.complete
    }

    pub fn heartbeat(&self) -> &str {
        &self.heartbeat
    }

    pub fn boardinfo(&self) -> &str {
        &self.boardinfo
    }

    /// Fully qualified queue key for an operation name
    pub fn queue_key(&self, operation: &str) -> String {
        format!("{}.{}", self.base, operation)
    }

    /// Every key owned by this namespace, given the registered operations
    ///
    /// Used when the namespace is retired. Duplicates are removed, so the
    /// `command` queue is listed once even though it doubles as an operation.
    pub fn owned_keys<'a>(&self, operations: impl IntoIterator<Item = &'a str>) -> Vec<String> {
        let mut keys: Vec<String> = operations
            .into_iter()
            .map(|op| self.queue_key(op))
            .collect();

        for fixed in [
            &self.command,
            &self.console,
            &self.stdout,
            &self.stdin,
            &self.complete,
            &self.heartbeat,
            &self.boardinfo,
        ] {
            if !keys.iter().any(|k| k == fixed) {
                keys.push(fixed.clone());
            }
        }

        keys
    }
}
