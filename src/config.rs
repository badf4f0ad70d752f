//! Startup configuration for the board agent
//!
//! Settings come from two places: the boot configuration file (the same flat
//! key/value store the control plane writes a board's name into) and command
//! line flags, which win. Everything is resolved once in `main` and handed to
//! the agent as a [`Settings`] value; handlers never look configuration up on
//! their own. The only thing written back at runtime is the board name.

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use cloudclient_shared::defaults;

use crate::command::DEFAULT_BINDINGS;
use serde_json::{Map, Value};
use thiserror::Error;

/// Boot configuration keys
pub mod keys {
    pub const NAME: &str = "name";
    pub const STORE_HOST: &str = "redis_server";
    pub const STORE_PORT: &str = "redis_port";
    pub const RESET_AFTER_COMMAND: &str = "reset_after_command";
    pub const ECHO_COMMANDS: &str = "echo_commands";
}

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

#[derive(Debug, Parser)]
#[command(name = "board-agent", about = "Remote control agent for network attached boards")]
pub struct Cli {
    #[command(subcommand)]
    pub mode: Option<Mode>,

    /// Boot configuration file (flat JSON object)
    #[arg(long, env = "BOARD_AGENT_CONFIG", default_value = "bootconfig.json")]
    pub config: PathBuf,

    /// Board name, overrides the configured one
    #[arg(long)]
    pub name: Option<String>,

    /// Store host, overrides `redis_server`
    #[arg(long)]
    pub host: Option<String>,

    /// Store port, overrides `redis_port`
    #[arg(long)]
    pub port: Option<u16>,

    /// Write each command to the console before running it
    #[arg(long)]
    pub echo_commands: bool,

    /// Soft-reset the agent after every command
    #[arg(long)]
    pub reset_after_command: bool,

    /// Mirror console output to this process's stdout
    #[arg(long)]
    pub redirect_console: bool,

    /// Directory that file transfer destinations are resolved under
    #[arg(long, default_value = ".")]
    pub transfer_root: PathBuf,
}

#[derive(Debug, Subcommand)]
pub enum Mode {
    /// Connect to the store and serve commands (default)
    Run,

    /// Add the agent start block to a boot script
    Autostart {
        #[arg(long, default_value = "main.sh")]
        script: PathBuf,
    },

    /// Remove the agent start block from a boot script
    DisableAutostart {
        #[arg(long, default_value = "main.sh")]
        script: PathBuf,
    },
}

// ---------------------------------------------------------------------------
// Configuration provider
// ---------------------------------------------------------------------------

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid boot configuration {path}: {source}")]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Boot configuration {0} is not a JSON object")]
    NotAnObject(PathBuf),
}

/// External key/value configuration the agent reads at startup and writes
/// its name back to
pub trait ConfigProvider: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;

    fn set(&self, key: &str, value: &str) -> Result<(), ConfigError>;
}

/// Boot configuration kept as a flat JSON object on disk
pub struct JsonFileConfig {
    path: PathBuf,
    values: Mutex<Map<String, Value>>,
}

impl JsonFileConfig {
    /// Load `path`; a missing file is an empty configuration
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let values = match std::fs::read(&path) {
            Ok(raw) => match serde_json::from_slice::<Value>(&raw) {
                Ok(Value::Object(map)) => map,
                Ok(_) => return Err(ConfigError::NotAnObject(path)),
                Err(source) => return Err(ConfigError::Json { path, source }),
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Map::new(),
            Err(source) => return Err(ConfigError::Io { path, source }),
        };

        Ok(Self {
            path,
            values: Mutex::new(values),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, values: &Map<String, Value>) -> Result<(), ConfigError> {
        let io_err = |source| ConfigError::Io {
            path: self.path.clone(),
            source,
        };
        let encoded = serde_json::to_vec_pretty(values).map_err(|source| ConfigError::Json {
            path: self.path.clone(),
            source,
        })?;

        // Write next to the target and rename so a crash never truncates it
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, encoded).map_err(io_err)?;
        std::fs::rename(&tmp, &self.path).map_err(io_err)?;
        Ok(())
    }
}

impl ConfigProvider for JsonFileConfig {
    fn get(&self, key: &str) -> Option<String> {
        let values = self.values.lock().ok()?;
        match values.get(key)? {
            Value::Null => None,
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), ConfigError> {
        let mut values = match self.values.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        values.insert(key.to_string(), Value::String(value.to_string()));
        self.persist(&values)
    }
}

/// Configuration held only in memory
#[cfg(test)]
#[derive(Debug, Default)]
pub struct MemoryConfig {
    values: Mutex<std::collections::HashMap<String, String>>,
}

#[cfg(test)]
impl MemoryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, key: &str, value: &str) -> Self {
        if let Ok(mut values) = self.values.lock() {
            values.insert(key.to_string(), value.to_string());
        }
        self
    }
}

#[cfg(test)]
impl ConfigProvider for MemoryConfig {
    fn get(&self, key: &str) -> Option<String> {
        self.values.lock().ok()?.get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), ConfigError> {
        if let Ok(mut values) = self.values.lock() {
            values.insert(key.to_string(), value.to_string());
        }
        Ok(())
    }
}

fn parse_flag(value: Option<String>) -> bool {
    matches!(
        value.as_deref().map(str::trim).map(str::to_ascii_lowercase).as_deref(),
        Some("1" | "true" | "yes" | "on")
    )
}

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// Everything the agent needs, resolved once at startup
#[derive(Debug, Clone)]
pub struct Settings {
    /// Board name; `None` means one is generated at registration
    pub name: Option<String>,
    /// Store host
    pub host: String,
    /// Store port
    pub port: u16,
    /// Reset after every command
    pub reset_after_command: bool,
    /// Echo commands to the console before running them
    pub echo_commands: bool,
    /// Whether the console can be hooked into local standard I/O
    pub supports_stream_redirection: bool,
    /// Platform tag published in `boardinfo:<name>`
    pub platform: String,
    /// Console output buffer size (0 disables buffering)
    pub console_buffer_size: usize,
    /// Bytes requested per file transfer read
    pub transfer_chunk_size: usize,
    /// Transfer destinations are resolved under this directory
    pub transfer_root: PathBuf,
    /// Bounded wait of the dispatch pop
    pub pop_timeout: Duration,
    /// Store connect timeout
    pub connect_timeout: Duration,
    /// Reconnect delay (initial)
    pub reconnect_delay: Duration,
    /// Reconnect delay cap; exceeding it gives up
    pub max_reconnect_delay: Duration,
    /// Upper bound for a single shell command
    pub command_timeout: Duration,
    /// Operations to bind, in polling order
    pub operations: Vec<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            name: None,
            host: "127.0.0.1".into(),
            port: defaults::STORE_PORT,
            reset_after_command: false,
            echo_commands: false,
            supports_stream_redirection: false,
            platform: std::env::consts::OS.into(),
            console_buffer_size: defaults::CONSOLE_BUFFER_SIZE,
            transfer_chunk_size: defaults::TRANSFER_CHUNK_SIZE,
            transfer_root: PathBuf::from("."),
            pop_timeout: Duration::from_secs(defaults::POP_TIMEOUT_SECS),
            connect_timeout: Duration::from_secs(5),
            reconnect_delay: Duration::from_secs(5),
            max_reconnect_delay: Duration::from_secs(900),
            command_timeout: Duration::from_secs(120),
            operations: DEFAULT_BINDINGS.iter().map(|op| op.to_string()).collect(),
        }
    }
}

impl Settings {
    /// Merge the boot configuration with command line overrides
    pub fn resolve(cli: &Cli, provider: &dyn ConfigProvider) -> Result<Self> {
        let mut settings = Settings::default();

        settings.name = cli
            .name
            .clone()
            .or_else(|| provider.get(keys::NAME))
            .filter(|n| !n.trim().is_empty());

        settings.host = match cli.host.clone().or_else(|| provider.get(keys::STORE_HOST)) {
            Some(host) if !host.trim().is_empty() => host,
            _ => bail!(
                "no store host configured: set `{}` in the boot configuration or pass --host",
                keys::STORE_HOST
            ),
        };

        settings.port = match (cli.port, provider.get(keys::STORE_PORT)) {
            (Some(port), _) => port,
            (None, Some(raw)) => raw
                .trim()
                .parse()
                .with_context(|| format!("invalid `{}` value {raw:?}", keys::STORE_PORT))?,
            (None, None) => defaults::STORE_PORT,
        };

        settings.reset_after_command =
            cli.reset_after_command || parse_flag(provider.get(keys::RESET_AFTER_COMMAND));
        settings.echo_commands = cli.echo_commands || parse_flag(provider.get(keys::ECHO_COMMANDS));
        settings.supports_stream_redirection = cli.redirect_console;
        settings.transfer_root = cli.transfer_root.clone();

        Ok(settings)
    }
}
