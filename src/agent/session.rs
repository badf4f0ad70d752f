//! State bound to one connection and one board name

use cloudclient_shared::{CompletionCode, HeartbeatState, KeyNamespace};
use tracing::warn;

use super::{completion, heartbeat};
use crate::command::HandlerRegistry;
use crate::config::Settings;
use crate::console::ConsoleStream;
use crate::transport::{StoreClient, StoreError};

/// Live connection plus everything derived from the board name
pub struct Session {
    client: StoreClient,
    namespace: KeyNamespace,
    registry: HandlerRegistry,
    console: ConsoleStream,
    platform: String,
    bindings: Vec<String>,
    console_buffer_size: usize,
    mirror_console: bool,
}

fn console_for(client: &StoreClient, namespace: &KeyNamespace, buffer_size: usize, mirror: bool) -> ConsoleStream {
    ConsoleStream::new(client.clone(), namespace.stdout(), namespace.stdin(), buffer_size)
        .with_local_mirror(mirror)
}

impl Session {
    pub fn new(client: StoreClient, name: &str, settings: &Settings) -> Self {
        let namespace = KeyNamespace::new(name);
        let registry = HandlerRegistry::bind(&namespace, settings.operations.iter().map(String::as_str));
        let console = console_for(
            &client,
            &namespace,
            settings.console_buffer_size,
            settings.supports_stream_redirection,
        );

        Self {
            client,
            namespace,
            registry,
            console,
            platform: settings.platform.clone(),
            bindings: settings.operations.clone(),
            console_buffer_size: settings.console_buffer_size,
            mirror_console: settings.supports_stream_redirection,
        }
    }

    pub fn client(&self) -> &StoreClient {
        &self.client
    }

    pub fn name(&self) -> &str {
        self.namespace.name()
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    pub fn console_mut(&mut self) -> &mut ConsoleStream {
        &mut self.console
    }

    /// Every key the current name owns
    pub fn owned_keys(&self) -> Vec<String> {
        self.namespace.owned_keys(self.registry.operation_names())
    }

    /// Re-derive namespace, bindings and console for `name`
    ///
    /// Touches nothing in the store; retiring the old keys is up to the
    /// caller.
    pub fn rebind(&mut self, name: &str) {
        self.namespace = KeyNamespace::new(name);
        self.registry = HandlerRegistry::bind(&self.namespace, self.bindings.iter().map(String::as_str));
        self.console = console_for(
            &self.client,
            &self.namespace,
            self.console_buffer_size,
            self.mirror_console,
        );
    }

    pub async fn heartbeat(&self, state: HeartbeatState, ttl_secs: u64) -> Result<(), StoreError> {
        heartbeat::publish(&self.client, &self.namespace, &self.platform, state, ttl_secs).await
    }

    pub async fn clear_completion(&self) -> Result<(), StoreError> {
        completion::clear(&self.client, &self.namespace).await
    }

    pub async fn signal_completion(&self, code: CompletionCode) -> Result<(), StoreError> {
        completion::signal(&self.client, &self.namespace, code).await
    }

    /// Drop leftovers from a previous run under this name
    pub async fn clear_stale_keys(&mut self) -> Result<(), StoreError> {
        self.client
            .del(&[
                self.namespace.command(),
                self.namespace.complete(),
                self.namespace.console(),
            ])
            .await?;
        self.console.clear().await
    }

    /// Delete bound queue keys that hold something other than a list
    ///
    /// One such key makes every pop over the registry fail. Returns how many
    /// keys were removed.
    pub async fn drop_foreign_queues(&self) -> Result<usize, StoreError> {
        let mut foreign = Vec::new();
        for key in self.registry.queue_keys() {
            let kind = self.client.key_type(key).await?;
            if kind != "list" && kind != "none" {
                warn!("Queue {} holds a {}, deleting it", key, kind);
                foreign.push(key);
            }
        }
        self.client.del(&foreign).await?;
        Ok(foreign.len())
    }
}
