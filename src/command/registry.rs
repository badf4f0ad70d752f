//! Operation registry
//!
//! Maps each bound operation's queue key to the handler that services it.
//! Binding order is the order the queues are handed to BLPOP, which decides
//! priority when several queues hold work.

use cloudclient_shared::namespace::KeyNamespace;
use std::fmt;
use tracing::warn;

/// Operations the agent knows how to service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Command,
    Copy,
    Rename,
    Reset,
}

/// Default bindings, in polling order
pub const DEFAULT_BINDINGS: &[&str] = &["command", "copy", "rename", "reset"];

impl Operation {
    pub const ALL: [Operation; 4] = [
        Operation::Command,
        Operation::Copy,
        Operation::Rename,
        Operation::Reset,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Operation::Command => "command",
            Operation::Copy => "copy",
            Operation::Rename => "rename",
            Operation::Reset => "reset",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|op| op.name() == name)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Queue key to operation routing table for one board name
#[derive(Debug, Clone)]
pub struct HandlerRegistry {
    routes: Vec<(String, Operation)>,
}

impl HandlerRegistry {
    /// Bind `names` under `namespace`
    ///
    /// Names with no matching operation are dropped with a warning, as are
    /// repeats.
    pub fn bind<'a, I>(namespace: &KeyNamespace, names: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut routes: Vec<(String, Operation)> = Vec::new();
        for name in names {
            let Some(op) = Operation::from_name(name) else {
                warn!("No handler for operation {:?}, not binding it", name);
                continue;
            };
            if routes.iter().any(|(_, bound)| *bound == op) {
                continue;
            }
            routes.push((namespace.queue_key(op.name()), op));
        }
        Self { routes }
    }

    /// Operation serviced by the queue at `key`
    pub fn resolve(&self, key: &str) -> Option<Operation> {
        self.routes
            .iter()
            .find(|(bound, _)| bound == key)
            .map(|(_, op)| *op)
    }

    /// Queue keys in polling order
    pub fn queue_keys(&self) -> Vec<&str> {
        self.routes.iter().map(|(key, _)| key.as_str()).collect()
    }

    pub fn operation_names(&self) -> Vec<&'static str> {
        self.routes.iter().map(|(_, op)| op.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
