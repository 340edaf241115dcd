//! C6 Connection Pool: reuses remote-shell sessions per hypervisor host so
//! the Hypervisor Sampler doesn't reconnect on every counter read.

use std::collections::HashMap;
use std::sync::Mutex;

use bx_rexec::{RemoteShell, RexecError};

/// Builds a fresh session for a host. Implemented by whatever knows the
/// credentials (the Controller, in practice), kept separate from the pool
/// so the pool itself carries no secrets.
pub trait Connector: Send + Sync {
    fn connect(&self, host: &str) -> Result<Box<dyn RemoteShell>, RexecError>;
}

/// `host -> session` map guarded by a single mutex (§4.6, §5: "the only
/// shared mutable state"). `get` hands back exclusive access to the boxed
/// session for the duration of the closure, replacing it first if its
/// transport reports dead.
pub struct ConnectionPool<C: Connector> {
    connector: C,
    sessions: Mutex<HashMap<String, Box<dyn RemoteShell>>>,
}

impl<C: Connector> ConnectionPool<C> {
    pub fn new(connector: C) -> Self {
        ConnectionPool {
            connector,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Runs `f` against a live session for `host`, reconnecting first if
    /// none exists yet or the cached one is dead.
    pub fn with_session<R>(
        &self,
        host: &str,
        f: impl FnOnce(&mut dyn RemoteShell) -> R,
    ) -> Result<R, RexecError> {
        let mut sessions = self.sessions.lock().unwrap();

        let needs_reconnect = match sessions.get_mut(host) {
            Some(session) => !session.is_alive(),
            None => true,
        };
        if needs_reconnect {
            let fresh = self.connector.connect(host)?;
            sessions.insert(host.to_string(), fresh);
        }

        let session = sessions.get_mut(host).expect("just inserted or already live");
        Ok(f(session.as_mut()))
    }

    /// Idempotent: drops every cached session. Safe to call more than once.
    pub fn close_all(&self) {
        self.sessions.lock().unwrap().clear();
    }

    pub fn host_count(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }
}
