//! Host-based routing of public HTTP traffic to tunnel sessions.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::mpsc;

use revport_proto::{ControlMessage, RENDEZVOUS_TIMEOUT};

use crate::error::RelayError;
use crate::registry::Rendezvous;
use crate::ReverseStream;

/// Handle to a live control session. Cloned into every accept loop and
/// proxy request that needs to open a reverse stream.
#[derive(Clone)]
pub struct TunnelHandle {
    session: String,
    control_tx: mpsc::Sender<ControlMessage>,
    seq: Arc<AtomicU64>,
}

impl TunnelHandle {
    pub fn new(session: String, control_tx: mpsc::Sender<ControlMessage>) -> Self {
        Self {
            session,
            control_tx,
            seq: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn session(&self) -> &str {
        &self.session
    }

    fn next_key(&self) -> String {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed) + 1;
        format!("{}:{}", self.session, seq)
    }

    /// Ask the client to dial back, then wait for the reverse stream to
    /// arrive under a fresh correlation key.
    pub async fn open_stream(
        &self,
        registry: &Rendezvous<ReverseStream>,
    ) -> Result<ReverseStream, RelayError> {
        let key = self.next_key();
        let slot = registry.begin_wait(&self.session, &key)?;
        self.control_tx
            .send(ControlMessage::NewConnection { key })
            .await
            .map_err(|_| RelayError::ControlClosed)?;
        let stream = registry.await_with_timeout(slot, RENDEZVOUS_TIMEOUT).await?;
        Ok(stream)
    }
}

/// Maps public hostnames to the session serving them.
pub struct SubdomainRouter {
    routes: DashMap<String, TunnelHandle>,
}

impl SubdomainRouter {
    pub fn new() -> Self {
        Self {
            routes: DashMap::new(),
        }
    }

    pub fn insert(&self, hostname: String, handle: TunnelHandle) -> Result<(), RelayError> {
        match self.routes.entry(hostname) {
            Entry::Occupied(entry) => Err(RelayError::SubdomainTaken(entry.key().clone())),
            Entry::Vacant(entry) => {
                entry.insert(handle);
                Ok(())
            }
        }
    }

    /// Look up the session for a Host header value. Any `:port` suffix
    /// is ignored.
    pub fn lookup(&self, host: &str) -> Option<TunnelHandle> {
        let hostname = host.split(':').next().unwrap_or(host);
        self.routes.get(hostname).map(|entry| entry.value().clone())
    }

    /// Remove a route, but only if it still belongs to the given
    /// session. A replacement route registered under the same hostname
    /// by a newer session survives.
    pub fn remove(&self, hostname: &str, session: &str) {
        self.routes
            .remove_if(hostname, |_, handle| handle.session == session);
    }

    pub fn hostnames(&self) -> Vec<String> {
        self.routes.iter().map(|entry| entry.key().clone()).collect()
    }
}

impl Default for SubdomainRouter {
    fn default() -> Self {
        Self::new()
    }
}
