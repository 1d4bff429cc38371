//! Correlation registry
//!
//! Pairs an inbound public connection with the reverse-dialed connection
//! the client opens in response to a `new_connection` control message.
//! One waiter per key; delivery happens at most once; entries are
//! removed the moment they resolve, time out, or their owning session
//! closes, so key strings can be reused safely.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::trace;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RendezvousError {
    #[error("another waiter already holds key {0}")]
    DuplicateKey(String),

    #[error("wait for reverse connection timed out")]
    Timeout,

    #[error("peer could not upgrade the reverse connection")]
    HijackUnsupported,

    #[error("session closed while waiting")]
    Cancelled,
}

struct Waiter<T> {
    session: String,
    tx: oneshot::Sender<Option<T>>,
}

/// A single-use slot handed to the task waiting for a paired connection.
#[derive(Debug)]
pub struct RendezvousSlot<T> {
    key: String,
    rx: oneshot::Receiver<Option<T>>,
}

pub struct Rendezvous<T> {
    waiters: DashMap<String, Waiter<T>>,
}

impl<T: Send + 'static> Rendezvous<T> {
    pub fn new() -> Self {
        Self {
            waiters: DashMap::new(),
        }
    }

    /// Register a waiter for `key`, owned by `session`. A live waiter
    /// under the same key is a caller error.
    pub fn begin_wait(
        &self,
        session: &str,
        key: &str,
    ) -> Result<RendezvousSlot<T>, RendezvousError> {
        match self.waiters.entry(key.to_string()) {
            Entry::Occupied(_) => Err(RendezvousError::DuplicateKey(key.to_string())),
            Entry::Vacant(slot) => {
                let (tx, rx) = oneshot::channel();
                slot.insert(Waiter {
                    session: session.to_string(),
                    tx,
                });
                Ok(RendezvousSlot {
                    key: key.to_string(),
                    rx,
                })
            }
        }
    }

    /// Deliver a connection (or `None` when the upgrade to byte-stream
    /// mode failed) to the waiter for `key`. Returns false when nobody
    /// is waiting; the caller must close the supplied connection.
    pub fn resolve(&self, key: &str, conn: Option<T>) -> bool {
        match self.waiters.remove(key) {
            Some((_, waiter)) => waiter.tx.send(conn).is_ok(),
            None => false,
        }
    }

    /// Wait on a slot for up to `timeout`. On timeout the key is removed
    /// so a later `begin_wait` with the same string starts clean.
    pub async fn await_with_timeout(
        &self,
        slot: RendezvousSlot<T>,
        timeout: Duration,
    ) -> Result<T, RendezvousError> {
        match tokio::time::timeout(timeout, slot.rx).await {
            Ok(Ok(Some(conn))) => Ok(conn),
            Ok(Ok(None)) => Err(RendezvousError::HijackUnsupported),
            // Sender dropped: the owning session tore down.
            Ok(Err(_)) => Err(RendezvousError::Cancelled),
            Err(_) => {
                self.waiters.remove(&slot.key);
                trace!("rendezvous for key {} timed out", slot.key);
                Err(RendezvousError::Timeout)
            }
        }
    }

    /// Drop every waiter owned by `session` so in-flight waits fail
    /// fast instead of running out their timeout.
    pub fn cancel_session(&self, session: &str) {
        self.waiters.retain(|_, waiter| waiter.session != session);
    }

    pub fn pending(&self) -> usize {
        self.waiters.len()
    }
}

impl<T: Send + 'static> Default for Rendezvous<T> {
    fn default() -> Self {
        Self::new()
    }
}
