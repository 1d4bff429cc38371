//! Relay error types

use crate::registry::RendezvousError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("no free port in range {start}..{end}")]
    NoFreePort { start: u16, end: u16 },

    #[error("port {port} unavailable: {source}")]
    PortUnavailable {
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("subdomain [{0}] has already been taken")]
    SubdomainTaken(String),

    #[error("control channel closed")]
    ControlClosed,

    #[error(transparent)]
    Rendezvous(#[from] RendezvousError),

    #[error("hook {name} exited with {status}")]
    HookFailed {
        name: String,
        status: std::process::ExitStatus,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("http error: {0}")]
    Http(#[from] hyper::Error),
}
