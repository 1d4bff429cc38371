//! Client error types

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("failed to reach relay: {0}")]
    ServerDial(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("control channel failed: {0}")]
    Transport(String),

    #[error("local service {addr} unreachable: {source}")]
    LocalService {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("bad server url: {0}")]
    BadServerUrl(String),
}

/// Coarse failure class used to pick a reconnect delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Established session dropped. Retry promptly.
    Transport,
    /// Could not reach or negotiate with the relay. Back off.
    Dial,
    /// The local service being exposed is down. Back off.
    LocalService,
}

impl SessionError {
    pub fn class(&self) -> ErrorClass {
        match self {
            SessionError::ServerDial(_) | SessionError::BadServerUrl(_) => ErrorClass::Dial,
            SessionError::Transport(_) => ErrorClass::Transport,
            SessionError::LocalService { .. } => ErrorClass::LocalService,
        }
    }
}
