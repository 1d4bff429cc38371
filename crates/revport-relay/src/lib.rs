//! Public-facing relay for reverse tunnels
//!
//! The relay accepts a control channel from a client behind NAT,
//! provisions a public resource for it (a TCP port or an HTTP
//! subdomain), and pairs every inbound public connection with a
//! reverse-dialed connection from the client via the correlation
//! registry. All state is instance-owned on [`Relay`]; several relays
//! can coexist in one process.

pub mod config;
pub mod error;
pub mod freeport;
pub mod hooks;
pub mod names;
pub mod registry;
pub mod relay;
pub mod router;

mod proxy;
mod session;
mod tcp;

pub use config::RelayConfig;
pub use error::RelayError;
pub use relay::Relay;

/// A reverse-dialed connection after the WebSocket upgrade, viewed as a
/// raw byte stream.
pub type ReverseStream =
    revport_pipe::WsByteStream<axum::extract::ws::WebSocket, axum::extract::ws::Message>;
