//! Tunnel client
//!
//! Connects out to a revport relay, requests a public TCP port or HTTP
//! subdomain, and reverse-dials a data connection for every public
//! connection the relay announces. Runs fine behind NAT; every
//! connection it makes is outbound.

pub mod error;
pub mod reconnect;
pub mod session;

mod forwarder;

pub use error::{ErrorClass, SessionError};
pub use session::{TunnelClient, TunnelOptions};
