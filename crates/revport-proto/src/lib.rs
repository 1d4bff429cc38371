//! Tunnel Protocol Definitions
//!
//! This crate defines the control messages exchanged over a tunnel's
//! control channel, the tunnel request parameters, and the protocol
//! constants shared by the relay and the client.

pub mod messages;

pub use messages::{ControlMessage, Protocol, ProtocolParseError, TunnelRequest};

use std::time::Duration;

/// HTTP path for the control-channel WebSocket upgrade.
pub const CONTROL_PATH: &str = "/ws";

/// HTTP path for reverse-dial WebSocket upgrades.
pub const REVERSE_DIAL_PATH: &str = "/ws/dial";

/// Header carrying the correlation key on a reverse-dial upgrade request.
pub const CORRELATION_HEADER: &str = "x-correlation-key";

/// How long the relay waits for a reverse-dialed connection to arrive
/// before giving up on the public connection that requested it.
pub const RENDEZVOUS_TIMEOUT: Duration = Duration::from_secs(10);

/// Interval between idle keepalive messages sent by the client.
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(5);

/// Capacity of the client-side queue of incoming reverse connections.
/// Bounds memory if the local forwarder stalls.
pub const REVERSE_QUEUE_CAPACITY: usize = 100;

/// Default public port range scanned by the relay's allocator.
pub const TCP_MIN_PORT: u16 = 40000;
pub const TCP_MAX_PORT: u16 = 50000;
