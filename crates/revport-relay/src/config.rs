//! Relay configuration

use revport_proto::{TCP_MAX_PORT, TCP_MIN_PORT};
use std::ops::Range;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Public domain of the relay. TCP tunnels are announced as
    /// `{domain}:{port}`, HTTP tunnels as `{subdomain}.{domain}` (its
    /// wildcard DNS record must point at this host).
    pub domain: String,
    /// Port range scanned when a TCP tunnel asks for an auto-assigned
    /// port. End is exclusive.
    pub port_range: Range<u16>,
    /// Directory holding hook scripts, relative to the working
    /// directory unless absolute.
    pub hooks_dir: PathBuf,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            domain: "localhost".to_string(),
            port_range: TCP_MIN_PORT..TCP_MAX_PORT,
            hooks_dir: PathBuf::from("hooks"),
        }
    }
}
