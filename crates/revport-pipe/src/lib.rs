//! Bidirectional byte-pipe engine and traffic accounting
//!
//! This crate moves bytes between the two halves of a tunneled
//! connection: the full-duplex copy loop with half-close semantics, the
//! process-wide traffic counters, and the adapter that turns a WebSocket
//! into a plain byte stream so it can be piped like a TCP socket.

pub mod pipe;
pub mod stats;
pub mod ws;

pub use pipe::join;
pub use stats::PipeStats;
pub use ws::WsByteStream;
