//! Round-robin free-port allocation

use crate::error::RelayError;
use std::ops::Range;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tracing::trace;

/// Scans a port range for a bindable TCP port, round-robin.
///
/// The cursor advances past each allocated port so consecutive
/// allocations fan out across the range instead of immediately retrying
/// a just-released port.
pub struct PortAllocator {
    start: u16,
    end: u16,
    cursor: Mutex<u16>,
}

impl PortAllocator {
    pub fn new(range: Range<u16>) -> Self {
        assert!(range.start < range.end, "empty port range");
        Self {
            start: range.start,
            end: range.end,
            cursor: Mutex::new(range.start),
        }
    }

    /// Bind the first free port at or after the cursor, wrapping within
    /// the range. Fails only if every port in the range is taken.
    pub async fn allocate(&self) -> Result<(u16, TcpListener), RelayError> {
        let mut cursor = self.cursor.lock().await;
        let width = (self.end - self.start) as u32;
        for i in 0..width {
            let port = self.candidate(*cursor, i);
            match TcpListener::bind(("0.0.0.0", port)).await {
                Ok(listener) => {
                    *cursor = if port + 1 < self.end {
                        port + 1
                    } else {
                        self.start
                    };
                    trace!("allocated port {}", port);
                    return Ok((port, listener));
                }
                Err(_) => continue,
            }
        }
        Err(RelayError::NoFreePort {
            start: self.start,
            end: self.end,
        })
    }

    /// The `i`-th port at or after `cursor`, wrapping within the range.
    /// Widened arithmetic; cursor offset plus `i` can exceed u16 for
    /// ranges spanning most of the port space.
    fn candidate(&self, cursor: u16, i: u32) -> u16 {
        let width = (self.end - self.start) as u32;
        let offset = ((cursor - self.start) as u32 + i) % width;
        self.start + offset as u16
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_allocator_covers_range_and_wraps() {
        let allocator = PortAllocator::new(42000..42003);

        let (port, lis1) = allocator.allocate().await.unwrap();
        assert_eq!(port, 42000);

        let (port, _lis2) = allocator.allocate().await.unwrap();
        assert_eq!(port, 42001);

        // Release the first port; the cursor still moves forward before
        // wrapping back to it.
        drop(lis1);

        let (port, _lis3) = allocator.allocate().await.unwrap();
        assert_eq!(port, 42002);

        let (port, _lis4) = allocator.allocate().await.unwrap();
        assert_eq!(port, 42000);
    }

    #[test]
    fn test_candidate_survives_full_port_space_scan() {
        // Scanning deep into a near-full-width range pushes the cursor
        // offset plus the scan index far past u16::MAX.
        let allocator = PortAllocator::new(1..65535);
        assert_eq!(allocator.candidate(60000, 0), 60000);
        assert_eq!(allocator.candidate(60000, 40000), 34466);
        assert_eq!(allocator.candidate(65534, 1), 1);
        assert_eq!(allocator.candidate(1, 65533), 65534);
    }

    #[tokio::test]
    async fn test_exhausted_range_reports_no_free_port() {
        let allocator = PortAllocator::new(42005..42007);
        let _a = allocator.allocate().await.unwrap();
        let _b = allocator.allocate().await.unwrap();

        match allocator.allocate().await {
            Err(RelayError::NoFreePort { start, end }) => {
                assert_eq!((start, end), (42005, 42007));
            }
            other => panic!("expected NoFreePort, got {:?}", other.map(|(p, _)| p)),
        }
    }
}
