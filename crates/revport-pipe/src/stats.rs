//! Traffic counters shared across pipes

use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonically increasing byte counters, directionally attributed.
///
/// `client_to_public` counts bytes flowing from the tunneled service
/// toward public users; `public_to_client` the opposite direction. The
/// counters never decrease for the lifetime of their owner.
#[derive(Debug, Default)]
pub struct PipeStats {
    pub client_to_public: AtomicU64,
    pub public_to_client: AtomicU64,
}

impl PipeStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current (client_to_public, public_to_client) totals.
    pub fn snapshot(&self) -> (u64, u64) {
        (
            self.client_to_public.load(Ordering::Relaxed),
            self.public_to_client.load(Ordering::Relaxed),
        )
    }
}
