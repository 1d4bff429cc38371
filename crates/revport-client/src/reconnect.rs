//! Reconnect backoff policy.

use std::time::Duration;

use crate::error::ErrorClass;

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Delay before the next connection attempt.
///
/// A dropped established session retries promptly at a fixed interval.
/// Failures to reach the relay or the local service back off
/// exponentially, doubling per consecutive attempt up to the cap.
pub fn backoff_delay(class: ErrorClass, attempt: u32) -> Duration {
    match class {
        ErrorClass::Transport => INITIAL_BACKOFF,
        ErrorClass::Dial | ErrorClass::LocalService => {
            let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
            INITIAL_BACKOFF
                .checked_mul(factor)
                .map(|d| d.min(MAX_BACKOFF))
                .unwrap_or(MAX_BACKOFF)
        }
    }
}
