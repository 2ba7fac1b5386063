//! Workspace-wide constants.
//!
//! Single source of truth for protocol timing, motion supervision limits
//! and default paths.

use std::time::Duration;

/// Number of axes in the fixed axis set.
pub const AXIS_COUNT: usize = 5;

/// Consecutive "OK" confirmations needed before a motion operation counts
/// as complete. One sample alone may be stale.
pub const CONFIRMATIONS_REQUIRED: u32 = 2;

/// Time a motion operation may take before it is force-completed as failed.
pub const OPERATION_TIMEOUT: Duration = Duration::from_secs(90);

/// Upper bound for a single send/receive attempt timeout.
pub const MAX_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(5);

/// Sleep between failed attempts grows by this step: attempt `i` waits `step * (i + 1)`.
pub const RETRY_DELAY_STEP: Duration = Duration::from_millis(200);

/// Value published in the reach field of axes that are never queried for reach.
pub const REACH_SENTINEL: &str = "N/A";

/// Token an instrument reports in reach/home fields once a move has settled.
pub const CONFIRMATION_TOKEN: &str = "OK";

/// Default instrument TCP port.
pub const DEFAULT_PORT: u16 = 5025;

/// Default receive chunk size in bytes.
pub const DEFAULT_BUFFER_SIZE: usize = 1024;

/// Default configuration file path.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/rfbench/link.toml";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constants_are_consistent() {
        assert!(CONFIRMATIONS_REQUIRED >= 1);
        assert!(OPERATION_TIMEOUT > MAX_ATTEMPT_TIMEOUT);
        assert!(RETRY_DELAY_STEP < MAX_ATTEMPT_TIMEOUT);
        assert_ne!(REACH_SENTINEL, CONFIRMATION_TOKEN);
    }
}
