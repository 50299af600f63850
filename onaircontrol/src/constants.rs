//! Default tuning for the stream controller.
//!
//! Every value here can be overridden through `PlayerSettings` (and, with the
//! `onairconfig` feature, from the `player.*` configuration section).

use std::time::Duration;

// ============================================================================
// Stream source
// ============================================================================

/// Configuration category holding the stream URL.
pub const STREAM_URL_CATEGORY: &str = "radio";

/// Configuration key holding the stream URL.
pub const STREAM_URL_KEY: &str = "stream_url";

/// Query parameter appended to the stream URL on every reconnection attempt.
pub const CACHE_BUST_PARAM: &str = "_t";

// ============================================================================
// Reconnection
// ============================================================================

/// Number of consecutive reconnection attempts before giving up.
///
/// Value: 10
pub const DEFAULT_RETRY_CEILING: u32 = 10;

/// Delay before each reconnection attempt (milliseconds).
///
/// Value: 3000 ms
pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 3_000;

/// Upper bound for the reconnection delay when a backoff multiplier is set.
///
/// Value: 30000 ms
pub const DEFAULT_RECONNECT_MAX_DELAY_MS: u64 = 30_000;

/// Growth factor applied to the delay after each failed attempt.
///
/// Value: 1.0 (fixed delay)
pub const DEFAULT_BACKOFF_MULTIPLIER: f64 = 1.0;

/// Maximum time a single `start()` may take before the attempt is
/// considered failed (milliseconds).
///
/// Value: 20000 ms
pub const DEFAULT_START_TIMEOUT_MS: u64 = 20_000;

// ============================================================================
// Watchdog
// ============================================================================

/// Interval between two liveness checks (milliseconds).
///
/// Value: 30000 ms
pub const DEFAULT_WATCHDOG_INTERVAL_MS: u64 = 30_000;

/// How long the primitive may report insufficient buffered data before the
/// watchdog declares it stuck (milliseconds).
///
/// Value: 30000 ms
pub const DEFAULT_STUCK_BUFFERING_MS: u64 = 30_000;

// ============================================================================
// ICY primitive
// ============================================================================

/// Silence on the wire after which the ICY primitive reports buffering.
///
/// Value: 10000 ms
pub const DEFAULT_ICY_STALL_TIMEOUT_MS: u64 = 10_000;

/// User agent sent by the ICY primitive.
pub const DEFAULT_ICY_USER_AGENT: &str = "OnAir/0.1";

pub fn reconnect_delay() -> Duration {
    Duration::from_millis(DEFAULT_RECONNECT_DELAY_MS)
}

pub fn reconnect_max_delay() -> Duration {
    Duration::from_millis(DEFAULT_RECONNECT_MAX_DELAY_MS)
}

pub fn start_timeout() -> Duration {
    Duration::from_millis(DEFAULT_START_TIMEOUT_MS)
}

pub fn watchdog_interval() -> Duration {
    Duration::from_millis(DEFAULT_WATCHDOG_INTERVAL_MS)
}

pub fn stuck_buffering_after() -> Duration {
    Duration::from_millis(DEFAULT_STUCK_BUFFERING_MS)
}

pub fn icy_stall_timeout() -> Duration {
    Duration::from_millis(DEFAULT_ICY_STALL_TIMEOUT_MS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duration_helpers() {
        assert_eq!(reconnect_delay(), Duration::from_secs(3));
        assert_eq!(reconnect_max_delay(), Duration::from_secs(30));
        assert_eq!(start_timeout(), Duration::from_secs(20));
        assert_eq!(watchdog_interval(), Duration::from_secs(30));
        assert_eq!(stuck_buffering_after(), Duration::from_secs(30));
        assert_eq!(icy_stall_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_constants_sanity() {
        assert!(DEFAULT_RETRY_CEILING > 0);
        assert!(DEFAULT_RECONNECT_DELAY_MS <= DEFAULT_RECONNECT_MAX_DELAY_MS);
        assert!(DEFAULT_BACKOFF_MULTIPLIER >= 1.0);
        // A start attempt must be able to fail before the next watchdog pass
        assert!(DEFAULT_START_TIMEOUT_MS < DEFAULT_WATCHDOG_INTERVAL_MS);
    }
}
