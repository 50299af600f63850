use std::time::Duration;

use crate::constants::*;

/// Tuning of a [`StreamController`](crate::StreamController).
#[derive(Clone, Debug, PartialEq)]
pub struct PlayerSettings {
    /// Store category holding the stream URL.
    pub source_category: String,
    /// Store key holding the stream URL.
    pub source_key: String,
    pub retry_ceiling: u32,
    pub reconnect_delay: Duration,
    pub reconnect_max_delay: Duration,
    pub backoff_multiplier: f64,
    pub start_timeout: Duration,
    pub watchdog_interval: Duration,
    pub stuck_buffering_after: Duration,
    pub initial_volume: f32,
}

impl Default for PlayerSettings {
    fn default() -> Self {
        Self {
            source_category: STREAM_URL_CATEGORY.to_string(),
            source_key: STREAM_URL_KEY.to_string(),
            retry_ceiling: DEFAULT_RETRY_CEILING,
            reconnect_delay: reconnect_delay(),
            reconnect_max_delay: reconnect_max_delay(),
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
            start_timeout: start_timeout(),
            watchdog_interval: watchdog_interval(),
            stuck_buffering_after: stuck_buffering_after(),
            initial_volume: 1.0,
        }
    }
}

impl PlayerSettings {
    /// Replaces out-of-range values with usable ones.
    pub fn sanitized(mut self) -> Self {
        if self.watchdog_interval.is_zero() {
            self.watchdog_interval = watchdog_interval();
        }
        if self.start_timeout.is_zero() {
            self.start_timeout = start_timeout();
        }
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            self.backoff_multiplier = DEFAULT_BACKOFF_MULTIPLIER;
        }
        if self.reconnect_max_delay < self.reconnect_delay {
            self.reconnect_max_delay = self.reconnect_delay;
        }
        self.initial_volume = clamp_volume(self.initial_volume);
        self
    }
}

/// Clamps a volume to [0, 1]; NaN maps to 0.
pub fn clamp_volume(level: f32) -> f32 {
    if level.is_nan() {
        0.0
    } else {
        level.clamp(0.0, 1.0)
    }
}
