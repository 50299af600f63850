//! Bounded-retry reconnection state machine.
//!
//! The supervisor only decides; it never touches the primitive. The
//! controller feeds it failures and reports when a reconnection attempt
//! begins or succeeds, and carries out the returned [`SupervisorDecision`].
//!
//! `Stable --trigger--> Reconnecting --confirm_started--> Stable`
//! `Reconnecting --attempt_failed (counter > ceiling)--> GivenUp`
//!
//! The retry counter is only written here.

use std::fmt;
use std::time::Duration;

use tracing::{debug, info, warn};
use url::Url;

use crate::constants::CACHE_BUST_PARAM;
use crate::model::SupervisorPhase;
use crate::settings::PlayerSettings;

/// Delay schedule and ceiling of the reconnection cycle.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ReconnectPolicy {
    pub ceiling: u32,
    pub delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl ReconnectPolicy {
    pub fn from_settings(settings: &PlayerSettings) -> Self {
        Self {
            ceiling: settings.retry_ceiling,
            delay: settings.reconnect_delay,
            max_delay: settings.reconnect_max_delay,
            multiplier: settings.backoff_multiplier,
        }
    }

    /// Delay before attempt number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if self.multiplier <= 1.0 || attempt <= 1 {
            return self.delay;
        }
        let factor = self.multiplier.powi(attempt.saturating_sub(1).min(64) as i32);
        let secs = self.delay.as_secs_f64() * factor;
        if !secs.is_finite() || secs >= self.max_delay.as_secs_f64() {
            self.max_delay
        } else {
            Duration::from_secs_f64(secs)
        }
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::from_settings(&PlayerSettings::default())
    }
}

/// What made the controller ask for a reconnection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TriggerReason {
    Stopped,
    Errored(String),
    Ended,
    StreamAborted,
    StartFailed(String),
    StartTimedOut,
    SilentlyStopped,
    StuckBuffering,
    Foreground,
    NetworkRestored,
}

impl fmt::Display for TriggerReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TriggerReason::Stopped => f.write_str("stream stopped"),
            TriggerReason::Errored(reason) => write!(f, "stream error: {reason}"),
            TriggerReason::Ended => f.write_str("stream ended"),
            TriggerReason::StreamAborted => f.write_str("stream aborted"),
            TriggerReason::StartFailed(reason) => write!(f, "start failed: {reason}"),
            TriggerReason::StartTimedOut => f.write_str("start timed out"),
            TriggerReason::SilentlyStopped => f.write_str("playback silently stopped"),
            TriggerReason::StuckBuffering => f.write_str("stuck buffering"),
            TriggerReason::Foreground => f.write_str("returned to foreground"),
            TriggerReason::NetworkRestored => f.write_str("network restored"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SupervisorDecision {
    /// Already reconnecting or given up; nothing to do.
    Ignored,
    /// Wait `delay`, then make attempt number `attempt`.
    Retry { attempt: u32, delay: Duration },
    /// Ceiling exceeded; stop everything until an explicit play.
    GiveUp,
}

#[derive(Debug)]
pub struct ReconnectSupervisor {
    policy: ReconnectPolicy,
    phase: SupervisorPhase,
    retry_count: u32,
    attempt_in_flight: bool,
}

impl ReconnectSupervisor {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            policy,
            phase: SupervisorPhase::Stable,
            retry_count: 0,
            attempt_in_flight: false,
        }
    }

    pub fn phase(&self) -> SupervisorPhase {
        self.phase
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn policy(&self) -> &ReconnectPolicy {
        &self.policy
    }

    /// True between `attempt_started` and the attempt's outcome.
    pub fn attempt_in_flight(&self) -> bool {
        self.attempt_in_flight
    }

    pub fn is_reconnecting(&self) -> bool {
        self.phase == SupervisorPhase::Reconnecting
    }

    /// Entry point for failures observed while stable. Re-entrant calls are
    /// no-ops.
    pub fn trigger(&mut self, reason: &TriggerReason) -> SupervisorDecision {
        if self.phase != SupervisorPhase::Stable {
            debug!(phase = %self.phase, %reason, "Reconnection already handled, ignoring trigger");
            return SupervisorDecision::Ignored;
        }
        info!(%reason, "Starting reconnection cycle");
        self.phase = SupervisorPhase::Reconnecting;
        self.advance()
    }

    /// The controller is about to create and start a new primitive.
    pub fn attempt_started(&mut self) {
        if self.phase == SupervisorPhase::Reconnecting {
            self.attempt_in_flight = true;
        }
    }

    /// The in-flight attempt failed. Failures observed while no attempt is
    /// in flight are ignored.
    pub fn attempt_failed(&mut self, reason: &TriggerReason) -> SupervisorDecision {
        if self.phase != SupervisorPhase::Reconnecting || !self.attempt_in_flight {
            return SupervisorDecision::Ignored;
        }
        self.attempt_in_flight = false;
        debug!(attempt = self.retry_count, %reason, "Reconnection attempt failed");
        self.advance()
    }

    fn advance(&mut self) -> SupervisorDecision {
        self.retry_count += 1;
        if self.retry_count > self.policy.ceiling {
            warn!(attempts = self.retry_count - 1, "Giving up reconnection");
            self.phase = SupervisorPhase::GivenUp;
            self.attempt_in_flight = false;
            return SupervisorDecision::GiveUp;
        }
        let delay = self.policy.delay_for(self.retry_count);
        SupervisorDecision::Retry {
            attempt: self.retry_count,
            delay,
        }
    }

    /// Playback confirmed: back to stable with a fresh budget.
    pub fn confirm_started(&mut self) {
        if self.phase == SupervisorPhase::Reconnecting || self.retry_count > 0 {
            info!(attempts = self.retry_count, "Playback confirmed, reconnection cycle closed");
        }
        self.phase = SupervisorPhase::Stable;
        self.retry_count = 0;
        self.attempt_in_flight = false;
    }

    /// Abandons a running cycle without touching the counter. A given-up
    /// supervisor stays given up.
    pub fn cancel(&mut self) {
        if self.phase == SupervisorPhase::Reconnecting {
            debug!(attempts = self.retry_count, "Reconnection cycle cancelled");
            self.phase = SupervisorPhase::Stable;
        }
        self.attempt_in_flight = false;
    }

    /// Explicit user play after giving up. Returns true when the cycle was
    /// reset.
    pub fn reset_after_give_up(&mut self) -> bool {
        if self.phase != SupervisorPhase::GivenUp {
            return false;
        }
        info!("Retry budget reset by user");
        self.phase = SupervisorPhase::Stable;
        self.retry_count = 0;
        self.attempt_in_flight = false;
        true
    }
}

/// Generates strictly increasing cache-busting timestamps.
#[derive(Debug, Default)]
pub struct CacheBuster {
    last: i64,
}

impl CacheBuster {
    pub fn next_stamp(&mut self) -> i64 {
        let now = chrono::Utc::now().timestamp_millis();
        self.last = now.max(self.last + 1);
        self.last
    }

    pub fn apply(&mut self, url: &str) -> String {
        cache_busted(url, self.next_stamp())
    }
}

/// Returns `url` with its cache-busting parameter set to `millis`,
/// replacing a previous one.
pub fn cache_busted(url: &str, millis: i64) -> String {
    match Url::parse(url) {
        Ok(mut parsed) => {
            let kept: Vec<(String, String)> = parsed
                .query_pairs()
                .filter(|(k, _)| k != CACHE_BUST_PARAM)
                .map(|(k, v)| (k.into_owned(), v.into_owned()))
                .collect();
            {
                let mut query = parsed.query_pairs_mut();
                query.clear();
                for (k, v) in &kept {
                    query.append_pair(k, v);
                }
                query.append_pair(CACHE_BUST_PARAM, &millis.to_string());
            }
            parsed.to_string()
        }
        Err(_) => {
            let separator = if url.contains('?') { '&' } else { '?' };
            format!("{url}{separator}{CACHE_BUST_PARAM}={millis}")
        }
    }
}

/// Strips the cache-busting parameter, yielding the configured URL.
pub fn base_url(url: &str) -> String {
    match Url::parse(url) {
        Ok(mut parsed) => {
            let kept: Vec<(String, String)> = parsed
                .query_pairs()
                .filter(|(k, _)| k != CACHE_BUST_PARAM)
                .map(|(k, v)| (k.into_owned(), v.into_owned()))
                .collect();
            if kept.is_empty() {
                parsed.set_query(None);
            } else {
                parsed.query_pairs_mut().clear().extend_pairs(kept);
            }
            parsed.to_string()
        }
        Err(_) => url.to_string(),
    }
}
