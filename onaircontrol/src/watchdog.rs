//! Periodic liveness checks on an ostensibly playing stream.
//!
//! The watchdog holds no timer of its own; the controller owns the interval
//! and hands an [`Observation`] of the primitive to [`LivenessWatchdog::inspect`]
//! on every tick. The only state carried across ticks is when the primitive
//! was first seen without enough buffered data.

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, trace};

use crate::primitive::ReadyState;

/// What the controller sees on a tick.
#[derive(Clone, Copy, Debug)]
pub struct Observation {
    pub intent: bool,
    pub online: bool,
    /// A reconnection cycle or a start attempt is in progress.
    pub recovering: bool,
    pub primitive_paused: bool,
    pub ready_state: ReadyState,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verdict {
    Healthy,
    /// Nothing to judge this tick.
    Skipped,
    SilentlyStopped,
    StuckBuffering { since: Duration },
}

#[derive(Debug)]
pub struct LivenessWatchdog {
    stuck_after: Duration,
    armed: bool,
    starving_since: Option<Instant>,
}

impl LivenessWatchdog {
    pub fn new(stuck_after: Duration) -> Self {
        Self {
            stuck_after,
            armed: false,
            starving_since: None,
        }
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    pub fn arm(&mut self) {
        if !self.armed {
            debug!("Watchdog armed");
        }
        self.armed = true;
        self.starving_since = None;
    }

    pub fn disarm(&mut self) {
        if self.armed {
            debug!("Watchdog disarmed");
        }
        self.armed = false;
        self.starving_since = None;
    }

    pub fn inspect(&mut self, obs: Observation, now: Instant) -> Verdict {
        if !self.armed || !obs.intent || !obs.online || obs.recovering {
            self.starving_since = None;
            return Verdict::Skipped;
        }

        if obs.primitive_paused {
            self.starving_since = None;
            return Verdict::SilentlyStopped;
        }

        if obs.ready_state.has_future_data() {
            self.starving_since = None;
            return Verdict::Healthy;
        }

        let since = *self.starving_since.get_or_insert(now);
        let starving = now.saturating_duration_since(since);
        trace!(?starving, ready_state = ?obs.ready_state, "Primitive short of data");
        if starving >= self.stuck_after {
            self.starving_since = None;
            Verdict::StuckBuffering { since: starving }
        } else {
            Verdict::Healthy
        }
    }
}
