//! Quiescence watchdog for the capture stage.
//!
//! The watchdog stays unarmed until the producer reports its first nonzero
//! byte count, so slow starts never trip it. Once armed, every increase of
//! the counter refreshes the progress timestamp and clears the fired
//! latch; a tick that finds the stream active but silent for longer than
//! the quiet timeout fires the watchdog exactly once per quiet episode.

use std::time::{Duration, Instant};

use tracing::{debug, info};

/// Result of feeding a byte count to the watchdog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    /// The counter did not move.
    NoProgress,
    /// The counter increased.
    Progress,
    /// First nonzero count: the watchdog is now armed.
    Armed,
}

/// Per-session quiescence watchdog.
#[derive(Debug, Clone)]
pub struct QuiescenceWatchdog {
    quiet_timeout: Duration,
    armed: bool,
    fired: bool,
    last_bytes: u64,
    last_progress_at: Option<Instant>,
}

impl QuiescenceWatchdog {
    /// Construct an unarmed watchdog.
    #[must_use]
    pub fn new(quiet_timeout: Duration) -> Self {
        Self {
            quiet_timeout,
            armed: false,
            fired: false,
            last_bytes: 0,
            last_progress_at: None,
        }
    }

    /// Feed the producer's cumulative byte count.
    pub fn observe(&mut self, bytes: u64, now: Instant) -> Observation {
        if bytes <= self.last_bytes {
            return Observation::NoProgress;
        }
        self.last_bytes = bytes;
        self.last_progress_at = Some(now);
        self.fired = false;

        if self.armed {
            Observation::Progress
        } else {
            self.armed = true;
            info!(bytes, "first data received, watchdog armed");
            Observation::Armed
        }
    }

    /// Check for quiescence. Returns `true` exactly once per arming.
    ///
    /// Never fires when unarmed, when already fired, or when the stream is
    /// not active.
    pub fn tick(&mut self, now: Instant, stream_active: bool) -> bool {
        if !self.armed || self.fired || !stream_active {
            return false;
        }
        let Some(last) = self.last_progress_at else {
            return false;
        };
        if now.saturating_duration_since(last) >= self.quiet_timeout {
            self.fired = true;
            debug!(quiet_ms = self.quiet_timeout.as_millis(), "watchdog fired");
            return true;
        }
        false
    }

    /// Stop watching and forget the last activity; later ticks never fire.
    pub fn disarm(&mut self) {
        self.armed = false;
        self.last_progress_at = None;
    }

    /// Return to the freshly constructed state.
    pub fn reset(&mut self) {
        *self = Self::new(self.quiet_timeout);
    }

    /// Whether the first byte has been seen and the watchdog not disarmed.
    #[must_use]
    pub fn is_armed(&self) -> bool {
        self.armed
    }

    /// Whether the watchdog has fired.
    #[must_use]
    pub fn has_fired(&self) -> bool {
        self.fired
    }

    /// Configured quiet timeout.
    #[must_use]
    pub fn quiet_timeout(&self) -> Duration {
        self.quiet_timeout
    }
}
