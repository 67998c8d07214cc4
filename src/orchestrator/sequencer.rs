//! Event sequencer: trigger matching and anchored periodic scheduling.
//!
//! [`EventSequencer`] watches detector output for trigger phrases and arms
//! exactly once per session. The arming carries an absolute deadline, from
//! which the controller schedules both the receive handover and an
//! [`AnchoredCycle`] of indicator changes. Every cycle boundary is computed
//! from the anchor, never from the previous fire time, so scheduling
//! latency does not accumulate.

use std::time::{Duration, Instant};

use regex::{RegexSet, RegexSetBuilder};
use tracing::info;

use crate::{AppError, Result};

/// Compiled, case-insensitive trigger patterns.
#[derive(Debug, Clone)]
pub struct TriggerSet {
    set: RegexSet,
    patterns: Vec<String>,
}

impl TriggerSet {
    /// Compile `patterns`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if any pattern is not a valid regex.
    pub fn new(patterns: &[String]) -> Result<Self> {
        let set = RegexSetBuilder::new(patterns)
            .case_insensitive(true)
            .build()
            .map_err(|err| AppError::Config(format!("invalid trigger pattern: {err}")))?;
        Ok(Self {
            set,
            patterns: patterns.to_vec(),
        })
    }

    /// First pattern that matches `line`.
    #[must_use]
    pub fn first_match(&self, line: &str) -> Option<&str> {
        self.set
            .matches(line)
            .iter()
            .next()
            .and_then(|idx| self.patterns.get(idx))
            .map(String::as_str)
    }

    /// Whether any pattern matches `line`.
    #[must_use]
    pub fn is_match(&self, line: &str) -> bool {
        self.set.is_match(line)
    }
}

/// A trigger accepted by the sequencer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Arming {
    /// When the delayed actions are due.
    pub deadline: Instant,
    /// Pattern that matched.
    pub pattern: String,
    /// Line that matched.
    pub line: String,
}

/// Per-session one-shot trigger detector.
#[derive(Debug, Clone)]
pub struct EventSequencer {
    triggers: TriggerSet,
    delay: Duration,
    armed: bool,
}

impl EventSequencer {
    /// Construct an unarmed sequencer.
    #[must_use]
    pub fn new(triggers: TriggerSet, delay: Duration) -> Self {
        Self {
            triggers,
            delay,
            armed: false,
        }
    }

    /// Feed one detector line. Returns the arming only for the first match.
    pub fn on_line(&mut self, line: &str, now: Instant) -> Option<Arming> {
        if self.armed {
            return None;
        }
        let pattern = self.triggers.first_match(line)?.to_owned();
        self.armed = true;
        info!(pattern = %pattern, delay_ms = self.delay.as_millis(), "trigger matched, sequencer armed");
        Some(Arming {
            deadline: now + self.delay,
            pattern,
            line: line.to_owned(),
        })
    }

    /// Whether a trigger has been accepted.
    #[must_use]
    pub fn is_armed(&self) -> bool {
        self.armed
    }

    /// Forget any arming; used at session start.
    pub fn reset(&mut self) {
        self.armed = false;
    }
}

/// Phase of an anchored cycle at a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CyclePhase {
    /// The anchor has not been reached yet.
    Pending {
        /// The anchor.
        starts_at: Instant,
    },
    /// The cycle is running.
    Active {
        /// Indicator index to show: 1 during the "on" part, 0 otherwise.
        index: usize,
        /// Next boundary, computed from the anchor.
        next_boundary: Instant,
    },
}

/// Periodic on/off cycle anchored to an absolute start instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnchoredCycle {
    anchor: Instant,
    on: Duration,
    off: Duration,
}

impl AnchoredCycle {
    /// Construct a cycle; zero durations are raised to one millisecond.
    #[must_use]
    pub fn new(anchor: Instant, on: Duration, off: Duration) -> Self {
        let floor = Duration::from_millis(1);
        Self {
            anchor,
            on: on.max(floor),
            off: off.max(floor),
        }
    }

    /// Phase at `now`.
    #[must_use]
    pub fn phase_at(&self, now: Instant) -> CyclePhase {
        if now < self.anchor {
            return CyclePhase::Pending {
                starts_at: self.anchor,
            };
        }
        let period = self.on + self.off;
        let elapsed = now - self.anchor;
        let cycles = elapsed.as_nanos() / period.as_nanos();
        let cycle_start = self.anchor + scale(period, cycles);
        let within = now - cycle_start;

        if within < self.on {
            CyclePhase::Active {
                index: 1,
                next_boundary: cycle_start + self.on,
            }
        } else {
            CyclePhase::Active {
                index: 0,
                next_boundary: cycle_start + period,
            }
        }
    }
}

fn scale(period: Duration, cycles: u128) -> Duration {
    let nanos = period.as_nanos().saturating_mul(cycles);
    Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
}
