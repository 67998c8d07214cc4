//! Progress estimator: per-stage time models, each smoothed on its own and
//! combined into one weighted completion figure with an ETA.
//!
//! A running stage's raw fraction is `elapsed / estimate`. Its displayed
//! fraction follows the raw one through an EMA, moves at most
//! `max_rate_per_sec` per second, never goes backwards and stays below the
//! pre-completion cap until the stage really finishes. Completion starts a
//! cubic ease-out from the displayed value to 1, which overrides the rate
//! cap. The total is the weighted sum of the displayed stage fractions.

pub mod airtime;
pub mod calibration;

use std::time::{Duration, Instant};

use tracing::debug;

use crate::config::ProgressConfig;
use crate::models::stage::{PipelineLayout, StageKind, StageStatus};

use self::calibration::{CalibrationState, StageLoad};

/// Smoothing and pacing constants.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressTuning {
    /// Weight of the newest raw fraction in a stage's displayed-value EMA.
    pub smoothing_alpha: f64,
    /// Largest displayed increase per second of a running stage.
    pub max_rate_per_sec: f64,
    /// Stage fraction ceiling before completion.
    pub pre_completion_cap: f64,
    /// Ease-out animation length.
    pub ease_out: Duration,
    /// Weight of the newest sample in the active stage's ETA EMA.
    pub eta_alpha: f64,
    /// Lower bound on any stage estimate.
    pub min_estimate: Duration,
}

impl Default for ProgressTuning {
    fn default() -> Self {
        Self::from(&ProgressConfig::default())
    }
}

impl From<&ProgressConfig> for ProgressTuning {
    fn from(config: &ProgressConfig) -> Self {
        Self {
            smoothing_alpha: config.smoothing_alpha,
            max_rate_per_sec: config.max_rate_per_sec,
            pre_completion_cap: config.pre_completion_cap,
            ease_out: Duration::from_millis(config.ease_out_ms),
            eta_alpha: config.eta_alpha,
            min_estimate: Duration::from_millis(config.min_estimate_ms),
        }
    }
}

/// What the display should show after a tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressSnapshot {
    /// Displayed fraction in `[0, 1]`.
    pub fraction: f64,
    /// Displayed percentage, rounded half away from zero.
    pub percent: u8,
    /// Remaining time, when every pending stage has an estimate.
    pub eta: Option<Duration>,
}

#[derive(Debug, Clone)]
struct StageTrack {
    kind: StageKind,
    weight: u32,
    status: StageStatus,
    load: StageLoad,
    estimate: Option<Duration>,
    started_at: Option<Instant>,
    finished_at: Option<Instant>,
    displayed: f64,
    ease_from: f64,
}

impl StageTrack {
    fn new(kind: StageKind, weight: u32) -> Self {
        Self {
            kind,
            weight,
            status: StageStatus::Idle,
            load: StageLoad::default(),
            estimate: None,
            started_at: None,
            finished_at: None,
            displayed: 0.0,
            ease_from: 0.0,
        }
    }

    fn raw_fraction(&self, now: Instant) -> f64 {
        let (Some(started), Some(estimate)) = (self.started_at, self.estimate) else {
            return 0.0;
        };
        let total = estimate.as_secs_f64().max(f64::EPSILON);
        (now.saturating_duration_since(started).as_secs_f64() / total).clamp(0.0, 1.0)
    }

    /// Move the displayed fraction forward by one tick of `dt` seconds.
    fn advance(&mut self, now: Instant, dt: f64, tuning: &ProgressTuning) {
        match self.status {
            StageStatus::Idle | StageStatus::Error => {}
            StageStatus::Running => {
                let current = self.displayed;
                let raw = self.raw_fraction(now);
                let next = (current + tuning.smoothing_alpha * (raw - current))
                    .min(current + tuning.max_rate_per_sec * dt)
                    .min(tuning.pre_completion_cap)
                    .max(current);
                self.displayed = next.clamp(0.0, 1.0);
            }
            StageStatus::Done => self.displayed = self.eased(now, tuning.ease_out),
        }
    }

    fn eased(&self, now: Instant, ease_out: Duration) -> f64 {
        let Some(finished) = self.finished_at else {
            return 1.0;
        };
        let window = ease_out.as_secs_f64();
        if window <= 0.0 {
            return 1.0;
        }
        let t = now.saturating_duration_since(finished).as_secs_f64() / window;
        if t >= 1.0 {
            return 1.0;
        }
        let eased = 1.0 - (1.0 - t).powi(3);
        (self.ease_from + (1.0 - self.ease_from) * eased).clamp(self.ease_from, 1.0)
    }

    /// Unsmoothed time left on a running stage.
    fn remaining(&self, now: Instant) -> Option<Duration> {
        let started = self.started_at?;
        let estimate = self.estimate?;
        Some(estimate.saturating_sub(now.saturating_duration_since(started)))
    }
}

/// ETA smoothing state, scoped to one active stage.
#[derive(Debug, Clone, Copy)]
struct EtaTrack {
    stage: StageKind,
    smoothed: f64,
}

/// Weighted, per-stage smoothed progress over one pipeline layout.
#[derive(Debug, Clone)]
pub struct ProgressEstimator {
    tuning: ProgressTuning,
    calibration: CalibrationState,
    stages: Vec<StageTrack>,
    last_tick: Option<Instant>,
    eta: Option<EtaTrack>,
}

impl ProgressEstimator {
    /// Construct an estimator with no layout.
    #[must_use]
    pub fn new(tuning: ProgressTuning, calibration: CalibrationState) -> Self {
        Self {
            tuning,
            calibration,
            stages: Vec::new(),
            last_tick: None,
            eta: None,
        }
    }

    /// Start a new session's progress; calibration is kept.
    pub fn reset(&mut self, layout: &PipelineLayout) {
        self.stages = layout
            .stages()
            .iter()
            .map(|(kind, weight)| StageTrack::new(*kind, *weight))
            .collect();
        self.last_tick = None;
        self.eta = None;
    }

    /// Long-lived calibration state.
    #[must_use]
    pub fn calibration(&self) -> &CalibrationState {
        &self.calibration
    }

    /// Status of `stage` in the current layout.
    #[must_use]
    pub fn status(&self, stage: StageKind) -> Option<StageStatus> {
        self.track(stage).map(|track| track.status)
    }

    /// Current estimate of `stage`.
    #[must_use]
    pub fn estimate_of(&self, stage: StageKind) -> Option<Duration> {
        self.track(stage).and_then(|track| track.estimate)
    }

    /// Displayed fraction of `stage` as of the last tick.
    #[must_use]
    pub fn stage_fraction(&self, stage: StageKind) -> Option<f64> {
        self.track(stage).map(|track| track.displayed)
    }

    /// Record the expected load of a stage that has not started, so the
    /// ETA can include it.
    pub fn plan_stage(&mut self, stage: StageKind, load: StageLoad) {
        let estimate = self.estimate_for(stage, load);
        if let Some(track) = self.track_mut(stage) {
            if track.status == StageStatus::Idle {
                track.load = load;
                track.estimate = estimate;
            }
        }
    }

    /// Mark `stage` running from `now` and return its estimate.
    pub fn begin_stage(&mut self, stage: StageKind, load: StageLoad, now: Instant) -> Option<Duration> {
        let estimate = self.estimate_for(stage, load);
        let track = self.track_mut(stage)?;
        track.status = StageStatus::Running;
        track.load = load;
        track.estimate = estimate;
        track.started_at = Some(now);
        track.finished_at = None;
        debug!(stage = %stage, bytes = load.bytes, estimate_ms = ?estimate.map(|e| e.as_millis()), "stage started");
        estimate
    }

    /// Mark `stage` done, start its ease-out from the displayed value, and
    /// calibrate its throughput from `actual_bytes` over `elapsed`.
    ///
    /// Returns the new calibrated throughput in bytes/s, if any.
    pub fn end_stage(
        &mut self,
        stage: StageKind,
        actual_bytes: u64,
        elapsed: Duration,
        now: Instant,
    ) -> Option<f64> {
        let track = self.track_mut(stage)?;
        track.ease_from = track.displayed;
        track.status = StageStatus::Done;
        track.finished_at = Some(now);
        let load = StageLoad {
            bytes: actual_bytes,
            redundancy: track.load.redundancy,
        };
        self.calibration.record(stage, load, elapsed)
    }

    /// Mark `stage` failed; its displayed fraction freezes where it was.
    pub fn fail_stage(&mut self, stage: StageKind) {
        if let Some(track) = self.track_mut(stage) {
            track.status = StageStatus::Error;
        }
    }

    /// Abandon every running stage, e.g. when the session stops.
    pub fn halt(&mut self) {
        for track in &mut self.stages {
            if track.status == StageStatus::Running {
                track.status = StageStatus::Error;
            }
        }
    }

    /// Whether every stage of the layout is done.
    #[must_use]
    pub fn all_done(&self) -> bool {
        !self.stages.is_empty() && self.stages.iter().all(|t| t.status == StageStatus::Done)
    }

    /// Whether nothing is running or still easing toward full.
    #[must_use]
    pub fn is_settled(&self) -> bool {
        !self.stages.iter().any(|track| match track.status {
            StageStatus::Running => true,
            StageStatus::Done => track.displayed < 1.0,
            StageStatus::Idle | StageStatus::Error => false,
        })
    }

    /// Advance every stage's display to `now`.
    pub fn tick(&mut self, now: Instant) -> ProgressSnapshot {
        let dt = self
            .last_tick
            .map_or(0.0, |last| now.saturating_duration_since(last).as_secs_f64());
        self.last_tick = Some(now);

        let tuning = self.tuning;
        for track in &mut self.stages {
            track.advance(now, dt, &tuning);
        }

        let eta = self.update_eta(now);
        ProgressSnapshot {
            fraction: self.displayed(),
            percent: self.percent(),
            eta,
        }
    }

    /// Displayed percentage; 100 only once every stage is done.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn percent(&self) -> u8 {
        let rounded = (self.displayed() * 100.0).round().clamp(0.0, 100.0) as u8;
        if self.all_done() {
            rounded
        } else {
            rounded.min(99)
        }
    }

    /// Weighted total of the displayed stage fractions.
    #[must_use]
    pub fn displayed(&self) -> f64 {
        let points: f64 = self
            .stages
            .iter()
            .map(|track| f64::from(track.weight) * track.displayed)
            .sum();
        (points / 100.0).clamp(0.0, 1.0)
    }

    /// Smoothed remaining time of the running stage plus the full
    /// estimates of the stages not yet started.
    fn update_eta(&mut self, now: Instant) -> Option<Duration> {
        if self.stages.is_empty() || self.all_done() {
            self.eta = None;
            return None;
        }

        let active = self
            .stages
            .iter()
            .find(|track| track.status == StageStatus::Running);
        let active_secs = match active {
            Some(track) => {
                let raw = track.remaining(now)?.as_secs_f64();
                let smoothed = match self.eta {
                    Some(prev) if prev.stage == track.kind => {
                        prev.smoothed + self.tuning.eta_alpha * (raw - prev.smoothed)
                    }
                    _ => raw,
                };
                self.eta = Some(EtaTrack {
                    stage: track.kind,
                    smoothed,
                });
                smoothed
            }
            None => {
                self.eta = None;
                0.0
            }
        };

        let pending = self
            .stages
            .iter()
            .filter(|track| track.status == StageStatus::Idle)
            .map(|track| track.estimate)
            .sum::<Option<Duration>>()?;

        Some(Duration::from_secs_f64(active_secs.max(0.0)) + pending)
    }

    fn estimate_for(&self, stage: StageKind, load: StageLoad) -> Option<Duration> {
        self.calibration
            .estimate(stage, load)
            .map(|estimate| estimate.max(self.tuning.min_estimate))
    }

    fn track(&self, stage: StageKind) -> Option<&StageTrack> {
        self.stages.iter().find(|track| track.kind == stage)
    }

    fn track_mut(&mut self, stage: StageKind) -> Option<&mut StageTrack> {
        self.stages.iter_mut().find(|track| track.kind == stage)
    }
}

/// Render an ETA for the display.
///
/// Empty when unknown, `ETA: <1 s` below one second, `ETA: mm:ss`
/// otherwise (minutes keep growing past 59).
#[must_use]
pub fn format_eta(eta: Option<Duration>) -> String {
    match eta {
        None => String::new(),
        Some(eta) if eta < Duration::from_secs(1) => "ETA: <1 s".to_owned(),
        Some(eta) => {
            let secs = eta.as_secs();
            format!("ETA: {:02}:{:02}", secs / 60, secs % 60)
        }
    }
}
