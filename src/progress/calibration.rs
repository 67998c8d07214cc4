//! Per-stage throughput models and their process-wide calibration.
//!
//! Each stage is modelled as `bytes / β + overhead`, where `β` is a
//! calibrated throughput in bytes per second. Stages whose cost grows with
//! the redundancy parameter `r` store `β` at a reference redundancy and
//! scale it by `(reference / r)^exponent` for a given run. Measurements are
//! normalized back to the reference before they are folded into the EMA.

use std::collections::BTreeMap;
use std::time::Duration;

use tracing::debug;

use crate::config::{ProgressConfig, StageModelConfig};
use crate::models::stage::StageKind;

/// Bytes in one MiB; every MB/s figure in configuration uses this unit.
pub const BYTES_PER_MB: f64 = 1_048_576.0;

/// Smallest throughput used in any division.
const MIN_THROUGHPUT: f64 = 1.0;

/// How a stage's throughput depends on the redundancy parameter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ThroughputScaling {
    /// Independent of redundancy.
    Linear,
    /// `β(r) = β_ref · (reference / r)^exponent`.
    Redundancy {
        /// Redundancy at which the base throughput applies.
        reference: f64,
        /// Scaling exponent.
        exponent: f64,
    },
}

impl ThroughputScaling {
    /// Multiplier applied to the base throughput for `redundancy`.
    #[must_use]
    pub fn factor(self, redundancy: Option<u32>) -> f64 {
        match (self, redundancy) {
            (Self::Redundancy { reference, exponent }, Some(r)) => {
                (reference / f64::from(r.max(1))).powf(exponent)
            }
            _ => 1.0,
        }
    }
}

/// Work a stage is expected to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StageLoad {
    /// Input bytes.
    pub bytes: u64,
    /// Redundancy parameter, for stages that scale with it.
    pub redundancy: Option<u32>,
}

impl StageLoad {
    /// Load of `bytes` with no redundancy dependency.
    #[must_use]
    pub fn bytes(bytes: u64) -> Self {
        Self {
            bytes,
            redundancy: None,
        }
    }

    /// Load of `bytes` at redundancy `r`.
    #[must_use]
    pub fn with_redundancy(bytes: u64, redundancy: u32) -> Self {
        Self {
            bytes,
            redundancy: Some(redundancy),
        }
    }
}

/// Throughput model of one stage.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StageModel {
    /// Calibrated throughput at the reference redundancy, bytes/s.
    pub base_throughput: f64,
    /// Fixed per-run overhead.
    pub overhead: Duration,
    /// Redundancy dependency.
    pub scaling: ThroughputScaling,
}

impl StageModel {
    /// Model with a throughput given in MiB/s.
    #[must_use]
    pub fn from_mbps(mbps: f64, overhead: Duration, scaling: ThroughputScaling) -> Self {
        Self {
            base_throughput: mbps * BYTES_PER_MB,
            overhead,
            scaling,
        }
    }

    /// Model from its configuration table.
    #[must_use]
    pub fn from_config(config: &StageModelConfig) -> Self {
        let scaling = match config.redundancy_reference {
            Some(reference) => ThroughputScaling::Redundancy {
                reference: f64::from(reference),
                exponent: config.redundancy_exponent.unwrap_or(0.5),
            },
            None => ThroughputScaling::Linear,
        };
        Self::from_mbps(
            config.throughput_mbps,
            Duration::from_millis(config.overhead_ms),
            scaling,
        )
    }

    /// Throughput for a run at `redundancy`, bytes/s.
    #[must_use]
    pub fn effective_throughput(&self, redundancy: Option<u32>) -> f64 {
        (self.base_throughput * self.scaling.factor(redundancy)).max(MIN_THROUGHPUT)
    }

    /// Estimated duration of `load`.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn estimate(&self, load: StageLoad) -> Duration {
        let seconds = load.bytes as f64 / self.effective_throughput(load.redundancy);
        Duration::from_secs_f64(seconds.max(0.0)) + self.overhead
    }
}

/// Long-lived per-stage throughput estimates.
///
/// Owned by the progress estimator and kept across sessions; written only
/// at stage completion.
#[derive(Debug, Clone)]
pub struct CalibrationState {
    alpha: f64,
    models: BTreeMap<StageKind, StageModel>,
}

impl CalibrationState {
    /// Empty state with EMA weight `alpha`.
    #[must_use]
    pub fn new(alpha: f64) -> Self {
        Self {
            alpha: alpha.clamp(f64::EPSILON, 1.0),
            models: BTreeMap::new(),
        }
    }

    /// State seeded from configuration for every worker stage.
    #[must_use]
    pub fn from_config(config: &ProgressConfig) -> Self {
        let mut state = Self::new(config.calibration_alpha);
        state.set_model(StageKind::Unwrap, StageModel::from_config(&config.unwrap));
        state.set_model(StageKind::Decode, StageModel::from_config(&config.decode));
        state.set_model(StageKind::Encode, StageModel::from_config(&config.encode));
        state.set_model(StageKind::Wrap, StageModel::from_config(&config.wrap));
        state
    }

    /// Install or replace the model of `stage`.
    pub fn set_model(&mut self, stage: StageKind, model: StageModel) {
        self.models.insert(stage, model);
    }

    /// Current model of `stage`.
    #[must_use]
    pub fn model(&self, stage: StageKind) -> Option<&StageModel> {
        self.models.get(&stage)
    }

    /// Calibrated base throughput of `stage` in MiB/s.
    #[must_use]
    pub fn throughput_mbps(&self, stage: StageKind) -> Option<f64> {
        self.models
            .get(&stage)
            .map(|model| model.base_throughput / BYTES_PER_MB)
    }

    /// Estimated duration of `load` on `stage`; `None` for unknown stages.
    #[must_use]
    pub fn estimate(&self, stage: StageKind, load: StageLoad) -> Option<Duration> {
        self.models.get(&stage).map(|model| model.estimate(load))
    }

    /// Fold a completed run into the stage's throughput.
    ///
    /// Returns the new base throughput in bytes/s, or `None` when the run
    /// carries no information (zero bytes, zero time, unknown stage).
    #[allow(clippy::cast_precision_loss)]
    pub fn record(
        &mut self,
        stage: StageKind,
        load: StageLoad,
        elapsed: Duration,
    ) -> Option<f64> {
        let seconds = elapsed.as_secs_f64();
        if load.bytes == 0 || seconds <= 0.0 {
            return None;
        }
        let model = self.models.get_mut(&stage)?;
        let measured = load.bytes as f64 / seconds;
        let normalized = measured / model.scaling.factor(load.redundancy);
        let updated = (1.0 - self.alpha) * model.base_throughput + self.alpha * normalized;
        model.base_throughput = updated.max(MIN_THROUGHPUT);

        debug!(
            stage = %stage,
            measured_mbps = measured / BYTES_PER_MB,
            calibrated_mbps = model.base_throughput / BYTES_PER_MB,
            "stage throughput calibrated"
        );
        Some(model.base_throughput)
    }
}
