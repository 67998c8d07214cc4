//! Pipeline stages and their weighted layouts.

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::mode::PipelineKind;
use crate::{AppError, Result};

/// A progress-estimated unit of pipeline work.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    /// Strip the framing the capture process wrote around payload bytes.
    Unwrap,
    /// Forward-error-correction decode of the unwrapped artifact.
    Decode,
    /// Forward-error-correction encode of the input file.
    Encode,
    /// Frame the encoded artifact for the radio.
    Wrap,
    /// Over-the-air transmission by the radio transmitter process.
    Transmit,
}

impl StageKind {
    /// Short label used in logs and display lines.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Unwrap => "unwrap",
            Self::Decode => "decode",
            Self::Encode => "encode",
            Self::Wrap => "wrap",
            Self::Transmit => "transmit",
        }
    }

    /// Whether the stage runs on a worker thread rather than a child process.
    #[must_use]
    pub fn runs_on_worker(self) -> bool {
        !matches!(self, Self::Transmit)
    }
}

impl Display for StageKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Lifecycle of a single stage within a session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    /// Not yet started.
    Idle,
    /// Started and not yet finished.
    Running,
    /// Finished successfully.
    Done,
    /// Failed, or abandoned when the session stopped.
    Error,
}

/// Ordered stages of a pipeline with their weights in percentage points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineLayout {
    stages: Vec<(StageKind, u32)>,
}

impl PipelineLayout {
    /// Build a layout, rejecting weights that do not sum to 100.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the layout is empty, repeats a stage,
    /// or its weights do not sum to exactly 100 percentage points.
    pub fn new(stages: Vec<(StageKind, u32)>) -> Result<Self> {
        if stages.is_empty() {
            return Err(AppError::Config("pipeline layout has no stages".into()));
        }
        let total: u32 = stages.iter().map(|(_, weight)| weight).sum();
        if total != 100 {
            return Err(AppError::Config(format!(
                "stage weights must sum to 100, got {total}"
            )));
        }
        for (idx, (kind, _)) in stages.iter().enumerate() {
            if stages[..idx].iter().any(|(other, _)| other == kind) {
                return Err(AppError::Config(format!("stage {kind} listed twice")));
            }
        }
        Ok(Self { stages })
    }

    /// Fixed layout for a pipeline kind.
    #[must_use]
    pub fn for_pipeline(kind: PipelineKind) -> Self {
        let stages = match kind {
            PipelineKind::Receive | PipelineKind::HoppingReceive => {
                vec![(StageKind::Unwrap, 50), (StageKind::Decode, 50)]
            }
            PipelineKind::Transmit | PipelineKind::HoppingTransmit => vec![
                (StageKind::Encode, 15),
                (StageKind::Wrap, 15),
                (StageKind::Transmit, 70),
            ],
        };
        Self { stages }
    }

    /// Stages with weights, in execution order.
    #[must_use]
    pub fn stages(&self) -> &[(StageKind, u32)] {
        &self.stages
    }

    /// Weight of `stage` in percentage points, if it belongs to the layout.
    #[must_use]
    pub fn weight_of(&self, stage: StageKind) -> Option<u32> {
        self.stages
            .iter()
            .find(|(kind, _)| *kind == stage)
            .map(|(_, weight)| *weight)
    }

    /// Stage that follows `stage`, if any.
    #[must_use]
    pub fn next_after(&self, stage: StageKind) -> Option<StageKind> {
        let idx = self.stages.iter().position(|(kind, _)| *kind == stage)?;
        self.stages.get(idx + 1).map(|(kind, _)| *kind)
    }

    /// First stage of the layout.
    #[must_use]
    pub fn first(&self) -> Option<StageKind> {
        self.stages.first().map(|(kind, _)| *kind)
    }
}
