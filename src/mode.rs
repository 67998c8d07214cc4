//! Pipeline mode: which stage chain a session runs.
//!
//! `PipelineKind` is the subcommand-independent name of a pipeline. It is
//! carried by every start request and decides the stage layout, the
//! process stop order, and whether post-processing follows the stop.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::models::session::SessionRole;

/// Pipeline selected for a session.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq, Hash, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineKind {
    /// Capture over UDP, radio receiver, then unwrap and decode.
    #[default]
    Receive,
    /// Encode, wrap, then hand the artifact to the radio transmitter.
    Transmit,
    /// Interference detector first; hand over to `Receive` on a trigger.
    HoppingReceive,
    /// Interference detector first; hand over to `Transmit` on a trigger.
    HoppingTransmit,
}

impl PipelineKind {
    /// Session role implied by this pipeline.
    #[must_use]
    pub fn role(self) -> SessionRole {
        match self {
            Self::Transmit | Self::HoppingTransmit => SessionRole::Transmit,
            Self::Receive | Self::HoppingReceive => SessionRole::Receive,
        }
    }

    /// Whether the stop sequence is followed by unwrap and decode.
    #[must_use]
    pub fn has_post_processing(self) -> bool {
        matches!(self, Self::Receive | Self::HoppingReceive)
    }

    /// Whether the session reads an input file rather than filling an
    /// output directory.
    #[must_use]
    pub fn reads_input_file(self) -> bool {
        matches!(self, Self::Transmit | Self::HoppingTransmit)
    }

    /// Stable lowercase label used in logs.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Receive => "receive",
            Self::Transmit => "transmit",
            Self::HoppingReceive => "hopping_receive",
            Self::HoppingTransmit => "hopping_transmit",
        }
    }
}
