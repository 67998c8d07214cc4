//! Identity of supervised child processes.

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use super::session::SessionId;

/// Function a child process serves in a pipeline.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ProcessRole {
    /// UDP capture process writing the receive artifact.
    Capture,
    /// Radio receiver feeding the capture process.
    Receiver,
    /// Radio transmitter consuming the wrapped artifact.
    Transmitter,
    /// Interference detector watched by the event sequencer.
    Detector,
    /// Command bridge toward the radio device.
    Bridge,
}

impl ProcessRole {
    /// Position in the stop sequence; downstream consumers stop first.
    #[must_use]
    pub fn stop_rank(self) -> u8 {
        match self {
            Self::Receiver | Self::Transmitter => 0,
            Self::Capture => 1,
            Self::Detector => 2,
            Self::Bridge => 3,
        }
    }

    /// Short label used as the display log prefix.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Capture => "capture",
            Self::Receiver => "receiver",
            Self::Transmitter => "transmitter",
            Self::Detector => "detector",
            Self::Bridge => "bridge",
        }
    }
}

impl Display for ProcessRole {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Tag attached to every event originating from a child process.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ProcessTag {
    /// Session that launched the process.
    pub session: SessionId,
    /// Role of the process in that session.
    pub role: ProcessRole,
}

impl ProcessTag {
    /// Construct a tag.
    #[must_use]
    pub fn new(session: SessionId, role: ProcessRole) -> Self {
        Self { session, role }
    }
}
