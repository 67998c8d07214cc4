//! Session model and controller lifecycle helpers.

use std::fmt::{Display, Formatter};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Monotonically increasing session identifier.
///
/// Every accepted start request allocates the next value; events tagged
/// with an older identifier are stale and must be ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SessionId(pub u64);

impl SessionId {
    /// The identifier that follows `self`.
    #[must_use]
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl Display for SessionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Direction of a session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionRole {
    /// Capture and decode an incoming transmission.
    Receive,
    /// Encode and transmit a file.
    Transmit,
}

/// One pipeline run from start request to final teardown.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Session {
    /// Session identifier.
    pub id: SessionId,
    /// Receive or transmit.
    pub role: SessionRole,
    /// `false` once a stop has been requested; timers check this flag.
    pub active: bool,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl Session {
    /// Construct an active session.
    #[must_use]
    pub fn new(id: SessionId, role: SessionRole) -> Self {
        Self {
            id,
            role,
            active: true,
            created_at: Utc::now(),
        }
    }
}

/// Lifecycle state of the session controller.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ControllerState {
    /// No session, or the last one has finished.
    Idle,
    /// Start accepted, first processes or workers being launched.
    Starting,
    /// Pipeline stages are running.
    Running,
    /// Stop sequence and deferred post-processing in progress.
    Stopping,
    /// Unrecoverable failure reported; returns to `Idle` once released.
    Error,
}

impl ControllerState {
    /// Determine whether a lifecycle transition is permitted.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Idle | Self::Stopping, Self::Starting)
                | (Self::Starting, Self::Running | Self::Stopping | Self::Error)
                | (Self::Running, Self::Stopping | Self::Error)
                | (Self::Stopping, Self::Idle | Self::Error)
                | (Self::Error, Self::Stopping | Self::Idle)
        )
    }

    /// Whether a session is starting or running.
    #[must_use]
    pub fn is_in_flight(self) -> bool {
        matches!(self, Self::Starting | Self::Running)
    }
}

/// Why a stop sequence began.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Operator pressed stop.
    User,
    /// The watchdog saw no byte progress for the quiet timeout.
    Quiescent,
    /// The capture process exited on its own.
    ProducerExited,
    /// The final process stage finished naturally.
    Completed,
    /// A stage failed.
    Failure,
}

impl Display for StopReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::User => "user",
            Self::Quiescent => "quiescent",
            Self::ProducerExited => "producer exited",
            Self::Completed => "completed",
            Self::Failure => "failure",
        };
        f.write_str(label)
    }
}

/// How a session ended.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum SessionOutcome {
    /// Every stage completed.
    Completed,
    /// Stopped before completion; any post-processing ran or was skipped.
    Stopped {
        /// What triggered the stop.
        reason: StopReason,
    },
    /// A stage failed.
    Failed {
        /// Failure description shown to the operator.
        message: String,
    },
}
