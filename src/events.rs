//! Events consumed by the session controller's control loop.
//!
//! Readers, timers, workers, and stop tasks never touch controller state
//! directly. They post one of these events, each tagged with the session
//! that produced it, and the controller drops the ones whose session is
//! no longer current.

use std::time::Duration;

use tokio::sync::mpsc;

use crate::models::process::ProcessTag;
use crate::models::session::SessionId;
use crate::models::stage::StageKind;
use crate::orchestrator::worker::StageReport;
use crate::supervisor::shutdown::StopReport;

/// Capacity of the control-loop event channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Timers the controller schedules against an absolute deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    /// Launch the radio receiver after the capture process is up.
    ReceiverStart,
    /// Advance the hopping indicator cycle.
    IndicatorCycle,
    /// Stop the detector and start the receive stages.
    Handover,
}

/// Completion of a stage worker.
#[derive(Debug, Clone)]
pub struct WorkerEvent {
    /// Session that started the worker.
    pub session: SessionId,
    /// Stage the worker ran.
    pub stage: StageKind,
    /// Report on success, failure text otherwise.
    pub outcome: std::result::Result<StageReport, String>,
    /// Wall-clock time spent in the worker.
    pub elapsed: Duration,
}

/// A single control-loop event.
#[derive(Debug, Clone)]
pub enum ControlEvent {
    /// One line of child-process output.
    Line {
        /// Origin of the line.
        tag: ProcessTag,
        /// Decoded, trimmed text.
        text: String,
    },
    /// A scheduled deadline was reached.
    Timer {
        /// Session that scheduled the timer.
        session: SessionId,
        /// Which timer fired.
        timer: TimerKind,
    },
    /// A stage worker finished.
    Worker(WorkerEvent),
    /// The stop sequence has released every process of the session.
    ProcessesReleased {
        /// Session whose processes were stopped.
        session: SessionId,
        /// One report per stopped process, in stop order.
        reports: Vec<StopReport>,
    },
    /// The detector has been stopped ahead of the receive handover.
    HandoverReady {
        /// Session performing the handover.
        session: SessionId,
        /// Detector stop report, if a detector was running.
        report: Option<StopReport>,
    },
}

/// Create the bounded control-loop channel.
#[must_use]
pub fn channel() -> (mpsc::Sender<ControlEvent>, mpsc::Receiver<ControlEvent>) {
    mpsc::channel(EVENT_CHANNEL_CAPACITY)
}
