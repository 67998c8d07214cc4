//! Three-tier termination ladder.
//!
//! 1. Deliver the configured application-level shutdown command, if any.
//! 2. Send the cooperative signal and wait up to the grace period.
//! 3. Kill the whole process tree and wait briefly for confirmation.
//!
//! Every failure along the way is logged and the ladder moves on; stopping
//! a process never raises. The handle is marked released at the end no
//! matter what, so a second call returns immediately.

use std::fmt::{Display, Formatter};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::device::{self, DeviceEndpoint};
use crate::models::process::ProcessTag;
use crate::supervisor::monitor::ExitSummary;
use crate::supervisor::ProcessHandle;
use crate::Result;

/// Interval between exit polls while waiting.
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Upper bound on delivering the first-tier command.
const COMMAND_BUDGET: Duration = Duration::from_secs(3);

/// Application-level request asking a process to exit on its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownCommand {
    /// A single UDP datagram, e.g. `STOP` to a detector's control port.
    Datagram {
        /// Destination `host:port`.
        addr: String,
        /// Payload text.
        payload: String,
    },
    /// Command lines sent to the radio device through the command channel.
    DeviceLines {
        /// Device endpoint.
        endpoint: DeviceEndpoint,
        /// Lines to send, in order.
        lines: Vec<String>,
    },
}

impl ShutdownCommand {
    /// Deliver the command.
    ///
    /// Device lines are sent best-effort; only a datagram send error is
    /// returned.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Command` if the datagram cannot be sent.
    pub async fn deliver(&self) -> Result<()> {
        match self {
            Self::Datagram { addr, payload } => device::send_datagram(addr, payload).await,
            Self::DeviceLines { endpoint, lines } => {
                for line in lines {
                    device::send_best_effort(endpoint, line).await;
                }
                Ok(())
            }
        }
    }
}

/// Last ladder tier that was needed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopTier {
    /// The handle was already released, or the process had already exited.
    AlreadyReleased,
    /// Exited after the shutdown command or the cooperative signal.
    Cooperative,
    /// Exited only after the forced tree kill.
    Forced,
    /// Still not confirmed dead after the forced kill.
    Unconfirmed,
}

impl Display for StopTier {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::AlreadyReleased => "already released",
            Self::Cooperative => "cooperative",
            Self::Forced => "forced",
            Self::Unconfirmed => "unconfirmed",
        };
        f.write_str(label)
    }
}

/// Result of stopping one process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StopReport {
    /// Session and role.
    pub tag: ProcessTag,
    /// Log label.
    pub label: String,
    /// Process identifier.
    pub pid: Option<u32>,
    /// Tier reached.
    pub tier: StopTier,
    /// Exit status, if observed.
    pub exit: Option<ExitSummary>,
    /// Time spent in the ladder.
    pub elapsed: Duration,
}

impl Display for StopReport {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let status = self
            .exit
            .map_or_else(|| "no exit status".to_owned(), |exit| exit.to_string());
        write!(f, "{} stopped ({}, {status})", self.label, self.tier)
    }
}

/// Run the ladder on `handle`.
pub async fn stop_process(handle: &mut ProcessHandle) -> StopReport {
    let tag = handle.tag();
    let span = info_span!(
        "stop_process",
        session_id = tag.session.0,
        role = %tag.role,
        pid = ?handle.pid()
    );
    run_ladder(handle).instrument(span).await
}

async fn run_ladder(handle: &mut ProcessHandle) -> StopReport {
    let started = Instant::now();

    if handle.is_released() || !handle.is_running() {
        let exit = handle.exit();
        handle.mark_released(exit);
        debug!("process already released");
        return report(handle, StopTier::AlreadyReleased, started);
    }

    // ── Tier 1: application-level shutdown command ──
    if let Some(command) = handle.termination().shutdown.clone() {
        match tokio::time::timeout(COMMAND_BUDGET, command.deliver()).await {
            Ok(Ok(())) => debug!("shutdown command delivered"),
            Ok(Err(err)) => debug!(%err, "shutdown command failed, continuing"),
            Err(_) => debug!("shutdown command timed out, continuing"),
        }
    }

    // ── Tier 2: cooperative signal ──
    let signal = handle.termination().signal;
    let grace = handle.termination().grace;
    if let Err(err) = handle.control_mut().request_terminate(signal) {
        warn!(%err, "cooperative termination request failed");
    }
    if let Some(exit) = wait_for_exit(handle, grace).await {
        info!(status = %exit, "process exited after cooperative request");
        handle.mark_released(Some(exit));
        return report(handle, StopTier::Cooperative, started);
    }

    // ── Tier 3: forced tree kill ──
    warn!(grace_ms = grace.as_millis(), "process ignored cooperative request, killing tree");
    if let Err(err) = handle.control_mut().kill_tree() {
        warn!(%err, "forced tree kill failed");
    }
    let final_wait = handle.termination().final_wait;
    let tier = match wait_for_exit(handle, final_wait).await {
        Some(exit) => {
            info!(status = %exit, "process exited after forced kill");
            handle.mark_released(Some(exit));
            StopTier::Forced
        }
        None => {
            warn!("process exit not confirmed after forced kill");
            handle.mark_released(None);
            StopTier::Unconfirmed
        }
    };
    report(handle, tier, started)
}

async fn wait_for_exit(handle: &mut ProcessHandle, budget: Duration) -> Option<ExitSummary> {
    let deadline = Instant::now() + budget;
    loop {
        match handle.control_mut().try_wait() {
            Ok(Some(exit)) => return Some(exit),
            Ok(None) => {}
            Err(err) => {
                debug!(%err, "exit poll failed");
                return Some(ExitSummary::unknown());
            }
        }
        let now = Instant::now();
        if now >= deadline {
            return None;
        }
        tokio::time::sleep(EXIT_POLL_INTERVAL.min(deadline - now)).await;
    }
}

fn report(handle: &ProcessHandle, tier: StopTier, started: Instant) -> StopReport {
    StopReport {
        tag: handle.tag(),
        label: handle.label().to_owned(),
        pid: handle.pid(),
        tier,
        exit: handle.exit(),
        elapsed: started.elapsed(),
    }
}
