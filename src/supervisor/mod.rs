//! Process supervisor: launch, observe, and tear down child processes.
//!
//! Every external program a pipeline runs goes through a [`ProcessHandle`].
//! The handle owns the OS-facing [`ProcessControl`] object, the output
//! readers' cancellation token, and a `released` flag that makes
//! [`ProcessHandle::stop`] idempotent.
//!
//! Launching is abstracted behind [`ProcessLauncher`] so the session
//! controller can be driven by scripted fakes in tests.

pub mod codec;
pub mod monitor;
pub mod reader;
pub mod shutdown;
pub mod spawner;

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::events::ControlEvent;
use crate::models::process::ProcessTag;
use crate::Result;

use self::monitor::ExitSummary;
use self::shutdown::{ShutdownCommand, StopReport};

// ── Policies ─────────────────────────────────────────────────────────────────

/// Window and process-group policy applied at creation.
///
/// On Unix every policy except `Hidden` places the child in a new process
/// group so the whole tree can be signalled at once.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreationPolicy {
    /// No console window; shares the supervisor's process group.
    #[default]
    Hidden,
    /// Own console window and process group.
    NewConsole,
    /// Detached from any console, own process group.
    Detached,
    /// Own process group, console inherited.
    Grouped,
}

impl CreationPolicy {
    /// Whether the child leads its own process group.
    #[must_use]
    pub fn new_group(self) -> bool {
        !matches!(self, Self::Hidden)
    }
}

/// Cooperative termination request sent in the second tier.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TermSignal {
    /// `SIGINT`, the console-interrupt equivalent.
    Interrupt,
    /// `SIGTERM`.
    #[default]
    Terminate,
}

/// Resolved termination ladder for one process.
#[derive(Debug, Clone)]
pub struct TerminationPolicy {
    /// Second-tier signal.
    pub signal: TermSignal,
    /// Wait after the cooperative request.
    pub grace: Duration,
    /// Wait after the forced kill.
    pub final_wait: Duration,
    /// First-tier application-level shutdown request.
    pub shutdown: Option<ShutdownCommand>,
}

impl Default for TerminationPolicy {
    fn default() -> Self {
        Self {
            signal: TermSignal::Terminate,
            grace: Duration::from_millis(1200),
            final_wait: Duration::from_millis(1000),
            shutdown: None,
        }
    }
}

/// Fully resolved launch description.
#[derive(Debug, Clone)]
pub struct ProcessSpec {
    /// Human-readable label used in logs.
    pub label: String,
    /// Executable path or bare name.
    pub executable: PathBuf,
    /// Expanded arguments.
    pub args: Vec<String>,
    /// Working directory.
    pub working_dir: PathBuf,
    /// Environment overrides on top of the inherited environment.
    pub env: HashMap<String, String>,
    /// Extra directories prepended to `PATH`.
    pub search_paths: Vec<PathBuf>,
    /// Creation policy.
    pub creation: CreationPolicy,
    /// Whether stdout and stderr are read as telemetry lines.
    pub capture_output: bool,
    /// Termination ladder.
    pub termination: TerminationPolicy,
}

// ── Control seam ─────────────────────────────────────────────────────────────

/// OS-facing operations on one launched process.
pub trait ProcessControl: Send {
    /// Process identifier, if still known.
    fn pid(&self) -> Option<u32>;

    /// Non-blocking exit check.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Process` if the status cannot be queried.
    fn try_wait(&mut self) -> Result<Option<ExitSummary>>;

    /// Ask the process (group) to exit.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Process` if the request cannot be delivered.
    fn request_terminate(&mut self, signal: TermSignal) -> Result<()>;

    /// Forcibly terminate the process and all of its descendants.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Process` if the kill cannot be delivered.
    fn kill_tree(&mut self) -> Result<()>;
}

/// Launches processes for the session controller.
pub trait ProcessLauncher: Send {
    /// Launch `spec` and forward its output lines as [`ControlEvent::Line`]
    /// events tagged with `tag`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the executable cannot be found and
    /// `AppError::Spawn` if the OS refuses to start it.
    fn launch(
        &self,
        spec: ProcessSpec,
        tag: ProcessTag,
        events: mpsc::Sender<ControlEvent>,
    ) -> Result<ProcessHandle>;
}

/// Launcher backed by real OS processes.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemLauncher;

impl ProcessLauncher for SystemLauncher {
    fn launch(
        &self,
        spec: ProcessSpec,
        tag: ProcessTag,
        events: mpsc::Sender<ControlEvent>,
    ) -> Result<ProcessHandle> {
        spawner::spawn_process(spec, tag, events)
    }
}

// ── Handle ───────────────────────────────────────────────────────────────────

/// A supervised child process.
pub struct ProcessHandle {
    tag: ProcessTag,
    label: String,
    pid: Option<u32>,
    termination: TerminationPolicy,
    control: Box<dyn ProcessControl>,
    reader_cancel: CancellationToken,
    started_at: Instant,
    released: bool,
    exit: Option<ExitSummary>,
}

impl std::fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessHandle")
            .field("tag", &self.tag)
            .field("label", &self.label)
            .field("pid", &self.pid)
            .field("released", &self.released)
            .field("exit", &self.exit)
            .finish_non_exhaustive()
    }
}

impl ProcessHandle {
    /// Wrap a launched process.
    #[must_use]
    pub fn new(
        tag: ProcessTag,
        label: impl Into<String>,
        control: Box<dyn ProcessControl>,
        termination: TerminationPolicy,
        reader_cancel: CancellationToken,
    ) -> Self {
        let pid = control.pid();
        Self {
            tag,
            label: label.into(),
            pid,
            termination,
            control,
            reader_cancel,
            started_at: Instant::now(),
            released: false,
            exit: None,
        }
    }

    /// Session and role of the process.
    #[must_use]
    pub fn tag(&self) -> ProcessTag {
        self.tag
    }

    /// Log label.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Process identifier captured at launch.
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Whether the handle has been torn down or observed to exit.
    #[must_use]
    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Exit status, once known.
    #[must_use]
    pub fn exit(&self) -> Option<ExitSummary> {
        self.exit
    }

    /// `true` while the process has not been released and has not exited.
    pub fn is_running(&mut self) -> bool {
        if self.released {
            return false;
        }
        match self.control.try_wait() {
            Ok(None) => true,
            Ok(Some(summary)) => {
                self.exit = Some(summary);
                false
            }
            Err(err) => {
                warn!(pid = ?self.pid, label = %self.label, %err, "process status query failed");
                false
            }
        }
    }

    /// Check for a natural exit; returns the summary exactly once.
    ///
    /// A process whose status cannot be queried is treated as exited so a
    /// dead entry is never polled forever.
    pub fn poll_exit(&mut self) -> Option<ExitSummary> {
        if self.released {
            return None;
        }
        let summary = match self.control.try_wait() {
            Ok(Some(summary)) => summary,
            Ok(None) => return None,
            Err(err) => {
                warn!(pid = ?self.pid, label = %self.label, %err, "failed to poll process status");
                ExitSummary::unknown()
            }
        };
        debug!(
            pid = ?self.pid,
            label = %self.label,
            exit = %summary,
            uptime_ms = self.started_at.elapsed().as_millis(),
            "process exited"
        );
        self.exit = Some(summary);
        self.released = true;
        Some(summary)
    }

    /// Run the termination ladder. Idempotent; never fails.
    pub async fn stop(&mut self) -> StopReport {
        shutdown::stop_process(self).await
    }

    pub(crate) fn termination(&self) -> &TerminationPolicy {
        &self.termination
    }

    pub(crate) fn control_mut(&mut self) -> &mut dyn ProcessControl {
        self.control.as_mut()
    }

    pub(crate) fn mark_released(&mut self, exit: Option<ExitSummary>) {
        if exit.is_some() {
            self.exit = exit;
        }
        self.released = true;
        self.reader_cancel.cancel();
    }
}
