//! Child exit detection.
//!
//! The session controller health-checks its live processes on every tick.
//! Processes that exited on their own are reported once and marked
//! released so the stop ladder skips them.

use std::fmt::{Display, Formatter};
use std::process::ExitStatus;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::models::process::ProcessTag;

use super::ProcessHandle;

/// Platform-neutral exit status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitSummary {
    /// Exit code, absent when terminated by a signal or unknown.
    pub code: Option<i32>,
    /// Whether the process reported success.
    pub success: bool,
    /// Whether the status could be determined at all.
    pub known: bool,
}

impl ExitSummary {
    /// Exit with the given code.
    #[must_use]
    pub fn with_code(code: i32) -> Self {
        Self {
            code: Some(code),
            success: code == 0,
            known: true,
        }
    }

    /// Terminated by a signal.
    #[must_use]
    pub fn signalled() -> Self {
        Self {
            code: None,
            success: false,
            known: true,
        }
    }

    /// Status could not be determined.
    #[must_use]
    pub fn unknown() -> Self {
        Self {
            code: None,
            success: false,
            known: false,
        }
    }
}

impl From<ExitStatus> for ExitSummary {
    fn from(status: ExitStatus) -> Self {
        status.code().map_or_else(Self::signalled, Self::with_code)
    }
}

impl Display for ExitSummary {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if !self.known {
            return f.write_str("status unknown");
        }
        if self.success {
            return f.write_str("exited normally (code 0)");
        }
        match self.code {
            Some(code) => write!(f, "exited with code {code}"),
            None => f.write_str("terminated by signal"),
        }
    }
}

/// Poll every handle and collect the ones that exited since the last poll.
pub fn poll_exits<'a>(
    handles: impl IntoIterator<Item = &'a mut ProcessHandle>,
) -> Vec<(ProcessTag, ExitSummary)> {
    let mut exited = Vec::new();
    for handle in handles {
        if let Some(summary) = handle.poll_exit() {
            info!(
                session_id = %handle.tag().session,
                role = %handle.tag().role,
                pid = ?handle.pid(),
                status = %summary,
                "supervised process exited"
            );
            exited.push((handle.tag(), summary));
        }
    }
    exited
}
