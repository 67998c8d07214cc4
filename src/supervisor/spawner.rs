//! OS process spawner.
//!
//! Launches pipeline processes with:
//! - fail-fast executable resolution, reported as `AppError::Config`;
//! - the executable's own directory and the configured runtime paths
//!   prepended to `PATH` so co-located shared libraries resolve;
//! - the creation policy mapped to a process group (Unix) or creation
//!   flags (Windows);
//! - `kill_on_drop(true)` as the last line of defence;
//! - one [`run_reader`] task per captured output stream.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, Instrument};

use crate::events::ControlEvent;
use crate::models::process::ProcessTag;
use crate::supervisor::monitor::ExitSummary;
use crate::supervisor::reader::run_reader;
use crate::supervisor::{CreationPolicy, ProcessControl, ProcessHandle, ProcessSpec, TermSignal};
use crate::{AppError, Result};

// ── Executable resolution ────────────────────────────────────────────────────

/// Resolve `executable` to an existing file.
///
/// Paths with a directory component must exist as given. Bare names are
/// searched in `extra_dirs`, then in `PATH`.
///
/// # Errors
///
/// Returns `AppError::Config` if no matching file exists.
pub fn resolve_executable(executable: &Path, extra_dirs: &[PathBuf]) -> Result<PathBuf> {
    let has_dir = executable
        .parent()
        .is_some_and(|parent| !parent.as_os_str().is_empty());

    if has_dir || executable.is_absolute() {
        if executable.is_file() {
            return Ok(executable.to_path_buf());
        }
        return Err(AppError::Config(format!(
            "executable not found: {}",
            executable.display()
        )));
    }

    let path_var = std::env::var_os("PATH").unwrap_or_default();
    let search = extra_dirs
        .iter()
        .cloned()
        .chain(std::env::split_paths(&path_var));

    for dir in search {
        for candidate in candidates(&dir, executable) {
            if candidate.is_file() {
                return Ok(candidate);
            }
        }
    }

    Err(AppError::Config(format!(
        "executable not found in PATH: {}",
        executable.display()
    )))
}

#[cfg(windows)]
fn candidates(dir: &Path, name: &Path) -> Vec<PathBuf> {
    let plain = dir.join(name);
    if name.extension().is_some() {
        vec![plain]
    } else {
        vec![plain.with_extension("exe"), plain]
    }
}

#[cfg(not(windows))]
fn candidates(dir: &Path, name: &Path) -> Vec<PathBuf> {
    vec![dir.join(name)]
}

/// Build the `PATH` value for a child: executable directory, configured
/// runtime paths, then the inherited search path.
///
/// # Errors
///
/// Returns `AppError::Config` if a directory contains the platform's path
/// separator.
pub fn augmented_search_path(executable: &Path, extra_dirs: &[PathBuf]) -> Result<OsString> {
    let inherited = std::env::var_os("PATH").unwrap_or_default();
    let exe_dir = executable
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .map(Path::to_path_buf);

    let dirs: Vec<PathBuf> = exe_dir
        .into_iter()
        .chain(extra_dirs.iter().cloned())
        .chain(std::env::split_paths(&inherited))
        .collect();

    std::env::join_paths(dirs)
        .map_err(|err| AppError::Config(format!("invalid runtime search path: {err}")))
}

// ── Spawner ──────────────────────────────────────────────────────────────────

/// Launch `spec` and start forwarding its output.
///
/// # Errors
///
/// - `AppError::Config`: executable not found or search path invalid.
/// - `AppError::Spawn`: OS spawn failure.
pub fn spawn_process(
    spec: ProcessSpec,
    tag: ProcessTag,
    events: mpsc::Sender<ControlEvent>,
) -> Result<ProcessHandle> {
    let span = info_span!("spawn_process", session_id = tag.session.0, role = %tag.role);
    let _guard = span.enter();

    let executable = resolve_executable(&spec.executable, &spec.search_paths)?;
    let search_path = augmented_search_path(&executable, &spec.search_paths)?;

    let mut cmd = Command::new(&executable);
    cmd.args(&spec.args)
        .current_dir(&spec.working_dir)
        .env("PATH", search_path)
        .envs(&spec.env)
        .stdin(Stdio::null())
        .kill_on_drop(true);

    if spec.capture_output {
        cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
    } else {
        cmd.stdout(Stdio::inherit()).stderr(Stdio::inherit());
    }

    apply_creation_policy(&mut cmd, spec.creation);

    let mut child = cmd.spawn().map_err(|err| {
        AppError::Spawn(format!(
            "failed to start {} ({}): {err}",
            spec.label,
            executable.display()
        ))
    })?;

    let cancel = CancellationToken::new();
    if let Some(stdout) = child.stdout.take() {
        tokio::spawn(
            run_reader(tag, stdout, events.clone(), cancel.clone())
                .instrument(info_span!("reader", stream = "stdout", role = %tag.role)),
        );
    }
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(
            run_reader(tag, stderr, events, cancel.clone())
                .instrument(info_span!("reader", stream = "stderr", role = %tag.role)),
        );
    }

    info!(
        label = %spec.label,
        pid = ?child.id(),
        executable = %executable.display(),
        args = ?spec.args,
        "process started"
    );

    let control = SystemProcess {
        child,
        grouped: spec.creation.new_group(),
    };
    Ok(ProcessHandle::new(
        tag,
        spec.label,
        Box::new(control),
        spec.termination,
        cancel,
    ))
}

#[cfg(unix)]
fn apply_creation_policy(cmd: &mut Command, policy: CreationPolicy) {
    if policy.new_group() {
        cmd.process_group(0);
    }
}

#[cfg(windows)]
fn apply_creation_policy(cmd: &mut Command, policy: CreationPolicy) {
    const CREATE_NO_WINDOW: u32 = 0x0800_0000;
    const CREATE_NEW_CONSOLE: u32 = 0x0000_0010;
    const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
    const DETACHED_PROCESS: u32 = 0x0000_0008;

    let flags = match policy {
        CreationPolicy::Hidden => CREATE_NO_WINDOW,
        CreationPolicy::NewConsole => CREATE_NEW_CONSOLE | CREATE_NEW_PROCESS_GROUP,
        CreationPolicy::Detached => DETACHED_PROCESS | CREATE_NEW_PROCESS_GROUP,
        CreationPolicy::Grouped => CREATE_NEW_PROCESS_GROUP,
    };
    cmd.creation_flags(flags);
}

#[cfg(not(any(unix, windows)))]
fn apply_creation_policy(_cmd: &mut Command, _policy: CreationPolicy) {}

// ── OS process control ───────────────────────────────────────────────────────

/// [`ProcessControl`] over a real tokio child.
struct SystemProcess {
    child: Child,
    grouped: bool,
}

impl ProcessControl for SystemProcess {
    fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    fn try_wait(&mut self) -> Result<Option<ExitSummary>> {
        self.child
            .try_wait()
            .map(|status| status.map(ExitSummary::from))
            .map_err(|err| AppError::Process(format!("failed to query exit status: {err}")))
    }

    fn request_terminate(&mut self, signal: TermSignal) -> Result<()> {
        match self.child.id() {
            Some(pid) => platform::signal(pid, self.grouped, signal),
            None => Ok(()),
        }
    }

    fn kill_tree(&mut self) -> Result<()> {
        let result = match self.child.id() {
            Some(pid) => platform::kill_tree(pid, self.grouped),
            None => Ok(()),
        };
        if let Err(err) = self.child.start_kill() {
            debug!(%err, "start_kill after tree kill reported an error");
        }
        result
    }
}

#[cfg(unix)]
mod platform {
    use nix::errno::Errno;
    use nix::sys::signal::{self, Signal};
    use nix::unistd::Pid;

    use crate::supervisor::TermSignal;
    use crate::{AppError, Result};

    pub(super) fn signal(pid: u32, grouped: bool, request: TermSignal) -> Result<()> {
        let sig = match request {
            TermSignal::Interrupt => Signal::SIGINT,
            TermSignal::Terminate => Signal::SIGTERM,
        };
        send(pid, grouped, sig)
    }

    pub(super) fn kill_tree(pid: u32, grouped: bool) -> Result<()> {
        send(pid, grouped, Signal::SIGKILL)
    }

    fn send(pid: u32, grouped: bool, sig: Signal) -> Result<()> {
        let raw = i32::try_from(pid)
            .map_err(|_| AppError::Process(format!("pid {pid} out of range")))?;
        let target = Pid::from_raw(raw);
        let outcome = if grouped {
            signal::killpg(target, sig)
        } else {
            signal::kill(target, sig)
        };
        match outcome {
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(err) => Err(AppError::Process(format!(
                "failed to send {sig:?} to {pid}: {err}"
            ))),
        }
    }
}

#[cfg(windows)]
mod platform {
    use std::process::{Command, Stdio};

    use crate::supervisor::TermSignal;
    use crate::{AppError, Result};

    pub(super) fn signal(pid: u32, _grouped: bool, _request: TermSignal) -> Result<()> {
        taskkill(pid, false)
    }

    pub(super) fn kill_tree(pid: u32, _grouped: bool) -> Result<()> {
        taskkill(pid, true)
    }

    fn taskkill(pid: u32, force: bool) -> Result<()> {
        let pid_text = pid.to_string();
        let mut cmd = Command::new("taskkill");
        cmd.args(["/PID", pid_text.as_str(), "/T"]);
        if force {
            cmd.arg("/F");
        }
        cmd.stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|_| ())
            .map_err(|err| AppError::Process(format!("taskkill for {pid} failed: {err}")))
    }
}

#[cfg(not(any(unix, windows)))]
mod platform {
    use crate::supervisor::TermSignal;
    use crate::Result;

    pub(super) fn signal(_pid: u32, _grouped: bool, _request: TermSignal) -> Result<()> {
        Ok(())
    }

    pub(super) fn kill_tree(_pid: u32, _grouped: bool) -> Result<()> {
        Ok(())
    }
}
