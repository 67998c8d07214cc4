//! Session log writer.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Local;
use tracing::warn;

use crate::{AppError, Result};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Timestamped, line-oriented session log.
///
/// [`reset`](Self::reset) truncates the file and writes a start header;
/// [`append`](Self::append) adds `[timestamp] message` lines and flushes
/// after each so a concurrent tailer sees them immediately.
pub struct SessionLog {
    path: PathBuf,
    writer: Mutex<Option<BufWriter<File>>>,
}

impl std::fmt::Debug for SessionLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionLog").field("path", &self.path).finish()
    }
}

impl SessionLog {
    /// Log at `path`; nothing is opened until the first write.
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            writer: Mutex::new(None),
        }
    }

    /// File location.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Truncate the file and write the phase header.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the file cannot be created or written.
    pub fn reset(&self, phase: &str) -> Result<()> {
        let file = File::create(&self.path).map_err(|err| {
            AppError::Io(format!("failed to reset {}: {err}", self.path.display()))
        })?;
        let mut writer = BufWriter::new(file);
        writeln!(writer, "=== {phase} START {} ===", Local::now().format(TIMESTAMP_FORMAT))
            .and_then(|()| writer.flush())
            .map_err(|err| AppError::Io(format!("session log write failed: {err}")))?;

        let mut guard = self.lock()?;
        *guard = Some(writer);
        Ok(())
    }

    /// Append one timestamped line.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the file cannot be opened or written.
    pub fn append(&self, message: &str) -> Result<()> {
        let mut guard = self.lock()?;

        if guard.is_none() {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .map_err(|err| {
                    AppError::Io(format!("failed to open {}: {err}", self.path.display()))
                })?;
            *guard = Some(BufWriter::new(file));
        }

        if let Some(writer) = guard.as_mut() {
            let stamp = Local::now().format(TIMESTAMP_FORMAT);
            if let Err(err) = writeln!(writer, "[{stamp}] {message}").and_then(|()| writer.flush()) {
                warn!(path = %self.path.display(), %err, "session log write failed");
                *guard = None;
                return Err(AppError::Io(format!("session log write failed: {err}")));
            }
        }
        Ok(())
    }

    /// Remove the file if present; used before a new hopping session.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if an existing file cannot be removed.
    pub fn remove(&self) -> Result<()> {
        let mut guard = self.lock()?;
        *guard = None;
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(AppError::Io(format!(
                "failed to remove {}: {err}",
                self.path.display()
            ))),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Option<BufWriter<File>>>> {
        self.writer
            .lock()
            .map_err(|_| AppError::Io("session log mutex poisoned".into()))
    }
}
