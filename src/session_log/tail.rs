//! Incremental reader for a growing session log.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::{Regex, RegexBuilder};

use crate::{AppError, Result};

static BER_PATTERN: LazyLock<Option<Regex>> = LazyLock::new(|| {
    RegexBuilder::new(r"BER[≈~=]?\s*([0-9]*\.?[0-9]+(?:e[-+]?\d+)?)")
        .case_insensitive(true)
        .build()
        .ok()
});

/// Extract the first bit-error-rate value from `line`.
#[must_use]
pub fn parse_ber(line: &str) -> Option<f64> {
    BER_PATTERN
        .as_ref()?
        .captures(line)?
        .get(1)?
        .as_str()
        .parse()
        .ok()
}

/// One new line read from the log.
#[derive(Debug, Clone, PartialEq)]
pub struct TailLine {
    /// Line text without the terminator.
    pub text: String,
    /// Bit error rate mentioned on the line.
    pub ber: Option<f64>,
}

/// Polls a log file for lines appended since the last poll.
///
/// A file that shrinks (was reset) is re-read from the start. A partial
/// trailing line is held back until its terminator arrives.
#[derive(Debug)]
pub struct LogTailer {
    path: PathBuf,
    offset: u64,
    pending: String,
}

impl LogTailer {
    /// Tail `path` from its beginning.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            offset: 0,
            pending: String::new(),
        }
    }

    /// File being tailed.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read complete lines appended since the previous poll.
    ///
    /// A missing file yields no lines.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the file exists but cannot be read.
    pub fn poll(&mut self) -> Result<Vec<TailLine>> {
        let mut file = match File::open(&self.path) {
            Ok(file) => file,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(AppError::Io(format!(
                    "failed to open {}: {err}",
                    self.path.display()
                )))
            }
        };

        let len = file.metadata()?.len();
        if len < self.offset {
            self.offset = 0;
            self.pending.clear();
        }
        if len == self.offset {
            return Ok(Vec::new());
        }

        file.seek(SeekFrom::Start(self.offset))?;
        let mut chunk = Vec::new();
        file.read_to_end(&mut chunk)?;
        self.offset += chunk.len() as u64;
        self.pending.push_str(&String::from_utf8_lossy(&chunk));

        let mut lines = Vec::new();
        while let Some(idx) = self.pending.find('\n') {
            let raw: String = self.pending.drain(..=idx).collect();
            let text = raw.trim_end_matches(['\r', '\n']).to_owned();
            if text.is_empty() {
                continue;
            }
            let ber = parse_ber(&text);
            lines.push(TailLine { text, ber });
        }
        Ok(lines)
    }
}
