//! Line codec for child-process telemetry.
//!
//! Child processes terminate lines with `\n`, `\r\n`, or a bare `\r`
//! (progress meters redraw in place). [`TelemetryCodec`] splits on either
//! terminator, decodes lossily as UTF-8, trims surrounding whitespace, and
//! drops empty lines.
//!
//! A line longer than the configured limit is truncated to the limit and
//! the remainder is discarded up to the next terminator. Truncation never
//! terminates the stream.
//!
//! ```rust,ignore
//! use tokio_util::codec::FramedRead;
//! use rigflow::supervisor::codec::TelemetryCodec;
//!
//! let lines = FramedRead::new(child_stdout, TelemetryCodec::new());
//! ```

use bytes::{Buf, BytesMut};
use tokio_util::codec::Decoder;
use tracing::debug;

use crate::{AppError, Result};

/// Default per-line limit: 64 KiB.
pub const MAX_LINE_BYTES: usize = 65_536;

/// Dual-terminator, lossy UTF-8 line decoder.
#[derive(Debug)]
pub struct TelemetryCodec {
    max_length: usize,
    discarding: bool,
}

impl TelemetryCodec {
    /// Create a codec with the default [`MAX_LINE_BYTES`] limit.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_length(MAX_LINE_BYTES)
    }

    /// Create a codec with a custom per-line limit (at least one byte).
    #[must_use]
    pub fn with_max_length(max_length: usize) -> Self {
        Self {
            max_length: max_length.max(1),
            discarding: false,
        }
    }
}

impl Default for TelemetryCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for TelemetryCodec {
    type Item = String;
    type Error = AppError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        loop {
            let terminator = src.iter().position(|b| *b == b'\n' || *b == b'\r');

            match terminator {
                Some(idx) => {
                    let raw = src.split_to(idx);
                    src.advance(1);
                    if self.discarding {
                        self.discarding = false;
                        continue;
                    }
                    let keep = raw.len().min(self.max_length);
                    if keep < raw.len() {
                        debug!(limit = self.max_length, "telemetry line truncated");
                    }
                    if let Some(line) = to_line(&raw[..keep]) {
                        return Ok(Some(line));
                    }
                }
                None if src.len() > self.max_length => {
                    if self.discarding {
                        src.clear();
                        return Ok(None);
                    }
                    let head = src.split_to(self.max_length);
                    self.discarding = true;
                    debug!(limit = self.max_length, "telemetry line truncated");
                    if let Some(line) = to_line(&head) {
                        return Ok(Some(line));
                    }
                }
                None => return Ok(None),
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        if let Some(line) = self.decode(src)? {
            return Ok(Some(line));
        }
        if src.is_empty() {
            return Ok(None);
        }
        let rest = src.split();
        if std::mem::take(&mut self.discarding) {
            return Ok(None);
        }
        Ok(to_line(&rest))
    }
}

fn to_line(raw: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(raw);
    let trimmed = text.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_owned())
    }
}
