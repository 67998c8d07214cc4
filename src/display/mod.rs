//! Display sink: the narrow capability interface toward whatever shows
//! progress to the operator.
//!
//! The controller only ever calls [`DisplaySink`] methods. Two sinks ship
//! with the crate: [`TracingDisplay`] logs everything, and
//! [`JsonLinesDisplay`] writes one serialized [`DisplayEvent`] per line
//! for an external front end.

use std::io::Write;

use serde::Serialize;
use tracing::{info, warn};

use crate::models::session::ControllerState;
use crate::models::telemetry::StatsRecord;

/// Operator-facing display operations.
pub trait DisplaySink: Send {
    /// Show the overall completion percentage.
    fn set_progress_percent(&mut self, percent: u8);

    /// Show the ETA text; empty clears it.
    fn set_eta_text(&mut self, text: &str);

    /// Append one line to the operator log.
    fn append_log_line(&mut self, line: &str);

    /// Highlight indicator `index` of the hopping cycle.
    fn set_indicator_active(&mut self, index: usize);

    /// Show live capture statistics.
    fn set_stats(&mut self, _stats: &StatsRecord) {}

    /// Show the decoder's bit error rate.
    fn set_ber(&mut self, _ber: Option<f64>) {}

    /// Show the controller's lifecycle state.
    fn set_state(&mut self, _state: ControllerState) {}
}

/// One display update, as serialized by [`JsonLinesDisplay`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum DisplayEvent {
    /// Completion percentage.
    Progress {
        /// Percent, 0 to 100.
        percent: u8,
    },
    /// ETA text.
    Eta {
        /// Rendered text.
        text: String,
    },
    /// Operator log line.
    Log {
        /// Line text.
        line: String,
    },
    /// Active indicator.
    Indicator {
        /// Indicator index.
        index: usize,
    },
    /// Capture statistics.
    Stats {
        /// Packets received.
        packets: u64,
        /// Bytes received.
        bytes: u64,
        /// Rate in Mbit/s.
        rate_mbit: f64,
        /// Writer queue, MiB.
        queue_mb: f64,
        /// Dropped packets.
        drops: u64,
    },
    /// Bit error rate.
    Ber {
        /// BER, absent when unknown.
        value: Option<f64>,
    },
    /// Controller lifecycle state.
    State {
        /// New state.
        state: ControllerState,
    },
}

impl From<&StatsRecord> for DisplayEvent {
    fn from(stats: &StatsRecord) -> Self {
        Self::Stats {
            packets: stats.packets,
            bytes: stats.bytes,
            rate_mbit: stats.rate_mbit,
            queue_mb: stats.queue_mb,
            drops: stats.drops,
        }
    }
}

/// Sink that reports through `tracing`.
#[derive(Debug, Default)]
pub struct TracingDisplay {
    last_percent: Option<u8>,
}

impl DisplaySink for TracingDisplay {
    fn set_progress_percent(&mut self, percent: u8) {
        if self.last_percent != Some(percent) {
            self.last_percent = Some(percent);
            info!(target: "rigflow::display", percent, "progress");
        }
    }

    fn set_eta_text(&mut self, text: &str) {
        if !text.is_empty() {
            info!(target: "rigflow::display", eta = text, "eta");
        }
    }

    fn append_log_line(&mut self, line: &str) {
        info!(target: "rigflow::display", "{line}");
    }

    fn set_indicator_active(&mut self, index: usize) {
        info!(target: "rigflow::display", index, "indicator");
    }

    fn set_stats(&mut self, stats: &StatsRecord) {
        info!(
            target: "rigflow::display",
            packets = stats.packets,
            bytes = stats.bytes,
            rate_mbit = stats.rate_mbit,
            drops = stats.drops,
            "capture stats"
        );
    }

    fn set_ber(&mut self, ber: Option<f64>) {
        info!(target: "rigflow::display", ber = ?ber, "bit error rate");
    }

    fn set_state(&mut self, state: ControllerState) {
        info!(target: "rigflow::display", ?state, "state");
    }
}

/// Sink writing newline-delimited JSON display events.
pub struct JsonLinesDisplay<W: Write + Send> {
    writer: W,
}

impl<W: Write + Send> JsonLinesDisplay<W> {
    /// Wrap `writer`.
    #[must_use]
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Recover the writer.
    #[must_use]
    pub fn into_inner(self) -> W {
        self.writer
    }

    fn emit(&mut self, event: &DisplayEvent) {
        let result = serde_json::to_string(event)
            .map_err(std::io::Error::other)
            .and_then(|line| writeln!(self.writer, "{line}"))
            .and_then(|()| self.writer.flush());
        if let Err(err) = result {
            warn!(%err, "failed to write display event");
        }
    }
}

impl<W: Write + Send> DisplaySink for JsonLinesDisplay<W> {
    fn set_progress_percent(&mut self, percent: u8) {
        self.emit(&DisplayEvent::Progress { percent });
    }

    fn set_eta_text(&mut self, text: &str) {
        self.emit(&DisplayEvent::Eta {
            text: text.to_owned(),
        });
    }

    fn append_log_line(&mut self, line: &str) {
        self.emit(&DisplayEvent::Log {
            line: line.to_owned(),
        });
    }

    fn set_indicator_active(&mut self, index: usize) {
        self.emit(&DisplayEvent::Indicator { index });
    }

    fn set_stats(&mut self, stats: &StatsRecord) {
        self.emit(&DisplayEvent::from(stats));
    }

    fn set_ber(&mut self, ber: Option<f64>) {
        self.emit(&DisplayEvent::Ber { value: ber });
    }

    fn set_state(&mut self, state: ControllerState) {
        self.emit(&DisplayEvent::State { state });
    }
}
