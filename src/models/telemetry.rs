//! Telemetry records parsed from capture-process output lines.
//!
//! The capture process prints a periodic statistics line and a one-off
//! listening banner. Anything else is free-form text.

use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::LazyLock;

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

static STATS_PATTERN: LazyLock<Option<Regex>> = LazyLock::new(|| {
    RegexBuilder::new(
        r"pkts=(\d+)\s+bytes=(\d+)\s+\(([0-9.]+)\s+MB\)\s+rate=([0-9.]+)\s+M[bB](?:it)?/s\s+queue=([0-9.]+)\s+MB\s+drops=(\d+)",
    )
    .case_insensitive(true)
    .build()
    .ok()
});

static LISTENING_PATTERN: LazyLock<Option<Regex>> = LazyLock::new(|| {
    RegexBuilder::new(r"Listening\s+UDP\s+(\d+\.\d+\.\d+\.\d+):(\d+)")
        .case_insensitive(true)
        .build()
        .ok()
});

/// One statistics line from the capture process.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct StatsRecord {
    /// Datagrams received so far.
    pub packets: u64,
    /// Payload bytes received so far; the watchdog's progress counter.
    pub bytes: u64,
    /// `bytes` expressed in MiB, as printed.
    pub megabytes: f64,
    /// Instantaneous receive rate in Mbit/s.
    pub rate_mbit: f64,
    /// Bytes waiting in the writer queue, in MiB.
    pub queue_mb: f64,
    /// Datagrams dropped.
    pub drops: u64,
}

impl StatsRecord {
    /// Receive rate in MB/s.
    #[must_use]
    pub fn rate_mbytes_per_sec(&self) -> f64 {
        self.rate_mbit / 8.0
    }
}

/// A classified capture-process output line.
#[derive(Debug, Clone, PartialEq)]
pub enum TelemetryLine {
    /// Periodic statistics.
    Stats(StatsRecord),
    /// The capture socket is bound.
    Listening(SocketAddrV4),
    /// Any other text.
    Text(String),
}

/// Classify a single output line.
#[must_use]
pub fn parse_line(line: &str) -> TelemetryLine {
    if let Some(stats) = parse_stats(line) {
        return TelemetryLine::Stats(stats);
    }
    if let Some(addr) = parse_listening(line) {
        return TelemetryLine::Listening(addr);
    }
    TelemetryLine::Text(line.to_owned())
}

/// Extract a [`StatsRecord`] from a statistics line.
#[must_use]
pub fn parse_stats(line: &str) -> Option<StatsRecord> {
    let caps = STATS_PATTERN.as_ref()?.captures(line)?;
    Some(StatsRecord {
        packets: caps.get(1)?.as_str().parse().ok()?,
        bytes: caps.get(2)?.as_str().parse().ok()?,
        megabytes: caps.get(3)?.as_str().parse().ok()?,
        rate_mbit: caps.get(4)?.as_str().parse().ok()?,
        queue_mb: caps.get(5)?.as_str().parse().ok()?,
        drops: caps.get(6)?.as_str().parse().ok()?,
    })
}

/// Extract the bound address from a listening banner.
#[must_use]
pub fn parse_listening(line: &str) -> Option<SocketAddrV4> {
    let caps = LISTENING_PATTERN.as_ref()?.captures(line)?;
    let ip: Ipv4Addr = caps.get(1)?.as_str().parse().ok()?;
    let port: u16 = caps.get(2)?.as_str().parse().ok()?;
    Some(SocketAddrV4::new(ip, port))
}
