//! Unit tests for capture telemetry parsing.

use std::net::{Ipv4Addr, SocketAddrV4};

use rigflow::models::telemetry::{parse_line, parse_listening, parse_stats, TelemetryLine};

const STATS: &str = "pkts=1200 bytes=614400 (0.59 MB) rate=4.92 Mbit/s queue=0.00 MB drops=3";

#[test]
fn parses_stats_line() {
    let stats = parse_stats(STATS).expect("stats line");
    assert_eq!(stats.packets, 1200);
    assert_eq!(stats.bytes, 614_400);
    assert!((stats.megabytes - 0.59).abs() < f64::EPSILON);
    assert!((stats.rate_mbit - 4.92).abs() < f64::EPSILON);
    assert!(stats.queue_mb.abs() < f64::EPSILON);
    assert_eq!(stats.drops, 3);
    assert!((stats.rate_mbytes_per_sec() - 0.615).abs() < 1e-9);
}

#[test]
fn stats_inside_prefixed_line() {
    let line = format!("[capture] {STATS}");
    assert!(matches!(parse_line(&line), TelemetryLine::Stats(s) if s.packets == 1200));
}

#[test]
fn stats_accepts_short_rate_unit() {
    let line = "pkts=1 bytes=10 (0.00 MB) rate=0.10 MB/s queue=0.00 MB drops=0";
    assert_eq!(parse_stats(line).map(|s| s.bytes), Some(10));
}

#[test]
fn parses_listening_banner() {
    let addr = parse_listening("Listening UDP 0.0.0.0:5000").expect("banner");
    assert_eq!(addr, SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 5000));
    assert!(matches!(
        parse_line("listening udp 192.168.1.10:7001"),
        TelemetryLine::Listening(a) if a.port() == 7001
    ));
}

#[test]
fn rejects_out_of_range_port() {
    assert!(parse_listening("Listening UDP 10.0.0.1:70000").is_none());
}

#[test]
fn other_lines_are_text() {
    assert_eq!(
        parse_line("opening device"),
        TelemetryLine::Text("opening device".into())
    );
    assert!(parse_stats("pkts=12 bytes=nope").is_none());
}
