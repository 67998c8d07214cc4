//! Unit tests for the quiescence watchdog.
//!
//! Covers arming on first data, one-shot firing per quiet episode, and
//! the disarm and reset paths used around post-processing.

use std::time::{Duration, Instant};

use rigflow::orchestrator::watchdog::{Observation, QuiescenceWatchdog};

const QUIET: Duration = Duration::from_secs(5);

#[test]
fn unarmed_watchdog_never_fires() {
    let mut watchdog = QuiescenceWatchdog::new(QUIET);
    let t0 = Instant::now();

    assert!(!watchdog.tick(t0 + Duration::from_secs(60), true));
    assert_eq!(watchdog.observe(0, t0), Observation::NoProgress);
    assert!(!watchdog.tick(t0 + Duration::from_secs(60), true));
    assert!(!watchdog.is_armed());
}

#[test]
fn first_nonzero_count_arms() {
    let mut watchdog = QuiescenceWatchdog::new(QUIET);
    let t0 = Instant::now();

    assert_eq!(watchdog.observe(512, t0), Observation::Armed);
    assert!(watchdog.is_armed());
    assert_eq!(watchdog.observe(1024, t0), Observation::Progress);
    assert_eq!(watchdog.observe(1024, t0), Observation::NoProgress);
}

#[test]
fn fires_exactly_once_per_quiet_episode() {
    let mut watchdog = QuiescenceWatchdog::new(QUIET);
    let t0 = Instant::now();
    watchdog.observe(100, t0);

    assert!(!watchdog.tick(t0 + Duration::from_millis(4_999), true));
    assert!(watchdog.tick(t0 + QUIET, true));
    let fired_again = (1..50)
        .map(|i| t0 + QUIET + Duration::from_millis(200 * i))
        .any(|now| watchdog.tick(now, true));
    assert!(!fired_again, "watchdog must fire once, not once per tick");
    assert!(watchdog.has_fired());
}

#[test]
fn fresh_progress_clears_the_latch() {
    let mut watchdog = QuiescenceWatchdog::new(QUIET);
    let t0 = Instant::now();
    watchdog.observe(100, t0);
    assert!(watchdog.tick(t0 + QUIET, true));

    let t1 = t0 + Duration::from_secs(6);
    assert_eq!(watchdog.observe(200, t1), Observation::Progress);
    assert!(!watchdog.has_fired());
    assert!(watchdog.tick(t1 + QUIET, true));
}

#[test]
fn inactive_stream_does_not_fire() {
    let mut watchdog = QuiescenceWatchdog::new(QUIET);
    let t0 = Instant::now();
    watchdog.observe(100, t0);

    assert!(!watchdog.tick(t0 + Duration::from_secs(30), false));
    assert!(!watchdog.has_fired());
}

#[test]
fn disarm_and_reset_silence_the_watchdog() {
    let mut watchdog = QuiescenceWatchdog::new(QUIET);
    let t0 = Instant::now();
    watchdog.observe(100, t0);
    watchdog.disarm();
    assert!(!watchdog.tick(t0 + Duration::from_secs(30), true));

    watchdog.reset();
    assert!(!watchdog.is_armed());
    assert!(!watchdog.has_fired());
    assert_eq!(watchdog.observe(1, t0), Observation::Armed);
    assert_eq!(watchdog.quiet_timeout(), QUIET);
}
