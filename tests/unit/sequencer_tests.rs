//! Unit tests for trigger matching and anchored cycles.

use std::time::{Duration, Instant};

use rigflow::config::GlobalConfig;
use rigflow::orchestrator::sequencer::{AnchoredCycle, CyclePhase, EventSequencer, TriggerSet};

fn default_triggers() -> TriggerSet {
    let config = GlobalConfig::from_toml_str(
        r#"
[hopping.detector]
executable = "detector"

[hopping.bridge]
executable = "bridge"
"#,
    )
    .expect("valid config");
    let hopping = config.hopping().expect("hopping configured");
    TriggerSet::new(&hopping.trigger_patterns).expect("default patterns compile")
}

#[test]
fn default_patterns_match_case_insensitively() {
    let triggers = default_triggers();

    assert!(triggers.is_match("[12:00:01] JAMMER on channel 3 DETECTED"));
    assert!(triggers.is_match("jammer bulundu, kanal 5"));
    assert!(triggers.is_match("RX kapatildi"));
    assert!(triggers.is_match("context serbest birakildi"));
    assert!(!triggers.is_match("noise floor -92 dBm"));
}

#[test]
fn first_match_reports_the_pattern() {
    let triggers =
        TriggerSet::new(&["alpha".to_owned(), "beta".to_owned()]).expect("valid patterns");
    assert_eq!(triggers.first_match("xx BETA yy"), Some("beta"));
    assert_eq!(triggers.first_match("gamma"), None);
}

#[test]
fn invalid_pattern_is_a_config_error() {
    let err = TriggerSet::new(&["(unclosed".to_owned()]).expect_err("should fail");
    assert!(matches!(err, rigflow::AppError::Config(_)));
}

#[test]
fn two_matching_lines_arm_once() {
    let mut sequencer = EventSequencer::new(default_triggers(), Duration::from_millis(4200));
    let t0 = Instant::now();

    let first = sequencer.on_line("jammer detected", t0);
    let second = sequencer.on_line("jammer detected again", t0 + Duration::from_secs(1));

    let arming = first.expect("first match arms");
    assert_eq!(arming.deadline, t0 + Duration::from_millis(4200));
    assert_eq!(arming.line, "jammer detected");
    assert!(second.is_none(), "second match must not schedule another handover");
    assert!(sequencer.is_armed());
}

#[test]
fn reset_allows_a_new_arming() {
    let mut sequencer = EventSequencer::new(default_triggers(), Duration::from_secs(1));
    let t0 = Instant::now();
    assert!(sequencer.on_line("jammer detected", t0).is_some());

    sequencer.reset();
    assert!(!sequencer.is_armed());
    assert!(sequencer.on_line("jammer detected", t0).is_some());
}

#[test]
fn non_matching_lines_do_not_arm() {
    let mut sequencer = EventSequencer::new(default_triggers(), Duration::from_secs(1));
    assert!(sequencer.on_line("scanning 2.4 GHz", Instant::now()).is_none());
    assert!(!sequencer.is_armed());
}

#[test]
fn cycle_is_pending_before_anchor() {
    let anchor = Instant::now() + Duration::from_secs(10);
    let cycle = AnchoredCycle::new(anchor, Duration::from_secs(3), Duration::from_secs(2));

    assert_eq!(
        cycle.phase_at(anchor - Duration::from_secs(1)),
        CyclePhase::Pending { starts_at: anchor }
    );
}

#[test]
fn cycle_alternates_with_asymmetric_duty() {
    let anchor = Instant::now();
    let on = Duration::from_secs(3);
    let off = Duration::from_secs(2);
    let cycle = AnchoredCycle::new(anchor, on, off);

    assert_eq!(
        cycle.phase_at(anchor),
        CyclePhase::Active {
            index: 1,
            next_boundary: anchor + on
        }
    );
    assert_eq!(
        cycle.phase_at(anchor + Duration::from_millis(3500)),
        CyclePhase::Active {
            index: 0,
            next_boundary: anchor + on + off
        }
    );
    assert_eq!(
        cycle.phase_at(anchor + Duration::from_secs(5)),
        CyclePhase::Active {
            index: 1,
            next_boundary: anchor + Duration::from_secs(8)
        }
    );
}

#[test]
fn late_evaluation_does_not_drift() {
    let anchor = Instant::now();
    let cycle = AnchoredCycle::new(anchor, Duration::from_secs(3), Duration::from_secs(2));

    // Evaluated 700 ms late on the 20th cycle: boundary still on the 5 s grid.
    let late = anchor + Duration::from_secs(100) + Duration::from_millis(700);
    match cycle.phase_at(late) {
        CyclePhase::Active {
            index,
            next_boundary,
        } => {
            assert_eq!(index, 1);
            assert_eq!(next_boundary, anchor + Duration::from_secs(103));
        }
        CyclePhase::Pending { .. } => panic!("cycle should be active"),
    }
}
