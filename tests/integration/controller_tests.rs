//! Integration tests for the session controller lifecycle.
//!
//! Every scenario drives the real controller, timers, stop ladder, and
//! stage workers against scripted processes and a copying codec.

use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use rigflow::events::{ControlEvent, TimerKind, WorkerEvent};
use rigflow::models::process::{ProcessRole, ProcessTag};
use rigflow::models::session::{ControllerState, SessionId, SessionOutcome, StopReason};
use rigflow::models::stage::StageKind;
use rigflow::orchestrator::request::StartRequest;
use rigflow::orchestrator::worker::{DecodeStats, StageReport};
use rigflow::supervisor::monitor::ExitSummary;
use rigflow::{AppError, GlobalConfig};

use super::test_helpers::{config_toml, stats_line, test_config, FakeCodec, Harness};

fn write_artifact(h: &Harness, bytes: usize) {
    std::fs::write(h.dir.path().join("out.bitwrap"), vec![7_u8; bytes]).expect("write artifact");
}

fn is_idle(c: &rigflow::orchestrator::controller::SessionController) -> bool {
    c.state() == ControllerState::Idle
}

fn assert_lifecycle(states: &[ControllerState]) {
    let mut from = ControllerState::Idle;
    for &to in states {
        assert!(from.can_transition_to(to), "{from:?} -> {to:?} in {states:?}");
        from = to;
    }
}

// ── Receive ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn receive_launches_capture_then_receiver() {
    let mut h = Harness::new();
    let id = h
        .controller
        .start(StartRequest::receive(h.dir()), Instant::now())
        .expect("start");

    assert_eq!(id, SessionId(1));
    assert_eq!(h.controller.state(), ControllerState::Running);
    assert_eq!(h.launched_roles(), vec![ProcessRole::Capture]);

    h.drive_until("receiver launch", |c| c.live_processes().len() == 2)
        .await;
    assert_eq!(h.live_roles(), vec![ProcessRole::Receiver, ProcessRole::Capture]);

    let artifact = h.dir.path().join("out.bitwrap").display().to_string();
    let world = h.world.lock().expect("world lock");
    assert!(world.launched[0].args.contains(&artifact));
    assert!(world.launched.iter().all(|r| r.tag.session == id));
}

#[tokio::test]
async fn second_start_is_rejected_while_running() {
    let mut h = Harness::new();
    h.controller
        .start(StartRequest::receive(h.dir()), Instant::now())
        .expect("start");

    let err = h
        .controller
        .start(StartRequest::receive(h.dir()), Instant::now())
        .expect_err("rejected");

    assert!(matches!(err, AppError::Rejected(_)));
    assert_eq!(h.controller.session().map(|s| s.id), Some(SessionId(1)));
    assert!(h.log_lines().iter().any(|l| l.starts_with("[WARN] cannot start")));
}

#[tokio::test]
async fn user_stop_releases_in_order_and_decodes_once() {
    let codec = FakeCodec {
        stats: Some(DecodeStats {
            ber: Some(1e-4),
            slices_ok: Some(2),
            ..DecodeStats::default()
        }),
        ..FakeCodec::default()
    };
    let mut h = Harness::with(test_config(), codec);
    let id = h
        .controller
        .start(StartRequest::receive(h.dir()), Instant::now())
        .expect("start");
    h.drive_until("receiver launch", |c| c.live_processes().len() == 2)
        .await;
    write_artifact(&h, 2048);

    assert!(h.controller.request_stop(StopReason::User, Instant::now()));
    assert_eq!(h.controller.state(), ControllerState::Stopping);
    assert!(!h.controller.request_stop(StopReason::User, Instant::now()));

    h.drive_until("session end", is_idle).await;

    assert_eq!(h.stop_order(), vec![ProcessRole::Receiver, ProcessRole::Capture]);
    assert_eq!(h.codec.calls(), vec![StageKind::Unwrap, StageKind::Decode]);
    assert_eq!(h.controller.last_outcome(), Some(&SessionOutcome::Completed));
    assert!(h.dir.path().join("out.bin").exists());

    // A late duplicate release must not run post-processing again.
    h.controller.handle_event(
        ControlEvent::ProcessesReleased {
            session: id,
            reports: Vec::new(),
        },
        Instant::now(),
    );
    assert_eq!(h.codec.calls().len(), 2);
    let finished = h
        .log_lines()
        .iter()
        .filter(|l| l.as_str() == "Session 1 completed")
        .count();
    assert_eq!(finished, 1);

    let log = std::fs::read_to_string(h.dir.path().join("post_process_log.txt"))
        .expect("session log");
    assert!(log.contains("=== POST-PROCESS START"));
    assert!(log.contains("[unwrap] started"));
    assert!(log.contains("[decode] "));
    assert!(h.logged("BER"));
}

#[tokio::test]
async fn progress_reaches_one_hundred_after_completion() {
    let mut h = Harness::new();
    h.controller
        .start(StartRequest::receive(h.dir()), Instant::now())
        .expect("start");
    write_artifact(&h, 4096);
    h.controller.request_stop(StopReason::User, Instant::now());

    h.drive_until("settled display", |c| {
        is_idle(c) && c.estimator().is_settled()
    })
    .await;

    assert_eq!(h.controller.estimator().percent(), 100);
}

#[tokio::test]
async fn watchdog_stops_a_silent_capture() {
    let mut h = Harness::new();
    let id = h
        .controller
        .start(StartRequest::receive(h.dir()), Instant::now())
        .expect("start");
    let capture = ProcessTag::new(id, ProcessRole::Capture);

    h.inject(ControlEvent::Line {
        tag: capture,
        text: stats_line(0),
    })
    .await;
    h.drive_for(Duration::from_millis(50)).await;
    assert!(!h.controller.watchdog_armed());

    h.inject(ControlEvent::Line {
        tag: capture,
        text: stats_line(4096),
    })
    .await;
    h.drive_until("watchdog armed", |c| c.watchdog_armed()).await;
    h.drive_until("automatic stop", is_idle).await;

    assert_eq!(
        h.controller.last_outcome(),
        Some(&SessionOutcome::Stopped {
            reason: StopReason::Quiescent
        })
    );
    assert!(h.logged("First data received → watchdog armed"));
    assert!(h.logged("No data for 1 s → stopping automatically"));
    assert!(h.logged("No capture artifact; nothing to decode"));
}

#[tokio::test]
async fn events_from_a_superseded_session_are_ignored() {
    let mut h = Harness::new();
    let first = h
        .controller
        .start(StartRequest::receive(h.dir()), Instant::now())
        .expect("first start");
    h.controller.request_stop(StopReason::User, Instant::now());
    h.drive_until("first session end", is_idle).await;

    let second = h
        .controller
        .start(StartRequest::receive(h.dir()), Instant::now())
        .expect("second start");
    assert_eq!(second, SessionId(2));

    h.inject(ControlEvent::Line {
        tag: ProcessTag::new(first, ProcessRole::Capture),
        text: stats_line(1000),
    })
    .await;
    h.inject(ControlEvent::Timer {
        session: first,
        timer: TimerKind::ReceiverStart,
    })
    .await;
    h.inject(ControlEvent::Worker(WorkerEvent {
        session: first,
        stage: StageKind::Unwrap,
        outcome: Ok(StageReport {
            output_bytes: 10,
            stats: None,
        }),
        elapsed: Duration::from_millis(1),
    }))
    .await;
    h.drive_for(Duration::from_millis(30)).await;

    assert!(!h.controller.watchdog_armed());
    assert!(h.codec.calls().is_empty());
    assert_eq!(h.controller.state(), ControllerState::Running);
    let world = h.world.lock().expect("world lock");
    assert!(!world
        .launched
        .iter()
        .any(|r| r.tag == ProcessTag::new(first, ProcessRole::Receiver)));
}

#[tokio::test]
async fn spawn_failure_ends_the_session_as_failed() {
    let mut h = Harness::new();
    h.world.lock().expect("world lock").fail_role = Some(ProcessRole::Capture);

    let id = h
        .controller
        .start(StartRequest::receive(h.dir()), Instant::now())
        .expect("session created");

    assert_eq!(id, SessionId(1));
    assert_eq!(h.controller.state(), ControllerState::Idle);
    assert!(h.controller.live_processes().is_empty());
    match h.controller.last_outcome() {
        Some(SessionOutcome::Failed { message }) => assert!(message.starts_with("spawn:")),
        other => panic!("expected failure, got {other:?}"),
    }
    assert!(h.log_lines().iter().any(|l| l.starts_with("[ERROR]")));
    assert_eq!(
        h.states(),
        [
            ControllerState::Starting,
            ControllerState::Stopping,
            ControllerState::Error,
            ControllerState::Idle,
        ]
    );
}

#[tokio::test]
async fn missing_executable_is_rejected_before_any_session() {
    let config = GlobalConfig::from_toml_str(&config_toml("/nonexistent/rigflow-capture"))
        .expect("config");
    let mut h = Harness::with(config, FakeCodec::default());

    let err = h
        .controller
        .start(StartRequest::receive(h.dir()), Instant::now())
        .expect_err("invalid");

    assert!(matches!(err, AppError::Config(_)));
    assert_eq!(h.controller.state(), ControllerState::Idle);
    assert!(h.controller.session().is_none());
    assert!(h.launched_roles().is_empty());
}

#[tokio::test]
async fn missing_output_directory_is_rejected() {
    let mut h = Harness::new();
    let err = h
        .controller
        .start(
            StartRequest::receive(h.dir.path().join("absent")),
            Instant::now(),
        )
        .expect_err("invalid");

    assert!(matches!(err, AppError::Config(msg) if msg.contains("output directory not found")));
}

#[tokio::test]
async fn empty_artifact_after_user_stop_is_not_an_error() {
    let mut h = Harness::new();
    h.controller
        .start(StartRequest::receive(h.dir()), Instant::now())
        .expect("start");
    write_artifact(&h, 0);

    h.controller.request_stop(StopReason::User, Instant::now());
    h.drive_until("session end", is_idle).await;

    assert_eq!(
        h.controller.last_outcome(),
        Some(&SessionOutcome::Stopped {
            reason: StopReason::User
        })
    );
    assert!(h.logged("Stopped before any data arrived; nothing to decode"));
    assert!(h.codec.calls().is_empty());
}

#[tokio::test]
async fn empty_artifact_after_producer_exit_fails() {
    let mut h = Harness::new();
    h.controller
        .start(StartRequest::receive(h.dir()), Instant::now())
        .expect("start");
    write_artifact(&h, 0);

    h.exit(ProcessRole::Capture, ExitSummary::with_code(0));
    h.drive_until("session end", is_idle).await;

    assert_eq!(
        h.controller.last_outcome(),
        Some(&SessionOutcome::Failed {
            message: "capture artifact is empty".into()
        })
    );
    assert!(h.logged("[capture] exited normally (code 0)"));
}

#[tokio::test]
async fn decode_failure_is_reported_and_logged() {
    let codec = FakeCodec {
        fail: Some(StageKind::Decode),
        ..FakeCodec::default()
    };
    let mut h = Harness::with(test_config(), codec);
    h.controller
        .start(StartRequest::receive(h.dir()), Instant::now())
        .expect("start");
    write_artifact(&h, 1024);

    h.controller.request_stop(StopReason::User, Instant::now());
    h.drive_until("session end", is_idle).await;

    match h.controller.last_outcome() {
        Some(SessionOutcome::Failed { message }) => {
            assert_eq!(message, "decode failed: worker: scripted decode failure");
        }
        other => panic!("expected failure, got {other:?}"),
    }
    assert!(h.log_lines().iter().any(|l| l.starts_with("[decode][ERROR]")));
    let log = std::fs::read_to_string(h.dir.path().join("post_process_log.txt"))
        .expect("session log");
    assert!(log.contains("[ERROR] decode failed"));
    assert_lifecycle(&h.states());

    assert_eq!(
        h.states(),
        [
            ControllerState::Starting,
            ControllerState::Running,
            ControllerState::Stopping,
            ControllerState::Error,
            ControllerState::Idle,
        ]
    );
}

#[tokio::test]
async fn start_during_post_processing_supersedes_the_old_session() {
    let codec = FakeCodec {
        delay: Duration::from_millis(300),
        ..FakeCodec::default()
    };
    let mut h = Harness::with(test_config(), codec);
    h.controller
        .start(StartRequest::receive(h.dir()), Instant::now())
        .expect("first start");
    write_artifact(&h, 1024);
    h.controller.request_stop(StopReason::User, Instant::now());
    h.drive_until("post-processing", |c| c.is_post_processing())
        .await;

    let second = h
        .controller
        .start(StartRequest::receive(h.dir()), Instant::now())
        .expect("second start");
    assert_eq!(second, SessionId(2));

    h.drive_for(Duration::from_millis(500)).await;

    assert_eq!(h.codec.calls(), vec![StageKind::Unwrap]);
    assert_eq!(h.controller.state(), ControllerState::Running);
    assert_eq!(h.controller.session().map(|s| s.id), Some(second));

    assert_eq!(
        h.states(),
        [
            ControllerState::Starting,
            ControllerState::Running,
            ControllerState::Stopping,
            ControllerState::Starting,
            ControllerState::Running,
        ]
    );
    assert_lifecycle(&h.states());
}

// ── Transmit ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn transmit_encodes_wraps_and_completes() {
    let mut h = Harness::new();
    let input = h.dir.path().join("payload.mp4");
    std::fs::write(&input, vec![1_u8; 4096]).expect("write input");

    h.controller
        .start(StartRequest::transmit(&input), Instant::now())
        .expect("start");
    assert_eq!(h.controller.state(), ControllerState::Running);
    assert!(h.launched_roles().is_empty());

    h.drive_until("transmitter launch", |c| !c.live_processes().is_empty())
        .await;
    let wrapped = format!("{}.bitwrap", input.display());
    assert_eq!(h.world.lock().expect("world lock").launched[0].args, vec![wrapped]);

    h.exit(ProcessRole::Transmitter, ExitSummary::with_code(0));
    h.drive_until("session end", is_idle).await;

    assert_eq!(h.codec.calls(), vec![StageKind::Encode, StageKind::Wrap]);
    assert_eq!(h.controller.last_outcome(), Some(&SessionOutcome::Completed));
    assert!(h.logged("Transmission finished"));
}

#[tokio::test]
async fn transmitter_error_exit_fails_the_session() {
    let mut h = Harness::new();
    let input = h.dir.path().join("payload.txt");
    std::fs::write(&input, b"hello radio").expect("write input");

    h.controller
        .start(StartRequest::transmit(&input), Instant::now())
        .expect("start");
    h.drive_until("transmitter launch", |c| !c.live_processes().is_empty())
        .await;
    h.exit(ProcessRole::Transmitter, ExitSummary::with_code(1));
    h.drive_until("session end", is_idle).await;

    assert_eq!(
        h.controller.last_outcome(),
        Some(&SessionOutcome::Failed {
            message: "transmitter exited with code 1".into()
        })
    );
}

// ── Hopping ──────────────────────────────────────────────────────────

#[tokio::test]
async fn detector_trigger_hands_over_to_receive() {
    let mut h = Harness::new();
    let id = h
        .controller
        .start(StartRequest::hopping(h.dir()), Instant::now())
        .expect("start");

    assert_eq!(h.launched_roles(), vec![ProcessRole::Bridge, ProcessRole::Detector]);
    assert_eq!(h.live_roles(), vec![ProcessRole::Detector, ProcessRole::Bridge]);

    let detector = ProcessTag::new(id, ProcessRole::Detector);
    for _ in 0..2 {
        h.inject(ControlEvent::Line {
            tag: detector,
            text: "jammer detected on channel 4".into(),
        })
        .await;
    }

    h.drive_until("capture launch after handover", |c| {
        c.live_processes().iter().any(|t| t.role == ProcessRole::Capture)
    })
    .await;
    assert_eq!(h.stop_order(), vec![ProcessRole::Detector]);
    assert!(h.indicators().contains(&1));
    let armed = h
        .log_lines()
        .iter()
        .filter(|l| l.starts_with("Interference detected; switching to receive in 0.1 s"))
        .count();
    assert_eq!(armed, 1);

    h.drive_until("receiver launch", |c| c.live_processes().len() == 3)
        .await;
    assert_eq!(
        h.live_roles(),
        vec![ProcessRole::Receiver, ProcessRole::Capture, ProcessRole::Bridge]
    );

    h.controller.request_stop(StopReason::User, Instant::now());
    h.drive_until("session end", is_idle).await;
    assert_eq!(
        h.stop_order(),
        vec![
            ProcessRole::Detector,
            ProcessRole::Receiver,
            ProcessRole::Capture,
            ProcessRole::Bridge
        ]
    );
}

#[tokio::test]
async fn detector_trigger_hands_over_to_transmit() {
    let mut h = Harness::new();
    let input = h.dir.path().join("payload.jpg");
    std::fs::write(&input, vec![3_u8; 2048]).expect("write input");

    let id = h
        .controller
        .start(StartRequest::hopping_transmit(&input), Instant::now())
        .expect("start");
    assert_eq!(h.launched_roles(), vec![ProcessRole::Bridge, ProcessRole::Detector]);
    assert!(h.codec.calls().is_empty());

    h.inject(ControlEvent::Line {
        tag: ProcessTag::new(id, ProcessRole::Detector),
        text: "jammer detected".into(),
    })
    .await;
    h.drive_until("transmitter launch", |c| {
        c.live_processes().iter().any(|t| t.role == ProcessRole::Transmitter)
    })
    .await;

    assert!(h.logged("Interference detected; switching to transmit in 0.1 s"));
    assert_eq!(h.stop_order(), vec![ProcessRole::Detector]);
    assert_eq!(h.codec.calls(), vec![StageKind::Encode, StageKind::Wrap]);
    let wrapped = format!("{}.bitwrap", input.display());
    let launched = h.world.lock().expect("world lock").launched.clone();
    assert_eq!(launched.last().map(|l| l.args.clone()), Some(vec![wrapped]));

    h.exit(ProcessRole::Transmitter, ExitSummary::with_code(0));
    h.drive_until("session end", is_idle).await;

    assert_eq!(h.controller.last_outcome(), Some(&SessionOutcome::Completed));
    assert_eq!(
        h.stop_order(),
        vec![ProcessRole::Detector, ProcessRole::Bridge]
    );
    assert!(!h.dir.path().join("post_process_log.txt").exists());
}

#[tokio::test]
async fn indicator_cycles_between_on_and_off() {
    let mut h = Harness::new();
    let id = h
        .controller
        .start(StartRequest::hopping(h.dir()), Instant::now())
        .expect("start");
    h.inject(ControlEvent::Line {
        tag: ProcessTag::new(id, ProcessRole::Detector),
        text: "JAMMER was detected".into(),
    })
    .await;


    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let shown = h.indicators();
        if shown.contains(&1) && shown.contains(&0) {
            assert!(shown.windows(2).all(|pair| pair[0] != pair[1]));
            break;
        }
        assert!(Instant::now() < deadline, "indicator never cycled: {shown:?}");
        h.drive_for(Duration::from_millis(20)).await;
    }

    h.controller.request_stop(StopReason::User, Instant::now());
    h.drive_until("session end", is_idle).await;
    let settled = h.indicators().len();
    h.drive_for(Duration::from_millis(150)).await;
    assert_eq!(h.indicators().len(), settled);
}

// ── Control loop ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn run_stops_when_shutdown_is_requested() {
    let mut h = Harness::new();
    let shutdown = CancellationToken::new();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(150)).await;
        trigger.cancel();
    });

    let request = StartRequest::receive(h.dir());
    let outcome = tokio::time::timeout(
        Duration::from_secs(10),
        h.controller.run(request, &mut h.rx, &shutdown),
    )
    .await
    .expect("run timed out")
    .expect("run");

    assert_eq!(
        outcome,
        SessionOutcome::Stopped {
            reason: StopReason::User
        }
    );
    assert_eq!(h.controller.state(), ControllerState::Idle);
    assert_eq!(h.stop_order(), vec![ProcessRole::Receiver, ProcessRole::Capture]);
}

#[tokio::test]
async fn run_returns_the_start_error() {
    let mut h = Harness::new();
    let shutdown = CancellationToken::new();
    let request = StartRequest::receive(h.dir.path().join("absent"));

    let result = h.controller.run(request, &mut h.rx, &shutdown).await;

    assert!(matches!(result, Err(AppError::Config(_))));
}
