//! Shared fixtures for controller-level integration tests.
//!
//! The controller is driven against scripted fakes: a launcher whose
//! processes exit only when told to, a codec that copies its input, and a
//! display that records every update. Executables are validated for real,
//! so the test configuration names `sh`.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::mpsc;

use rigflow::config::GlobalConfig;
use rigflow::display::{DisplayEvent, DisplaySink};
use rigflow::events::{self, ControlEvent};
use rigflow::models::process::{ProcessRole, ProcessTag};
use rigflow::models::session::ControllerState;
use rigflow::models::stage::StageKind;
use rigflow::models::telemetry::StatsRecord;
use rigflow::orchestrator::controller::SessionController;
use rigflow::orchestrator::worker::{DecodeStats, StageCodec, StageJob, StageReport};
use rigflow::supervisor::monitor::ExitSummary;
use rigflow::supervisor::{
    ProcessControl, ProcessHandle, ProcessLauncher, ProcessSpec, TermSignal,
};
use rigflow::{AppError, Result};

/// Configuration TOML with every process backed by `sh` except the capture
/// process, which uses `capture_exe`.
pub fn config_toml(capture_exe: &str) -> String {
    format!(
        r#"
tick_interval_ms = 10

[watchdog]
quiet_timeout_ms = 1000

[progress]
smoothing_alpha = 0.6
max_rate_per_sec = 10.0
ease_out_ms = 40

[receive]
receiver_start_delay_ms = 50

[receive.capture]
executable = "{capture_exe}"
args = ["-c", "capture", "{{artifact}}"]

[receive.capture.termination]
grace_ms = 50
final_wait_ms = 50

[receive.receiver]
executable = "sh"
args = ["-c", "receiver", "{{output_dir}}"]

[receive.receiver.termination]
grace_ms = 50
final_wait_ms = 50

[transmit.transmitter]
executable = "sh"
args = ["{{wrapped}}"]

[transmit.airtime]
start_delay_ms = 0

[hopping]
handover_delay_ms = 100
cycle_on_ms = 60
cycle_off_ms = 40

[hopping.detector]
executable = "sh"

[hopping.bridge]
executable = "sh"
"#
    )
}

/// Standard test configuration.
pub fn test_config() -> GlobalConfig {
    GlobalConfig::from_toml_str(&config_toml("sh")).expect("valid test config")
}

// ── Fake processes ───────────────────────────────────────────────────────────

/// One launch seen by the fake launcher.
#[derive(Debug, Clone)]
pub struct LaunchRecord {
    /// Session and role.
    pub tag: ProcessTag,
    /// Expanded arguments.
    pub args: Vec<String>,
    /// Scripted exit status.
    pub exit: Option<ExitSummary>,
}

/// Shared state behind every fake process.
#[derive(Debug, Default)]
pub struct FakeWorld {
    /// Launches in order.
    pub launched: Vec<LaunchRecord>,
    /// Roles in the order they received a termination request.
    pub stop_order: Vec<ProcessRole>,
    /// Role whose launch fails.
    pub fail_role: Option<ProcessRole>,
}

struct FakeControl {
    world: Arc<Mutex<FakeWorld>>,
    index: usize,
}

impl ProcessControl for FakeControl {
    fn pid(&self) -> Option<u32> {
        u32::try_from(self.index).ok().map(|i| 10_000 + i)
    }

    fn try_wait(&mut self) -> Result<Option<ExitSummary>> {
        Ok(self.world.lock().expect("world lock").launched[self.index].exit)
    }

    fn request_terminate(&mut self, _signal: TermSignal) -> Result<()> {
        let mut world = self.world.lock().expect("world lock");
        let role = world.launched[self.index].tag.role;
        world.stop_order.push(role);
        world.launched[self.index].exit = Some(ExitSummary::signalled());
        Ok(())
    }

    fn kill_tree(&mut self) -> Result<()> {
        self.world.lock().expect("world lock").launched[self.index].exit =
            Some(ExitSummary::signalled());
        Ok(())
    }
}

/// Launcher producing [`FakeControl`] processes.
pub struct FakeLauncher {
    world: Arc<Mutex<FakeWorld>>,
}

impl ProcessLauncher for FakeLauncher {
    fn launch(
        &self,
        spec: ProcessSpec,
        tag: ProcessTag,
        _events: mpsc::Sender<ControlEvent>,
    ) -> Result<ProcessHandle> {
        let mut world = self.world.lock().expect("world lock");
        if world.fail_role == Some(tag.role) {
            return Err(AppError::Spawn(format!("scripted spawn failure for {}", tag.role)));
        }
        world.launched.push(LaunchRecord {
            tag,
            args: spec.args.clone(),
            exit: None,
        });
        let control = FakeControl {
            world: Arc::clone(&self.world),
            index: world.launched.len() - 1,
        };
        Ok(ProcessHandle::new(
            tag,
            spec.label,
            Box::new(control),
            spec.termination,
            tokio_util::sync::CancellationToken::new(),
        ))
    }
}

// ── Fake codec ───────────────────────────────────────────────────────────────

/// Codec that copies the input size to the output.
#[derive(Debug, Default)]
pub struct FakeCodec {
    /// Stages run, in order.
    pub calls: Mutex<Vec<StageKind>>,
    /// Stage that fails.
    pub fail: Option<StageKind>,
    /// Statistics returned by the decode stage.
    pub stats: Option<DecodeStats>,
    /// Time each job takes.
    pub delay: Duration,
}

impl FakeCodec {
    /// Stages run so far.
    pub fn calls(&self) -> Vec<StageKind> {
        self.calls.lock().expect("calls lock").clone()
    }
}

impl StageCodec for FakeCodec {
    fn run(&self, job: &StageJob) -> Result<StageReport> {
        self.calls.lock().expect("calls lock").push(job.stage);
        std::thread::sleep(self.delay);
        if self.fail == Some(job.stage) {
            return Err(AppError::Worker(format!("scripted {} failure", job.stage)));
        }
        let size = std::fs::metadata(&job.input).map(|m| m.len()).unwrap_or(0);
        std::fs::write(&job.output, vec![0_u8; usize::try_from(size).expect("size")])?;
        Ok(StageReport {
            output_bytes: size,
            stats: (job.stage == StageKind::Decode).then_some(self.stats).flatten(),
        })
    }
}

// ── Recording display ────────────────────────────────────────────────────────

/// Display that records every update.
#[derive(Clone, Default)]
pub struct RecordingDisplay {
    /// Recorded updates.
    pub events: Arc<Mutex<Vec<DisplayEvent>>>,
}

impl RecordingDisplay {
    fn push(&self, event: DisplayEvent) {
        self.events.lock().expect("display lock").push(event);
    }
}

impl DisplaySink for RecordingDisplay {
    fn set_progress_percent(&mut self, percent: u8) {
        self.push(DisplayEvent::Progress { percent });
    }

    fn set_eta_text(&mut self, text: &str) {
        self.push(DisplayEvent::Eta { text: text.into() });
    }

    fn append_log_line(&mut self, line: &str) {
        self.push(DisplayEvent::Log { line: line.into() });
    }

    fn set_indicator_active(&mut self, index: usize) {
        self.push(DisplayEvent::Indicator { index });
    }

    fn set_stats(&mut self, stats: &StatsRecord) {
        self.push(DisplayEvent::from(stats));
    }

    fn set_ber(&mut self, ber: Option<f64>) {
        self.push(DisplayEvent::Ber { value: ber });
    }

    fn set_state(&mut self, state: ControllerState) {
        self.push(DisplayEvent::State { state });
    }
}

// ── Harness ──────────────────────────────────────────────────────────────────

/// A controller wired to fakes, plus a session directory.
pub struct Harness {
    pub controller: SessionController,
    pub rx: mpsc::Receiver<ControlEvent>,
    pub tx: mpsc::Sender<ControlEvent>,
    pub world: Arc<Mutex<FakeWorld>>,
    pub codec: Arc<FakeCodec>,
    pub display: RecordingDisplay,
    pub dir: tempfile::TempDir,
}

impl Harness {
    pub fn new() -> Self {
        Self::with(test_config(), FakeCodec::default())
    }

    pub fn with(config: GlobalConfig, codec: FakeCodec) -> Self {
        let (tx, rx) = events::channel();
        let world = Arc::new(Mutex::new(FakeWorld::default()));
        let codec = Arc::new(codec);
        let display = RecordingDisplay::default();
        let controller = SessionController::new(
            Arc::new(config),
            Box::new(FakeLauncher {
                world: Arc::clone(&world),
            }),
            Arc::clone(&codec) as Arc<dyn StageCodec>,
            Box::new(display.clone()),
            tx.clone(),
        );
        Self {
            controller,
            rx,
            tx,
            world,
            codec,
            display,
            dir: tempfile::tempdir().expect("tempdir"),
        }
    }

    /// Session directory path.
    pub fn dir(&self) -> PathBuf {
        self.dir.path().to_path_buf()
    }

    /// Pump ticks and events until `done` holds.
    pub async fn drive_until<F>(&mut self, what: &str, mut done: F)
    where
        F: FnMut(&SessionController) -> bool,
    {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        let mut ticker = tokio::time::interval(Duration::from_millis(10));
        while !done(&self.controller) {
            assert!(
                tokio::time::Instant::now() < deadline,
                "timed out waiting for {what}"
            );
            tokio::select! {
                _ = ticker.tick() => self.controller.tick(Instant::now()),
                Some(event) = self.rx.recv() => self.controller.handle_event(event, Instant::now()),
            }
        }
    }

    /// Pump ticks and events for `period`.
    pub async fn drive_for(&mut self, period: Duration) {
        let until = Instant::now() + period;
        self.drive_until("fixed period", |_| Instant::now() >= until)
            .await;
    }

    /// Post an event as if a reader, timer, or worker had produced it.
    pub async fn inject(&self, event: ControlEvent) {
        self.tx.send(event).await.expect("event channel open");
    }

    /// Every operator log line so far.
    pub fn log_lines(&self) -> Vec<String> {
        self.display
            .events
            .lock()
            .expect("display lock")
            .iter()
            .filter_map(|event| match event {
                DisplayEvent::Log { line } => Some(line.clone()),
                _ => None,
            })
            .collect()
    }

    /// Whether any log line contains `needle`.
    pub fn logged(&self, needle: &str) -> bool {
        self.log_lines().iter().any(|line| line.contains(needle))
    }

    /// Controller states in the order they were reported.
    pub fn states(&self) -> Vec<ControllerState> {
        self.display
            .events
            .lock()
            .expect("display lock")
            .iter()
            .filter_map(|event| match event {
                DisplayEvent::State { state } => Some(*state),
                _ => None,
            })
            .collect()
    }

    /// Indicator indices shown so far.
    pub fn indicators(&self) -> Vec<usize> {
        self.display
            .events
            .lock()
            .expect("display lock")
            .iter()
            .filter_map(|event| match event {
                DisplayEvent::Indicator { index } => Some(*index),
                _ => None,
            })
            .collect()
    }

    /// Roles launched so far, in order.
    pub fn launched_roles(&self) -> Vec<ProcessRole> {
        self.world
            .lock()
            .expect("world lock")
            .launched
            .iter()
            .map(|record| record.tag.role)
            .collect()
    }

    /// Roles of the live processes, in stop order.
    pub fn live_roles(&self) -> Vec<ProcessRole> {
        self.controller
            .live_processes()
            .iter()
            .map(|tag| tag.role)
            .collect()
    }

    /// Make the latest process with `role` exit with `exit`.
    pub fn exit(&self, role: ProcessRole, exit: ExitSummary) {
        let mut world = self.world.lock().expect("world lock");
        let record = world
            .launched
            .iter_mut()
            .rev()
            .find(|record| record.tag.role == role)
            .expect("process launched");
        record.exit = Some(exit);
    }

    /// Roles in termination-request order.
    pub fn stop_order(&self) -> Vec<ProcessRole> {
        self.world.lock().expect("world lock").stop_order.clone()
    }
}

/// A capture statistics line reporting `bytes` received.
pub fn stats_line(bytes: u64) -> String {
    format!("pkts={} bytes={bytes} (0.00 MB) rate=1.00 Mbit/s queue=0.00 MB drops=0", bytes / 512)
}
