//! Session controller: the top-level pipeline state machine.
//!
//! The controller owns every piece of per-session state and is the only
//! place that mutates it. Readers, timers, workers, and stop tasks report
//! back through [`ControlEvent`]s tagged with the session that produced
//! them; anything tagged with a superseded session is dropped on arrival.
//!
//! Lifecycle: `Idle → Starting → Running → Stopping → Idle`, with a
//! transient `Error` state on failure. Post-processing of a receive
//! capture happens inside `Stopping`, after every process is released,
//! and runs at most once per session.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::config::{GlobalConfig, ProcessConfig};
use crate::display::DisplaySink;
use crate::events::{ControlEvent, TimerKind, WorkerEvent};
use crate::mode::PipelineKind;
use crate::models::process::{ProcessRole, ProcessTag};
use crate::models::session::{ControllerState, Session, SessionId, SessionOutcome, StopReason};
use crate::models::stage::{PipelineLayout, StageKind, StageStatus};
use crate::models::telemetry::{self, TelemetryLine};
use crate::orchestrator::request::StartRequest;
use crate::orchestrator::sequencer::{AnchoredCycle, Arming, CyclePhase, EventSequencer, TriggerSet};
use crate::orchestrator::timers::TimerScheduler;
use crate::orchestrator::watchdog::{Observation, QuiescenceWatchdog};
use crate::orchestrator::worker::{spawn_stage_worker, StageCodec, StageJob, StageReport};
use crate::progress::calibration::{CalibrationState, StageLoad, BYTES_PER_MB};
use crate::progress::{format_eta, ProgressEstimator, ProgressTuning};
use crate::session_log::SessionLog;
use crate::supervisor::monitor::{self, ExitSummary};
use crate::supervisor::shutdown::StopReport;
use crate::supervisor::spawner::resolve_executable;
use crate::supervisor::{ProcessHandle, ProcessLauncher};
use crate::{AppError, Result};

// ── Per-session state ────────────────────────────────────────────────────────

/// File locations of one session.
#[derive(Debug, Clone)]
struct SessionPaths {
    dir: PathBuf,
    input: PathBuf,
    artifact: PathBuf,
    unwrapped: PathBuf,
    decoded: PathBuf,
    encoded: PathBuf,
    wrapped: PathBuf,
}

impl SessionPaths {
    fn resolve(config: &GlobalConfig, request: &StartRequest) -> Self {
        let dir = request.session_dir().to_path_buf();
        let input = request.location.clone();
        let with_suffix = |suffix: &str| {
            let mut name = input.clone().into_os_string();
            name.push(".");
            name.push(suffix);
            PathBuf::from(name)
        };
        let (encoded, wrapped) = config.transmit.as_ref().map_or_else(
            || (with_suffix("rse"), with_suffix("bitwrap")),
            |t| (with_suffix(&t.encoded_suffix), with_suffix(&t.wrapped_suffix)),
        );
        let (artifact, unwrapped, decoded) = config.receive.as_ref().map_or_else(
            || {
                (
                    dir.join("out.bitwrap"),
                    dir.join("out.unwrapped"),
                    dir.join(format!("out.{}", request.sanitized_extension())),
                )
            },
            |r| {
                (
                    dir.join(&r.artifact_name),
                    dir.join(&r.unwrapped_name),
                    dir.join(format!("{}.{}", r.decoded_stem, request.sanitized_extension())),
                )
            },
        );
        Self {
            dir,
            input,
            artifact,
            unwrapped,
            decoded,
            encoded,
            wrapped,
        }
    }
}

/// Every flag and sub-component scoped to one session.
#[derive(Debug)]
struct SessionState {
    id: SessionId,
    request: StartRequest,
    paths: SessionPaths,
    watchdog: QuiescenceWatchdog,
    sequencer: Option<EventSequencer>,
    cycle: Option<AnchoredCycle>,
    indicator: Option<usize>,
    receiver_deadline: Option<Instant>,
    receiver_started: bool,
    capture_started: bool,
    handover_started: bool,
    post_processing: bool,
    stage_bytes: u64,
    transmit_started_at: Option<Instant>,
    stop_reason: Option<StopReason>,
    failure: Option<String>,
    log: SessionLog,
}

impl SessionState {
    fn placeholders(&self) -> Vec<(&'static str, String)> {
        let mut vars = self.request.params.placeholders();
        vars.extend([
            ("session", self.id.to_string()),
            ("output_dir", self.paths.dir.display().to_string()),
            ("input", self.paths.input.display().to_string()),
            ("artifact", self.paths.artifact.display().to_string()),
            ("wrapped", self.paths.wrapped.display().to_string()),
        ]);
        vars
    }
}

// ── Controller ───────────────────────────────────────────────────────────────

/// Drives one pipeline session at a time.
pub struct SessionController {
    config: Arc<GlobalConfig>,
    launcher: Box<dyn ProcessLauncher>,
    codec: Arc<dyn StageCodec>,
    display: Box<dyn DisplaySink>,
    events: mpsc::Sender<ControlEvent>,
    timers: TimerScheduler,
    estimator: ProgressEstimator,
    last_id: SessionId,
    state: ControllerState,
    session: Option<Session>,
    current: Option<SessionState>,
    processes: Vec<ProcessHandle>,
    releasing: bool,
    shown_percent: Option<u8>,
    shown_eta: String,
    last_outcome: Option<SessionOutcome>,
}

impl std::fmt::Debug for SessionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionController")
            .field("state", &self.state)
            .field("session", &self.session)
            .field("processes", &self.processes)
            .finish_non_exhaustive()
    }
}

impl SessionController {
    /// Construct an idle controller.
    ///
    /// `events` must be the sending half of the channel later passed to
    /// [`run`](Self::run) or drained by the caller into
    /// [`handle_event`](Self::handle_event).
    #[must_use]
    pub fn new(
        config: Arc<GlobalConfig>,
        launcher: Box<dyn ProcessLauncher>,
        codec: Arc<dyn StageCodec>,
        display: Box<dyn DisplaySink>,
        events: mpsc::Sender<ControlEvent>,
    ) -> Self {
        let mut calibration = CalibrationState::from_config(&config.progress);
        if let Some(transmit) = &config.transmit {
            calibration.set_model(StageKind::Transmit, transmit.airtime.model().stage_model());
        }
        let estimator = ProgressEstimator::new(ProgressTuning::from(&config.progress), calibration);

        Self {
            timers: TimerScheduler::new(events.clone()),
            config,
            launcher,
            codec,
            display,
            events,
            estimator,
            last_id: SessionId(0),
            state: ControllerState::Idle,
            session: None,
            current: None,
            processes: Vec::new(),
            releasing: false,
            shown_percent: None,
            shown_eta: String::new(),
            last_outcome: None,
        }
    }

    // ── Accessors ────────────────────────────────────────────────────────────

    /// Lifecycle state.
    #[must_use]
    pub fn state(&self) -> ControllerState {
        self.state
    }

    /// The most recent session, active or not.
    #[must_use]
    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    /// How the most recently finished session ended.
    #[must_use]
    pub fn last_outcome(&self) -> Option<&SessionOutcome> {
        self.last_outcome.as_ref()
    }

    /// Progress estimator, including the long-lived calibration.
    #[must_use]
    pub fn estimator(&self) -> &ProgressEstimator {
        &self.estimator
    }

    /// Processes currently supervised, in stop order.
    #[must_use]
    pub fn live_processes(&self) -> Vec<ProcessTag> {
        self.processes.iter().map(ProcessHandle::tag).collect()
    }

    /// Whether the current session's watchdog has seen its first byte.
    #[must_use]
    pub fn watchdog_armed(&self) -> bool {
        self.current.as_ref().is_some_and(|s| s.watchdog.is_armed())
    }

    /// Whether deferred post-processing has begun for the current session.
    #[must_use]
    pub fn is_post_processing(&self) -> bool {
        self.current.as_ref().is_some_and(|s| s.post_processing)
    }

    fn current_id(&self) -> Option<SessionId> {
        self.session.as_ref().map(|s| s.id)
    }

    /// `session` is the newest one, whether or not it is still active.
    fn is_current(&self, session: SessionId) -> bool {
        self.current_id() == Some(session)
    }

    /// `session` is the newest one and no stop has been requested.
    fn is_live(&self, session: SessionId) -> bool {
        self.session
            .as_ref()
            .is_some_and(|s| s.id == session && s.active)
    }

    // ── Start ────────────────────────────────────────────────────────────────

    /// Validate `request` and start a new session.
    ///
    /// A spawn failure after the session exists is reported as a stage
    /// error and drives the session through `Stopping` back to `Idle`; the
    /// new id is still returned.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Rejected` while another session is starting,
    /// running, or releasing its processes, and `AppError::Config` when
    /// validation fails. No session is created in either case.
    pub fn start(&mut self, request: StartRequest, now: Instant) -> Result<SessionId> {
        if self.state.is_in_flight() || self.releasing {
            let msg = format!("cannot start: a session is already {:?}", self.state).to_lowercase();
            warn!(state = ?self.state, "start request rejected");
            self.display.append_log_line(&format!("[WARN] {msg}"));
            return Err(AppError::Rejected(msg));
        }

        let mut request = request;
        request.params = request.params.normalized();
        let sequencer = self.validate(&request)?;

        if self.state == ControllerState::Stopping {
            info!("superseding session that is still post-processing");
        }
        if !self.transition(ControllerState::Starting) {
            let msg = format!("cannot start from {:?}", self.state).to_lowercase();
            return Err(AppError::Rejected(msg));
        }
        self.timers.cancel_all();

        let id = self.last_id.next();
        self.last_id = id;
        let pipeline = request.pipeline;
        let paths = SessionPaths::resolve(&self.config, &request);
        let log = SessionLog::new(paths.dir.join(&self.config.session_log_name));

        self.current = Some(SessionState {
            id,
            request,
            paths,
            watchdog: QuiescenceWatchdog::new(Duration::from_millis(
                self.config.watchdog.quiet_timeout_ms,
            )),
            sequencer,
            cycle: None,
            indicator: None,
            receiver_deadline: None,
            receiver_started: false,
            capture_started: false,
            handover_started: false,
            post_processing: false,
            stage_bytes: 0,
            transmit_started_at: None,
            stop_reason: None,
            failure: None,
            log,
        });
        self.session = Some(Session::new(id, pipeline.role()));
        self.estimator.reset(&PipelineLayout::for_pipeline(pipeline));
        self.shown_percent = None;
        self.shown_eta.clear();
        self.display.set_progress_percent(0);
        self.display.set_eta_text("");

        let span = info_span!("session", session_id = id.0, pipeline = pipeline.label());
        let _guard = span.enter();
        info!("session starting");
        self.log_line(&format!("Session {id} started ({})", pipeline.label()));

        let launched = match pipeline {
            PipelineKind::Receive => self.begin_receive(now),
            PipelineKind::HoppingReceive | PipelineKind::HoppingTransmit => self.begin_hopping(),
            PipelineKind::Transmit => self.begin_transmit(now),
        };

        match launched {
            Ok(()) => {
                if self.transition(ControllerState::Running) {
                    info!("session running");
                }
            }
            Err(err) => self.fail(&err.to_string(), now),
        }
        Ok(id)
    }

    /// Synchronous checks; returns the hopping sequencer when needed.
    fn validate(&self, request: &StartRequest) -> Result<Option<EventSequencer>> {
        request.validate()?;

        let search = &self.config.runtime_paths;
        let check = |process: &ProcessConfig| resolve_executable(&process.executable, search);

        match request.pipeline {
            PipelineKind::Receive => {
                let receive = self.config.receive()?;
                check(&receive.capture)?;
                check(&receive.receiver)?;
                Ok(None)
            }
            PipelineKind::HoppingReceive => {
                let receive = self.config.receive()?;
                let hopping = self.config.hopping()?;
                for process in [&receive.capture, &receive.receiver, &hopping.detector, &hopping.bridge] {
                    check(process)?;
                }
                self.hopping_sequencer().map(Some)
            }
            PipelineKind::Transmit => {
                let transmit = self.config.transmit()?;
                check(&transmit.transmitter)?;
                Ok(None)
            }
            PipelineKind::HoppingTransmit => {
                let transmit = self.config.transmit()?;
                let hopping = self.config.hopping()?;
                for process in [&transmit.transmitter, &hopping.detector, &hopping.bridge] {
                    check(process)?;
                }
                self.hopping_sequencer().map(Some)
            }
        }
    }

    fn hopping_sequencer(&self) -> Result<EventSequencer> {
        let hopping = self.config.hopping()?;
        let triggers = TriggerSet::new(&hopping.trigger_patterns)?;
        Ok(EventSequencer::new(
            triggers,
            Duration::from_millis(hopping.handover_delay_ms),
        ))
    }

    fn begin_receive(&mut self, now: Instant) -> Result<()> {
        self.launch(ProcessRole::Capture)?;
        let delay = Duration::from_millis(self.config.receive()?.receiver_start_delay_ms);
        let deadline = now + delay;
        let state = self.state_mut()?;
        state.capture_started = true;
        state.receiver_deadline = Some(deadline);
        let id = state.id;
        self.timers.schedule_at(id, TimerKind::ReceiverStart, deadline);
        Ok(())
    }

    fn begin_hopping(&mut self) -> Result<()> {
        if let Some(state) = &self.current {
            if state.request.pipeline.has_post_processing() {
                if let Err(err) = state.log.remove() {
                    warn!(%err, "failed to remove previous session log");
                }
            }
        }
        self.launch(ProcessRole::Bridge)?;
        self.launch(ProcessRole::Detector)?;
        self.log_line("Waiting for the interference detector");
        Ok(())
    }

    fn begin_transmit(&mut self, now: Instant) -> Result<()> {
        let (input, encoded, redundancy) = {
            let state = self.state_ref()?;
            (
                state.paths.input.clone(),
                state.paths.encoded.clone(),
                state.request.params.redundancy,
            )
        };
        let bytes = std::fs::metadata(&input)?.len();
        self.estimator
            .plan_stage(StageKind::Wrap, StageLoad::bytes(bytes));
        self.estimator
            .plan_stage(StageKind::Transmit, StageLoad::bytes(bytes));
        self.begin_worker_stage(
            StageKind::Encode,
            input,
            encoded,
            StageLoad::with_redundancy(bytes, redundancy),
            now,
        )
    }

    fn launch(&mut self, role: ProcessRole) -> Result<()> {
        let config = Arc::clone(&self.config);
        let process = match role {
            ProcessRole::Capture => &config.receive()?.capture,
            ProcessRole::Receiver => &config.receive()?.receiver,
            ProcessRole::Transmitter => &config.transmit()?.transmitter,
            ProcessRole::Detector => &config.hopping()?.detector,
            ProcessRole::Bridge => &config.hopping()?.bridge,
        };
        let state = self.state_ref()?;
        let tag = ProcessTag::new(state.id, role);
        let spec = config.process_spec(process, role.label(), &state.paths.dir, &state.placeholders());

        let handle = self.launcher.launch(spec, tag, self.events.clone())?;
        info!(role = %role, pid = ?handle.pid(), "process launched");
        let pid = handle.pid().map_or_else(|| "?".to_owned(), |pid| pid.to_string());
        self.log_line(&format!("[{role}] started (pid {pid})"));

        self.processes.push(handle);
        self.processes.sort_by_key(|h| h.tag().role.stop_rank());
        Ok(())
    }

    // ── Event dispatch ───────────────────────────────────────────────────────

    /// Apply one control-loop event.
    pub fn handle_event(&mut self, event: ControlEvent, now: Instant) {
        match event {
            ControlEvent::Line { tag, text } => self.on_line(tag, &text, now),
            ControlEvent::Timer { session, timer } => self.on_timer(session, timer, now),
            ControlEvent::Worker(event) => self.on_worker(event, now),
            ControlEvent::ProcessesReleased { session, reports } => {
                self.on_processes_released(session, &reports, now);
            }
            ControlEvent::HandoverReady { session, report } => {
                self.on_handover_ready(session, report.as_ref(), now);
            }
        }
    }

    fn on_line(&mut self, tag: ProcessTag, text: &str, now: Instant) {
        if !self.is_current(tag.session) {
            debug!(session_id = %tag.session, role = %tag.role, "stale output line ignored");
            return;
        }
        let live = self.is_live(tag.session);

        match tag.role {
            ProcessRole::Capture => match telemetry::parse_line(text) {
                TelemetryLine::Stats(stats) => {
                    self.display.set_stats(&stats);
                    if !live {
                        return;
                    }
                    let armed = self.current.as_mut().is_some_and(|s| {
                        s.watchdog.observe(stats.bytes, now) == Observation::Armed
                    });
                    if armed {
                        self.log_line("First data received → watchdog armed");
                    }
                }
                TelemetryLine::Listening(addr) => {
                    self.log_line(&format!("[capture] listening on {addr}"));
                }
                TelemetryLine::Text(line) => self.log_line(&format!("[capture] {line}")),
            },
            ProcessRole::Detector => {
                self.log_line(&format!("[detector] {text}"));
                if !live {
                    return;
                }
                let arming = self
                    .current
                    .as_mut()
                    .and_then(|s| s.sequencer.as_mut())
                    .and_then(|seq| seq.on_line(text, now));
                if let Some(arming) = arming {
                    self.on_arming(tag.session, &arming);
                }
            }
            role => self.log_line(&format!("[{role}] {text}")),
        }
    }

    fn on_arming(&mut self, session: SessionId, arming: &Arming) {
        let Some(hopping) = self.config.hopping.as_ref() else {
            return;
        };
        let target = self.handover_target();
        let cycle = AnchoredCycle::new(
            arming.deadline,
            Duration::from_millis(hopping.cycle_on_ms),
            Duration::from_millis(hopping.cycle_off_ms),
        );
        if let Some(state) = self.current.as_mut() {
            state.cycle = Some(cycle);
        }
        self.timers
            .schedule_at(session, TimerKind::IndicatorCycle, arming.deadline);
        self.timers
            .schedule_at(session, TimerKind::Handover, arming.deadline);
        #[allow(clippy::cast_precision_loss)]
        let delay = hopping.handover_delay_ms as f64 / 1000.0;
        self.log_line(&format!(
            "Interference detected; switching to {target} in {delay:.1} s"
        ));
    }

    fn on_timer(&mut self, session: SessionId, timer: TimerKind, now: Instant) {
        if !self.is_live(session) {
            debug!(session_id = %session, ?timer, "stale timer ignored");
            return;
        }
        match timer {
            TimerKind::ReceiverStart => self.start_receiver(now),
            TimerKind::IndicatorCycle => self.advance_cycle(session, now),
            TimerKind::Handover => self.begin_handover(session),
        }
    }

    fn start_receiver(&mut self, now: Instant) {
        let Some(state) = self.current.as_mut() else {
            return;
        };
        if state.receiver_started || state.receiver_deadline.is_none() {
            return;
        }
        state.receiver_started = true;
        state.receiver_deadline = None;
        if let Err(err) = self.launch(ProcessRole::Receiver) {
            self.fail(&err.to_string(), now);
        }
    }

    fn advance_cycle(&mut self, session: SessionId, now: Instant) {
        let Some(state) = self.current.as_mut() else {
            return;
        };
        let Some(cycle) = state.cycle else {
            return;
        };
        let next = match cycle.phase_at(now) {
            CyclePhase::Pending { starts_at } => starts_at,
            CyclePhase::Active {
                index,
                next_boundary,
            } => {
                if state.indicator != Some(index) {
                    state.indicator = Some(index);
                    self.display.set_indicator_active(index);
                }
                next_boundary
            }
        };
        self.timers.schedule_at(session, TimerKind::IndicatorCycle, next);
    }

    fn begin_handover(&mut self, session: SessionId) {
        let Some(state) = self.current.as_mut() else {
            return;
        };
        if state.handover_started {
            return;
        }
        state.handover_started = true;
        let target = self.handover_target();
        self.log_line(&format!("Stopping detector for {target} handover"));

        let detector = self
            .processes
            .iter()
            .position(|h| h.tag().role == ProcessRole::Detector)
            .map(|idx| self.processes.remove(idx));
        let events = self.events.clone();
        tokio::spawn(
            async move {
                let report = match detector {
                    Some(mut handle) => Some(handle.stop().await),
                    None => None,
                };
                if events
                    .send(ControlEvent::HandoverReady { session, report })
                    .await
                    .is_err()
                {
                    debug!("event channel closed before handover delivery");
                }
            }
            .instrument(info_span!("handover", session_id = session.0)),
        );
    }

    fn on_handover_ready(&mut self, session: SessionId, report: Option<&StopReport>, now: Instant) {
        if let Some(report) = report {
            info!(session_id = %session, %report, "detector released");
        }
        if !self.is_live(session) {
            debug!(session_id = %session, "stale handover ignored");
            return;
        }
        if let Some(report) = report {
            self.log_line(&format!("[detector] {report}"));
        }
        let started = match self.current.as_ref().map(|s| s.request.pipeline) {
            Some(PipelineKind::HoppingTransmit) => self.begin_transmit(now),
            _ => self.begin_receive(now),
        };
        if let Err(err) = started {
            self.fail(&err.to_string(), now);
        }
    }

    /// Stage chain a hopping session hands over to.
    fn handover_target(&self) -> &'static str {
        match self.current.as_ref().map(|s| s.request.pipeline) {
            Some(PipelineKind::HoppingTransmit) => "transmit",
            _ => "receive",
        }
    }

    // ── Tick ─────────────────────────────────────────────────────────────────

    /// Periodic work: exit polling, receiver fallback, watchdog, progress.
    pub fn tick(&mut self, now: Instant) {
        let exits = monitor::poll_exits(self.processes.iter_mut());
        self.processes.retain(|h| !h.is_released());
        for (tag, exit) in exits {
            self.on_process_exit(tag, exit, now);
        }

        let receiver_due = self
            .current
            .as_ref()
            .and_then(|s| s.receiver_deadline)
            .is_some_and(|deadline| now >= deadline);
        if receiver_due && self.state == ControllerState::Running {
            debug!("receiver start timer missed, starting from tick");
            self.start_receiver(now);
        }

        let stream_active = self.state == ControllerState::Running
            && self
                .processes
                .iter()
                .any(|h| h.tag().role == ProcessRole::Capture);
        let quiescent = self
            .current
            .as_mut()
            .is_some_and(|s| s.watchdog.tick(now, stream_active));
        if quiescent {
            let secs = self
                .current
                .as_ref()
                .map_or(0, |s| s.watchdog.quiet_timeout().as_secs());
            warn!(quiet_secs = secs, "no capture progress, stopping automatically");
            self.log_line(&format!("No data for {secs} s → stopping automatically"));
            self.request_stop(StopReason::Quiescent, now);
        }

        let snapshot = self.estimator.tick(now);
        if self.shown_percent != Some(snapshot.percent) {
            self.shown_percent = Some(snapshot.percent);
            self.display.set_progress_percent(snapshot.percent);
        }
        let eta = format_eta(snapshot.eta);
        if eta != self.shown_eta {
            self.display.set_eta_text(&eta);
            self.shown_eta = eta;
        }
    }

    fn on_process_exit(&mut self, tag: ProcessTag, exit: ExitSummary, now: Instant) {
        if !self.is_current(tag.session) {
            return;
        }
        self.log_line(&format!("[{}] {exit}", tag.role));
        if !self.is_live(tag.session) {
            return;
        }

        match tag.role {
            ProcessRole::Capture => {
                warn!(%exit, "capture process exited, stopping session");
                self.request_stop(StopReason::ProducerExited, now);
            }
            ProcessRole::Transmitter if exit.success => {
                let (bytes, elapsed) = self.current.as_ref().map_or((0, Duration::ZERO), |s| {
                    let elapsed = s
                        .transmit_started_at
                        .map_or(Duration::ZERO, |at| now.saturating_duration_since(at));
                    (s.stage_bytes, elapsed)
                });
                self.estimator
                    .end_stage(StageKind::Transmit, bytes, elapsed, now);
                self.log_line("Transmission finished");
                self.request_stop(StopReason::Completed, now);
            }
            ProcessRole::Transmitter => {
                self.estimator.fail_stage(StageKind::Transmit);
                self.fail(&format!("transmitter {exit}"), now);
            }
            ProcessRole::Receiver | ProcessRole::Detector | ProcessRole::Bridge => {
                warn!(role = %tag.role, %exit, "supervised process exited early");
            }
        }
    }

    // ── Stop ─────────────────────────────────────────────────────────────────

    /// Begin the stop sequence for the current session.
    ///
    /// Returns `false` when no session is starting or running. The
    /// processes are released in stop order on a background task, which
    /// reports back with [`ControlEvent::ProcessesReleased`].
    pub fn request_stop(&mut self, reason: StopReason, now: Instant) -> bool {
        if !self.state.is_in_flight() {
            debug!(%reason, state = ?self.state, "stop request ignored");
            return false;
        }
        let Some(id) = self.current_id() else {
            return false;
        };

        if !self.transition(ControllerState::Stopping) {
            return false;
        }
        if let Some(session) = self.session.as_mut() {
            session.active = false;
        }
        self.releasing = true;
        if let Some(state) = self.current.as_mut() {
            state.stop_reason.get_or_insert(reason);
            state.watchdog.disarm();
            state.receiver_deadline = None;
        }
        self.timers.cancel_all();
        self.estimator.halt();

        info!(session_id = %id, %reason, "stopping session");
        self.log_line(&format!("Stopping ({reason})"));

        let handles: Vec<ProcessHandle> = self.processes.drain(..).collect();
        if handles.is_empty() {
            self.on_processes_released(id, &[], now);
            return true;
        }

        let events = self.events.clone();
        tokio::spawn(
            async move {
                let mut reports = Vec::with_capacity(handles.len());
                for mut handle in handles {
                    reports.push(handle.stop().await);
                }
                if events
                    .send(ControlEvent::ProcessesReleased {
                        session: id,
                        reports,
                    })
                    .await
                    .is_err()
                {
                    debug!("event channel closed before release delivery");
                }
            }
            .instrument(info_span!("stop_sequence", session_id = id.0)),
        );
        true
    }

    fn on_processes_released(&mut self, session: SessionId, reports: &[StopReport], now: Instant) {
        if !self.is_current(session) || !self.releasing {
            debug!(session_id = %session, "stale release ignored");
            return;
        }
        self.releasing = false;
        for report in reports {
            info!(%report, tier = %report.tier, "process released");
            self.log_line(&format!("[{}] {report}", report.tag.role));
        }

        let Some(state) = self.current.as_mut() else {
            return;
        };
        let wants_post = state.failure.is_none()
            && state.request.pipeline.has_post_processing()
            && state.capture_started
            && !state.post_processing;
        if wants_post {
            state.post_processing = true;
            self.begin_post_processing(now);
        } else {
            self.finish();
        }
    }

    // ── Post-processing and workers ──────────────────────────────────────────

    fn begin_post_processing(&mut self, now: Instant) {
        let Some(state) = self.current.as_mut() else {
            return;
        };
        state.watchdog.reset();
        if let Err(err) = state.log.reset("POST-PROCESS") {
            warn!(%err, "failed to reset session log");
        }
        let artifact = state.paths.artifact.clone();
        let unwrapped = state.paths.unwrapped.clone();
        let user_stop = state.stop_reason == Some(StopReason::User);
        let redundancy = state.request.params.redundancy;

        let size = match std::fs::metadata(&artifact) {
            Ok(meta) => meta.len(),
            Err(_) => {
                info!(path = %artifact.display(), "no capture artifact");
                self.log_line("No capture artifact; nothing to decode");
                self.finish();
                return;
            }
        };
        if size == 0 {
            if user_stop {
                info!("stopped before any data arrived");
                self.log_line("Stopped before any data arrived; nothing to decode");
                self.finish();
            } else {
                self.fail("capture artifact is empty", now);
            }
            return;
        }

        self.estimator
            .plan_stage(StageKind::Decode, StageLoad::with_redundancy(size, redundancy));
        if let Err(err) =
            self.begin_worker_stage(StageKind::Unwrap, artifact, unwrapped, StageLoad::bytes(size), now)
        {
            self.fail(&err.to_string(), now);
        }
    }

    fn begin_worker_stage(
        &mut self,
        stage: StageKind,
        input: PathBuf,
        output: PathBuf,
        load: StageLoad,
        now: Instant,
    ) -> Result<()> {
        let state = self.current.as_mut().ok_or_else(no_session)?;
        state.stage_bytes = load.bytes;
        let id = state.id;
        let job = StageJob {
            stage,
            input,
            output,
            params: state.request.params.clone(),
        };

        let estimate = self.estimator.begin_stage(stage, load, now);
        #[allow(clippy::cast_precision_loss)]
        let megabytes = load.bytes as f64 / BYTES_PER_MB;
        let estimate = estimate.map_or_else(|| "?".to_owned(), |e| format!("{:.1} s", e.as_secs_f64()));
        self.log_line(&format!("[{stage}] started ({megabytes:.1} MB, estimate {estimate})"));

        spawn_stage_worker(Arc::clone(&self.codec), job, id, self.events.clone());
        Ok(())
    }

    fn on_worker(&mut self, event: WorkerEvent, now: Instant) {
        let WorkerEvent {
            session,
            stage,
            outcome,
            elapsed,
        } = event;
        if !self.is_current(session) {
            debug!(session_id = %session, %stage, "stale worker result ignored");
            return;
        }
        if self.estimator.status(stage) != Some(StageStatus::Running) {
            debug!(%stage, "worker result for a stage that is no longer running ignored");
            return;
        }

        let report = match outcome {
            Ok(report) => report,
            Err(message) => {
                self.estimator.fail_stage(stage);
                debug!(%stage, shown = ?self.estimator.stage_fraction(stage), "stage progress frozen");
                self.log_line(&format!("[{stage}][ERROR] {message}"));
                self.fail(&format!("{stage} failed: {message}"), now);
                return;
            }
        };

        let bytes = self.current.as_ref().map_or(0, |s| s.stage_bytes);
        let calibrated = self.estimator.end_stage(stage, bytes, elapsed, now);
        let rate = calibrated.map_or_else(String::new, |bps| format!(", now {:.1} MB/s", bps / BYTES_PER_MB));
        info!(%stage, elapsed_ms = elapsed.as_millis(), "stage completed");
        self.log_line(&format!("[{stage}] done in {:.2} s{rate}", elapsed.as_secs_f64()));

        if let Err(err) = self.advance_after(stage, &report, now) {
            self.fail(&err.to_string(), now);
        }
    }

    fn advance_after(&mut self, stage: StageKind, report: &StageReport, now: Instant) -> Result<()> {
        let state = self.state_ref()?;
        let paths = state.paths.clone();
        let redundancy = state.request.params.redundancy;

        match stage {
            StageKind::Unwrap => self.begin_worker_stage(
                StageKind::Decode,
                paths.unwrapped,
                paths.decoded,
                StageLoad::with_redundancy(report.output_bytes, redundancy),
                now,
            ),
            StageKind::Decode => {
                if let Some(stats) = report.stats {
                    self.display.set_ber(stats.ber);
                    self.log_line(&format!("[decode] {}", stats.summary()));
                }
                self.log_line(&format!("Decoded output: {}", paths.decoded.display()));
                self.finish();
                Ok(())
            }
            StageKind::Encode => {
                self.estimator
                    .plan_stage(StageKind::Transmit, StageLoad::bytes(report.output_bytes));
                self.begin_worker_stage(
                    StageKind::Wrap,
                    paths.encoded,
                    paths.wrapped,
                    StageLoad::bytes(report.output_bytes),
                    now,
                )
            }
            StageKind::Wrap => {
                if !self.is_live(self.state_ref()?.id) {
                    return Ok(());
                }
                self.launch(ProcessRole::Transmitter)?;
                let load = StageLoad::bytes(report.output_bytes);
                self.estimator.begin_stage(StageKind::Transmit, load, now);
                let state = self.state_mut()?;
                state.stage_bytes = report.output_bytes;
                state.transmit_started_at = Some(now);
                Ok(())
            }
            StageKind::Transmit => Ok(()),
        }
    }

    // ── Failure and completion ───────────────────────────────────────────────

    /// Report a failure and drive the session toward `Idle`.
    fn fail(&mut self, message: &str, now: Instant) {
        error!(error = %message, "session failure");
        self.display.append_log_line(&format!("[ERROR] {message}"));
        if let Some(state) = self.current.as_mut() {
            if state.post_processing {
                if let Err(err) = state.log.append(&format!("[ERROR] {message}")) {
                    warn!(%err, "session log write failed");
                }
            }
            state.failure.get_or_insert_with(|| message.to_owned());
        }

        if self.state.is_in_flight() {
            self.request_stop(StopReason::Failure, now);
        } else if self.state == ControllerState::Stopping && !self.releasing {
            self.finish();
        }
    }

    fn finish(&mut self) {
        let Some(state) = self.current.as_ref() else {
            return;
        };
        let outcome = if let Some(message) = &state.failure {
            SessionOutcome::Failed {
                message: message.clone(),
            }
        } else if self.estimator.all_done() {
            SessionOutcome::Completed
        } else {
            SessionOutcome::Stopped {
                reason: state.stop_reason.unwrap_or(StopReason::User),
            }
        };
        let id = state.id;

        if let Some(session) = self.session.as_mut() {
            session.active = false;
        }
        self.timers.cancel_all();

        let summary = match &outcome {
            SessionOutcome::Completed => "completed".to_owned(),
            SessionOutcome::Stopped { reason } => format!("stopped ({reason})"),
            SessionOutcome::Failed { message } => format!("failed: {message}"),
        };
        if matches!(outcome, SessionOutcome::Failed { .. }) {
            self.transition(ControllerState::Error);
        }
        info!(session_id = %id, outcome = %summary, "session finished");
        self.log_line(&format!("Session {id} {summary}"));
        self.last_outcome = Some(outcome);
        self.transition(ControllerState::Idle);
    }

    /// Move to `next` when the lifecycle table allows it, and report the
    /// new state to the display.
    fn transition(&mut self, next: ControllerState) -> bool {
        if !self.state.can_transition_to(next) {
            warn!(from = ?self.state, to = ?next, "illegal controller transition refused");
            return false;
        }
        debug!(from = ?self.state, to = ?next, "controller state changed");
        self.state = next;
        self.display.set_state(next);
        true
    }

    /// Append to the display log and, during post-processing, the session log.
    fn log_line(&mut self, line: &str) {
        self.display.append_log_line(line);
        if let Some(state) = self.current.as_ref().filter(|s| s.post_processing) {
            if let Err(err) = state.log.append(line) {
                warn!(%err, "session log write failed");
            }
        }
    }

    fn state_ref(&self) -> Result<&SessionState> {
        self.current.as_ref().ok_or_else(no_session)
    }

    fn state_mut(&mut self) -> Result<&mut SessionState> {
        self.current.as_mut().ok_or_else(no_session)
    }

    // ── Control loop ─────────────────────────────────────────────────────────

    /// Start `request` and drive it to completion.
    ///
    /// Cancelling `shutdown` requests a user stop; the loop still waits for
    /// the stop sequence, any post-processing, and the progress display to
    /// settle.
    ///
    /// # Errors
    ///
    /// Returns the start error when the request is rejected or invalid.
    pub async fn run(
        &mut self,
        request: StartRequest,
        events: &mut mpsc::Receiver<ControlEvent>,
        shutdown: &CancellationToken,
    ) -> Result<SessionOutcome> {
        self.start(request, Instant::now())?;

        let mut ticker = tokio::time::interval(self.config.tick_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut stop_requested = false;

        loop {
            tokio::select! {
                () = shutdown.cancelled(), if !stop_requested => {
                    stop_requested = true;
                    info!("shutdown requested");
                    self.request_stop(StopReason::User, Instant::now());
                }
                _ = ticker.tick() => self.tick(Instant::now()),
                Some(event) = events.recv() => self.handle_event(event, Instant::now()),
            }

            if self.state == ControllerState::Idle && self.estimator.is_settled() {
                break;
            }
        }

        self.tick(Instant::now());
        Ok(self
            .last_outcome
            .clone()
            .unwrap_or(SessionOutcome::Stopped {
                reason: StopReason::User,
            }))
    }
}

fn no_session() -> AppError {
    AppError::Rejected("no current session".into())
}
