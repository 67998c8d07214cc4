//! Global configuration parsing, validation, and process-spec resolution.

use std::collections::HashMap;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use regex::RegexBuilder;
use serde::Deserialize;

use crate::device::DeviceEndpoint;
use crate::progress::airtime::{AirtimeModel, Modulation};
use crate::supervisor::shutdown::ShutdownCommand;
use crate::supervisor::{CreationPolicy, ProcessSpec, TermSignal, TerminationPolicy};
use crate::{AppError, Result};

// ── Device ──────────────────────────────────────────────────────────────────

/// Radio device command channel settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct DeviceConfig {
    /// Device host name or address.
    #[serde(default = "default_device_host")]
    pub host: String,
    /// Device command port.
    #[serde(default = "default_device_port")]
    pub port: u16,
    /// TCP connect timeout.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Upper bound on waiting for an acknowledgement.
    #[serde(default = "default_reply_timeout_ms")]
    pub reply_timeout_ms: u64,
    /// How long to drain a connection banner before sending.
    #[serde(default = "default_drain_ms")]
    pub drain_ms: u64,
}

fn default_device_host() -> String {
    "192.168.2.1".into()
}

fn default_device_port() -> u16 {
    80
}

fn default_connect_timeout_ms() -> u64 {
    800
}

fn default_reply_timeout_ms() -> u64 {
    1500
}

fn default_drain_ms() -> u64 {
    800
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            host: default_device_host(),
            port: default_device_port(),
            connect_timeout_ms: default_connect_timeout_ms(),
            reply_timeout_ms: default_reply_timeout_ms(),
            drain_ms: default_drain_ms(),
        }
    }
}

impl DeviceConfig {
    /// Endpoint used by the command channel.
    #[must_use]
    pub fn endpoint(&self) -> DeviceEndpoint {
        DeviceEndpoint {
            host: self.host.clone(),
            port: self.port,
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            reply_timeout: Duration::from_millis(self.reply_timeout_ms),
            drain: Duration::from_millis(self.drain_ms),
        }
    }
}

// ── Watchdog ────────────────────────────────────────────────────────────────

/// Quiescence watchdog settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct WatchdogConfig {
    /// Silence after the first byte that triggers an automatic stop.
    #[serde(default = "default_quiet_timeout_ms")]
    pub quiet_timeout_ms: u64,
}

fn default_quiet_timeout_ms() -> u64 {
    5000
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            quiet_timeout_ms: default_quiet_timeout_ms(),
        }
    }
}

// ── Progress ────────────────────────────────────────────────────────────────

/// Initial throughput model for one stage.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct StageModelConfig {
    /// Initial throughput in MiB/s at the reference redundancy.
    pub throughput_mbps: f64,
    /// Fixed per-run overhead.
    #[serde(default)]
    pub overhead_ms: u64,
    /// Redundancy at which `throughput_mbps` applies; enables scaling.
    #[serde(default)]
    pub redundancy_reference: Option<u32>,
    /// Exponent of the `(reference / r)` scaling factor.
    #[serde(default)]
    pub redundancy_exponent: Option<f64>,
}

fn default_unwrap_model() -> StageModelConfig {
    StageModelConfig {
        throughput_mbps: 48.0,
        overhead_ms: 200,
        redundancy_reference: None,
        redundancy_exponent: None,
    }
}

fn default_decode_model() -> StageModelConfig {
    StageModelConfig {
        throughput_mbps: 26.0,
        overhead_ms: 300,
        redundancy_reference: Some(16),
        redundancy_exponent: Some(0.5),
    }
}

fn default_encode_model() -> StageModelConfig {
    StageModelConfig {
        throughput_mbps: 60.0,
        overhead_ms: 100,
        redundancy_reference: Some(16),
        redundancy_exponent: Some(0.5),
    }
}

fn default_wrap_model() -> StageModelConfig {
    StageModelConfig {
        throughput_mbps: 40.0,
        overhead_ms: 100,
        redundancy_reference: None,
        redundancy_exponent: None,
    }
}

/// Progress smoothing and calibration constants.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct ProgressConfig {
    /// Weight of the newest sample in the displayed-progress smoothing.
    #[serde(default = "default_smoothing_alpha")]
    pub smoothing_alpha: f64,
    /// Largest displayed-progress increase per second.
    #[serde(default = "default_max_rate_per_sec")]
    pub max_rate_per_sec: f64,
    /// Ceiling on stage progress until the stage actually completes.
    #[serde(default = "default_pre_completion_cap")]
    pub pre_completion_cap: f64,
    /// Length of the ease-out animation after completion.
    #[serde(default = "default_ease_out_ms")]
    pub ease_out_ms: u64,
    /// Weight of the newest sample in the ETA smoothing.
    #[serde(default = "default_eta_alpha")]
    pub eta_alpha: f64,
    /// Weight of the newest measurement in throughput calibration.
    #[serde(default = "default_calibration_alpha")]
    pub calibration_alpha: f64,
    /// Lower bound on any stage estimate.
    #[serde(default = "default_min_estimate_ms")]
    pub min_estimate_ms: u64,
    /// Unwrap stage model.
    #[serde(default = "default_unwrap_model")]
    pub unwrap: StageModelConfig,
    /// Decode stage model.
    #[serde(default = "default_decode_model")]
    pub decode: StageModelConfig,
    /// Encode stage model.
    #[serde(default = "default_encode_model")]
    pub encode: StageModelConfig,
    /// Wrap stage model.
    #[serde(default = "default_wrap_model")]
    pub wrap: StageModelConfig,
}

fn default_smoothing_alpha() -> f64 {
    0.12
}

fn default_max_rate_per_sec() -> f64 {
    0.35
}

fn default_pre_completion_cap() -> f64 {
    0.97
}

fn default_ease_out_ms() -> u64 {
    600
}

fn default_eta_alpha() -> f64 {
    0.20
}

fn default_calibration_alpha() -> f64 {
    0.30
}

fn default_min_estimate_ms() -> u64 {
    50
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            smoothing_alpha: default_smoothing_alpha(),
            max_rate_per_sec: default_max_rate_per_sec(),
            pre_completion_cap: default_pre_completion_cap(),
            ease_out_ms: default_ease_out_ms(),
            eta_alpha: default_eta_alpha(),
            calibration_alpha: default_calibration_alpha(),
            min_estimate_ms: default_min_estimate_ms(),
            unwrap: default_unwrap_model(),
            decode: default_decode_model(),
            encode: default_encode_model(),
            wrap: default_wrap_model(),
        }
    }
}

// ── Processes ───────────────────────────────────────────────────────────────

/// Application-level shutdown request delivered before any signal.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum ShutdownCommandConfig {
    /// Send one UDP datagram.
    Datagram {
        /// Destination address.
        #[serde(default = "default_datagram_addr")]
        addr: String,
        /// Datagram payload.
        #[serde(default = "default_datagram_payload")]
        payload: String,
    },
    /// Send command lines to the radio device.
    Device {
        /// Lines sent in order, each on a fresh connection.
        lines: Vec<String>,
    },
}

fn default_datagram_addr() -> String {
    "127.0.0.1:25000".into()
}

fn default_datagram_payload() -> String {
    "STOP".into()
}

/// How a process is asked, then forced, to exit.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct TerminationConfig {
    /// Cooperative signal sent in the second tier.
    #[serde(default)]
    pub signal: TermSignal,
    /// Wait after the cooperative signal before forcing.
    #[serde(default = "default_grace_ms")]
    pub grace_ms: u64,
    /// Wait after the forced kill before giving up on confirmation.
    #[serde(default = "default_final_wait_ms")]
    pub final_wait_ms: u64,
    /// Optional first-tier shutdown request.
    #[serde(default)]
    pub shutdown: Option<ShutdownCommandConfig>,
}

fn default_grace_ms() -> u64 {
    1200
}

fn default_final_wait_ms() -> u64 {
    1000
}

impl Default for TerminationConfig {
    fn default() -> Self {
        Self {
            signal: TermSignal::default(),
            grace_ms: default_grace_ms(),
            final_wait_ms: default_final_wait_ms(),
            shutdown: None,
        }
    }
}

/// Definition of one supervised child process.
///
/// `args`, `working_dir`, and `env` values may contain `{name}`
/// placeholders, expanded per session.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ProcessConfig {
    /// Executable path, or a bare name resolved through `PATH`.
    pub executable: PathBuf,
    /// Argument templates.
    #[serde(default)]
    pub args: Vec<String>,
    /// Working directory template; defaults to the session directory.
    #[serde(default)]
    pub working_dir: Option<String>,
    /// Environment overrides.
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Window and process-group policy.
    #[serde(default)]
    pub creation: CreationPolicy,
    /// Whether stdout and stderr are read as telemetry.
    #[serde(default = "default_true")]
    pub capture_output: bool,
    /// Termination ladder settings.
    #[serde(default)]
    pub termination: TerminationConfig,
}

fn default_true() -> bool {
    true
}

/// Command-line tool backing one codec stage.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ToolConfig {
    /// Tool executable.
    pub executable: PathBuf,
    /// Argument templates (`{input}`, `{output}`, `{redundancy}`, ...).
    #[serde(default)]
    pub args: Vec<String>,
}

/// Tools used by the external codec, one per worker stage.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct CodecConfig {
    /// Unwrap tool.
    #[serde(default)]
    pub unwrap: Option<ToolConfig>,
    /// Decode tool.
    #[serde(default)]
    pub decode: Option<ToolConfig>,
    /// Encode tool.
    #[serde(default)]
    pub encode: Option<ToolConfig>,
    /// Wrap tool.
    #[serde(default)]
    pub wrap: Option<ToolConfig>,
}

// ── Pipelines ───────────────────────────────────────────────────────────────

/// Receive pipeline settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ReceiveConfig {
    /// UDP capture process.
    pub capture: ProcessConfig,
    /// Radio receiver process.
    pub receiver: ProcessConfig,
    /// Delay between capture launch and receiver launch.
    #[serde(default = "default_receiver_start_delay_ms")]
    pub receiver_start_delay_ms: u64,
    /// Capture artifact file name inside the output directory.
    #[serde(default = "default_artifact_name")]
    pub artifact_name: String,
    /// Unwrap output file name.
    #[serde(default = "default_unwrapped_name")]
    pub unwrapped_name: String,
    /// Decode output stem; the extension comes from the start request.
    #[serde(default = "default_decoded_stem")]
    pub decoded_stem: String,
}

fn default_receiver_start_delay_ms() -> u64 {
    1000
}

fn default_artifact_name() -> String {
    "out.bitwrap".into()
}

fn default_unwrapped_name() -> String {
    "out.unwrapped".into()
}

fn default_decoded_stem() -> String {
    "out".into()
}

/// OFDM parameters of the transmit airtime model.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct AirtimeConfig {
    /// Baseband sample rate.
    #[serde(default = "default_sample_rate_hz")]
    pub sample_rate_hz: f64,
    /// Payload bytes per radio packet.
    #[serde(default = "default_packet_bytes")]
    pub packet_bytes: u32,
    /// Subcarrier modulation.
    #[serde(default)]
    pub modulation: Modulation,
    /// Cyclic prefix length in samples.
    #[serde(default = "default_cyclic_prefix")]
    pub cyclic_prefix: u32,
    /// Fractional slack added to the pure airtime.
    #[serde(default = "default_slack")]
    pub slack: f64,
    /// Fixed delay before the first packet leaves the radio.
    #[serde(default = "default_start_delay_ms")]
    pub start_delay_ms: u64,
}

fn default_sample_rate_hz() -> f64 {
    2_000_000.0
}

fn default_packet_bytes() -> u32 {
    512
}

fn default_cyclic_prefix() -> u32 {
    16
}

fn default_slack() -> f64 {
    0.03
}

fn default_start_delay_ms() -> u64 {
    4000
}

impl Default for AirtimeConfig {
    fn default() -> Self {
        Self {
            sample_rate_hz: default_sample_rate_hz(),
            packet_bytes: default_packet_bytes(),
            modulation: Modulation::default(),
            cyclic_prefix: default_cyclic_prefix(),
            slack: default_slack(),
            start_delay_ms: default_start_delay_ms(),
        }
    }
}

impl AirtimeConfig {
    /// Airtime model built from these parameters.
    #[must_use]
    pub fn model(&self) -> AirtimeModel {
        AirtimeModel {
            sample_rate_hz: self.sample_rate_hz,
            packet_bytes: self.packet_bytes,
            modulation: self.modulation,
            cyclic_prefix: self.cyclic_prefix,
            slack: self.slack,
            start_delay: Duration::from_millis(self.start_delay_ms),
        }
    }
}

/// Transmit pipeline settings.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct TransmitConfig {
    /// Radio transmitter process.
    pub transmitter: ProcessConfig,
    /// Airtime model parameters.
    #[serde(default)]
    pub airtime: AirtimeConfig,
    /// Extension appended to the input file for the encoded artifact.
    #[serde(default = "default_encoded_suffix")]
    pub encoded_suffix: String,
    /// Extension appended to the input file for the wrapped artifact.
    #[serde(default = "default_wrapped_suffix")]
    pub wrapped_suffix: String,
}

fn default_encoded_suffix() -> String {
    "rse".into()
}

fn default_wrapped_suffix() -> String {
    "bitwrap".into()
}

/// Hopping-receive pipeline settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct HoppingConfig {
    /// Interference detector process.
    pub detector: ProcessConfig,
    /// Device command bridge process.
    pub bridge: ProcessConfig,
    /// Case-insensitive regular expressions matched against detector lines.
    #[serde(default = "default_trigger_patterns")]
    pub trigger_patterns: Vec<String>,
    /// Delay from trigger to indicator cycling and receive handover.
    #[serde(default = "default_handover_delay_ms")]
    pub handover_delay_ms: u64,
    /// Time indicator 1 stays active in each cycle.
    #[serde(default = "default_cycle_on_ms")]
    pub cycle_on_ms: u64,
    /// Time indicator 0 stays active in each cycle.
    #[serde(default = "default_cycle_off_ms")]
    pub cycle_off_ms: u64,
}

fn default_trigger_patterns() -> Vec<String> {
    vec![
        r"\bjammer\b.*\bdetected\b".into(),
        r"\bjammer\b.*\bbulund[uı]\b".into(),
        r"rx kapatildi".into(),
        r"context serbest birakildi".into(),
    ]
}

fn default_handover_delay_ms() -> u64 {
    4200
}

fn default_cycle_on_ms() -> u64 {
    3000
}

fn default_cycle_off_ms() -> u64 {
    2000
}

// ── Global ──────────────────────────────────────────────────────────────────

fn default_tick_interval_ms() -> u64 {
    200
}

fn default_session_log_name() -> String {
    "post_process_log.txt".into()
}

/// Global configuration parsed from `rigflow.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// Control-loop tick driving progress, watchdog, and health checks.
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    /// Session log file name inside the session directory.
    #[serde(default = "default_session_log_name")]
    pub session_log_name: String,
    /// Directories prepended to `PATH` for every child process.
    #[serde(default)]
    pub runtime_paths: Vec<PathBuf>,
    /// Radio device command channel.
    #[serde(default)]
    pub device: DeviceConfig,
    /// Quiescence watchdog.
    #[serde(default)]
    pub watchdog: WatchdogConfig,
    /// Progress estimation.
    #[serde(default)]
    pub progress: ProgressConfig,
    /// Receive pipeline; required for receive and hopping sessions.
    #[serde(default)]
    pub receive: Option<ReceiveConfig>,
    /// Transmit pipeline.
    #[serde(default)]
    pub transmit: Option<TransmitConfig>,
    /// Hopping-receive pipeline.
    #[serde(default)]
    pub hopping: Option<HoppingConfig>,
    /// Stage codec tools.
    #[serde(default)]
    pub codec: CodecConfig,
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Control-loop tick interval.
    #[must_use]
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    /// Receive settings, or a configuration error when absent.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if no `[receive]` table was given.
    pub fn receive(&self) -> Result<&ReceiveConfig> {
        self.receive
            .as_ref()
            .ok_or_else(|| AppError::Config("receive pipeline is not configured".into()))
    }

    /// Transmit settings, or a configuration error when absent.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if no `[transmit]` table was given.
    pub fn transmit(&self) -> Result<&TransmitConfig> {
        self.transmit
            .as_ref()
            .ok_or_else(|| AppError::Config("transmit pipeline is not configured".into()))
    }

    /// Hopping settings, or a configuration error when absent.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if no `[hopping]` table was given.
    pub fn hopping(&self) -> Result<&HoppingConfig> {
        self.hopping
            .as_ref()
            .ok_or_else(|| AppError::Config("hopping pipeline is not configured".into()))
    }

    /// Resolve a process definition into a launchable spec.
    ///
    /// `default_dir` is used when the definition names no working
    /// directory. Placeholders in arguments, working directory, and
    /// environment values are expanded from `vars`.
    #[must_use]
    pub fn process_spec(
        &self,
        process: &ProcessConfig,
        label: &str,
        default_dir: &Path,
        vars: &[(&str, String)],
    ) -> ProcessSpec {
        let working_dir = process
            .working_dir
            .as_ref()
            .map_or_else(|| default_dir.to_path_buf(), |dir| {
                PathBuf::from(expand_placeholders(dir, vars))
            });

        let shutdown = process
            .termination
            .shutdown
            .as_ref()
            .map(|cmd| match cmd {
                ShutdownCommandConfig::Datagram { addr, payload } => ShutdownCommand::Datagram {
                    addr: addr.clone(),
                    payload: payload.clone(),
                },
                ShutdownCommandConfig::Device { lines } => ShutdownCommand::DeviceLines {
                    endpoint: self.device.endpoint(),
                    lines: lines.clone(),
                },
            });

        ProcessSpec {
            label: label.to_owned(),
            executable: process.executable.clone(),
            args: process
                .args
                .iter()
                .map(|arg| expand_placeholders(arg, vars))
                .collect(),
            working_dir,
            env: process
                .env
                .iter()
                .map(|(key, value)| (key.clone(), expand_placeholders(value, vars)))
                .collect(),
            search_paths: self.runtime_paths.clone(),
            creation: process.creation,
            capture_output: process.capture_output,
            termination: TerminationPolicy {
                signal: process.termination.signal,
                grace: Duration::from_millis(process.termination.grace_ms),
                final_wait: Duration::from_millis(process.termination.final_wait_ms),
                shutdown,
            },
        }
    }

    fn validate(&self) -> Result<()> {
        if self.tick_interval_ms == 0 {
            return Err(AppError::Config(
                "tick_interval_ms must be greater than zero".into(),
            ));
        }

        if self.watchdog.quiet_timeout_ms == 0 {
            return Err(AppError::Config(
                "watchdog.quiet_timeout_ms must be greater than zero".into(),
            ));
        }

        if self.session_log_name.trim().is_empty() {
            return Err(AppError::Config("session_log_name must not be empty".into()));
        }

        self.validate_progress()?;

        if let Some(hopping) = &self.hopping {
            if hopping.cycle_on_ms == 0 || hopping.cycle_off_ms == 0 {
                return Err(AppError::Config(
                    "hopping cycle durations must be greater than zero".into(),
                ));
            }
            for pattern in &hopping.trigger_patterns {
                RegexBuilder::new(pattern)
                    .case_insensitive(true)
                    .build()
                    .map_err(|err| {
                        AppError::Config(format!("invalid trigger pattern '{pattern}': {err}"))
                    })?;
            }
        }

        if let Some(transmit) = &self.transmit {
            if transmit.airtime.sample_rate_hz <= 0.0 || transmit.airtime.packet_bytes == 0 {
                return Err(AppError::Config(
                    "airtime sample rate and packet size must be positive".into(),
                ));
            }
        }

        for process in self.configured_processes() {
            if let Some(ShutdownCommandConfig::Datagram { addr, .. }) =
                &process.termination.shutdown
            {
                addr.parse::<SocketAddr>().map_err(|err| {
                    AppError::Config(format!("invalid shutdown datagram address '{addr}': {err}"))
                })?;
            }
        }

        Ok(())
    }

    fn validate_progress(&self) -> Result<()> {
        let p = &self.progress;
        let unit = |value: f64| value > 0.0 && value <= 1.0;

        if !unit(p.smoothing_alpha) || !unit(p.eta_alpha) || !unit(p.calibration_alpha) {
            return Err(AppError::Config(
                "progress smoothing constants must be in (0, 1]".into(),
            ));
        }
        if !(p.pre_completion_cap > 0.0 && p.pre_completion_cap < 1.0) {
            return Err(AppError::Config(
                "progress.pre_completion_cap must be in (0, 1)".into(),
            ));
        }
        if p.max_rate_per_sec <= 0.0 {
            return Err(AppError::Config(
                "progress.max_rate_per_sec must be positive".into(),
            ));
        }
        for (name, model) in [
            ("unwrap", &p.unwrap),
            ("decode", &p.decode),
            ("encode", &p.encode),
            ("wrap", &p.wrap),
        ] {
            if model.throughput_mbps <= 0.0 {
                return Err(AppError::Config(format!(
                    "progress.{name}.throughput_mbps must be positive"
                )));
            }
            if model.redundancy_reference == Some(0) {
                return Err(AppError::Config(format!(
                    "progress.{name}.redundancy_reference must be positive"
                )));
            }
        }
        Ok(())
    }

    fn configured_processes(&self) -> Vec<&ProcessConfig> {
        let mut processes = Vec::new();
        if let Some(receive) = &self.receive {
            processes.push(&receive.capture);
            processes.push(&receive.receiver);
        }
        if let Some(transmit) = &self.transmit {
            processes.push(&transmit.transmitter);
        }
        if let Some(hopping) = &self.hopping {
            processes.push(&hopping.detector);
            processes.push(&hopping.bridge);
        }
        processes
    }
}

/// Replace every `{name}` in `template` with its value from `vars`.
///
/// Unknown placeholders are left untouched.
#[must_use]
pub fn expand_placeholders(template: &str, vars: &[(&str, String)]) -> String {
    vars.iter().fold(template.to_owned(), |acc, (name, value)| {
        acc.replace(&format!("{{{name}}}"), value)
    })
}
