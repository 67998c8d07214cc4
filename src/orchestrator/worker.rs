//! Stage workers: the boundary toward the codec.
//!
//! Codec work is CPU-bound and blocking, so each job runs on tokio's
//! blocking pool. The control loop learns about completion (including a
//! panic inside the codec) through a [`WorkerEvent`] carrying the
//! originating session; stale completions are dropped by the controller.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, info_span, Instrument};

use crate::config::{expand_placeholders, CodecConfig, ToolConfig};
use crate::events::{ControlEvent, WorkerEvent};
use crate::models::session::SessionId;
use crate::models::stage::StageKind;
use crate::orchestrator::request::CodingParams;
use crate::session_log::parse_ber;
use crate::supervisor::spawner::resolve_executable;
use crate::{AppError, Result};

/// One unit of codec work.
#[derive(Debug, Clone, PartialEq)]
pub struct StageJob {
    /// Stage to run.
    pub stage: StageKind,
    /// Input artifact.
    pub input: PathBuf,
    /// Output artifact.
    pub output: PathBuf,
    /// Codec parameters.
    pub params: CodingParams,
}

/// Decoder statistics reported alongside the decoded output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct DecodeStats {
    /// Bit error rate estimate.
    pub ber: Option<f64>,
    /// Slices recovered intact.
    pub slices_ok: Option<u64>,
    /// Slices that could not be recovered.
    pub slices_bad: Option<u64>,
    /// Codeword columns the Reed-Solomon decoder gave up on.
    pub rs_failed_columns: Option<u64>,
}

impl DecodeStats {
    /// Whether any statistic was reported.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ber.is_none()
            && self.slices_ok.is_none()
            && self.slices_bad.is_none()
            && self.rs_failed_columns.is_none()
    }

    /// One-line summary for the session log.
    #[must_use]
    pub fn summary(&self) -> String {
        let field = |value: Option<u64>| value.map_or_else(|| "?".to_owned(), |v| v.to_string());
        let ber = self.ber.map_or_else(|| "?".to_owned(), |b| format!("{b:.3e}"));
        format!(
            "slices ok={} bad={} rs_fail_cols={} BER≈{ber}",
            field(self.slices_ok),
            field(self.slices_bad),
            field(self.rs_failed_columns),
        )
    }
}

/// Successful stage result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageReport {
    /// Size of the produced artifact.
    pub output_bytes: u64,
    /// Decoder statistics, for the decode stage.
    pub stats: Option<DecodeStats>,
}

/// Codec boundary. Implementations block; they run on a worker thread.
pub trait StageCodec: Send + Sync {
    /// Run one job to completion.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Worker` when the stage fails.
    fn run(&self, job: &StageJob) -> Result<StageReport>;
}

/// Run `job` on the blocking pool and post its completion to `events`.
pub fn spawn_stage_worker(
    codec: Arc<dyn StageCodec>,
    job: StageJob,
    session: SessionId,
    events: mpsc::Sender<ControlEvent>,
) -> JoinHandle<()> {
    let stage = job.stage;
    tokio::spawn(
        async move {
            let started = Instant::now();
            let joined = tokio::task::spawn_blocking(move || codec.run(&job)).await;
            let outcome = match joined {
                Ok(Ok(report)) => Ok(report),
                Ok(Err(err)) => Err(err.to_string()),
                Err(join_err) => Err(format!("{stage} worker panicked: {join_err}")),
            };
            let event = WorkerEvent {
                session,
                stage,
                outcome,
                elapsed: started.elapsed(),
            };
            if events.send(ControlEvent::Worker(event)).await.is_err() {
                debug!("event channel closed before worker completion delivery");
            }
        }
        .instrument(info_span!("stage_worker", session_id = session.0, stage = %stage)),
    )
}

/// Codec that shells out to one configured tool per stage.
///
/// Tool arguments accept `{input}`, `{output}`, `{redundancy}`,
/// `{interleave}`, `{slice}`, `{theta}`, and `{pad}`.
#[derive(Debug, Clone)]
pub struct ExternalToolCodec {
    tools: CodecConfig,
    search_paths: Vec<PathBuf>,
}

impl ExternalToolCodec {
    /// Construct from the `[codec]` table.
    #[must_use]
    pub fn new(tools: CodecConfig, search_paths: Vec<PathBuf>) -> Self {
        Self {
            tools,
            search_paths,
        }
    }

    fn tool_for(&self, stage: StageKind) -> Result<&ToolConfig> {
        let tool = match stage {
            StageKind::Unwrap => self.tools.unwrap.as_ref(),
            StageKind::Decode => self.tools.decode.as_ref(),
            StageKind::Encode => self.tools.encode.as_ref(),
            StageKind::Wrap => self.tools.wrap.as_ref(),
            StageKind::Transmit => None,
        };
        tool.ok_or_else(|| AppError::Worker(format!("no codec tool configured for {stage}")))
    }
}

impl StageCodec for ExternalToolCodec {
    fn run(&self, job: &StageJob) -> Result<StageReport> {
        let tool = self.tool_for(job.stage)?;
        let executable = resolve_executable(&tool.executable, &self.search_paths)
            .map_err(|err| AppError::Worker(err.to_string()))?;

        let mut vars = job.params.placeholders();
        vars.push(("input", job.input.display().to_string()));
        vars.push(("output", job.output.display().to_string()));
        let args: Vec<String> = tool
            .args
            .iter()
            .map(|arg| expand_placeholders(arg, &vars))
            .collect();

        info!(stage = %job.stage, tool = %executable.display(), ?args, "running codec tool");
        let output = Command::new(&executable)
            .args(&args)
            .stdin(Stdio::null())
            .output()
            .map_err(|err| AppError::Worker(format!("failed to run {} tool: {err}", job.stage)))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        if !output.status.success() {
            let tail = stderr.lines().last().unwrap_or_default().trim().to_owned();
            return Err(AppError::Worker(format!(
                "{} tool failed ({}): {tail}",
                job.stage, output.status
            )));
        }

        let output_bytes = artifact_size(&job.output)?;
        let stats = (job.stage == StageKind::Decode)
            .then(|| parse_decode_stats(&format!("{stdout}\n{stderr}")))
            .filter(|stats| !stats.is_empty());

        Ok(StageReport {
            output_bytes,
            stats,
        })
    }
}

/// Size of a produced artifact.
///
/// # Errors
///
/// Returns `AppError::Worker` if the artifact is missing.
pub fn artifact_size(path: &Path) -> Result<u64> {
    std::fs::metadata(path)
        .map(|meta| meta.len())
        .map_err(|err| AppError::Worker(format!("missing output {}: {err}", path.display())))
}

/// Scan tool output for `key=value` decoder statistics and a BER figure.
#[must_use]
pub fn parse_decode_stats(text: &str) -> DecodeStats {
    let mut stats = DecodeStats {
        ber: parse_ber(text),
        ..DecodeStats::default()
    };
    for token in text.split(|c: char| c.is_whitespace() || c == ',') {
        let Some((key, value)) = token.split_once('=') else {
            continue;
        };
        let parsed = value.trim().parse::<u64>().ok();
        match key.trim().to_ascii_lowercase().as_str() {
            "slices_ok" | "ok" => stats.slices_ok = parsed.or(stats.slices_ok),
            "slices_bad" | "bad" => stats.slices_bad = parsed.or(stats.slices_bad),
            "rs_fail_cols" | "rs_failed_columns" => {
                stats.rs_failed_columns = parsed.or(stats.rs_failed_columns);
            }
            _ => {}
        }
    }
    stats
}
