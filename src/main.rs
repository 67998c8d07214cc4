#![forbid(unsafe_code)]

//! `rigflow`: run one SDR pipeline session from the command line.
//!
//! Loads the configuration, starts the requested pipeline, and drives the
//! session controller until the session finishes. Ctrl-C (or SIGTERM)
//! requests a user stop; any deferred post-processing still runs.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use rigflow::config::GlobalConfig;
use rigflow::display::{DisplaySink, JsonLinesDisplay, TracingDisplay};
use rigflow::events;
use rigflow::models::session::SessionOutcome;
use rigflow::orchestrator::controller::SessionController;
use rigflow::orchestrator::request::{CodingParams, StartRequest};
use rigflow::orchestrator::worker::ExternalToolCodec;
use rigflow::supervisor::SystemLauncher;
use rigflow::{AppError, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum DisplayFormat {
    /// Display updates go to the log.
    Text,
    /// One JSON display event per line on stdout.
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "rigflow", about = "SDR pipeline orchestrator", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, default_value = "rigflow.toml")]
    config: PathBuf,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Display sink (text or json).
    #[arg(long, value_enum, default_value_t = DisplayFormat::Text)]
    display: DisplayFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, clap::Args)]
struct CodingArgs {
    /// Reed-Solomon parity symbols (1..=63).
    #[arg(long, default_value_t = 16)]
    redundancy: u32,

    /// Interleaver depth.
    #[arg(long, default_value_t = 32)]
    interleave: u32,

    /// Slice size in bytes.
    #[arg(long, default_value_t = 1024)]
    slice: u32,

    /// Wrapper framing ratio.
    #[arg(long, default_value_t = 8.0)]
    theta: f64,

    /// Unwrapper padding mode.
    #[arg(long, default_value_t = 0)]
    pad: u8,
}

impl CodingArgs {
    fn params(&self) -> CodingParams {
        CodingParams {
            redundancy: self.redundancy,
            interleave_depth: self.interleave,
            slice_bytes: self.slice,
            theta: self.theta,
            pad_mode: self.pad,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Capture a transmission into a directory, then unwrap and decode it.
    Receive {
        /// Output directory.
        output_dir: PathBuf,
        /// Extension of the decoded file (mp4, mp3, jpg, png, txt; else bin).
        #[arg(long, default_value = "bin")]
        ext: String,
        #[command(flatten)]
        coding: CodingArgs,
    },
    /// Encode and wrap a file, then transmit it.
    Transmit {
        /// Input file.
        input: PathBuf,
        #[command(flatten)]
        coding: CodingArgs,
    },
    /// Wait for interference, then hand over to receive.
    Hop {
        /// Output directory.
        output_dir: PathBuf,
        /// Extension of the decoded file.
        #[arg(long, default_value = "bin")]
        ext: String,
        #[command(flatten)]
        coding: CodingArgs,
    },
    /// Wait for interference, then encode, wrap and transmit a file.
    HopTransmit {
        /// Input file.
        input: PathBuf,
        #[command(flatten)]
        coding: CodingArgs,
    },
}

impl Command {
    fn request(&self) -> StartRequest {
        match self {
            Self::Receive {
                output_dir,
                ext,
                coding,
            } => StartRequest::receive(output_dir)
                .with_extension(ext.clone())
                .with_params(coding.params()),
            Self::Transmit { input, coding } => {
                StartRequest::transmit(input).with_params(coding.params())
            }
            Self::Hop {
                output_dir,
                ext,
                coding,
            } => StartRequest::hopping(output_dir)
                .with_extension(ext.clone())
                .with_params(coding.params()),
            Self::HopTransmit { input, coding } => {
                StartRequest::hopping_transmit(input).with_params(coding.params())
            }
        }
    }
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;
    info!("rigflow bootstrap");

    let outcome = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))?;

    match outcome {
        SessionOutcome::Failed { message } => {
            error!(%message, "session failed");
            Err(AppError::Worker(message))
        }
        outcome => {
            info!(?outcome, "rigflow finished");
            Ok(())
        }
    }
}

async fn run(args: Cli) -> Result<SessionOutcome> {
    // ── Load configuration ──────────────────────────────
    let config = Arc::new(GlobalConfig::load_from_path(&args.config)?);
    info!(path = %args.config.display(), "configuration loaded");

    let display: Box<dyn DisplaySink> = match args.display {
        DisplayFormat::Text => Box::new(TracingDisplay::default()),
        DisplayFormat::Json => Box::new(JsonLinesDisplay::new(io::stdout())),
    };
    let codec = Arc::new(ExternalToolCodec::new(
        config.codec.clone(),
        config.runtime_paths.clone(),
    ));

    // ── Controller ──────────────────────────────────────
    let (tx, mut rx) = events::channel();
    let mut controller = SessionController::new(
        Arc::clone(&config),
        Box::new(SystemLauncher),
        codec,
        display,
        tx,
    );

    let ct = CancellationToken::new();
    let signal_ct = ct.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("shutdown signal received");
        signal_ct.cancel();
    });

    let outcome = controller.run(args.command.request(), &mut rx, &ct).await?;
    info!(?outcome, "session complete");
    Ok(outcome)
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    result = ctrl_c => {
                        if let Err(err) = result {
                            tracing::error!(%err, "ctrl-c signal handler failed");
                        }
                    }
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                tracing::warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                if let Err(err) = ctrl_c.await {
                    tracing::error!(%err, "ctrl-c signal handler failed");
                }
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            tracing::error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(env_filter).with_writer(io::stderr);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
