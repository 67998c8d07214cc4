//! Error types shared across the application.

use std::fmt::{Display, Formatter};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all domain failure modes.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure, including a start
    /// request that names a missing input or executable.
    Config(String),
    /// A request was refused because of the controller's current state.
    Rejected(String),
    /// The operating system could not launch a child process.
    Spawn(String),
    /// Signalling or waiting on a running child process failed.
    Process(String),
    /// A pipeline stage worker failed.
    Worker(String),
    /// Device command channel failure.
    Command(String),
    /// Malformed telemetry or log input.
    Telemetry(String),
    /// File-system or I/O operation failure.
    Io(String),
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Rejected(msg) => write!(f, "rejected: {msg}"),
            Self::Spawn(msg) => write!(f, "spawn: {msg}"),
            Self::Process(msg) => write!(f, "process: {msg}"),
            Self::Worker(msg) => write!(f, "worker: {msg}"),
            Self::Command(msg) => write!(f, "command: {msg}"),
            Self::Telemetry(msg) => write!(f, "telemetry: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
