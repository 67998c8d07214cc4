#![forbid(unsafe_code)]

pub mod config;
pub mod device;
pub mod display;
pub mod errors;
pub mod events;
pub mod mode;
pub mod models;
pub mod orchestrator;
pub mod progress;
pub mod session_log;
pub mod supervisor;

pub use config::GlobalConfig;
pub use errors::{AppError, Result};
