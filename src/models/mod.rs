//! Domain model module declarations.

pub mod process;
pub mod session;
pub mod stage;
pub mod telemetry;
