//! Session log: an append-only, timestamped text file in the session
//! directory, reset at the start of every processing phase and tailed by
//! external watchers.

pub mod tail;
pub mod writer;

pub use tail::{parse_ber, LogTailer, TailLine};
pub use writer::SessionLog;
