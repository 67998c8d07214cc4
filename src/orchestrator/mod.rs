//! Pipeline orchestration: the session controller and the per-session
//! components it drives.

pub mod controller;
pub mod request;
pub mod sequencer;
pub mod timers;
pub mod watchdog;
pub mod worker;
