//! Best-effort command channel toward the radio device.
//!
//! The device accepts one text command per TCP connection, terminated by
//! `\r\n`. It may answer with `OK`, print a `>` prompt, or simply close
//! the connection; all three count as delivered. Callers on shutdown paths
//! use [`send_best_effort`], which never returns an error.

mod client;

pub use client::{
    disable_auto_modes, reboot, send_after_drain, send_best_effort, send_command,
    send_datagram, CommandReply, AUTORX_OFF, AUTOTX_OFF, REBOOT,
};

use std::time::Duration;

/// Where and how patiently to talk to the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceEndpoint {
    /// Host name or address.
    pub host: String,
    /// TCP port.
    pub port: u16,
    /// Connect timeout.
    pub connect_timeout: Duration,
    /// Upper bound on waiting for a reply.
    pub reply_timeout: Duration,
    /// Banner drain period used by [`send_after_drain`].
    pub drain: Duration,
}

impl DeviceEndpoint {
    /// `host:port` string.
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
