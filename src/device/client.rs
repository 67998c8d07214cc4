//! TCP and UDP plumbing for device commands.

use std::net::SocketAddr;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};
use tokio::time::{timeout, timeout_at, Instant};
use tracing::{debug, info, warn};

use super::DeviceEndpoint;
use crate::{AppError, Result};

/// Turns off the device's automatic transmit mode.
pub const AUTOTX_OFF: &str = "AUTOTX_MODE OFF";
/// Turns off the device's automatic receive mode.
pub const AUTORX_OFF: &str = "AUTORX_MODE OFF";
/// Reboots the device; the device drops the connection instead of replying.
pub const REBOOT: &str = "REBOOT";

/// What the device did after a command was written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandReply {
    /// Replied with an acknowledgement (`OK` or a `>` prompt).
    Acknowledged(String),
    /// Closed the connection, which the device does on accepted commands.
    ConnectionDropped,
    /// Said nothing within the reply timeout.
    NoReply,
}

impl CommandReply {
    /// Whether the device positively confirmed the command.
    #[must_use]
    pub fn is_confirmed(&self) -> bool {
        !matches!(self, Self::NoReply)
    }
}

/// Send one command line and wait for an acknowledgement or a drop.
///
/// # Errors
///
/// Returns `AppError::Command` if the connection cannot be made or the
/// line cannot be written.
pub async fn send_command(endpoint: &DeviceEndpoint, line: &str) -> Result<CommandReply> {
    let mut stream = connect(endpoint).await?;
    write_line(&mut stream, line).await?;
    let reply = await_reply(&mut stream, endpoint).await?;
    debug!(command = line, ?reply, "device command sent");
    Ok(reply)
}

/// Drain any connection banner first, then send one command line.
///
/// # Errors
///
/// Returns `AppError::Command` on connection or write failure.
pub async fn send_after_drain(endpoint: &DeviceEndpoint, line: &str) -> Result<CommandReply> {
    let mut stream = connect(endpoint).await?;

    let deadline = Instant::now() + endpoint.drain;
    let mut scratch = [0_u8; 1024];
    loop {
        match timeout_at(deadline, stream.read(&mut scratch)).await {
            Ok(Ok(0)) => return Ok(CommandReply::ConnectionDropped),
            Ok(Ok(n)) => debug!(bytes = n, "drained device banner"),
            Ok(Err(err)) => {
                return Err(AppError::Command(format!("banner drain failed: {err}")));
            }
            Err(_) => break,
        }
    }

    write_line(&mut stream, line).await?;
    await_reply(&mut stream, endpoint).await
}

/// Send a command without ever failing; returns whether it was delivered.
pub async fn send_best_effort(endpoint: &DeviceEndpoint, line: &str) -> bool {
    match send_command(endpoint, line).await {
        Ok(reply) => {
            debug!(command = line, confirmed = reply.is_confirmed(), "best-effort command delivered");
            true
        }
        Err(err) => {
            debug!(command = line, %err, "best-effort command failed, ignoring");
            false
        }
    }
}

/// Reboot the device, falling back to the drain variant if the plain send
/// cannot be delivered.
pub async fn reboot(endpoint: &DeviceEndpoint) -> bool {
    match send_command(endpoint, REBOOT).await {
        Ok(reply) => {
            info!(address = %endpoint.address(), ?reply, "reboot command sent");
            true
        }
        Err(err) => {
            warn!(%err, "reboot command failed, retrying after banner drain");
            match send_after_drain(endpoint, REBOOT).await {
                Ok(reply) => {
                    info!(?reply, "reboot command sent after drain");
                    true
                }
                Err(err) => {
                    warn!(%err, "reboot command failed");
                    false
                }
            }
        }
    }
}

/// Best-effort: turn off automatic transmit and receive modes.
///
/// Returns how many of the two commands were delivered.
pub async fn disable_auto_modes(endpoint: &DeviceEndpoint) -> usize {
    let mut delivered = 0;
    for line in [AUTOTX_OFF, AUTORX_OFF] {
        if send_best_effort(endpoint, line).await {
            delivered += 1;
        }
    }
    delivered
}

/// Send a single UDP datagram to `addr`.
///
/// # Errors
///
/// Returns `AppError::Command` if the address is invalid or the send fails.
pub async fn send_datagram(addr: &str, payload: &str) -> Result<()> {
    let target: SocketAddr = addr
        .parse()
        .map_err(|err| AppError::Command(format!("invalid datagram address {addr}: {err}")))?;
    let bind = if target.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
    let socket = UdpSocket::bind(bind)
        .await
        .map_err(|err| AppError::Command(format!("failed to bind datagram socket: {err}")))?;
    socket
        .send_to(payload.as_bytes(), target)
        .await
        .map_err(|err| AppError::Command(format!("datagram to {addr} failed: {err}")))?;
    debug!(addr, payload, "datagram sent");
    Ok(())
}

// ── Private helpers ──────────────────────────────────────────────────────────

async fn connect(endpoint: &DeviceEndpoint) -> Result<TcpStream> {
    let address = endpoint.address();
    match timeout(endpoint.connect_timeout, TcpStream::connect(address.as_str())).await {
        Ok(Ok(stream)) => Ok(stream),
        Ok(Err(err)) => Err(AppError::Command(format!("connect to {address} failed: {err}"))),
        Err(_) => Err(AppError::Command(format!("connect to {address} timed out"))),
    }
}

async fn write_line(stream: &mut TcpStream, line: &str) -> Result<()> {
    let framed = format!("{line}\r\n");
    stream
        .write_all(framed.as_bytes())
        .await
        .map_err(|err| AppError::Command(format!("failed to write command: {err}")))?;
    stream
        .flush()
        .await
        .map_err(|err| AppError::Command(format!("failed to flush command: {err}")))
}

async fn await_reply(stream: &mut TcpStream, endpoint: &DeviceEndpoint) -> Result<CommandReply> {
    let deadline = Instant::now() + endpoint.reply_timeout;
    let mut buf = [0_u8; 1024];
    let mut collected = String::new();

    loop {
        match timeout_at(deadline, stream.read(&mut buf)).await {
            Err(_) => return Ok(CommandReply::NoReply),
            Ok(Ok(0)) => return Ok(CommandReply::ConnectionDropped),
            Ok(Ok(n)) => {
                collected.push_str(&String::from_utf8_lossy(&buf[..n]));
                if is_acknowledgement(&collected) {
                    return Ok(CommandReply::Acknowledged(collected.trim().to_owned()));
                }
            }
            Ok(Err(err)) => {
                return match err.kind() {
                    std::io::ErrorKind::ConnectionReset | std::io::ErrorKind::ConnectionAborted => {
                        Ok(CommandReply::ConnectionDropped)
                    }
                    _ => Err(AppError::Command(format!("failed to read reply: {err}"))),
                };
            }
        }
    }
}

fn is_acknowledgement(text: &str) -> bool {
    text.to_ascii_uppercase().contains("OK") || text.contains('>')
}
