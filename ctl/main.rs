#![forbid(unsafe_code)]

//! `rigflow-ctl`: local CLI companion for `rigflow`.
//!
//! Sends one-off commands to the radio device over its text command
//! channel and tails a session log the way an external watcher does.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};

use rigflow::config::{DeviceConfig, GlobalConfig};
use rigflow::device::{self, CommandReply};
use rigflow::session_log::LogTailer;

#[derive(Debug, Parser)]
#[command(
    name = "rigflow-ctl",
    about = "Local CLI for the rigflow radio device and session logs",
    version,
    long_about = None
)]
struct Cli {
    /// Read the `[device]` table from this configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Device host; overrides the configuration.
    #[arg(long)]
    host: Option<String>,

    /// Device command port; overrides the configuration.
    #[arg(long)]
    port: Option<u16>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Send one command line and report the reply.
    Send {
        /// Command text, e.g. `AUTOTX_MODE OFF`.
        line: String,
        /// Drain the connection banner before sending.
        #[arg(long)]
        drain: bool,
    },

    /// Reboot the device.
    Reboot,

    /// Switch off the device's automatic transmit and receive modes.
    AutoOff,

    /// Follow a session log and print new lines with any BER found.
    Watch {
        /// Session log path.
        log: PathBuf,
        /// Poll interval in milliseconds.
        #[arg(long, default_value_t = 500)]
        interval_ms: u64,
    },
}

impl Cli {
    fn device(&self) -> Result<DeviceConfig, String> {
        let mut device = match &self.config {
            Some(path) => GlobalConfig::load_from_path(path)
                .map_err(|err| err.to_string())?
                .device,
            None => DeviceConfig::default(),
        };
        if let Some(host) = &self.host {
            device.host.clone_from(host);
        }
        if let Some(port) = self.port {
            device.port = port;
        }
        Ok(device)
    }
}

fn main() {
    let args = Cli::parse();

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("Failed to start runtime: {err}");
            std::process::exit(1);
        }
    };

    if let Err(err) = runtime.block_on(run(&args)) {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}

async fn run(args: &Cli) -> Result<(), String> {
    match &args.command {
        Command::Send { line, drain } => {
            let endpoint = args.device()?.endpoint();
            let reply = if *drain {
                device::send_after_drain(&endpoint, line).await
            } else {
                device::send_command(&endpoint, line).await
            }
            .map_err(|err| format!("{err} (is the device reachable at {}?)", endpoint.address()))?;
            match reply {
                CommandReply::Acknowledged(text) => println!("OK {text}"),
                CommandReply::ConnectionDropped => println!("OK (connection closed by device)"),
                CommandReply::NoReply => println!("Sent (no reply)"),
            }
            Ok(())
        }
        Command::Reboot => {
            let endpoint = args.device()?.endpoint();
            if device::reboot(&endpoint).await {
                println!("Reboot requested");
                Ok(())
            } else {
                Err(format!("reboot not delivered to {}", endpoint.address()))
            }
        }
        Command::AutoOff => {
            let endpoint = args.device()?.endpoint();
            let delivered = device::disable_auto_modes(&endpoint).await;
            println!("{delivered}/2 commands delivered");
            Ok(())
        }
        Command::Watch { log, interval_ms } => watch(log.clone(), *interval_ms).await,
    }
}

async fn watch(log: PathBuf, interval_ms: u64) -> Result<(), String> {
    let mut tailer = LogTailer::new(log);
    let mut interval = tokio::time::interval(Duration::from_millis(interval_ms.max(10)));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => return Ok(()),
            _ = interval.tick() => {
                for line in tailer.poll().map_err(|err| err.to_string())? {
                    match line.ber {
                        Some(ber) => println!("{}    [BER {ber:.3e}]", line.text),
                        None => println!("{}", line.text),
                    }
                }
            }
        }
    }
}
