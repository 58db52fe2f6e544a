//! canlink CLI entry point.
//!
//! One binary covering the three session programs: raw echo, filtered
//! broadcast-manager echo, and the cyclic broadcast registration. Each
//! subcommand takes exactly one CAN interface argument; the session cores
//! receive a validated interface name and a shutdown token.

use std::io;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::error;
use tracing_subscriber::EnvFilter;

use canlink::core::shutdown;
use canlink::frame::{Frame, MAX_EXTENDED_ID};
use canlink::session::bcm::{self, CyclicTask, FilterEchoConfig};
use canlink::session::raw::{self, EchoConfig};

/// Minimal SocketCAN transport sessions.
#[derive(Parser, Debug)]
#[command(name = "canlink", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Echo every frame on the bus through a raw per-frame socket.
    Raw {
        /// CAN network interface (e.g. can0)
        iface: String,

        /// Identifier for echoed frames (hex).
        #[arg(long, value_parser = parse_can_id, default_value = "0x0CC")]
        tx_id: u32,
    },

    /// Echo kernel-filtered frames through a broadcast-manager channel.
    Bcm {
        /// CAN network interface (e.g. can0)
        iface: String,

        /// Identifier the kernel filter subscribes to (hex).
        #[arg(long, value_parser = parse_can_id, default_value = "0x123")]
        rx_id: u32,

        /// Identifier for echoed frames (hex).
        #[arg(long, value_parser = parse_can_id, default_value = "0x0BC")]
        tx_id: u32,
    },

    /// Register a kernel-managed cyclic transmission and suspend.
    Cyclic {
        /// CAN network interface (e.g. can0)
        iface: String,

        /// First identifier of the frame sequence (hex).
        #[arg(long, value_parser = parse_can_id, default_value = "0x0C0")]
        base_id: u32,

        /// Number of frames in the sequence.
        #[arg(long, default_value_t = 4)]
        count: u8,

        /// Payload length of each frame.
        #[arg(long, default_value_t = 3)]
        length: u8,

        /// Repeat interval in milliseconds.
        #[arg(long, default_value_t = 1200)]
        interval_ms: u64,
    },
}

fn parse_can_id(value: &str) -> std::result::Result<u32, String> {
    let digits = value
        .trim_start_matches("0x")
        .trim_start_matches("0X");
    let id = u32::from_str_radix(digits, 16)
        .map_err(|err| format!("invalid CAN identifier {value:?}: {err}"))?;
    if id > MAX_EXTENDED_ID {
        return Err(format!("identifier 0x{id:X} exceeds 29 bits"));
    }
    Ok(id)
}

/// Deterministic test-pattern frames: base identifier plus index, payload
/// bytes equal to the index.
fn pattern_task(
    base_id: u32,
    count: u8,
    length: u8,
    interval: Duration,
) -> canlink::Result<CyclicTask> {
    let mut frames = Vec::with_capacity(count as usize);
    for i in 0..count {
        let payload = vec![i; length as usize];
        frames.push(Frame::new(base_id + u32::from(i), &payload)?);
    }
    CyclicTask::new(frames, interval)
}

fn run(cli: Cli) -> canlink::Result<()> {
    let token = shutdown::install()?;
    let stdout = io::stdout();
    let mut out = stdout.lock();

    match cli.command {
        Commands::Raw { iface, tx_id } => raw::run(&iface, &EchoConfig { tx_id }, token, &mut out),
        Commands::Bcm {
            iface,
            rx_id,
            tx_id,
        } => bcm::run_filtered_echo(&iface, &FilterEchoConfig { rx_id, tx_id }, token, &mut out),
        Commands::Cyclic {
            iface,
            base_id,
            count,
            length,
            interval_ms,
        } => {
            let task = pattern_task(base_id, count, length, Duration::from_millis(interval_ms))?;
            bcm::run_cyclic(&iface, &task, token, &mut out)
        }
    }
}

fn main() -> ExitCode {
    // Diagnostics go to stderr; stdout carries the RX/TX protocol lines.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => {
            println!("Goodbye!");
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!("{}", err);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_can_id_accepts_hex_forms() {
        assert_eq!(parse_can_id("0x123").unwrap(), 0x123);
        assert_eq!(parse_can_id("0CC").unwrap(), 0x0CC);
        assert!(parse_can_id("0x20000000").is_err());
        assert!(parse_can_id("zz").is_err());
    }

    #[test]
    fn test_pattern_task_matches_documented_layout() {
        let task = pattern_task(0x0C0, 4, 3, Duration::from_millis(1200)).unwrap();
        let frames = task.frames();
        assert_eq!(frames.len(), 4);
        for (i, frame) in frames.iter().enumerate() {
            assert_eq!(frame.id(), 0x0C0 + i as u32);
            assert_eq!(frame.data(), &[i as u8; 3]);
        }
        assert_eq!(task.interval(), Duration::from_millis(1200));
    }

    #[test]
    fn test_pattern_task_rejects_oversized_payload() {
        assert!(pattern_task(0x0C0, 1, 9, Duration::from_secs(1)).is_err());
    }
}
