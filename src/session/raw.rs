//! Raw per-frame session: read, transform, write back.

use std::io::{self, Write};
use std::os::fd::{FromRawFd, IntoRawFd, OwnedFd};

use socketcan::{CanSocket, Socket};
use tracing::{error, info};

use crate::core::error::{LinkError, Result};
use crate::core::shutdown::ShutdownToken;
use crate::frame::Frame;
use crate::session::{self, SessionMode};

/// Default identifier applied to every frame echoed back to the bus.
pub const DEFAULT_ECHO_ID: u32 = 0x0CC;

/// Configuration for the raw echo loop.
#[derive(Debug, Clone)]
pub struct EchoConfig {
    /// Identifier rewritten onto every transmitted frame.
    pub tx_id: u32,
}

impl Default for EchoConfig {
    fn default() -> Self {
        Self {
            tx_id: DEFAULT_ECHO_ID,
        }
    }
}

/// A raw CAN session bound to one interface.
///
/// Reads every frame on the bus; there is no identifier filter in this
/// mode. See [`crate::session::bcm`] for the kernel-filtered variant.
pub struct RawSession {
    socket: CanSocket,
}

impl RawSession {
    /// Open a raw per-frame socket bound to `iface`.
    pub fn open(iface: &str) -> Result<Self> {
        let socket = session::open_socket(iface, SessionMode::Raw)?;
        // SAFETY: ownership of the fd moves from socket2 to socketcan.
        let socket = unsafe { CanSocket::from(OwnedFd::from_raw_fd(socket.into_raw_fd())) };
        info!("raw CAN session open on {}", iface);
        Ok(Self { socket })
    }

    /// Blocking read of exactly one frame.
    pub fn recv(&self) -> io::Result<Frame> {
        self.socket.read_frame().map(|frame| Frame::from(&frame))
    }

    /// Blocking write of one frame.
    pub fn send(&self, frame: &Frame) -> io::Result<()> {
        self.socket.write_frame(&frame.to_socketcan())
    }

    /// Release the socket. Shutdown signals are masked for the duration.
    pub fn close(self) -> Result<()> {
        session::close_fd(self.socket.into_raw_fd())
    }
}

/// Open a raw session on `iface` and run the echo loop until shutdown.
///
/// The session is closed exactly once on every exit path; a close failure
/// is reported but does not mask the loop outcome.
pub fn run(
    iface: &str,
    config: &EchoConfig,
    token: ShutdownToken,
    out: &mut impl Write,
) -> Result<()> {
    let session = RawSession::open(iface)?;
    let outcome = echo_loop(&session, config, token, out);
    if let Err(err) = session.close() {
        error!("session teardown failed: {}", err);
    }
    outcome
}

fn echo_loop(
    session: &RawSession,
    config: &EchoConfig,
    token: ShutdownToken,
    out: &mut impl Write,
) -> Result<()> {
    while !token.is_triggered() {
        let frame = match session::retry_interrupted(token, "raw read", || session.recv())? {
            Some(frame) => frame,
            None => break,
        };
        writeln!(out, "RX:  {frame}").map_err(|err| LinkError::io("stdout write", err))?;

        let frame = frame.with_id(config.tx_id)?.increment_payload();

        match session::retry_interrupted(token, "raw write", || session.send(&frame))? {
            Some(()) => {}
            None => break,
        }
        writeln!(out, "TX:  {frame}").map_err(|err| LinkError::io("stdout write", err))?;
    }
    Ok(())
}
