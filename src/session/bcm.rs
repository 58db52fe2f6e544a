//! Broadcast-manager session: kernel-filtered reception and cyclic
//! transmission over the BCM command channel.
//!
//! The session owns a connected `CAN_BCM` socket and speaks the command
//! datagrams from [`crate::wire`]. Two operating modes are built on it:
//!
//! - **Filtered echo** installs an `RX_SETUP` subscription for one
//!   identifier, then mirrors the raw echo loop on the unwrapped
//!   notifications, transmitting through `TX_SEND` commands.
//! - **Cyclic broadcast** registers a `TX_SETUP` task once and suspends;
//!   the kernel keeps transmitting the sequence until the channel closes.

use std::io::{self, Write};
use std::os::fd::{AsRawFd, IntoRawFd, RawFd};
use std::time::Duration;

use socket2::Socket;
use tracing::{debug, error, info};

use crate::core::error::{LinkError, Result};
use crate::core::shutdown::{self, ShutdownToken};
use crate::frame::Frame;
use crate::session::{self, SessionMode};
use crate::wire::{self, BcmFlags, BcmMsgHead, BcmTimeval, Opcode};

/// Default identifier the filtered echo session subscribes to.
pub const DEFAULT_FILTER_ID: u32 = 0x123;

/// Default identifier applied to frames echoed by the filtered session.
pub const DEFAULT_ECHO_ID: u32 = 0x0BC;

// ============================================================================
// Cyclic task
// ============================================================================

/// A kernel-managed repeating transmission: an ordered frame sequence sent
/// round-robin at one fixed interval.
///
/// The registration signature enforces that every frame shares the
/// interval; per-frame periods are not expressible through one task.
#[derive(Debug, Clone)]
pub struct CyclicTask {
    frames: Vec<Frame>,
    interval: Duration,
    start_immediately: bool,
}

impl CyclicTask {
    /// Build a task transmitting `frames` every `interval`, starting as
    /// soon as it is registered.
    pub fn new(frames: Vec<Frame>, interval: Duration) -> Result<Self> {
        if frames.is_empty() {
            return Err(LinkError::Protocol(
                "cyclic task needs at least one frame".into(),
            ));
        }
        Ok(Self {
            frames,
            interval,
            start_immediately: true,
        })
    }

    /// The registered frame sequence.
    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    /// The shared repeat interval.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    fn to_msg_head(&self) -> BcmMsgHead {
        let mut flags = BcmFlags::SETTIMER;
        if self.start_immediately {
            flags |= BcmFlags::STARTTIMER;
        }
        BcmMsgHead {
            opcode: Opcode::TxSetup as u32,
            flags: flags.bits(),
            count: 0,
            ival1: BcmTimeval::default(),
            ival2: BcmTimeval::from_duration(self.interval),
            can_id: 0,
            nframes: self.frames.len() as u32,
        }
    }
}

// ============================================================================
// Session
// ============================================================================

fn rx_setup_head(can_id: u32) -> BcmMsgHead {
    BcmMsgHead {
        opcode: Opcode::RxSetup as u32,
        flags: BcmFlags::empty().bits(),
        count: 0,
        ival1: BcmTimeval::default(),
        ival2: BcmTimeval::default(),
        can_id,
        nframes: 0,
    }
}

// The header identifier stays zero for one-shot sends; the embedded frame
// carries the real identifier.
fn tx_send_head() -> BcmMsgHead {
    BcmMsgHead {
        opcode: Opcode::TxSend as u32,
        flags: BcmFlags::empty().bits(),
        count: 0,
        ival1: BcmTimeval::default(),
        ival2: BcmTimeval::default(),
        can_id: 0,
        nframes: 1,
    }
}

/// A broadcast-manager command channel connected to one interface.
pub struct BcmSession {
    socket: Socket,
}

impl BcmSession {
    /// Open a command channel connected to `iface`.
    pub fn open(iface: &str) -> Result<Self> {
        let socket = session::open_socket(iface, SessionMode::BroadcastManager)?;
        info!("broadcast-manager session open on {}", iface);
        Ok(Self { socket })
    }

    fn fd(&self) -> RawFd {
        self.socket.as_raw_fd()
    }

    /// Issue one command datagram. The header and its frame records must go
    /// out in a single write.
    fn send_command(&self, head: &BcmMsgHead, frames: &[Frame]) -> io::Result<()> {
        let buf = wire::encode(head, frames);
        let n = unsafe { libc::write(self.fd(), buf.as_ptr().cast(), buf.len()) };
        if n == -1 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    /// Install the standing receive filter for `can_id`. Subsequent reads
    /// deliver only matching frames.
    pub fn setup_receive_filter(&self, can_id: u32) -> Result<()> {
        self.send_command(&rx_setup_head(can_id), &[])
            .map_err(|err| LinkError::io("RX_SETUP", err))?;
        debug!("receive filter installed for 0x{:03X}", can_id);
        Ok(())
    }

    /// One-shot transmission of a single frame through a `TX_SEND` command.
    pub fn send_frame(&self, frame: &Frame) -> io::Result<()> {
        self.send_command(&tx_send_head(), std::slice::from_ref(frame))
    }

    /// Blocking read of the next notification, unwrapped to its embedded
    /// frame. `Ok(None)` for notifications without a frame record (e.g.
    /// receive timeouts).
    pub fn recv_filtered(&self) -> io::Result<Option<Frame>> {
        let mut buf = [0u8; wire::MSG_HEAD_LEN + wire::FRAME_RECORD_LEN];
        let n = unsafe { libc::read(self.fd(), buf.as_mut_ptr().cast(), buf.len()) };
        if n == -1 {
            return Err(io::Error::last_os_error());
        }
        let message = wire::decode(&buf[..n as usize])
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err.to_string()))?;
        if message.head.opcode != Opcode::RxChanged as u32 {
            debug!("ignoring notification with opcode {}", message.head.opcode);
            return Ok(None);
        }
        Ok(message.frames.into_iter().next())
    }

    /// Register a cyclic transmission task.
    ///
    /// Registration happens at most once per session and is not retried on
    /// failure. Once registered, the kernel transmits autonomously until
    /// the channel closes.
    pub fn register_cyclic(&self, task: &CyclicTask) -> Result<()> {
        self.send_command(&task.to_msg_head(), task.frames())
            .map_err(|err| LinkError::io("TX_SETUP", err))?;
        info!(
            "cyclic task registered: {} frames every {} ms",
            task.frames().len(),
            task.interval().as_millis()
        );
        Ok(())
    }

    /// Release the socket. Shutdown signals are masked for the duration.
    pub fn close(self) -> Result<()> {
        session::close_fd(self.socket.into_raw_fd())
    }
}

// ============================================================================
// Session runners
// ============================================================================

/// Configuration for the filtered echo loop.
#[derive(Debug, Clone)]
pub struct FilterEchoConfig {
    /// Identifier the kernel filter subscribes to.
    pub rx_id: u32,
    /// Identifier rewritten onto every transmitted frame.
    pub tx_id: u32,
}

impl Default for FilterEchoConfig {
    fn default() -> Self {
        Self {
            rx_id: DEFAULT_FILTER_ID,
            tx_id: DEFAULT_ECHO_ID,
        }
    }
}

/// Open a broadcast-manager session on `iface`, install the receive
/// filter, and echo matching frames until shutdown.
pub fn run_filtered_echo(
    iface: &str,
    config: &FilterEchoConfig,
    token: ShutdownToken,
    out: &mut impl Write,
) -> Result<()> {
    let session = BcmSession::open(iface)?;
    let outcome = filtered_echo_loop(&session, config, token, out);
    if let Err(err) = session.close() {
        error!("session teardown failed: {}", err);
    }
    outcome
}

fn filtered_echo_loop(
    session: &BcmSession,
    config: &FilterEchoConfig,
    token: ShutdownToken,
    out: &mut impl Write,
) -> Result<()> {
    session.setup_receive_filter(config.rx_id)?;

    while !token.is_triggered() {
        let frame = match session::retry_interrupted(token, "broadcast-manager read", || {
            session.recv_filtered()
        })? {
            Some(Some(frame)) => frame,
            // Notification without a frame record; nothing to echo.
            Some(None) => continue,
            None => break,
        };
        writeln!(out, "RX:  {frame}").map_err(|err| LinkError::io("stdout write", err))?;

        let frame = frame.with_id(config.tx_id)?.increment_payload();

        match session::retry_interrupted(token, "broadcast-manager write", || {
            session.send_frame(&frame)
        })? {
            Some(()) => {}
            None => break,
        }
        writeln!(out, "TX:  {frame}").map_err(|err| LinkError::io("stdout write", err))?;
    }
    Ok(())
}

/// Open a broadcast-manager session on `iface`, register `task`, and
/// suspend until shutdown.
///
/// After the single registration the session performs no further channel
/// activity; closing the socket is what stops the kernel transmission.
pub fn run_cyclic(
    iface: &str,
    task: &CyclicTask,
    token: ShutdownToken,
    out: &mut impl Write,
) -> Result<()> {
    let session = BcmSession::open(iface)?;
    let outcome = cyclic(&session, iface, task, token, out);
    if let Err(err) = session.close() {
        error!("session teardown failed: {}", err);
    }
    outcome
}

fn cyclic(
    session: &BcmSession,
    iface: &str,
    task: &CyclicTask,
    token: ShutdownToken,
    out: &mut impl Write,
) -> Result<()> {
    session.register_cyclic(task)?;

    writeln!(
        out,
        "Cyclic messages registered with SocketCAN!\n\
         Use a tool such as \"candump {iface}\" to view the messages.\n\
         These messages will continue to transmit so long as the socket\n\
         used to communicate with SocketCAN remains open. In other words,\n\
         close this program with SIGINT or SIGTERM in order to gracefully\n\
         stop transmitting."
    )
    .map_err(|err| LinkError::io("stdout write", err))?;

    shutdown::wait(&token);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pattern_frames() -> Vec<Frame> {
        (0..4u8)
            .map(|i| Frame::new(0x0C0 + u32::from(i), &[i; 3]).unwrap())
            .collect()
    }

    #[test]
    fn test_cyclic_task_head_carries_shared_interval() {
        let task = CyclicTask::new(pattern_frames(), Duration::from_millis(1200)).unwrap();
        let head = task.to_msg_head();
        assert_eq!(head.opcode, Opcode::TxSetup as u32);
        assert_eq!(head.flags, (BcmFlags::SETTIMER | BcmFlags::STARTTIMER).bits());
        assert_eq!(head.can_id, 0);
        assert_eq!(head.nframes, 4);
        assert_eq!(head.ival2.tv_sec, 1);
        assert_eq!(head.ival2.tv_usec, 200_000);
    }

    #[test]
    fn test_cyclic_task_rejects_empty_sequence() {
        assert!(CyclicTask::new(Vec::new(), Duration::from_secs(1)).is_err());
    }

    #[test]
    fn test_tx_send_header_id_stays_zero() {
        let head = tx_send_head();
        assert_eq!(head.opcode, Opcode::TxSend as u32);
        assert_eq!(head.can_id, 0);
        assert_eq!(head.nframes, 1);
    }

    #[test]
    fn test_rx_setup_header_carries_target_id() {
        let head = rx_setup_head(0x123);
        assert_eq!(head.opcode, Opcode::RxSetup as u32);
        assert_eq!(head.flags, 0);
        assert_eq!(head.can_id, 0x123);
        assert_eq!(head.nframes, 0);
    }
}
