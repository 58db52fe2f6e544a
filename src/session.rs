//! Session lifecycle shared by the raw and broadcast-manager transports.
//!
//! Opening a session walks three distinct fatal steps: create the socket
//! for the requested mode, resolve the interface name to a kernel index,
//! and address the socket (bind for raw, connect for the broadcast
//! manager). Each step fails with its own error so the diagnostic names the
//! operation that broke. Teardown releases the fd exactly once, with the
//! shutdown signals masked so a second interrupt cannot race it.

pub mod bcm;
pub mod raw;

use std::ffi::CString;
use std::io;
use std::mem;
use std::os::fd::{AsRawFd, RawFd};

use socket2::{Domain, Protocol, Socket, Type};

use crate::core::error::{LinkError, Result};
use crate::core::shutdown::{self, ShutdownToken};

pub use bcm::{BcmSession, CyclicTask};
pub use raw::RawSession;

/// Access mode of a CAN session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionMode {
    /// Per-frame raw socket, bound to the interface.
    Raw,
    /// Broadcast-manager command channel, connected to the interface.
    BroadcastManager,
}

impl SessionMode {
    fn label(self) -> &'static str {
        match self {
            Self::Raw => "raw",
            Self::BroadcastManager => "broadcast-manager",
        }
    }
}

/// Resolve an interface name to its kernel index.
fn interface_index(name: &str) -> Result<libc::c_uint> {
    let c_name = CString::new(name).map_err(|_| LinkError::InterfaceResolution {
        name: name.to_string(),
        source: io::Error::new(io::ErrorKind::InvalidInput, "interface name contains NUL"),
    })?;
    let index = unsafe { libc::if_nametoindex(c_name.as_ptr()) };
    if index == 0 {
        return Err(LinkError::InterfaceResolution {
            name: name.to_string(),
            source: io::Error::last_os_error(),
        });
    }
    Ok(index)
}

/// Open a CAN socket of the requested mode and address it to `iface`.
///
/// Raw sockets are bound (receive and send on that interface); the
/// broadcast-manager command channel is connected, so every subsequent
/// write implicitly addresses the interface.
pub(crate) fn open_socket(iface: &str, mode: SessionMode) -> Result<Socket> {
    let (ty, proto) = match mode {
        SessionMode::Raw => (Type::RAW, libc::CAN_RAW),
        SessionMode::BroadcastManager => (Type::DGRAM, libc::CAN_BCM),
    };
    let socket = Socket::new(Domain::from(libc::AF_CAN), ty, Some(Protocol::from(proto)))
        .map_err(|source| LinkError::SocketCreation {
            mode: mode.label(),
            source,
        })?;

    let index = interface_index(iface)?;

    let mut addr: libc::sockaddr_can = unsafe { mem::zeroed() };
    addr.can_family = libc::AF_CAN as libc::sa_family_t;
    addr.can_ifindex = index as libc::c_int;

    let rc = unsafe {
        let addr_ptr = &addr as *const libc::sockaddr_can as *const libc::sockaddr;
        let addr_len = mem::size_of::<libc::sockaddr_can>() as libc::socklen_t;
        match mode {
            SessionMode::Raw => libc::bind(socket.as_raw_fd(), addr_ptr, addr_len),
            SessionMode::BroadcastManager => libc::connect(socket.as_raw_fd(), addr_ptr, addr_len),
        }
    };
    if rc == -1 {
        return Err(LinkError::Addressing {
            name: iface.to_string(),
            source: io::Error::last_os_error(),
        });
    }
    Ok(socket)
}

/// Release a session fd exactly once, with the shutdown signals masked for
/// the duration of the call.
pub(crate) fn close_fd(fd: RawFd) -> Result<()> {
    let _mask = shutdown::mask_shutdown_signals();
    let rc = unsafe { libc::close(fd) };
    if rc == -1 {
        return Err(LinkError::Close(io::Error::last_os_error()));
    }
    Ok(())
}

/// Run an interruptible operation to completion.
///
/// An interrupted system call alone is not a failure: the same operation is
/// retried, unless the interruption was the shutdown signal, in which case
/// `Ok(None)` tells the caller to wind down. Any other failure is terminal.
pub(crate) fn retry_interrupted<T>(
    token: ShutdownToken,
    op: &'static str,
    mut attempt: impl FnMut() -> io::Result<T>,
) -> Result<Option<T>> {
    loop {
        match attempt() {
            Ok(value) => return Ok(Some(value)),
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {
                if token.is_triggered() {
                    return Ok(None);
                }
            }
            Err(err) => return Err(LinkError::io(op, err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::shutdown::token_for_tests;

    #[test]
    fn test_retry_interrupted_retries_the_same_call() {
        let mut attempts = 0;
        let result = retry_interrupted(token_for_tests(), "test read", || {
            attempts += 1;
            if attempts < 3 {
                Err(io::Error::from(io::ErrorKind::Interrupted))
            } else {
                Ok(attempts)
            }
        })
        .unwrap();
        assert_eq!(result, Some(3));
    }

    #[test]
    fn test_retry_interrupted_propagates_real_errors() {
        let result = retry_interrupted(token_for_tests(), "test write", || {
            Err::<(), _>(io::Error::from(io::ErrorKind::BrokenPipe))
        });
        assert!(matches!(
            result,
            Err(LinkError::Io {
                op: "test write",
                ..
            })
        ));
    }
}
