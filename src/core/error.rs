//! Error taxonomy for canlink sessions.
//!
//! Setup failures (socket creation, interface resolution, addressing) are
//! fatal: without them no session exists, so there is nothing to retry.
//! Steady-state I/O failures abort the session loop but still go through the
//! normal close path. Interrupted system calls are not represented here at
//! all; the retry policy in the session layer consumes them.

use std::io;

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, LinkError>;

/// Errors produced by session setup, steady-state I/O, and teardown.
#[derive(Debug, Error)]
pub enum LinkError {
    /// CAN socket creation failed.
    #[error("failed to create {mode} CAN socket: {source}")]
    SocketCreation {
        mode: &'static str,
        #[source]
        source: io::Error,
    },

    /// The interface name could not be resolved to a kernel index.
    #[error("failed to resolve CAN interface {name:?}: {source}")]
    InterfaceResolution {
        name: String,
        #[source]
        source: io::Error,
    },

    /// Binding (raw) or connecting (broadcast-manager) the socket failed.
    #[error("failed to address CAN socket on {name:?}: {source}")]
    Addressing {
        name: String,
        #[source]
        source: io::Error,
    },

    /// A read or write failed for a reason other than interruption.
    #[error("{op} failed: {source}")]
    Io {
        op: &'static str,
        #[source]
        source: io::Error,
    },

    /// Releasing the socket during teardown failed. Reported, but the
    /// process still terminates; the kernel reclaims the fd either way.
    #[error("failed to close CAN socket: {0}")]
    Close(#[source] io::Error),

    /// Installing the shutdown signal handlers failed.
    #[error("failed to install signal handler: {0}")]
    Signal(#[source] io::Error),

    /// Frame construction violated a CAN invariant.
    #[error("invalid CAN frame: {0}")]
    InvalidFrame(String),

    /// A broadcast-manager message violated the expected wire shape.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl LinkError {
    /// Wrap an I/O failure, naming the operation for the diagnostic.
    pub(crate) fn io(op: &'static str, source: io::Error) -> Self {
        Self::Io { op, source }
    }
}
