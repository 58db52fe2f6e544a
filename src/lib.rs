//! # canlink
//!
//! A minimal transport layer over a Linux SocketCAN bus, with two access
//! modes built from shared pieces:
//!
//! - **Raw session**: a per-frame socket bound to one interface, reading
//!   frames one at a time, transforming them, and writing them back.
//! - **Broadcast-manager session**: a command channel to the kernel's
//!   broadcast manager, which offloads identifier-filtered reception and
//!   cyclic transmission so the process does not poll.
//!
//! Both share the [`frame::Frame`] codec, the session lifecycle (open,
//! cooperative shutdown on SIGINT/SIGTERM, close exactly once), and the
//! error taxonomy in [`core::error`].
//!
//! ## Example
//!
//! ```rust,ignore
//! use canlink::core::shutdown;
//! use canlink::session::raw::{self, EchoConfig};
//!
//! let token = shutdown::install()?;
//! let mut stdout = std::io::stdout().lock();
//! raw::run("can0", &EchoConfig::default(), token, &mut stdout)?;
//! ```
//!
//! Linux only: the crate sits directly on the `PF_CAN` socket family.

pub mod core;
pub mod frame;
pub mod session;
pub mod wire;

pub use crate::core::error::{LinkError, Result};
pub use crate::core::shutdown::ShutdownToken;
pub use crate::frame::Frame;
pub use crate::session::bcm::{BcmSession, CyclicTask};
pub use crate::session::raw::RawSession;
pub use crate::session::SessionMode;
