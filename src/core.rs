//! Core abstractions shared by every session kind.
//!
//! This module provides the error taxonomy and the cooperative shutdown
//! plumbing that both the raw and broadcast-manager transports build on.

pub mod error;
pub mod shutdown;

pub use error::{LinkError, Result};
pub use shutdown::ShutdownToken;
