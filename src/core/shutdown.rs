//! Cooperative shutdown plumbing.
//!
//! SIGINT and SIGTERM set a process-wide flag exactly once; session loops
//! observe it through a [`ShutdownToken`] at iteration boundaries. The
//! handlers are installed without `SA_RESTART`, so a delivery interrupts
//! blocking socket calls with `EINTR` and the loop gets a chance to look at
//! the token. The flag is never reset.

use std::io;
use std::mem;
use std::ptr;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::core::error::{LinkError, Result};

static SHUTDOWN: AtomicBool = AtomicBool::new(false);

extern "C" fn on_shutdown_signal(_sig: libc::c_int) {
    // Async-signal-safe: a single atomic store.
    SHUTDOWN.store(true, Ordering::SeqCst);
}

/// Observer handle for the process shutdown flag.
///
/// Copyable and cheap; session loops receive one instead of reaching for
/// process-wide state directly.
#[derive(Debug, Clone, Copy)]
pub struct ShutdownToken {
    _priv: (),
}

impl ShutdownToken {
    /// True once SIGINT or SIGTERM has been delivered.
    pub fn is_triggered(&self) -> bool {
        SHUTDOWN.load(Ordering::SeqCst)
    }
}

/// Install the SIGINT/SIGTERM handlers and return the observer token.
pub fn install() -> Result<ShutdownToken> {
    unsafe {
        let mut sa: libc::sigaction = mem::zeroed();
        sa.sa_sigaction = on_shutdown_signal as *const () as libc::sighandler_t;
        // No SA_RESTART: blocking reads and writes must see EINTR.
        sa.sa_flags = 0;
        libc::sigemptyset(&mut sa.sa_mask);
        for sig in [libc::SIGINT, libc::SIGTERM] {
            if libc::sigaction(sig, &sa, ptr::null_mut()) == -1 {
                return Err(LinkError::Signal(io::Error::last_os_error()));
            }
        }
    }
    Ok(ShutdownToken { _priv: () })
}

/// Blocks SIGINT/SIGTERM for its lifetime; the previous mask is restored on
/// drop.
pub struct SignalMaskGuard {
    previous: libc::sigset_t,
}

/// Mask the shutdown signals so a second interrupt cannot race a critical
/// section such as socket teardown.
pub fn mask_shutdown_signals() -> SignalMaskGuard {
    unsafe {
        let mut mask: libc::sigset_t = mem::zeroed();
        let mut previous: libc::sigset_t = mem::zeroed();
        libc::sigemptyset(&mut mask);
        libc::sigaddset(&mut mask, libc::SIGINT);
        libc::sigaddset(&mut mask, libc::SIGTERM);
        libc::sigprocmask(libc::SIG_BLOCK, &mask, &mut previous);
        SignalMaskGuard { previous }
    }
}

impl Drop for SignalMaskGuard {
    fn drop(&mut self) {
        unsafe {
            libc::sigprocmask(libc::SIG_SETMASK, &self.previous, ptr::null_mut());
        }
    }
}

/// Suspend the calling thread until the token triggers.
///
/// The shutdown signals are blocked before the token is checked, so a
/// delivery cannot slip between the check and the suspend; `sigsuspend`
/// swaps in a mask that admits only SIGINT/SIGTERM atomically. Wakeups for
/// any other reason resume the wait.
pub fn wait(token: &ShutdownToken) {
    let _guard = mask_shutdown_signals();
    unsafe {
        let mut mask: libc::sigset_t = mem::zeroed();
        libc::sigfillset(&mut mask);
        libc::sigdelset(&mut mask, libc::SIGINT);
        libc::sigdelset(&mut mask, libc::SIGTERM);
        while !token.is_triggered() {
            libc::sigsuspend(&mask);
        }
    }
}

#[cfg(test)]
pub(crate) fn token_for_tests() -> ShutdownToken {
    ShutdownToken { _priv: () }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_starts_untriggered() {
        assert!(!token_for_tests().is_triggered());
    }
}
