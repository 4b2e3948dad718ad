//! Signal handling for graceful daemon shutdown.
//!
//! SIGTERM and SIGINT both raise a single atomic shutdown flag that
//! the main loop polls between sequencer steps. Handlers only touch
//! atomics, keeping them async-signal-safe.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use tracing::{debug, info};

static SHUTDOWN_FLAG: AtomicBool = AtomicBool::new(false);
static SIGNAL_COUNT: AtomicU32 = AtomicU32::new(0);

/// Handle for signal-driven shutdown requests.
#[derive(Clone)]
pub struct SignalHandler {
    _private: (),
}

impl SignalHandler {
    /// Register handlers for SIGTERM and SIGINT.
    ///
    /// On non-Unix platforms only manual shutdown requests work.
    ///
    /// # Errors
    ///
    /// Returns the OS error if handler registration fails.
    pub fn install() -> std::io::Result<Self> {
        #[cfg(unix)]
        register_unix_handlers()?;

        Ok(Self { _private: () })
    }

    /// Check if shutdown has been requested.
    #[inline]
    pub fn shutdown_requested(&self) -> bool {
        SHUTDOWN_FLAG.load(Ordering::Relaxed)
    }

    /// Manually request shutdown.
    pub fn request_shutdown(&self) {
        info!("Manual shutdown requested");
        SHUTDOWN_FLAG.store(true, Ordering::Relaxed);
    }

    /// Total signals received so far.
    pub fn signal_count(&self) -> u32 {
        SIGNAL_COUNT.load(Ordering::Relaxed)
    }
}

#[cfg(unix)]
#[allow(unsafe_code)]
fn register_unix_handlers() -> std::io::Result<()> {
    use std::os::raw::c_int;

    extern "C" fn shutdown_handler(_: c_int) {
        SHUTDOWN_FLAG.store(true, Ordering::Relaxed);
        SIGNAL_COUNT.fetch_add(1, Ordering::Relaxed);
    }

    // SAFETY: the handler only performs atomic stores, which are
    // async-signal-safe.
    unsafe {
        if libc::signal(libc::SIGTERM, shutdown_handler as libc::sighandler_t) == libc::SIG_ERR {
            return Err(std::io::Error::last_os_error());
        }
        if libc::signal(libc::SIGINT, shutdown_handler as libc::sighandler_t) == libc::SIG_ERR {
            return Err(std::io::Error::last_os_error());
        }
    }

    debug!("Unix signal handlers registered");
    Ok(())
}
