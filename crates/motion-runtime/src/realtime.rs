//! Real-time scheduling and memory locking.
//!
//! Provides platform-specific setup for deterministic execution:
//! memory locking (mlockall) to prevent page faults and SCHED_FIFO
//! priorities for the control and bus threads. Full support on Linux,
//! no-op elsewhere.

#![allow(unused_imports)] // Platform-specific code may not use all imports

use motion_common::{MotionError, MotionResult, RealtimeConfig};
use tracing::{debug, info, warn};

/// Result of real-time initialization.
#[derive(Debug, Clone)]
pub struct RealtimeStatus {
    /// Whether memory was locked successfully.
    pub memory_locked: bool,
    /// Applied SCHED_FIFO priority of the calling thread, if any.
    pub priority: Option<u8>,
}

/// Initialize the real-time environment for the calling thread.
///
/// # Errors
///
/// Returns an error if a required RT feature fails for a reason other
/// than missing privileges. EPERM downgrades to a warning so the
/// controller still runs unprivileged, just without determinism.
pub fn init_realtime(config: &RealtimeConfig) -> MotionResult<RealtimeStatus> {
    if !config.enabled {
        info!("Real-time scheduling disabled in configuration");
        return Ok(RealtimeStatus {
            memory_locked: false,
            priority: None,
        });
    }

    info!("Initializing real-time environment");

    let memory_locked = if config.lock_memory {
        lock_memory()?
    } else {
        false
    };

    let priority = set_thread_priority(config.priority)?;

    let status = RealtimeStatus {
        memory_locked,
        priority,
    };
    info!(?status, "Real-time initialization complete");
    Ok(status)
}

/// Lock all current and future memory pages.
#[cfg(target_os = "linux")]
#[allow(unsafe_code)]
fn lock_memory() -> MotionResult<bool> {
    use nix::sys::mman::{mlockall, MlockAllFlags};

    debug!("Locking memory pages with mlockall");

    match mlockall(MlockAllFlags::MCL_CURRENT | MlockAllFlags::MCL_FUTURE) {
        Ok(()) => {
            info!("Memory locked successfully");
            Ok(true)
        }
        Err(e) => {
            // EPERM is common when not running as root or without CAP_IPC_LOCK
            if e == nix::errno::Errno::EPERM {
                warn!(
                    "mlockall failed with EPERM - running without CAP_IPC_LOCK capability. \
                     Page faults may occur during execution."
                );
                Ok(false)
            } else {
                Err(MotionError::Config(format!("mlockall failed: {e}")))
            }
        }
    }
}

#[cfg(not(target_os = "linux"))]
fn lock_memory() -> MotionResult<bool> {
    warn!("mlockall not available on this platform");
    Ok(false)
}

/// Set SCHED_FIFO priority for the calling thread.
///
/// Unlike process-wide `sched_setscheduler`, this targets only the
/// current thread, so the bus thread and the sequencer thread can run
/// at different priorities.
///
/// # Errors
///
/// Returns an error for anything other than EPERM, which downgrades
/// to a warning and `Ok(None)`.
#[cfg(target_os = "linux")]
#[allow(unsafe_code)]
pub fn set_thread_priority(priority: u8) -> MotionResult<Option<u8>> {
    // Valid range for RT policies is 1-99
    let clamped = priority.clamp(1, 99);
    if clamped != priority {
        warn!(
            original = priority,
            clamped, "Scheduler priority clamped to valid range"
        );
    }

    debug!(priority = clamped, "Setting SCHED_FIFO for current thread");

    let param = libc::sched_param {
        sched_priority: i32::from(clamped),
    };

    // SAFETY: pthread_self() is always a valid thread handle and param
    // is a properly initialized sched_param.
    let rc = unsafe { libc::pthread_setschedparam(libc::pthread_self(), libc::SCHED_FIFO, &param) };

    if rc != 0 {
        if rc == libc::EPERM {
            warn!(
                "pthread_setschedparam failed with EPERM - running without RT privileges. \
                 Consider running with CAP_SYS_NICE capability or as root."
            );
            return Ok(None);
        }
        return Err(MotionError::Config(format!(
            "pthread_setschedparam failed: {}",
            std::io::Error::from_raw_os_error(rc)
        )));
    }

    info!(priority = clamped, "Real-time scheduler configured");
    Ok(Some(clamped))
}

#[cfg(not(target_os = "linux"))]
pub fn set_thread_priority(priority: u8) -> MotionResult<Option<u8>> {
    warn!(priority, "Real-time scheduling not available on this platform");
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_rt_is_a_no_op() {
        let config = RealtimeConfig {
            enabled: false,
            ..Default::default()
        };

        let status = init_realtime(&config).unwrap();
        assert!(!status.memory_locked);
        assert!(status.priority.is_none());
    }
}
