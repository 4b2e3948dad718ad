//! Cyclic process-data exchange loop.
//!
//! Runs one exchange per fixed period. Deadlines are computed by adding
//! the period to the previous deadline, never to "now", so lateness in
//! one tick does not accumulate into drift over the run.

use crate::BusShared;
use motion_common::{MotionError, MotionResult};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

/// Drift-free deadline arithmetic for the cyclic loop.
///
/// The n-th deadline is always `start + n * period`, regardless of how
/// late individual ticks fire.
#[derive(Debug, Clone)]
pub struct CycleTimer {
    period: Duration,
    next_deadline: Instant,
}

impl CycleTimer {
    /// Start a timer whose first deadline is one period from now.
    pub fn new(period: Duration) -> Self {
        Self::starting_at(period, Instant::now())
    }

    /// Start a timer anchored at an explicit start instant.
    pub fn starting_at(period: Duration, start: Instant) -> Self {
        Self {
            period,
            next_deadline: start + period,
        }
    }

    /// The configured period.
    pub fn period(&self) -> Duration {
        self.period
    }

    /// The deadline the next tick will wait for.
    pub fn next_deadline(&self) -> Instant {
        self.next_deadline
    }

    /// Consume the current deadline and schedule the following one.
    pub fn advance(&mut self) -> Instant {
        let deadline = self.next_deadline;
        self.next_deadline += self.period;
        deadline
    }

    /// Sleep until the current deadline, then advance it.
    pub fn wait(&mut self) {
        let deadline = self.advance();
        wait_until(deadline);
    }
}

/// Sleep until an absolute deadline using high-precision sleep.
#[cfg(target_os = "linux")]
fn wait_until(deadline: Instant) {
    let now = Instant::now();
    if deadline <= now {
        return;
    }
    let duration = deadline - now;

    let ts = libc::timespec {
        tv_sec: duration.as_secs() as libc::time_t,
        tv_nsec: libc::c_long::from(duration.subsec_nanos()),
    };

    // SAFETY: clock_nanosleep is safe with valid parameters
    #[allow(unsafe_code)]
    unsafe {
        libc::clock_nanosleep(libc::CLOCK_MONOTONIC, 0, &ts, std::ptr::null_mut());
    }
}

#[cfg(not(target_os = "linux"))]
fn wait_until(deadline: Instant) {
    let now = Instant::now();
    if deadline > now {
        std::thread::sleep(deadline - now);
    }
}

/// Run the exchange loop until the quit flag is raised.
///
/// Each tick locks the bus for exactly one exchange, then yields so the
/// mode sequencer thread gets a fair chance to take the lock; without
/// the yield a short period starves the sequencer entirely.
///
/// # Errors
///
/// Propagates the first transport failure; a short working counter is
/// counted by the bus, not treated as an error here. On failure the
/// quit flag is raised before returning, so the other loops sharing it
/// see that exchanges have stopped instead of ticking against frozen
/// inputs.
pub fn run_bus_loop(bus: &BusShared, quit: &AtomicBool, period: Duration) -> MotionResult<()> {
    info!(period_us = period.as_micros(), "Bus exchange loop started");
    let mut timer = CycleTimer::new(period);

    while !quit.load(Ordering::Relaxed) {
        timer.wait();
        let result = bus
            .lock()
            .map_err(|_| MotionError::Transport("bus lock poisoned".into()))
            .and_then(|mut bus| bus.exchange());
        if let Err(e) = result {
            error!(error = %e, "Bus exchange failed, stopping");
            quit.store(true, Ordering::Relaxed);
            return Err(e);
        }
        std::thread::yield_now();
    }

    debug!("Bus exchange loop stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deadlines_do_not_drift() {
        let period = Duration::from_micros(100);
        let start = Instant::now();
        let mut timer = CycleTimer::starting_at(period, start);

        // However late the ticks fire, the n-th deadline is start + n*P
        for n in 1..=1000u32 {
            let deadline = timer.advance();
            assert_eq!(deadline, start + period * n);
        }
    }

    #[test]
    fn test_next_deadline_is_peek() {
        let period = Duration::from_millis(1);
        let start = Instant::now();
        let mut timer = CycleTimer::starting_at(period, start);

        assert_eq!(timer.next_deadline(), start + period);
        timer.advance();
        assert_eq!(timer.next_deadline(), start + period * 2);
    }

    #[test]
    fn test_exchange_failure_raises_the_quit_flag() {
        use motion_common::BusConfig;
        use motion_fieldbus::{EthercatBus, SimulatedTransport};
        use std::sync::{Arc, Mutex};

        let config = BusConfig::default();
        let transport = SimulatedTransport::new(3, &config.devices);
        // Never opened, so the first exchange errors out.
        let bus = Arc::new(Mutex::new(EthercatBus::new(config, Box::new(transport))));
        let quit = AtomicBool::new(false);

        let result = run_bus_loop(&bus, &quit, Duration::from_micros(100));
        assert!(result.is_err());
        assert!(quit.load(Ordering::Relaxed));
    }

    #[test]
    fn test_wait_past_deadline_returns_immediately() {
        let period = Duration::from_micros(10);
        let start = Instant::now() - Duration::from_secs(1);
        let mut timer = CycleTimer::starting_at(period, start);

        let before = Instant::now();
        timer.wait();
        assert!(before.elapsed() < Duration::from_millis(50));
    }
}
