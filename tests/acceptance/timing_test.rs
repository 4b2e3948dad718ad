//! Cyclic timing acceptance tests.
//!
//! Bounds here are deliberately loose so the tests pass on ordinary
//! loaded machines; they catch gross regressions (drift, a busy-wait,
//! a lost wakeup), not scheduling jitter. Run on a PREEMPT_RT kernel
//! as root for representative figures.

use super::common::{has_preempt_rt, is_root, TimingStats};
use motion_runtime::CycleTimer;
use std::time::{Duration, Instant};

#[test]
fn test_cycle_lateness_stays_bounded() {
    let period = Duration::from_millis(1);
    let cycles = 200;

    let mut timer = CycleTimer::new(period);
    let mut lateness = Vec::with_capacity(cycles);

    for _ in 0..cycles {
        let deadline = timer.next_deadline();
        timer.wait();
        lateness.push(Instant::now().saturating_duration_since(deadline));
    }

    let stats = TimingStats::from_samples(&lateness);
    eprintln!(
        "lateness over {} cycles: min={:?} avg={:?} max={:?} (rt_kernel={} root={})",
        stats.samples,
        stats.min,
        stats.avg,
        stats.max,
        has_preempt_rt(),
        is_root(),
    );

    // 50ms of lateness on a 1ms period means the sleep mechanism is
    // broken, not that the machine is busy.
    assert!(stats.max < Duration::from_millis(50));
}

#[test]
fn test_total_runtime_tracks_deadline_arithmetic() {
    let period = Duration::from_millis(2);
    let cycles: u32 = 100;

    let start = Instant::now();
    let mut timer = CycleTimer::starting_at(period, start);
    for _ in 0..cycles {
        timer.wait();
    }
    let elapsed = start.elapsed();

    // Deadlines accumulate from the start instant, so the total run
    // can never be shorter than cycles * period, and lateness in one
    // cycle must not stretch the schedule of the following ones.
    assert!(elapsed >= period * cycles);
    assert!(elapsed < period * cycles + Duration::from_millis(500));
}
