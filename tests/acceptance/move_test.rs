//! End-to-end move acceptance test.
//!
//! Drives a TOML-configured rig from bring-up through a completed
//! positioning move and a staged shutdown, with the exchange loop on
//! its own thread, matching the production daemon's shape.

use super::common::simulated_module;
use motion_common::{ModeState, MotionConfig};
use motion_runtime::{run_bus_loop, HostHooks, HostTransition};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const RIG_CONFIG: &str = r#"
cycle_time = "1ms"
sequencer_period = "3ms"

[bus]
expected_slaves = 3

[[bus.devices]]
output = 0x0005
input = 0x0030

[[bus.devices]]
output = 0x0011
input = 0x003c

[[bus.devices]]
output = 0x001d
input = 0x0048

[motion]
move_target = 180000
velocity_limit = 4500
acceleration_limit = 2500
reference_device = 1
"#;

#[test]
fn test_configured_move_runs_to_completion() {
    let config = MotionConfig::from_toml(RIG_CONFIG).unwrap();
    let mut module = simulated_module(&config);

    module.initialize().unwrap();
    module
        .on_enter_state(HostTransition::PreOpToSafeOp)
        .unwrap();
    module.on_enter_state(HostTransition::SafeOpToOp).unwrap();

    let quit = Arc::new(AtomicBool::new(false));
    let bus_thread = {
        let bus = module.bus();
        let quit = Arc::clone(&quit);
        let period = config.cycle_time;
        thread::spawn(move || run_bus_loop(&bus, &quit, period))
    };

    let mut completed = false;
    for _ in 0..500 {
        module.on_cyclic_tick().unwrap();
        if module.is_complete() {
            completed = true;
            break;
        }
        thread::sleep(config.sequencer_period);
    }
    assert!(completed, "move never completed");
    assert_eq!(module.sequencer_state(), ModeState::Stopped);

    quit.store(true, Ordering::Relaxed);
    bus_thread.join().unwrap().unwrap();

    // The configured targets went out to every device.
    {
        let handle = module.bus();
        let mut bus = handle.lock().unwrap();
        let steppers = bus.steppers().unwrap();
        for dev in 0..steppers.count() {
            assert_eq!(steppers.target_position(dev), 180_000);
        }
    }

    module.on_enter_state(HostTransition::OpToSafeOp).unwrap();
    module
        .on_enter_state(HostTransition::SafeOpToPreOp)
        .unwrap();
    module.bus().lock().unwrap().shut_down().unwrap();

    let stats = module.bus().lock().unwrap().stats();
    assert!(stats.cycles > 0);
    assert_eq!(stats.wkc_errors, 0);
}

#[test]
fn test_shutdown_mid_handshake_is_clean() {
    let config = MotionConfig::default();
    let mut module = simulated_module(&config);

    module.initialize().unwrap();
    module
        .on_enter_state(HostTransition::PreOpToSafeOp)
        .unwrap();
    module.on_enter_state(HostTransition::SafeOpToOp).unwrap();

    // A couple of ticks, nowhere near completion.
    for _ in 0..2 {
        module.bus().lock().unwrap().exchange().unwrap();
        module.on_cyclic_tick().unwrap();
    }
    assert!(!module.is_complete());

    module.on_enter_state(HostTransition::OpToSafeOp).unwrap();
    module
        .on_enter_state(HostTransition::SafeOpToPreOp)
        .unwrap();
    module.bus().lock().unwrap().shut_down().unwrap();
    // Shutting down again is a no-op, not a double release.
    module.bus().lock().unwrap().shut_down().unwrap();
}
