//! End-to-end run against the simulated transport: a dedicated bus
//! thread exchanges process data at a fast period while the test
//! thread ticks the sequencer at a coarser one, exactly the shape of
//! the production daemon.

use motion_common::MotionConfig;
use motion_fieldbus::{EthercatBus, SimulatedTransport};
use motion_runtime::{run_bus_loop, HostHooks, HostTransition, MotionModule};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

#[test]
fn test_threaded_run_to_completion() {
    let config = MotionConfig::default();
    let transport = SimulatedTransport::new(3, &config.bus.devices).with_on_target_after(4);
    let closes = transport.close_counter();
    let bus = EthercatBus::new(config.bus.clone(), Box::new(transport));
    let mut module = MotionModule::new(Arc::new(Mutex::new(bus)), &config);

    module.initialize().unwrap();
    module
        .on_enter_state(HostTransition::PreOpToSafeOp)
        .unwrap();
    module.on_enter_state(HostTransition::SafeOpToOp).unwrap();

    let quit = Arc::new(AtomicBool::new(false));
    let bus_handle = module.bus();
    let bus_thread = {
        let bus = bus_handle.clone();
        let quit = quit.clone();
        thread::spawn(move || run_bus_loop(&bus, &quit, Duration::from_millis(1)))
    };

    // Generous cap; the handshake needs on the order of ten ticks.
    let mut completed = false;
    for _ in 0..500 {
        module.on_cyclic_tick().unwrap();
        if module.is_complete() {
            completed = true;
            break;
        }
        thread::sleep(Duration::from_millis(3));
    }
    assert!(completed, "sequencer never reached STOPPED");

    quit.store(true, Ordering::Relaxed);
    bus_thread.join().unwrap().unwrap();

    module.on_enter_state(HostTransition::OpToSafeOp).unwrap();
    module
        .on_enter_state(HostTransition::SafeOpToPreOp)
        .unwrap();
    bus_handle.lock().unwrap().shut_down().unwrap();
    assert_eq!(closes.load(Ordering::SeqCst), 1);

    let stats = bus_handle.lock().unwrap().stats();
    assert!(stats.cycles > 0);
    assert_eq!(stats.wkc_errors, 0);
}
