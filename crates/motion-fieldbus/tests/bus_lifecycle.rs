//! Bus lifecycle integration tests over the simulated transport.
//!
//! Runs the full bring-up, a complete manual mode handshake against the
//! simulated echo (terminate, setup, positioning, move, on-target), and
//! the reverse shutdown path, the way the daemon threads drive it.

use motion_common::{BusConfig, DeviceOffsets, MotionError};
use motion_fieldbus::{BusState, EthercatBus, SimulatedTransport};
use std::sync::atomic::Ordering;

fn bring_up(slaves: usize, config: &BusConfig) -> EthercatBus {
    let transport = SimulatedTransport::new(slaves, &config.devices).with_on_target_after(3);
    let mut bus = EthercatBus::new(config.clone(), Box::new(transport));
    bus.start().unwrap();
    bus
}

#[test]
fn full_handshake_against_echo() {
    let config = BusConfig::default();
    let mut bus = bring_up(3, &config);
    let count = bus.steppers().unwrap().count();
    assert_eq!(count, 3);

    // Terminate, then confirm after one exchange
    for dev in 0..count {
        bus.steppers().unwrap().terminate(dev);
    }
    bus.exchange().unwrap();
    for dev in 0..count {
        assert!(bus.steppers().unwrap().confirm_terminated(dev));
    }

    // Setup
    for dev in 0..count {
        bus.steppers().unwrap().enter_setup(dev);
    }
    assert!(!bus.steppers().unwrap().confirm_setup(0), "no echo yet");
    bus.exchange().unwrap();
    for dev in 0..count {
        assert!(bus.steppers().unwrap().confirm_setup(dev));
    }

    // Positioning mode
    for dev in 0..count {
        bus.steppers().unwrap().request_positioning(dev);
    }
    bus.exchange().unwrap();
    for dev in 0..count {
        assert!(bus.steppers().unwrap().confirm_positioning(dev));
    }

    // Command the move
    for dev in 0..count {
        let mut steppers = bus.steppers().unwrap();
        steppers.set_velocity_limit(dev, 5000);
        steppers.set_acceleration_limit(dev, 5000);
        steppers.set_target_position(dev, 1000).unwrap();
        steppers.start_motion(dev);
    }

    // The simulated axis is busy for two exchanges, on target after three
    bus.exchange().unwrap();
    assert!(!bus.steppers().unwrap().on_target(0));
    assert!(bus.steppers().unwrap().motion_status(0).busy);

    bus.exchange().unwrap();
    bus.exchange().unwrap();
    let steppers = bus.steppers().unwrap();
    assert!(steppers.on_target(0));
    assert!(steppers.motion_status(0).standstill);
}

#[test]
fn wkc_matches_across_bring_up_and_run() {
    let config = BusConfig::default();
    let mut bus = bring_up(3, &config);

    for _ in 0..10 {
        let wkc = bus.exchange().unwrap();
        assert_eq!(wkc, bus.expected_wkc());
    }
    let stats = bus.stats();
    assert_eq!(stats.wkc_errors, 0);
    assert!(stats.cycles >= 10);
}

#[test]
fn muted_device_stalls_confirmation_only() {
    let config = BusConfig::default();
    let mut transport = SimulatedTransport::new(3, &config.devices);
    transport.mute_device(1);
    let mut bus = EthercatBus::new(config, Box::new(transport));
    bus.start().unwrap();

    for dev in 0..3 {
        bus.steppers().unwrap().enter_setup(dev);
    }
    bus.exchange().unwrap();

    let steppers = bus.steppers().unwrap();
    assert!(steppers.confirm_setup(0));
    assert!(!steppers.confirm_setup(1), "muted device never confirms");
    assert!(steppers.confirm_setup(2));
}

#[test]
fn bring_up_rejects_misfitting_offsets() {
    // Input region deliberately past the simulated image end
    let devices = vec![DeviceOffsets {
        output: 0x0000,
        input: 0x0010,
    }];
    let mut config = BusConfig::default();
    config.devices = vec![DeviceOffsets {
        output: 0x0000,
        input: 0x0100,
    }];

    let transport = SimulatedTransport::new(1, &devices);
    let mut bus = EthercatBus::new(config, Box::new(transport));
    assert!(matches!(
        bus.start().unwrap_err(),
        MotionError::RegionOutOfBounds { device: 0, .. }
    ));
}

#[test]
fn shutdown_after_run_releases_handle_once() {
    let config = BusConfig::default();
    let transport = SimulatedTransport::new(3, &config.devices);
    let closes = transport.close_counter();
    let mut bus = EthercatBus::new(config, Box::new(transport));

    bus.start().unwrap();
    for _ in 0..5 {
        bus.exchange().unwrap();
    }
    bus.shut_down().unwrap();
    bus.shut_down().unwrap();

    assert_eq!(bus.state(), BusState::Offline);
    assert_eq!(closes.load(Ordering::SeqCst), 1);
}
