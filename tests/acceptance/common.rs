//! Common utilities for acceptance tests.

#![allow(dead_code)] // Not every helper is used by every test file

use motion_common::MotionConfig;
use motion_fieldbus::{EthercatBus, SimulatedTransport};
use motion_runtime::MotionModule;
use std::fs;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Summary of per-cycle lateness over a timing run.
#[derive(Debug, Clone, Default)]
pub struct TimingStats {
    /// Smallest observed lateness.
    pub min: Duration,
    /// Mean lateness.
    pub avg: Duration,
    /// Largest observed lateness.
    pub max: Duration,
    /// Number of samples taken.
    pub samples: u64,
}

impl TimingStats {
    /// Compute stats from raw lateness samples.
    pub fn from_samples(samples: &[Duration]) -> Self {
        if samples.is_empty() {
            return Self::default();
        }
        let total: Duration = samples.iter().sum();
        Self {
            min: samples.iter().copied().min().unwrap_or_default(),
            avg: total / samples.len() as u32,
            max: samples.iter().copied().max().unwrap_or_default(),
            samples: samples.len() as u64,
        }
    }
}

/// Check if the system runs a PREEMPT_RT kernel.
pub fn has_preempt_rt() -> bool {
    fs::read_to_string("/proc/version")
        .map(|v| v.contains("PREEMPT_RT") || v.contains("PREEMPT RT"))
        .unwrap_or(false)
}

/// Check if running as root.
#[cfg(unix)]
pub fn is_root() -> bool {
    // SAFETY: geteuid has no preconditions
    unsafe { libc::geteuid() == 0 }
}

#[cfg(not(unix))]
pub fn is_root() -> bool {
    false
}

/// Build a motion module over a simulated three-terminal rig.
pub fn simulated_module(config: &MotionConfig) -> MotionModule {
    let transport = SimulatedTransport::new(config.bus.devices.len(), &config.bus.devices)
        .with_on_target_after(3);
    let bus = EthercatBus::new(config.bus.clone(), Box::new(transport));
    MotionModule::new(Arc::new(Mutex::new(bus)), config)
}
