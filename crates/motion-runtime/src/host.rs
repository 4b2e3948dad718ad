//! Host integration layer.
//!
//! [`HostHooks`] is the seam between the embedding application and the
//! motion logic: the host owns the bus lifecycle and the cyclic timer,
//! and calls in whenever the fieldbus changes state or a control period
//! elapses. [`MotionModule`] is the production implementation that
//! wires those callbacks to the bus handle and the mode sequencer.

use crate::sequencer::ModeSequencer;
use crate::BusShared;
use motion_common::{ModeState, MotionConfig, MotionError, MotionResult};
use tracing::{debug, info};

/// Fieldbus state transitions delivered to the host hooks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostTransition {
    /// Bring-up: enable process data exchange.
    PreOpToSafeOp,
    /// Bring-up: enable output writes.
    SafeOpToOp,
    /// Shutdown: outputs are no longer applied.
    OpToSafeOp,
    /// Shutdown: process data exchange stops.
    SafeOpToPreOp,
}

/// Callbacks invoked by the host around the cyclic loop.
pub trait HostHooks {
    /// Called when the fieldbus is about to change state.
    ///
    /// # Errors
    ///
    /// Propagates bus errors; a failed bring-up transition aborts the
    /// start sequence.
    fn on_enter_state(&mut self, transition: HostTransition) -> MotionResult<()>;

    /// Called once per control period while the bus is operational.
    ///
    /// # Errors
    ///
    /// Propagates bus or sequencing errors to the host loop.
    fn on_cyclic_tick(&mut self) -> MotionResult<()>;
}

/// Application module driving the stepper handshake over a shared bus.
pub struct MotionModule {
    shared: BusShared,
    sequencer: ModeSequencer,
}

impl MotionModule {
    /// Create a module over an already constructed (not yet started) bus.
    pub fn new(shared: BusShared, config: &MotionConfig) -> Self {
        Self {
            shared,
            sequencer: ModeSequencer::new(config.motion.clone()),
        }
    }

    /// Open the network device and configure the slave chain.
    ///
    /// Leaves the bus in PRE_OP; the host then walks the bring-up
    /// transitions through [`HostHooks::on_enter_state`].
    ///
    /// # Errors
    ///
    /// Propagates device and configuration failures from the bus.
    pub fn initialize(&mut self) -> MotionResult<()> {
        info!("Initializing motion module");
        self.lock()?.open_and_configure()
    }

    /// Current sequencer state.
    pub fn sequencer_state(&self) -> ModeState {
        self.sequencer.state()
    }

    /// True once the commanded move has completed.
    pub fn is_complete(&self) -> bool {
        self.sequencer.is_complete()
    }

    /// Shared handle to the bus, for spawning the exchange thread.
    pub fn bus(&self) -> BusShared {
        self.shared.clone()
    }

    fn lock(&self) -> MotionResult<std::sync::MutexGuard<'_, motion_fieldbus::EthercatBus>> {
        self.shared
            .lock()
            .map_err(|_| MotionError::Transport("bus lock poisoned".into()))
    }
}

impl HostHooks for MotionModule {
    fn on_enter_state(&mut self, transition: HostTransition) -> MotionResult<()> {
        debug!(?transition, "Host state transition");
        let mut bus = self.lock()?;
        match transition {
            HostTransition::PreOpToSafeOp => bus.enter_safe_op(),
            HostTransition::SafeOpToOp => bus.enter_operational(),
            HostTransition::OpToSafeOp => bus.leave_operational(),
            HostTransition::SafeOpToPreOp => bus.leave_safe_op(),
        }
    }

    fn on_cyclic_tick(&mut self) -> MotionResult<()> {
        // Lock through a cloned handle so the guard does not borrow
        // `self` while the sequencer needs it mutably.
        let shared = self.shared.clone();
        let mut bus = shared
            .lock()
            .map_err(|_| MotionError::Transport("bus lock poisoned".into()))?;
        let mut steppers = bus.steppers()?;
        self.sequencer.step(&mut steppers)?;
        Ok(())
    }
}
