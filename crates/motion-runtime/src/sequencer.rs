//! Device mode sequencer.
//!
//! Drives every attached stepper through the vendor handshake in
//! lock-step: terminate whatever mode is active, enter setup, request
//! positioning, command the move, then wait for the reference device to
//! report on-target. One state is executed per invocation; the confirm
//! states re-poll until every device answers, with no timeout, so an
//! unresponsive device stalls the whole group rather than erroring.

use motion_common::{ModeState, MotionError, MotionResult, MotionTargets};
use motion_fieldbus::Steppers;
use tracing::{info, warn};

/// The mode state machine, advanced once per control period.
///
/// All state lives here, so the machine is restartable and can be
/// driven in isolation against any image the caller provides.
#[derive(Debug)]
pub struct ModeSequencer {
    state: ModeState,
    last_logged: Option<ModeState>,
    targets: MotionTargets,
}

impl ModeSequencer {
    /// Create a sequencer that will command the given targets.
    pub fn new(targets: MotionTargets) -> Self {
        Self {
            state: ModeState::TerminateMode,
            last_logged: None,
            targets,
        }
    }

    /// Current state.
    pub fn state(&self) -> ModeState {
        self.state
    }

    /// True once the commanded move has been confirmed complete.
    pub fn is_complete(&self) -> bool {
        self.state.is_terminal()
    }

    /// Restart the handshake from the beginning.
    pub fn reset(&mut self) {
        self.state = ModeState::TerminateMode;
        self.last_logged = None;
    }

    /// Execute one step against the bound devices.
    ///
    /// Returns the state after the step. Must be called with the bus
    /// lock held; reads see the inputs of the latest exchange and
    /// writes go out with the next one.
    ///
    /// # Errors
    ///
    /// [`MotionError::Config`] if the configured reference device is
    /// not among the bound devices, and
    /// [`MotionError::PositionOutOfRange`] if the configured move
    /// target does not fit the 24-bit payload.
    pub fn step(&mut self, steppers: &mut Steppers<'_>) -> MotionResult<ModeState> {
        if self.last_logged != Some(self.state) {
            info!(state = %self.state, "Mode sequencer");
            self.last_logged = Some(self.state);
        }

        let count = steppers.count();
        if self.targets.reference_device >= count {
            return Err(MotionError::Config(format!(
                "reference device {} does not exist, {} devices bound",
                self.targets.reference_device, count
            )));
        }
        match self.state {
            ModeState::TerminateMode => {
                for dev in 0..count {
                    steppers.terminate(dev);
                }
                self.state = ModeState::ConfirmTerminate;
            }
            ModeState::ConfirmTerminate => {
                if (0..count).all(|dev| steppers.confirm_terminated(dev)) {
                    self.state = ModeState::SetupMode;
                }
            }
            ModeState::SetupMode => {
                for dev in 0..count {
                    steppers.enter_setup(dev);
                }
                self.state = ModeState::ConfirmSetup;
            }
            ModeState::ConfirmSetup => {
                if (0..count).all(|dev| steppers.confirm_setup(dev)) {
                    self.state = ModeState::PositioningMode;
                }
            }
            ModeState::PositioningMode => {
                for dev in 0..count {
                    steppers.request_positioning(dev);
                }
                self.state = ModeState::ConfirmPositioning;
            }
            ModeState::ConfirmPositioning => {
                if (0..count).all(|dev| steppers.confirm_positioning(dev)) {
                    self.state = ModeState::SetPosition;
                }
            }
            ModeState::SetPosition => {
                for dev in 0..count {
                    steppers.set_acceleration_limit(dev, self.targets.acceleration_limit);
                    steppers.set_velocity_limit(dev, self.targets.velocity_limit);
                    steppers.set_target_position(dev, self.targets.move_target)?;
                    if steppers.drive_error(dev) {
                        warn!(
                            device = dev,
                            control = steppers.commanded_control(dev),
                            "Drive error flagged before start"
                        );
                    }
                    steppers.start_motion(dev);
                }
                self.state = ModeState::CheckPosition;
            }
            ModeState::CheckPosition => {
                let reference = self.targets.reference_device;
                if reference < count && steppers.on_target(reference) {
                    info!(
                        target = self.targets.move_target,
                        "Reference device on target, move complete"
                    );
                    self.state = ModeState::Stopped;
                }
            }
            ModeState::Stopped => {}
        }

        Ok(self.state)
    }
}
