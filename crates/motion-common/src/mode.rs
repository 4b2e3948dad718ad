//! Operating-mode states for the stepper terminals.
//!
//! All attached devices are driven in lock-step through the vendor
//! handshake: terminate whatever mode is active, select setup mode,
//! select positioning mode, command a move, wait for arrival. Every
//! "set" state is followed by a "confirm" state because a device
//! acknowledges a mode change only on the next bus exchange - fusing
//! them would race the hardware.

use serde::{Deserialize, Serialize};
use std::fmt;

/// States of the device mode sequencer.
///
/// The `Confirm*` states and `CheckPosition` re-poll until every device
/// (or the reference device, for `CheckPosition`) reports the expected
/// feedback; there is no timeout. `Stopped` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ModeState {
    /// Clear enable/stop/start on every device.
    #[default]
    TerminateMode,
    /// Wait for every device to report all three bits clear.
    ConfirmTerminate,
    /// Raise enable and stop on every device.
    SetupMode,
    /// Wait for every device to mirror the setup pattern.
    ConfirmSetup,
    /// Request positioning mode on every device.
    PositioningMode,
    /// Wait for every device to report positioning mode active.
    ConfirmPositioning,
    /// Write limits and target, then start the move.
    SetPosition,
    /// Poll the reference device's on-target bit.
    CheckPosition,
    /// Move confirmed complete.
    Stopped,
}

impl fmt::Display for ModeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TerminateMode => write!(f, "TERMINATE_MODE"),
            Self::ConfirmTerminate => write!(f, "CONFIRM_TERMINATE"),
            Self::SetupMode => write!(f, "SETUP_MODE"),
            Self::ConfirmSetup => write!(f, "CONFIRM_SETUP"),
            Self::PositioningMode => write!(f, "POSITIONING_MODE"),
            Self::ConfirmPositioning => write!(f, "CONFIRM_POSITIONING"),
            Self::SetPosition => write!(f, "SET_POSITION"),
            Self::CheckPosition => write!(f, "CHECK_POSITION"),
            Self::Stopped => write!(f, "STOPPED"),
        }
    }
}

impl ModeState {
    /// Returns true once the commanded move has completed.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Stopped)
    }

    /// Returns true for the states that re-poll device feedback and may
    /// legitimately be observed more than once.
    #[must_use]
    pub fn is_polling(&self) -> bool {
        matches!(
            self,
            Self::ConfirmTerminate
                | Self::ConfirmSetup
                | Self::ConfirmPositioning
                | Self::CheckPosition
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_names() {
        assert_eq!(ModeState::TerminateMode.to_string(), "TERMINATE_MODE");
        assert_eq!(ModeState::Stopped.to_string(), "STOPPED");
    }

    #[test]
    fn test_terminal_and_polling() {
        assert!(ModeState::Stopped.is_terminal());
        assert!(!ModeState::CheckPosition.is_terminal());

        assert!(ModeState::ConfirmSetup.is_polling());
        assert!(ModeState::CheckPosition.is_polling());
        assert!(!ModeState::SetPosition.is_polling());
    }
}
