use thiserror::Error;

/// Errors covering bus bring-up, device binding, and protocol-level
/// value checks.
///
/// Bring-up errors are fatal: the caller is expected to release the
/// network handle and abort startup. Value errors are rejected before
/// the process image is touched. A device that never confirms a
/// requested operating mode is deliberately *not* an error - the mode
/// sequencer simply stops progressing.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MotionError {
    /// The Ethernet device backing the fieldbus could not be opened.
    #[error("ethernet device unavailable: {interface}")]
    EthernetDeviceUnavailable {
        /// Network interface name.
        interface: String,
    },

    /// Slave configuration failed or the discovered slave count is wrong.
    #[error("bus configuration failed: found {found} slaves, expected {expected}")]
    ConfigurationFailed {
        /// Slaves discovered on the bus.
        found: usize,
        /// Slaves required by configuration.
        expected: usize,
    },

    /// Not all slaves reached SAFE_OP within the state timeout.
    #[error("not all slaves reached SAFE_OP")]
    SafeOperationalNotReached,

    /// Not all slaves reached OPERATIONAL within the state timeout.
    #[error("not all slaves reached OPERATIONAL")]
    OperationalNotReached,

    /// The configured device offset table does not match the number of
    /// stepper terminals discovered on the bus.
    #[error("device count mismatch: {configured} configured, {discovered} discovered")]
    DeviceCountMismatch {
        /// Offset pairs in the configuration.
        configured: usize,
        /// Stepper terminals reported by the transport.
        discovered: usize,
    },

    /// A device region does not fit inside the mapped process image.
    #[error("device {device} region at {offset:#06x} (len {len}) exceeds image size {image_len:#06x}")]
    RegionOutOfBounds {
        /// Device index.
        device: usize,
        /// Region base offset.
        offset: usize,
        /// Region length.
        len: usize,
        /// Mapped image size.
        image_len: usize,
    },

    /// Device accessors were requested before offsets were bound.
    #[error("device offsets not bound - bus has not reached OPERATIONAL")]
    DevicesUnbound,

    /// Target position exceeds the 24-bit payload range.
    #[error("position {value:#010x} out of range (max {max:#010x})")]
    PositionOutOfRange {
        /// Rejected value.
        value: u32,
        /// Largest accepted value.
        max: u32,
    },

    /// Transport-level failure reported by the bus backend.
    #[error("transport error: {0}")]
    Transport(String),

    /// Configuration or initialization error.
    #[error("configuration error: {0}")]
    Config(String),
}

/// Convenience alias for fallible motionctl operations.
pub type MotionResult<T> = Result<T, MotionError>;
