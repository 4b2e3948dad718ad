//! Process image layout and device offset binding.
//!
//! The process image is one contiguous byte buffer exchanged with the
//! bus every cycle. Each stepper terminal owns two fixed 12-byte regions
//! inside it: an output region (controller to device) and an input
//! region (device to controller). Region offsets are configuration data
//! and become valid only after [`DeviceMap::bind`] has checked them
//! against the mapped image size.

use motion_common::{DeviceOffsets, MotionError, MotionResult};

/// Byte and bit layout of one stepper device region.
///
/// Both the output and the input region use the same packed 12-byte
/// layout; the device mirrors the control byte back in its input region
/// and reports motion status in the status byte.
pub mod layout {
    /// Size of one device region in bytes.
    pub const REGION_LEN: usize = 12;

    /// Control/status byte 0 (mailbox mode flag, drive error flag).
    pub const STAT_CONT0: usize = 0;
    /// Velocity limit, u16 little-endian.
    pub const VELOCITY: usize = 2;
    /// Acceleration limit, u16 little-endian.
    pub const ACCELERATION: usize = 4;
    /// Target position, 24-bit little-endian.
    pub const POSITION: usize = 6;
    /// Control/status byte 3 (unused by this driver).
    pub const STAT_CONT3: usize = 9;
    /// Motion status byte (input region only carries meaning).
    pub const STATUS: usize = 10;
    /// Control byte with the enable/stop/start and mode-request bits.
    pub const CONTROL: usize = 11;

    /// Largest representable target position (24-bit payload).
    pub const MAX_POSITION: u32 = 0x00FF_FFFF;

    /// Control byte: axis enable.
    pub const CTL_ENABLE: u8 = 1 << 0;
    /// Control byte: inverted stop (1 = not stopped).
    pub const CTL_STOP2_N: u8 = 1 << 1;
    /// Control byte: start motion.
    pub const CTL_START: u8 = 1 << 2;
    /// Control byte: request positioning mode.
    pub const CTL_M_POSITIONING: u8 = 1 << 3;
    /// Control byte: request program mode.
    pub const CTL_M_PROGRAM: u8 = 1 << 4;
    /// Control byte: request reference-run mode.
    pub const CTL_M_REFERENCE: u8 = 1 << 5;
    /// Control byte: request jog mode.
    pub const CTL_M_JOG: u8 = 1 << 6;
    /// Control byte: request drive-by-mailbox mode.
    pub const CTL_M_DRIVE_BY_MBX: u8 = 1 << 7;

    /// Status byte: commanded position reached.
    pub const STA_ON_TARGET: u8 = 1 << 0;
    /// Status byte: axis busy.
    pub const STA_BUSY: u8 = 1 << 1;
    /// Status byte: axis at standstill.
    pub const STA_STANDSTILL: u8 = 1 << 2;
    /// Status byte: axis at commanded speed.
    pub const STA_ON_SPEED: u8 = 1 << 3;
    /// Status byte: direction of travel.
    pub const STA_DIRECTION: u8 = 1 << 4;
    /// Status byte: reference position valid.
    pub const STA_REFERENCE_OK: u8 = 1 << 5;
    /// Status byte: precalculation acknowledge.
    pub const STA_PRECALC_ACK: u8 = 1 << 6;
    /// Status byte: motion error.
    pub const STA_ERROR: u8 = 1 << 7;

    /// Byte 0: mailbox mode active.
    pub const S0_MBX_MODE: u8 = 1 << 5;
    /// Byte 0: drive error (read-only).
    pub const S0_ERROR: u8 = 1 << 6;
}

/// The shared process-data buffer.
///
/// Allocated once when the bus reports its mapped image size,
/// zero-initialized, and owned for the process lifetime. All access
/// happens while the bus lock is held; the raw accessors below are
/// bounds-tolerant and never panic on a short buffer.
#[derive(Debug, Default)]
pub struct ProcessImage {
    buf: Vec<u8>,
}

impl ProcessImage {
    /// Create a zero-initialized image of the given size.
    pub fn new(size: usize) -> Self {
        Self { buf: vec![0; size] }
    }

    /// Total image size in bytes.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// True if no image has been mapped yet.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Borrow the raw buffer.
    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    /// Borrow the raw buffer mutably (for the transport exchange).
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.buf
    }

    /// Read a byte at the given offset.
    pub fn read_u8(&self, offset: usize) -> Option<u8> {
        self.buf.get(offset).copied()
    }

    /// Read a u16 (little-endian).
    pub fn read_u16(&self, offset: usize) -> Option<u16> {
        if offset + 2 <= self.buf.len() {
            Some(u16::from_le_bytes([self.buf[offset], self.buf[offset + 1]]))
        } else {
            None
        }
    }

    /// Read a 24-bit value (little-endian) widened to u32.
    pub fn read_u24(&self, offset: usize) -> Option<u32> {
        if offset + 3 <= self.buf.len() {
            Some(u32::from_le_bytes([
                self.buf[offset],
                self.buf[offset + 1],
                self.buf[offset + 2],
                0,
            ]))
        } else {
            None
        }
    }

    /// Write a byte. Out-of-range offsets are ignored.
    pub fn write_u8(&mut self, offset: usize, value: u8) {
        if let Some(b) = self.buf.get_mut(offset) {
            *b = value;
        }
    }

    /// Write a u16 (little-endian).
    pub fn write_u16(&mut self, offset: usize, value: u16) {
        if offset + 2 <= self.buf.len() {
            self.buf[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
        }
    }

    /// Write the low 24 bits of a u32 (little-endian, low byte first).
    pub fn write_u24(&mut self, offset: usize, value: u32) {
        if offset + 3 <= self.buf.len() {
            let bytes = value.to_le_bytes();
            self.buf[offset..offset + 3].copy_from_slice(&bytes[..3]);
        }
    }

    /// Set bits in a byte (read-modify-write OR).
    pub fn set_bits(&mut self, offset: usize, mask: u8) {
        if let Some(b) = self.buf.get_mut(offset) {
            *b |= mask;
        }
    }

    /// Clear bits in a byte (read-modify-write AND-NOT).
    pub fn clear_bits(&mut self, offset: usize, mask: u8) {
        if let Some(b) = self.buf.get_mut(offset) {
            *b &= !mask;
        }
    }
}

/// Validated device-region offset table.
///
/// Bound exactly once, after the bus has mapped the process image and
/// reported its final size. Until then, no accessor exists, so nothing
/// can silently address offset 0. Bounds are checked here so the
/// per-field accessors in the stepper driver stay infallible.
#[derive(Debug, Clone)]
pub struct DeviceMap {
    devices: Vec<DeviceOffsets>,
}

impl DeviceMap {
    /// Validate the configured offset pairs against the mapped image.
    ///
    /// `discovered` is the number of stepper terminals the transport
    /// identified on the bus; `None` means the transport cannot
    /// classify slaves and the count check is skipped.
    ///
    /// # Errors
    ///
    /// [`MotionError::DeviceCountMismatch`] if the discovered stepper
    /// count differs from the configured pair count, and
    /// [`MotionError::RegionOutOfBounds`] if any region does not fit
    /// inside the image.
    pub fn bind(
        devices: &[DeviceOffsets],
        image_len: usize,
        discovered: Option<usize>,
    ) -> MotionResult<Self> {
        if let Some(found) = discovered {
            if found != devices.len() {
                return Err(MotionError::DeviceCountMismatch {
                    configured: devices.len(),
                    discovered: found,
                });
            }
        }

        for (index, dev) in devices.iter().enumerate() {
            for offset in [dev.output, dev.input] {
                if offset + layout::REGION_LEN > image_len {
                    return Err(MotionError::RegionOutOfBounds {
                        device: index,
                        offset,
                        len: layout::REGION_LEN,
                        image_len,
                    });
                }
            }
        }

        Ok(Self {
            devices: devices.to_vec(),
        })
    }

    /// Number of bound devices.
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    /// True if no devices are bound.
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Base offset of device `index`'s output region.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of range; callers iterate `0..len()`.
    pub fn output(&self, index: usize) -> usize {
        self.devices[index].output
    }

    /// Base offset of device `index`'s input region.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of range; callers iterate `0..len()`.
    pub fn input(&self, index: usize) -> usize {
        self.devices[index].input
    }
}
