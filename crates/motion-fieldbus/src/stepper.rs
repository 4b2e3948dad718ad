//! Stepper terminal protocol driver.
//!
//! Pure field-level reads and writes against one device's regions in
//! the process image. Commands touch only the output region and
//! confirmations read only the input region: the device acknowledges a
//! command on the next exchange cycle at the earliest, so the two must
//! never be conflated.

use crate::image::{layout, DeviceMap, ProcessImage};
use motion_common::{MotionError, MotionResult};

/// Decoded motion status bits from a device's input region.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MotionStatus {
    /// Commanded position reached.
    pub on_target: bool,
    /// Axis busy executing a command.
    pub busy: bool,
    /// Axis at standstill.
    pub standstill: bool,
    /// Axis at commanded speed.
    pub on_speed: bool,
    /// Direction of travel (1 = negative).
    pub direction: bool,
    /// Reference position valid.
    pub reference_ok: bool,
    /// Precalculation acknowledged.
    pub precalc_ack: bool,
    /// Motion error reported.
    pub error: bool,
}

/// Borrowed driver view over the process image and bound device map.
///
/// Constructed per access while the bus lock is held; holds no state of
/// its own.
#[derive(Debug)]
pub struct Steppers<'a> {
    image: &'a mut ProcessImage,
    map: &'a DeviceMap,
}

impl<'a> Steppers<'a> {
    /// Create a driver view over a bound image.
    pub fn new(image: &'a mut ProcessImage, map: &'a DeviceMap) -> Self {
        Self { image, map }
    }

    /// Number of addressable devices.
    pub fn count(&self) -> usize {
        self.map.len()
    }

    fn out_byte(&self, device: usize, field: usize) -> u8 {
        self.image
            .read_u8(self.map.output(device) + field)
            .unwrap_or(0)
    }

    fn in_byte(&self, device: usize, field: usize) -> u8 {
        self.image
            .read_u8(self.map.input(device) + field)
            .unwrap_or(0)
    }

    /// Clear enable, stop and start. Always succeeds.
    pub fn terminate(&mut self, device: usize) {
        self.image.clear_bits(
            self.map.output(device) + layout::CONTROL,
            layout::CTL_ENABLE | layout::CTL_STOP2_N | layout::CTL_START,
        );
    }

    /// True iff the device reports enable, stop and start all clear.
    pub fn confirm_terminated(&self, device: usize) -> bool {
        let control = self.in_byte(device, layout::CONTROL);
        control & (layout::CTL_ENABLE | layout::CTL_STOP2_N | layout::CTL_START) == 0
    }

    /// Command setup: enable on, stop released, start clear.
    pub fn enter_setup(&mut self, device: usize) {
        let offset = self.map.output(device) + layout::CONTROL;
        self.image
            .set_bits(offset, layout::CTL_ENABLE | layout::CTL_STOP2_N);
        self.image.clear_bits(offset, layout::CTL_START);
    }

    /// True iff the device mirrors exactly the setup pattern.
    pub fn confirm_setup(&self, device: usize) -> bool {
        let control = self.in_byte(device, layout::CONTROL);
        let mask = layout::CTL_ENABLE | layout::CTL_STOP2_N | layout::CTL_START;
        control & mask == (layout::CTL_ENABLE | layout::CTL_STOP2_N)
    }

    /// Request positioning mode.
    pub fn request_positioning(&mut self, device: usize) {
        self.image.set_bits(
            self.map.output(device) + layout::CONTROL,
            layout::CTL_M_POSITIONING,
        );
    }

    /// True iff the device reports positioning mode active.
    pub fn confirm_positioning(&self, device: usize) -> bool {
        self.in_byte(device, layout::CONTROL) & layout::CTL_M_POSITIONING != 0
    }

    /// Write the velocity limit field.
    pub fn set_velocity_limit(&mut self, device: usize, velocity: u16) {
        self.image
            .write_u16(self.map.output(device) + layout::VELOCITY, velocity);
    }

    /// Write the acceleration limit field.
    pub fn set_acceleration_limit(&mut self, device: usize, acceleration: u16) {
        self.image
            .write_u16(self.map.output(device) + layout::ACCELERATION, acceleration);
    }

    /// Write the absolute target position, low byte first.
    ///
    /// # Errors
    ///
    /// [`MotionError::PositionOutOfRange`] if the value exceeds the
    /// 24-bit payload; the buffer is left untouched.
    pub fn set_target_position(&mut self, device: usize, position: u32) -> MotionResult<()> {
        if position > layout::MAX_POSITION {
            return Err(MotionError::PositionOutOfRange {
                value: position,
                max: layout::MAX_POSITION,
            });
        }
        self.image
            .write_u24(self.map.output(device) + layout::POSITION, position);
        Ok(())
    }

    /// Read back the commanded target position.
    pub fn target_position(&self, device: usize) -> u32 {
        self.image
            .read_u24(self.map.output(device) + layout::POSITION)
            .unwrap_or(0)
    }

    /// Set the start bit to begin the commanded move.
    pub fn start_motion(&mut self, device: usize) {
        self.image
            .set_bits(self.map.output(device) + layout::CONTROL, layout::CTL_START);
    }

    /// True iff the device reports the commanded position reached.
    pub fn on_target(&self, device: usize) -> bool {
        self.in_byte(device, layout::STATUS) & layout::STA_ON_TARGET != 0
    }

    /// Decode the full motion status byte of a device.
    pub fn motion_status(&self, device: usize) -> MotionStatus {
        let status = self.in_byte(device, layout::STATUS);
        MotionStatus {
            on_target: status & layout::STA_ON_TARGET != 0,
            busy: status & layout::STA_BUSY != 0,
            standstill: status & layout::STA_STANDSTILL != 0,
            on_speed: status & layout::STA_ON_SPEED != 0,
            direction: status & layout::STA_DIRECTION != 0,
            reference_ok: status & layout::STA_REFERENCE_OK != 0,
            precalc_ack: status & layout::STA_PRECALC_ACK != 0,
            error: status & layout::STA_ERROR != 0,
        }
    }

    /// True iff the device flags a drive error in status byte 0.
    pub fn drive_error(&self, device: usize) -> bool {
        self.in_byte(device, layout::STAT_CONT0) & layout::S0_ERROR != 0
    }

    /// Current commanded control byte (for logging).
    pub fn commanded_control(&self, device: usize) -> u8 {
        self.out_byte(device, layout::CONTROL)
    }
}
