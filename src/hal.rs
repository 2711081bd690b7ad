//! Hardware capabilities the firmware core depends on.
//!
//! The core never touches registers or buses directly. Board support code (or the
//! [`crate::sim`] module on a host) provides these traits.

use crate::error::HalError;

/// Full-scale duty value for the 10-bit PWM peripheral.
pub const PWM_MAX_DUTY: u16 = 1023;

pub trait DigitalOutput {
    fn set_level(&mut self, high: bool) -> Result<(), HalError>;
}

pub trait DigitalInput {
    fn is_high(&mut self) -> Result<bool, HalError>;
}

pub trait AnalogInput {
    /// Raw ADC count (12-bit on the reference board).
    fn read_raw(&mut self) -> Result<u16, HalError>;
}

pub trait PwmOutput {
    fn set_duty(&mut self, duty: u16) -> Result<(), HalError>;
    fn set_frequency(&mut self, hz: u32) -> Result<(), HalError>;
}

/// Combined temperature/humidity sensor on a single-wire bus.
pub trait HumiditySensor {
    /// Returns `(temperature_c, relative_humidity_pct)`.
    fn measure(&mut self) -> Result<(f32, f32), HalError>;
}

/// Small monochrome text panel. Text is buffered until [`TextDisplay::flush`].
pub trait TextDisplay {
    fn clear(&mut self);
    fn text(&mut self, text: &str, x: i32, y: i32);
    fn flush(&mut self) -> Result<(), HalError>;
}
