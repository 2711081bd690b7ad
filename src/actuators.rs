use crate::clock::Clock;
use crate::error::HalError;
use crate::hal::{DigitalOutput, PwmOutput, PWM_MAX_DUTY};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use static_assertions::const_assert;
use std::time::Duration;
use tracing::{error, info};

pub const SERVO_MAX_ANGLE: u8 = 180;
pub const SERVO_DEFAULT_ANGLE: u8 = 90;
pub const BUZZER_MAX_PERCENT: u8 = 100;
pub const RGB_MAX: u8 = 255;

// 50 Hz servo frame: 0.5 ms .. 2.5 ms pulse on a 10-bit duty scale
pub const SERVO_MIN_DUTY: u16 = 26;
pub const SERVO_MAX_DUTY: u16 = 123;
pub const SERVO_FREQUENCY_HZ: u32 = 50;
pub const BUZZER_TONE_HZ: u32 = 1000;

const CHIRP_DUTY: u16 = 512;
const CHIRP_LENGTH: Duration = Duration::from_millis(200);

const_assert!(SERVO_MIN_DUTY < SERVO_MAX_DUTY);
const_assert!(SERVO_MAX_DUTY <= PWM_MAX_DUTY);
const_assert!(CHIRP_DUTY <= PWM_MAX_DUTY);

/// Commanded actuator positions. Every field is kept inside its clamped range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActuatorState {
    #[serde(rename = "servo-angle")]
    pub servo_angle: u8,
    #[serde(serialize_with = "relay_as_flag", deserialize_with = "relay_from_flag")]
    pub relay: bool,
    pub buzzer: u8,
    #[serde(rename = "rgb-red")]
    pub red: u8,
    #[serde(rename = "rgb-green")]
    pub green: u8,
    #[serde(rename = "rgb-blue")]
    pub blue: u8,
}

impl Default for ActuatorState {
    fn default() -> Self {
        Self {
            servo_angle: SERVO_DEFAULT_ANGLE,
            relay: false,
            buzzer: 0,
            red: 0,
            green: 0,
            blue: 0,
        }
    }
}

fn relay_as_flag<S: Serializer>(on: &bool, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u8(u8::from(*on))
}

fn relay_from_flag<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    Ok(u8::deserialize(deserializer)? != 0)
}

/// Rounds a commanded value and clamps it into `0..=max`.
pub fn clamp_round(value: f64, max: u8) -> u8 {
    value.round().clamp(0.0, f64::from(max)) as u8
}

pub fn servo_duty(angle: u8) -> u16 {
    let angle = angle.min(SERVO_MAX_ANGLE);
    let span = f32::from(SERVO_MAX_DUTY - SERVO_MIN_DUTY);
    SERVO_MIN_DUTY + (f32::from(angle) / f32::from(SERVO_MAX_ANGLE) * span) as u16
}

pub fn buzzer_duty(percent: u8) -> u16 {
    let percent = percent.min(BUZZER_MAX_PERCENT);
    (f32::from(percent) / f32::from(BUZZER_MAX_PERCENT) * f32::from(PWM_MAX_DUTY)) as u16
}

pub fn color_duty(level: u8) -> u16 {
    (f32::from(level) / f32::from(RGB_MAX) * f32::from(PWM_MAX_DUTY)) as u16
}

/// Physical outputs driven from [`ActuatorState`].
pub struct ActuatorBank {
    servo: Box<dyn PwmOutput>,
    relay: Box<dyn DigitalOutput>,
    buzzer: Box<dyn PwmOutput>,
    rgb: [Box<dyn PwmOutput>; 3],
}

impl ActuatorBank {
    pub fn new(
        servo: Box<dyn PwmOutput>,
        relay: Box<dyn DigitalOutput>,
        buzzer: Box<dyn PwmOutput>,
        rgb: [Box<dyn PwmOutput>; 3],
    ) -> Self {
        Self {
            servo,
            relay,
            buzzer,
            rgb,
        }
    }

    /// Drives every output to match `state`. Used at power-up.
    pub fn apply_all(&mut self, state: &ActuatorState) -> Result<(), HalError> {
        self.servo.set_frequency(SERVO_FREQUENCY_HZ)?;
        self.drive_servo(state.servo_angle)?;
        self.drive_relay(state.relay)?;
        self.drive_buzzer(state.buzzer)?;
        self.drive_rgb(state)?;
        Ok(())
    }

    pub fn drive_servo(&mut self, angle: u8) -> Result<u16, HalError> {
        let duty = servo_duty(angle);
        self.servo.set_duty(duty)?;
        info!("🔄 servo angle set to {}° (duty={})", angle.min(SERVO_MAX_ANGLE), duty);
        Ok(duty)
    }

    pub fn drive_relay(&mut self, on: bool) -> Result<(), HalError> {
        self.relay.set_level(on)?;
        info!("🔄 relay set to {}", u8::from(on));
        Ok(())
    }

    pub fn drive_buzzer(&mut self, percent: u8) -> Result<u16, HalError> {
        let duty = buzzer_duty(percent);
        if duty == 0 {
            self.buzzer.set_duty(0)?;
            info!("🔄 buzzer turned off");
        } else {
            self.buzzer.set_frequency(BUZZER_TONE_HZ)?;
            self.buzzer.set_duty(duty)?;
            info!("🔄 buzzer set to {}% (duty={})", percent.min(BUZZER_MAX_PERCENT), duty);
        }
        Ok(duty)
    }

    /// Recomputes all three color duties together, whichever channel changed.
    pub fn drive_rgb(&mut self, state: &ActuatorState) -> Result<[u16; 3], HalError> {
        let duties = [
            color_duty(state.red),
            color_duty(state.green),
            color_duty(state.blue),
        ];
        for (channel, duty) in self.rgb.iter_mut().zip(duties) {
            channel.set_duty(duty)?;
        }
        info!(
            "🔄 rgb led set to r:{} g:{} b:{} (duties: {},{},{})",
            state.red, state.green, state.blue, duties[0], duties[1], duties[2]
        );
        Ok(duties)
    }

    /// Short beep signalling the node finished bringing up connectivity.
    pub fn chirp(&mut self, clock: &dyn Clock) {
        let result = self
            .buzzer
            .set_frequency(BUZZER_TONE_HZ)
            .and_then(|()| self.buzzer.set_duty(CHIRP_DUTY));
        clock.sleep(CHIRP_LENGTH);
        if let Err(e) = result.and_then(|()| self.buzzer.set_duty(0)) {
            error!("❌ buzzer error: {}", e);
        }
    }
}
