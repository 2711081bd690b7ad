//! Simulated bench: an environment model plus the devices that sense and act on it.
//!
//! All devices share one [`Bench`] through an `Rc<RefCell<..>>`, so tests and the
//! fault injector can change the environment or force device faults between ticks
//! and inspect what the node commanded.

use crate::clock::Clock;
use crate::error::HalError;
use crate::hal::{AnalogInput, DigitalInput, DigitalOutput, HumiditySensor, PwmOutput, PWM_MAX_DUTY};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

pub type SharedBench = Rc<RefCell<Bench>>;

/// Delay between the trigger falling edge and the echo rising edge.
pub const ECHO_LATENCY: Duration = Duration::from_micros(200);
pub const ADC_MAX: u16 = 4095;

const SOUND_CM_PER_US: f32 = 0.0343;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Environment {
    /// (temperature °C, relative humidity %) seen by each climate sensor.
    pub climate: [(f32, f32); 2],
    /// `None` means nothing inside the ranger's reach.
    pub distance_cm: Option<f32>,
    pub motion: bool,
    pub light: u16,
}

impl Default for Environment {
    fn default() -> Self {
        Self {
            climate: [(24.0, 55.0), (25.0, 52.0)],
            distance_cm: Some(120.0),
            motion: false,
            light: 2048,
        }
    }
}

impl Environment {
    /// Slow deterministic drift, one step per call.
    pub fn drift(&mut self, step: u64) {
        let phase = (step % 120) as f32 / 120.0 * std::f32::consts::TAU;
        self.climate[0].0 = 24.0 + 2.0 * phase.sin();
        self.climate[0].1 = 55.0 + 5.0 * phase.cos();
        self.climate[1].0 = 25.0 + 1.5 * phase.cos();
        self.climate[1].1 = 52.0 + 4.0 * phase.sin();
        if let Some(distance) = self.distance_cm.as_mut() {
            *distance = (120.0 + 60.0 * (phase * 2.0).sin()).clamp(2.0, 390.0);
        }
        self.light = (2048.0 + 1500.0 * phase.sin()) as u16;
        self.motion = step % 17 < 3;
    }
}

/// Device faults that can be forced from outside.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceFaults {
    /// Sensor returns the all-zero failed conversion.
    pub dht_zero: [bool; 2],
    /// Sensor does not answer at all.
    pub dht_no_response: [bool; 2],
    pub echo_miss: bool,
    pub motion_bus_error: bool,
    pub light_bus_error: bool,
    pub panel_error: bool,
    pub pwm_error: bool,
    pub status_led_error: bool,
}

/// Last level commanded on every output.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputLog {
    pub servo_duty: u16,
    pub servo_frequency: u32,
    pub relay: bool,
    pub buzzer_duty: u16,
    pub buzzer_frequency: u32,
    pub rgb_duty: [u16; 3],
    pub status_led: bool,
    /// Every buzzer duty written, in order.
    pub buzzer_history: Vec<u16>,
}

#[derive(Debug, Default)]
pub struct Bench {
    pub environment: Environment,
    pub faults: DeviceFaults,
    pub outputs: OutputLog,
    pub climate_reads: [u32; 2],
    trigger_high: bool,
    trigger_fell_at: Option<Duration>,
}

impl Bench {
    pub fn shared() -> SharedBench {
        Rc::new(RefCell::new(Self::default()))
    }

    fn echo_level(&self, now: Duration) -> bool {
        if self.faults.echo_miss {
            return false;
        }
        let (Some(fell_at), Some(distance)) = (self.trigger_fell_at, self.environment.distance_cm)
        else {
            return false;
        };
        let width_us = (distance * 2.0 / SOUND_CM_PER_US) as u64;
        let rise = fell_at + ECHO_LATENCY;
        let fall = rise + Duration::from_micros(width_us);
        now >= rise && now < fall
    }
}

pub struct SimClimateSensor {
    bench: SharedBench,
    index: usize,
}

impl SimClimateSensor {
    pub fn new(bench: SharedBench, index: usize) -> Self {
        Self { bench, index }
    }
}

impl HumiditySensor for SimClimateSensor {
    fn measure(&mut self) -> Result<(f32, f32), HalError> {
        let mut bench = self.bench.borrow_mut();
        bench.climate_reads[self.index] = bench.climate_reads[self.index].wrapping_add(1);
        if bench.faults.dht_no_response[self.index] {
            return Err(HalError::NoResponse);
        }
        if bench.faults.dht_zero[self.index] {
            return Ok((0.0, 0.0));
        }
        Ok(bench.environment.climate[self.index])
    }
}

/// Trigger pin of the ranger. The falling edge of a pulse arms the echo.
pub struct SimTrigger {
    bench: SharedBench,
    clock: Rc<dyn Clock>,
}

impl SimTrigger {
    pub fn new(bench: SharedBench, clock: Rc<dyn Clock>) -> Self {
        Self { bench, clock }
    }
}

impl DigitalOutput for SimTrigger {
    fn set_level(&mut self, high: bool) -> Result<(), HalError> {
        let mut bench = self.bench.borrow_mut();
        if bench.trigger_high && !high {
            bench.trigger_fell_at = Some(self.clock.elapsed());
        }
        bench.trigger_high = high;
        Ok(())
    }
}

pub struct SimEcho {
    bench: SharedBench,
    clock: Rc<dyn Clock>,
}

impl SimEcho {
    pub fn new(bench: SharedBench, clock: Rc<dyn Clock>) -> Self {
        Self { bench, clock }
    }
}

impl DigitalInput for SimEcho {
    fn is_high(&mut self) -> Result<bool, HalError> {
        let now = self.clock.elapsed();
        Ok(self.bench.borrow().echo_level(now))
    }
}

pub struct SimMotionSensor {
    bench: SharedBench,
}

impl SimMotionSensor {
    pub fn new(bench: SharedBench) -> Self {
        Self { bench }
    }
}

impl DigitalInput for SimMotionSensor {
    fn is_high(&mut self) -> Result<bool, HalError> {
        let bench = self.bench.borrow();
        if bench.faults.motion_bus_error {
            return Err(HalError::Bus("motion input stuck".into()));
        }
        Ok(bench.environment.motion)
    }
}

pub struct SimLightSensor {
    bench: SharedBench,
}

impl SimLightSensor {
    pub fn new(bench: SharedBench) -> Self {
        Self { bench }
    }
}

impl AnalogInput for SimLightSensor {
    fn read_raw(&mut self) -> Result<u16, HalError> {
        let bench = self.bench.borrow();
        if bench.faults.light_bus_error {
            return Err(HalError::Bus("adc conversion failed".into()));
        }
        Ok(bench.environment.light.min(ADC_MAX))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinChannel {
    Relay,
    StatusLed,
}

pub struct SimOutputPin {
    bench: SharedBench,
    channel: PinChannel,
}

impl SimOutputPin {
    pub fn new(bench: SharedBench, channel: PinChannel) -> Self {
        Self { bench, channel }
    }
}

impl DigitalOutput for SimOutputPin {
    fn set_level(&mut self, high: bool) -> Result<(), HalError> {
        let mut bench = self.bench.borrow_mut();
        match self.channel {
            PinChannel::Relay => bench.outputs.relay = high,
            PinChannel::StatusLed if bench.faults.status_led_error => {
                return Err(HalError::Bus("status led gpio locked".into()));
            }
            PinChannel::StatusLed => bench.outputs.status_led = high,
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PwmChannel {
    Servo,
    Buzzer,
    Red,
    Green,
    Blue,
}

pub struct SimPwm {
    bench: SharedBench,
    channel: PwmChannel,
}

impl SimPwm {
    pub fn new(bench: SharedBench, channel: PwmChannel) -> Self {
        Self { bench, channel }
    }
}

impl PwmOutput for SimPwm {
    fn set_duty(&mut self, duty: u16) -> Result<(), HalError> {
        let mut bench = self.bench.borrow_mut();
        if bench.faults.pwm_error {
            return Err(HalError::Bus("pwm peripheral not responding".into()));
        }
        if duty > PWM_MAX_DUTY {
            return Err(HalError::OutOfRange {
                channel: "pwm duty",
                value: u32::from(duty),
            });
        }
        let outputs = &mut bench.outputs;
        match self.channel {
            PwmChannel::Servo => outputs.servo_duty = duty,
            PwmChannel::Buzzer => {
                outputs.buzzer_duty = duty;
                outputs.buzzer_history.push(duty);
            }
            PwmChannel::Red => outputs.rgb_duty[0] = duty,
            PwmChannel::Green => outputs.rgb_duty[1] = duty,
            PwmChannel::Blue => outputs.rgb_duty[2] = duty,
        }
        Ok(())
    }

    fn set_frequency(&mut self, hz: u32) -> Result<(), HalError> {
        let mut bench = self.bench.borrow_mut();
        match self.channel {
            PwmChannel::Servo => bench.outputs.servo_frequency = hz,
            PwmChannel::Buzzer => bench.outputs.buzzer_frequency = hz,
            _ => {}
        }
        Ok(())
    }
}
