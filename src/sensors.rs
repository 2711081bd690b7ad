use crate::clock::Clock;
use crate::error::{HalError, RangeError};
use crate::hal::{AnalogInput, DigitalInput, DigitalOutput, HumiditySensor};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Distance value meaning "no valid reading has ever been taken".
pub const NO_DISTANCE: f32 = -1.0;
pub const MAX_DISTANCE_CM: f32 = 400.0;
pub const DEFAULT_ECHO_TIMEOUT: Duration = Duration::from_millis(30);
// DHT11 parts need at least a second between conversions
pub const DEFAULT_DHT_SPACING: Duration = Duration::from_millis(1000);

const SOUND_CM_PER_US: f32 = 0.0343;
const TRIGGER_SETTLE: Duration = Duration::from_micros(2);
const TRIGGER_PULSE: Duration = Duration::from_micros(10);

/// Last known value of every sensor channel, serialized with the channel names the
/// telemetry consumers expect.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SensorSnapshot {
    #[serde(rename = "DHT-1-Temp")]
    pub dht1_temperature: f32,
    #[serde(rename = "DHT-1-Humid")]
    pub dht1_humidity: f32,
    #[serde(rename = "DHT-2-Temp")]
    pub dht2_temperature: f32,
    #[serde(rename = "DHT-2-Humid")]
    pub dht2_humidity: f32,
    #[serde(rename = "Ultrasonic-Distance")]
    pub distance_cm: f32,
    #[serde(rename = "Pir-Motion")]
    pub motion: u8,
    #[serde(rename = "LDR-Intensity")]
    pub light: u16,
}

impl Default for SensorSnapshot {
    fn default() -> Self {
        Self {
            dht1_temperature: 0.0,
            dht1_humidity: 0.0,
            dht2_temperature: 0.0,
            dht2_humidity: 0.0,
            distance_cm: NO_DISTANCE,
            motion: 0,
            light: 0,
        }
    }
}

impl SensorSnapshot {
    pub fn has_distance(&self) -> bool {
        self.distance_cm >= 0.0
    }

    pub fn motion_detected(&self) -> bool {
        self.motion != 0
    }
}

/// A DHT conversion of exactly (0, 0) is how these parts report a failed read.
pub fn valid_climate_reading(temperature: f32, humidity: f32) -> Option<(f32, f32)> {
    if temperature == 0.0 && humidity == 0.0 {
        None
    } else {
        Some((temperature, humidity))
    }
}

/// Converts an echo pulse width to centimetres, rejecting physically impossible values.
pub fn echo_to_distance(pulse_us: f32) -> Result<f32, RangeError> {
    let distance = pulse_us * SOUND_CM_PER_US / 2.0;
    if (0.0..=MAX_DISTANCE_CM).contains(&distance) {
        Ok(distance)
    } else {
        Err(RangeError::OutOfRange(distance))
    }
}

/// HC-SR04 style trigger/echo ranger.
pub struct UltrasonicRanger {
    trigger: Box<dyn DigitalOutput>,
    echo: Box<dyn DigitalInput>,
    timeout: Duration,
}

impl UltrasonicRanger {
    pub fn new(trigger: Box<dyn DigitalOutput>, echo: Box<dyn DigitalInput>) -> Self {
        Self {
            trigger,
            echo,
            timeout: DEFAULT_ECHO_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Fires a trigger pulse and times the echo with two bounded busy-waits.
    pub fn measure(&mut self, clock: &dyn Clock) -> Result<f32, RangeError> {
        self.trigger.set_level(false)?;
        clock.sleep(TRIGGER_SETTLE);
        self.trigger.set_level(true)?;
        clock.sleep(TRIGGER_PULSE);
        self.trigger.set_level(false)?;

        let rise = self.wait_for_level(true, clock)?;
        let fall = self.wait_for_level(false, clock)?;

        let pulse_us = fall.saturating_sub(rise).as_micros() as f32;
        echo_to_distance(pulse_us)
    }

    fn wait_for_level(&mut self, high: bool, clock: &dyn Clock) -> Result<Duration, RangeError> {
        let started = clock.elapsed();
        loop {
            if self.echo.is_high()? == high {
                return Ok(clock.elapsed());
            }
            if clock.elapsed().saturating_sub(started) > self.timeout {
                return Err(RangeError::EchoTimeout {
                    edge: if high { "rise" } else { "fall" },
                    timeout_us: self.timeout.as_micros() as u64,
                });
            }
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AcquisitionStats {
    pub cycles: u32,
    pub aborted_cycles: u32,
    pub climate_faults: u32,
    pub climate_bus_errors: u32,
    pub range_misses: u32,
}

/// Reads every channel once per invocation and folds valid readings into the snapshot.
pub struct SensorPipeline {
    climate: [Box<dyn HumiditySensor>; 2],
    ranger: UltrasonicRanger,
    motion: Box<dyn DigitalInput>,
    light: Box<dyn AnalogInput>,
    climate_spacing: Duration,
    stats: AcquisitionStats,
}

impl SensorPipeline {
    pub fn new(
        climate: [Box<dyn HumiditySensor>; 2],
        ranger: UltrasonicRanger,
        motion: Box<dyn DigitalInput>,
        light: Box<dyn AnalogInput>,
    ) -> Self {
        Self {
            climate,
            ranger,
            motion,
            light,
            climate_spacing: DEFAULT_DHT_SPACING,
            stats: AcquisitionStats::default(),
        }
    }

    pub fn with_climate_spacing(mut self, spacing: Duration) -> Self {
        self.climate_spacing = spacing;
        self
    }

    /// Runs one acquisition cycle. Returns `false` only when an unexpected error aborted
    /// the cycle; per-sensor validity failures are absorbed and still return `true`.
    pub fn read_all(&mut self, snapshot: &mut SensorSnapshot, clock: &dyn Clock) -> bool {
        self.stats.cycles = self.stats.cycles.wrapping_add(1);

        match self.acquire(snapshot, clock) {
            Ok(()) => {
                info!(
                    dht1_temp = snapshot.dht1_temperature,
                    dht1_humid = snapshot.dht1_humidity,
                    dht2_temp = snapshot.dht2_temperature,
                    dht2_humid = snapshot.dht2_humidity,
                    distance_cm = snapshot.distance_cm,
                    motion = snapshot.motion,
                    light = snapshot.light,
                    "📊 sensor readings"
                );
                true
            }
            Err(e) => {
                self.stats.aborted_cycles = self.stats.aborted_cycles.wrapping_add(1);
                error!("❌ error reading sensors: {}", e);
                false
            }
        }
    }

    pub fn stats(&self) -> &AcquisitionStats {
        &self.stats
    }

    fn acquire(
        &mut self,
        snapshot: &mut SensorSnapshot,
        clock: &dyn Clock,
    ) -> Result<(), HalError> {
        if let Some((temperature, humidity)) = self.read_climate(0) {
            snapshot.dht1_temperature = temperature;
            snapshot.dht1_humidity = humidity;
        }

        clock.sleep(self.climate_spacing);

        if let Some((temperature, humidity)) = self.read_climate(1) {
            snapshot.dht2_temperature = temperature;
            snapshot.dht2_humidity = humidity;
        }

        match self.ranger.measure(clock) {
            Ok(distance) => snapshot.distance_cm = distance,
            Err(e) => {
                self.stats.range_misses = self.stats.range_misses.wrapping_add(1);
                debug!("ultrasonic reading discarded: {}", e);
            }
        }

        snapshot.motion = u8::from(self.motion.is_high()?);
        snapshot.light = self.light.read_raw()?;

        debug_assert!(
            snapshot.distance_cm == NO_DISTANCE
                || (0.0..=MAX_DISTANCE_CM).contains(&snapshot.distance_cm),
            "Distance {} escaped validation",
            snapshot.distance_cm
        );

        Ok(())
    }

    fn read_climate(&mut self, index: usize) -> Option<(f32, f32)> {
        match self.climate[index].measure() {
            Ok((temperature, humidity)) => {
                let reading = valid_climate_reading(temperature, humidity);
                if reading.is_none() {
                    self.stats.climate_faults = self.stats.climate_faults.wrapping_add(1);
                    warn!(sensor = index + 1, "DHT returned 0/0, keeping previous values");
                }
                reading
            }
            Err(e) => {
                self.stats.climate_bus_errors = self.stats.climate_bus_errors.wrapping_add(1);
                warn!(sensor = index + 1, "DHT sensor error: {}", e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_pair_is_rejected() {
        assert_eq!(valid_climate_reading(0.0, 0.0), None);
        assert_eq!(valid_climate_reading(0.0, 41.0), Some((0.0, 41.0)));
        assert_eq!(valid_climate_reading(22.0, 0.0), Some((22.0, 0.0)));
    }

    #[test]
    fn test_echo_conversion() {
        // 1000 us round trip is about 17 cm
        let distance = echo_to_distance(1000.0).unwrap();
        assert!((distance - 17.15).abs() < 0.01);

        assert!(echo_to_distance(0.0).is_ok());
        assert!(matches!(echo_to_distance(30_000.0), Err(RangeError::OutOfRange(_))));
    }

    #[test]
    fn test_default_snapshot_has_no_distance() {
        let snapshot = SensorSnapshot::default();
        assert!(!snapshot.has_distance());
        assert_eq!(snapshot.distance_cm, NO_DISTANCE);
    }

    #[test]
    fn test_snapshot_serializes_channel_names() {
        let json = serde_json::to_value(SensorSnapshot::default()).unwrap();
        let obj = json.as_object().unwrap();
        assert_eq!(obj.len(), 7);
        for key in [
            "DHT-1-Temp",
            "DHT-1-Humid",
            "DHT-2-Temp",
            "DHT-2-Humid",
            "Ultrasonic-Distance",
            "Pir-Motion",
            "LDR-Intensity",
        ] {
            assert!(obj.contains_key(key), "missing {}", key);
        }
    }
}
