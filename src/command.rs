//! Inbound actuator commands.
//!
//! Commands arrive as `.../{actuator}/lv` topics carrying a decimal value. Two topic
//! schema versions are in use (`/v1.6/devices/{device}/...` and
//! `/v2.0/devices/{device}/...`); only the suffix matters, so both are handled the
//! same way.

use crate::actuators::{
    clamp_round, ActuatorBank, ActuatorState, BUZZER_MAX_PERCENT, RGB_MAX, SERVO_MAX_ANGLE,
};
use crate::error::CommandError;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

pub const LAST_VALUE_SEGMENT: &str = "lv";
pub const DEFAULT_SCHEMA_VERSIONS: [&str; 2] = ["v1.6", "v2.0"];

const MIN_TOPIC_SEGMENTS: usize = 5;
const RELAY_ON_THRESHOLD: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActuatorId {
    ServoAngle,
    Relay,
    Buzzer,
    RgbRed,
    RgbGreen,
    RgbBlue,
}

impl ActuatorId {
    pub const ALL: [ActuatorId; 6] = [
        ActuatorId::ServoAngle,
        ActuatorId::Relay,
        ActuatorId::Buzzer,
        ActuatorId::RgbRed,
        ActuatorId::RgbGreen,
        ActuatorId::RgbBlue,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ActuatorId::ServoAngle => "servo-angle",
            ActuatorId::Relay => "relay",
            ActuatorId::Buzzer => "buzzer",
            ActuatorId::RgbRed => "rgb-red",
            ActuatorId::RgbGreen => "rgb-green",
            ActuatorId::RgbBlue => "rgb-blue",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|id| id.name() == name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Command {
    pub actuator: ActuatorId,
    pub value: f64,
}

/// What a command changed, after clamping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActuatorChange {
    Servo(u8),
    Relay(bool),
    Buzzer(u8),
    Rgb { red: u8, green: u8, blue: u8 },
}

/// Topics to subscribe for every actuator under every schema version.
pub fn subscription_topics(device: &str, versions: &[String]) -> Vec<String> {
    let mut topics = Vec::with_capacity(ActuatorId::ALL.len() * versions.len());
    for actuator in ActuatorId::ALL {
        for version in versions {
            topics.push(format!(
                "/{}/devices/{}/{}/{}",
                version,
                device,
                actuator.name(),
                LAST_VALUE_SEGMENT
            ));
        }
    }
    topics
}

/// Extracts the actuator segment from a command topic, or `None` if the topic does not
/// follow the `.../{actuator}/lv` shape.
pub fn actuator_segment(topic: &str) -> Option<&str> {
    let segments: Vec<&str> = topic.split('/').collect();
    if segments.len() < MIN_TOPIC_SEGMENTS {
        return None;
    }
    match segments.as_slice() {
        [.., name, last] if *last == LAST_VALUE_SEGMENT => Some(*name),
        _ => None,
    }
}

pub fn parse_value(payload: &[u8]) -> Result<f64, CommandError> {
    let text = core::str::from_utf8(payload).map_err(|_| CommandError::NonUtf8)?;
    let trimmed = text.trim();
    let value: f64 = trimmed
        .parse()
        .map_err(|_| CommandError::InvalidNumber(trimmed.to_string()))?;
    if !value.is_finite() {
        return Err(CommandError::NonFinite(value));
    }
    Ok(value)
}

/// Parses an inbound message. `Ok(None)` means the message is not addressed to a known
/// actuator and should be ignored.
pub fn parse_command(topic: &str, payload: &[u8]) -> Result<Option<Command>, CommandError> {
    let Some(name) = actuator_segment(topic) else {
        return Ok(None);
    };
    let Some(actuator) = ActuatorId::from_name(name) else {
        return Ok(None);
    };
    let value = parse_value(payload)?;
    Ok(Some(Command { actuator, value }))
}

/// Applies a command to the actuator state, clamping into each field's range.
pub fn apply_command(state: &mut ActuatorState, command: &Command) -> ActuatorChange {
    match command.actuator {
        ActuatorId::ServoAngle => {
            state.servo_angle = clamp_round(command.value, SERVO_MAX_ANGLE);
            ActuatorChange::Servo(state.servo_angle)
        }
        ActuatorId::Relay => {
            state.relay = command.value >= RELAY_ON_THRESHOLD;
            ActuatorChange::Relay(state.relay)
        }
        ActuatorId::Buzzer => {
            state.buzzer = clamp_round(command.value, BUZZER_MAX_PERCENT);
            ActuatorChange::Buzzer(state.buzzer)
        }
        ActuatorId::RgbRed | ActuatorId::RgbGreen | ActuatorId::RgbBlue => {
            let level = clamp_round(command.value, RGB_MAX);
            match command.actuator {
                ActuatorId::RgbRed => state.red = level,
                ActuatorId::RgbGreen => state.green = level,
                _ => state.blue = level,
            }
            ActuatorChange::Rgb {
                red: state.red,
                green: state.green,
                blue: state.blue,
            }
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommandStats {
    pub received: u32,
    pub applied: u32,
    pub rejected: u32,
    pub ignored: u32,
    pub hardware_errors: u32,
}

/// Turns inbound messages into actuator state changes and hardware writes.
#[derive(Debug, Default)]
pub struct CommandProcessor {
    stats: CommandStats,
    last_change: Option<ActuatorChange>,
}

impl CommandProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handles one inbound message. Never fails: malformed payloads and hardware errors
    /// are logged and counted. Returns the change when state was updated.
    pub fn on_message(
        &mut self,
        topic: &str,
        payload: &[u8],
        state: &mut ActuatorState,
        bank: &mut ActuatorBank,
    ) -> Option<ActuatorChange> {
        self.stats.received = self.stats.received.wrapping_add(1);
        info!(topic, payload = %String::from_utf8_lossy(payload), "📥 received command");

        let command = match parse_command(topic, payload) {
            Ok(Some(command)) => command,
            Ok(None) => {
                self.stats.ignored = self.stats.ignored.wrapping_add(1);
                debug!(topic, "ignoring message for unknown actuator");
                return None;
            }
            Err(e) => {
                self.stats.rejected = self.stats.rejected.wrapping_add(1);
                warn!(topic, "❌ dropping command: {}", e);
                return None;
            }
        };

        info!(
            "⚡ processing actuator: {} with value: {}",
            command.actuator.name(),
            command.value
        );

        let change = apply_command(state, &command);
        if let Err(e) = drive(bank, change, state) {
            self.stats.hardware_errors = self.stats.hardware_errors.wrapping_add(1);
            error!(actuator = command.actuator.name(), "❌ actuator output error: {}", e);
        }

        self.stats.applied = self.stats.applied.wrapping_add(1);
        self.last_change = Some(change);
        Some(change)
    }

    pub fn stats(&self) -> &CommandStats {
        &self.stats
    }

    pub fn last_change(&self) -> Option<ActuatorChange> {
        self.last_change
    }
}

fn drive(
    bank: &mut ActuatorBank,
    change: ActuatorChange,
    state: &ActuatorState,
) -> Result<(), crate::error::HalError> {
    match change {
        ActuatorChange::Servo(angle) => bank.drive_servo(angle).map(|_| ()),
        ActuatorChange::Relay(on) => bank.drive_relay(on),
        ActuatorChange::Buzzer(percent) => bank.drive_buzzer(percent).map(|_| ()),
        ActuatorChange::Rgb { .. } => bank.drive_rgb(state).map(|_| ()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_actuator_segment_accepts_both_schemas() {
        assert_eq!(
            actuator_segment("/v1.6/devices/node-1/servo-angle/lv"),
            Some("servo-angle")
        );
        assert_eq!(
            actuator_segment("/v2.0/devices/node-1/rgb-red/lv"),
            Some("rgb-red")
        );
    }

    #[test]
    fn test_actuator_segment_rejects_other_shapes() {
        assert_eq!(actuator_segment("/v2.0/devices/node-1"), None);
        assert_eq!(actuator_segment("/v2.0/devices/node-1/relay/value"), None);
        assert_eq!(actuator_segment("relay/lv"), None);
        assert_eq!(actuator_segment(""), None);
    }

    #[test]
    fn test_parse_value() {
        assert_eq!(parse_value(b"42").unwrap(), 42.0);
        assert_eq!(parse_value(b" 0.75\n").unwrap(), 0.75);
        assert_eq!(parse_value(b"-3.5").unwrap(), -3.5);
        assert!(matches!(parse_value(b"abc"), Err(CommandError::InvalidNumber(_))));
        assert!(matches!(parse_value(b""), Err(CommandError::InvalidNumber(_))));
        assert!(matches!(parse_value(b"NaN"), Err(CommandError::NonFinite(_))));
        assert!(matches!(parse_value(b"inf"), Err(CommandError::NonFinite(_))));
        assert_eq!(parse_value(&[0xff, 0xfe]), Err(CommandError::NonUtf8));
    }

    #[test]
    fn test_parse_command_unknown_actuator_is_ignored() {
        let parsed = parse_command("/v2.0/devices/node-1/laser/lv", b"1").unwrap();
        assert!(parsed.is_none());
    }

    #[test]
    fn test_subscription_topics_cover_every_actuator_and_version() {
        let versions = vec!["v1.6".to_string(), "v2.0".to_string()];
        let topics = subscription_topics("node-1", &versions);
        assert_eq!(topics.len(), 12);
        assert!(topics.contains(&"/v1.6/devices/node-1/relay/lv".to_string()));
        assert!(topics.contains(&"/v2.0/devices/node-1/rgb-blue/lv".to_string()));
        for topic in &topics {
            assert!(actuator_segment(topic).is_some());
        }
    }

    #[test]
    fn test_relay_threshold() {
        let mut state = ActuatorState::default();
        let cases = [(0.49, false), (0.5, true), (1.0, true), (-2.0, false), (7.0, true)];
        for (value, expected) in cases {
            let change = apply_command(
                &mut state,
                &Command {
                    actuator: ActuatorId::Relay,
                    value,
                },
            );
            assert_eq!(change, ActuatorChange::Relay(expected));
            assert_eq!(state.relay, expected);
        }
    }

    #[test]
    fn test_rgb_update_keeps_other_channels() {
        let mut state = ActuatorState {
            red: 10,
            green: 20,
            blue: 30,
            ..ActuatorState::default()
        };
        let change = apply_command(
            &mut state,
            &Command {
                actuator: ActuatorId::RgbGreen,
                value: 300.0,
            },
        );
        assert_eq!(
            change,
            ActuatorChange::Rgb {
                red: 10,
                green: 255,
                blue: 30
            }
        );
    }
}
