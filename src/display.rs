//! Rotating status screens and transient status banners for the 128x64 panel.

use crate::actuators::ActuatorState;
use crate::clock::Clock;
use crate::connectivity::ConnectionState;
use crate::hal::TextDisplay;
use crate::sensors::SensorSnapshot;
use crate::status::{StatusEvent, StatusSink};
use arrayvec::ArrayString;
use serde::{Deserialize, Serialize};
use std::rc::Rc;
use std::time::Duration;
use tracing::{debug, error};

pub const DEFAULT_ROTATION: Duration = Duration::from_secs(3);
pub const DEFAULT_BANNER_HOLD: Duration = Duration::from_secs(1);
/// Characters that fit on one row of the panel with the 8x8 font.
pub const PANEL_COLUMNS: usize = 16;
pub const LINE_CAPACITY: usize = 32;
const MAX_FRAME_LINES: usize = 6;
const MAX_ERROR_ROWS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Screen {
    Climate,
    Proximity,
    Actuators,
    Connectivity,
}

impl Screen {
    pub const ALL: [Screen; 4] = [
        Screen::Climate,
        Screen::Proximity,
        Screen::Actuators,
        Screen::Connectivity,
    ];

    pub fn index(self) -> usize {
        match self {
            Screen::Climate => 0,
            Screen::Proximity => 1,
            Screen::Actuators => 2,
            Screen::Connectivity => 3,
        }
    }

    pub fn next(self) -> Self {
        Self::ALL[(self.index() + 1) % Self::ALL.len()]
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Line {
    pub x: i32,
    pub y: i32,
    pub text: ArrayString<LINE_CAPACITY>,
}

/// One full panel image as positioned text rows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Frame {
    lines: heapless::Vec<Line, MAX_FRAME_LINES>,
}

impl Frame {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a row, cutting text at [`LINE_CAPACITY`] bytes on a char boundary. Rows past
    /// the frame capacity are dropped.
    pub fn push(&mut self, x: i32, y: i32, text: &str) {
        let mut row = ArrayString::new();
        for c in text.chars() {
            if row.try_push(c).is_err() {
                break;
            }
        }
        let _ = self.lines.push(Line { x, y, text: row });
    }

    pub fn lines(&self) -> &[Line] {
        &self.lines
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.lines.iter().any(|line| line.text.contains(needle))
    }

    fn draw(&self, panel: &mut dyn TextDisplay) -> Result<(), crate::error::HalError> {
        panel.clear();
        for line in &self.lines {
            panel.text(&line.text, line.x, line.y);
        }
        panel.flush()
    }
}

/// Read-only view of the node state a screen is rendered from.
#[derive(Debug, Clone, Copy)]
pub struct StatusView<'a> {
    pub sensors: &'a SensorSnapshot,
    pub actuators: &'a ActuatorState,
    pub connection: &'a ConnectionState,
    pub device_id: &'a str,
}

fn on_off(flag: bool, on: &'static str, off: &'static str) -> &'static str {
    if flag {
        on
    } else {
        off
    }
}

pub fn render_screen(screen: Screen, view: &StatusView<'_>) -> Frame {
    let mut frame = Frame::new();
    let s = view.sensors;
    let a = view.actuators;
    match screen {
        Screen::Climate => {
            frame.push(0, 0, "Temp & Humidity");
            frame.push(0, 15, &format!("DHT1: {:.1}C", s.dht1_temperature));
            frame.push(0, 25, &format!("      {:.1}%", s.dht1_humidity));
            frame.push(0, 40, &format!("DHT2: {:.1}C", s.dht2_temperature));
            frame.push(0, 50, &format!("      {:.1}%", s.dht2_humidity));
        }
        Screen::Proximity => {
            frame.push(0, 0, "Distance & Motion");
            if s.has_distance() {
                frame.push(0, 15, &format!("Dist: {:.1} cm", s.distance_cm));
            } else {
                frame.push(0, 15, "Dist: -- cm");
            }
            frame.push(0, 30, &format!("Motion: {}", on_off(s.motion_detected(), "YES", "NO")));
            frame.push(0, 45, &format!("Light: {}", s.light));
        }
        Screen::Actuators => {
            frame.push(0, 0, "Actuator States");
            frame.push(0, 15, &format!("Servo: {}deg", a.servo_angle));
            frame.push(0, 25, &format!("Relay: {}", on_off(a.relay, "ON", "OFF")));
            frame.push(0, 35, &format!("Buzzer: {}%", a.buzzer));
            frame.push(0, 45, &format!("RGB: {},", a.red));
            frame.push(0, 55, &format!("{},{}", a.green, a.blue));
        }
        Screen::Connectivity => {
            let c = view.connection;
            frame.push(0, 0, "Connection Status");
            frame.push(0, 15, &format!("WiFi: {}", on_off(c.link_up, "OK", "NO")));
            frame.push(0, 25, &format!("MQTT: {}", on_off(c.session_up, "OK", "NO")));
            frame.push(0, 35, "Storage: API");
            frame.push(0, 45, &format!("Device: {}", view.device_id));
        }
    }
    frame
}

/// Splits `text` into panel-width rows, at most `rows` of them.
fn wrap(text: &str, rows: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(PANEL_COLUMNS)
        .take(rows)
        .map(|chunk| chunk.iter().collect())
        .collect()
}

pub fn render_event(event: &StatusEvent) -> Frame {
    let mut frame = Frame::new();
    match event {
        StatusEvent::Starting => {
            frame.push(20, 10, "Sensor Node");
            frame.push(25, 30, "Starting...");
        }
        StatusEvent::Connecting(target) => {
            frame.push(0, 0, "Connecting to");
            frame.push(0, 10, &format!("{}...", target));
        }
        StatusEvent::Connected { target, detail } => {
            frame.push(0, 0, &format!("{} Connected", target));
            frame.push(0, 10, detail);
        }
        StatusEvent::ConnectFailed { target, reason } => {
            frame.push(0, 0, &format!("{} Error:", target));
            for (row, text) in wrap(reason, 2).iter().enumerate() {
                frame.push(0, 15 + 10 * row as i32, text);
            }
        }
        StatusEvent::Sending(destination) => {
            frame.push(0, 0, "Sending data to");
            frame.push(0, 10, &format!("{}...", destination));
        }
        StatusEvent::Sent(destination) => {
            frame.push(0, 20, &format!("{} data", destination));
            frame.push(0, 30, "sent!");
        }
        StatusEvent::SendFailed { destination, reason } => {
            frame.push(0, 20, &format!("{} error:", destination));
            for (row, text) in wrap(reason, 1).iter().enumerate() {
                frame.push(0, 30 + 10 * row as i32, text);
            }
        }
        StatusEvent::LoopError(message) => {
            frame.push(0, 0, "Error:");
            for (row, text) in wrap(message, MAX_ERROR_ROWS).iter().enumerate() {
                frame.push(0, 15 + 10 * row as i32, text);
            }
        }
    }
    frame
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DisplayStats {
    pub frames_drawn: u32,
    pub rotations: u32,
    pub banners: u32,
    pub render_failures: u32,
}

/// Owns the panel, the screen cursor and the rotation timer.
///
/// Status events are drawn immediately as banners and stay up for the banner hold
/// time; rotation keeps counting underneath. [`StatusDisplay::refresh_now`] replaces
/// a banner at once, so command feedback is never delayed.
pub struct StatusDisplay {
    panel: Box<dyn TextDisplay>,
    clock: Rc<dyn Clock>,
    current: Screen,
    last_rotation_ms: u64,
    rotation_ms: u64,
    banner_hold_ms: u64,
    banner_until_ms: Option<u64>,
    stats: DisplayStats,
}

impl StatusDisplay {
    pub fn new(panel: Box<dyn TextDisplay>, clock: Rc<dyn Clock>) -> Self {
        Self {
            panel,
            clock,
            current: Screen::Climate,
            last_rotation_ms: 0,
            rotation_ms: DEFAULT_ROTATION.as_millis() as u64,
            banner_hold_ms: DEFAULT_BANNER_HOLD.as_millis() as u64,
            banner_until_ms: None,
            stats: DisplayStats::default(),
        }
    }

    pub fn with_timing(mut self, rotation: Duration, banner_hold: Duration) -> Self {
        self.rotation_ms = rotation.as_millis() as u64;
        self.banner_hold_ms = banner_hold.as_millis() as u64;
        self
    }

    /// Advances the screen cursor when the rotation period has elapsed, then redraws
    /// the current screen unless a banner is still being held.
    pub fn refresh(&mut self, now_ms: u64, view: &StatusView<'_>) {
        if now_ms.saturating_sub(self.last_rotation_ms) >= self.rotation_ms {
            self.current = self.current.next();
            self.last_rotation_ms = now_ms;
            self.stats.rotations = self.stats.rotations.wrapping_add(1);
            debug!(screen = ?self.current, "screen rotated");
        }

        if let Some(until) = self.banner_until_ms {
            if now_ms < until {
                return;
            }
            self.banner_until_ms = None;
        }

        let frame = render_screen(self.current, view);
        self.draw(&frame);
    }

    /// Redraws the current screen right away, dropping any held banner.
    pub fn refresh_now(&mut self, view: &StatusView<'_>) {
        self.banner_until_ms = None;
        let frame = render_screen(self.current, view);
        self.draw(&frame);
    }

    pub fn current_screen(&self) -> Screen {
        self.current
    }

    pub fn banner_active(&self, now_ms: u64) -> bool {
        self.banner_until_ms.is_some_and(|until| now_ms < until)
    }

    pub fn stats(&self) -> &DisplayStats {
        &self.stats
    }

    fn draw(&mut self, frame: &Frame) {
        match frame.draw(self.panel.as_mut()) {
            Ok(()) => self.stats.frames_drawn = self.stats.frames_drawn.wrapping_add(1),
            Err(e) => {
                self.stats.render_failures = self.stats.render_failures.wrapping_add(1);
                error!("❌ oled error: {}", e);
            }
        }
    }
}

impl StatusSink for StatusDisplay {
    fn publish(&mut self, event: StatusEvent) {
        let frame = render_event(&event);
        self.draw(&frame);
        self.stats.banners = self.stats.banners.wrapping_add(1);
        self.banner_until_ms = Some(self.clock.now_ms().saturating_add(self.banner_hold_ms));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::DestinationKind;

    #[test]
    fn test_screen_cycle() {
        let mut screen = Screen::Climate;
        let mut seen = Vec::new();
        for _ in 0..8 {
            seen.push(screen);
            screen = screen.next();
        }
        assert_eq!(&seen[..4], &Screen::ALL);
        assert_eq!(&seen[4..], &Screen::ALL);
    }

    #[test]
    fn test_frame_truncates_long_rows() {
        let mut frame = Frame::new();
        let long = "x".repeat(100);
        frame.push(0, 0, &long);
        assert_eq!(frame.lines()[0].text.len(), LINE_CAPACITY);
    }

    #[test]
    fn test_loop_error_wraps_into_rows() {
        let message = "a".repeat(40);
        let frame = render_event(&StatusEvent::LoopError(message));
        assert_eq!(frame.lines().len(), 4);
        assert_eq!(frame.lines()[1].text.len(), PANEL_COLUMNS);
        assert_eq!(frame.lines()[3].text.len(), 8);
    }

    #[test]
    fn test_send_failed_banner() {
        let frame = render_event(&StatusEvent::SendFailed {
            destination: DestinationKind::Api,
            reason: "api returned 500: boom".to_string(),
        });
        assert!(frame.contains("API error:"));
        assert!(frame.contains("api returned 500"));
    }

    #[test]
    fn test_proximity_screen_without_distance() {
        let sensors = SensorSnapshot::default();
        let actuators = ActuatorState::default();
        let connection = ConnectionState::default();
        let view = StatusView {
            sensors: &sensors,
            actuators: &actuators,
            connection: &connection,
            device_id: "node",
        };
        let frame = render_screen(Screen::Proximity, &view);
        assert!(frame.contains("Dist: -- cm"));
        assert!(frame.contains("Motion: NO"));
    }
}
