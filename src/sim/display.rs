//! Panel stand-ins: one that records frames for inspection, one that prints them.

use crate::error::HalError;
use crate::hal::TextDisplay;
use crate::sim::hardware::SharedBench;
use colored::Colorize;
use std::cell::RefCell;
use std::rc::Rc;

pub type SharedFrames = Rc<RefCell<FrameLog>>;

/// One text row as it was placed on the panel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlacedText {
    pub x: i32,
    pub y: i32,
    pub text: String,
}

#[derive(Debug, Default)]
pub struct FrameLog {
    pub frames: Vec<Vec<PlacedText>>,
}

impl FrameLog {
    pub fn shared() -> SharedFrames {
        Rc::new(RefCell::new(Self::default()))
    }

    pub fn last(&self) -> Option<&[PlacedText]> {
        self.frames.last().map(Vec::as_slice)
    }

    /// Text of the last flushed frame, one row per line.
    pub fn last_text(&self) -> String {
        self.last()
            .map(|rows| rows.iter().map(|row| row.text.as_str()).collect::<Vec<_>>().join("\n"))
            .unwrap_or_default()
    }

    pub fn any_frame_contains(&self, needle: &str) -> bool {
        self.frames
            .iter()
            .any(|rows| rows.iter().any(|row| row.text.contains(needle)))
    }
}

/// Keeps every flushed frame. Honors the bench's `panel_error` fault.
pub struct RecordingDisplay {
    pending: Vec<PlacedText>,
    log: SharedFrames,
    bench: SharedBench,
}

impl RecordingDisplay {
    pub fn new(log: SharedFrames, bench: SharedBench) -> Self {
        Self {
            pending: Vec::new(),
            log,
            bench,
        }
    }
}

impl TextDisplay for RecordingDisplay {
    fn clear(&mut self) {
        self.pending.clear();
    }

    fn text(&mut self, text: &str, x: i32, y: i32) {
        self.pending.push(PlacedText {
            x,
            y,
            text: text.to_string(),
        });
    }

    fn flush(&mut self) -> Result<(), HalError> {
        if self.bench.borrow().faults.panel_error {
            return Err(HalError::Bus("i2c nack from panel".into()));
        }
        self.log.borrow_mut().frames.push(std::mem::take(&mut self.pending));
        Ok(())
    }
}

/// Prints each frame to the terminal, skipping frames identical to the previous one.
pub struct ConsoleDisplay {
    pending: Vec<PlacedText>,
    last: Vec<PlacedText>,
}

impl ConsoleDisplay {
    pub fn new() -> Self {
        Self {
            pending: Vec::new(),
            last: Vec::new(),
        }
    }
}

impl Default for ConsoleDisplay {
    fn default() -> Self {
        Self::new()
    }
}

impl TextDisplay for ConsoleDisplay {
    fn clear(&mut self) {
        self.pending.clear();
    }

    fn text(&mut self, text: &str, x: i32, y: i32) {
        self.pending.push(PlacedText {
            x,
            y,
            text: text.to_string(),
        });
    }

    fn flush(&mut self) -> Result<(), HalError> {
        if self.pending == self.last {
            return Ok(());
        }
        println!("{}", "┌────────────────┐".bright_black());
        for (row, placed) in self.pending.iter().enumerate() {
            let text = if row == 0 {
                placed.text.bold().cyan()
            } else if placed.text.contains("Error") || placed.text.contains("error") {
                placed.text.red()
            } else {
                placed.text.normal()
            };
            println!("{} {}", "│".bright_black(), text);
        }
        println!("{}", "└────────────────┘".bright_black());
        self.last = std::mem::take(&mut self.pending);
        Ok(())
    }
}
