//! Status events raised by components for the operator display.
//!
//! Components never draw on the panel themselves. They publish a [`StatusEvent`] to a
//! [`StatusSink`]; on the device the sink is the [`crate::display::StatusDisplay`],
//! in tests it is usually a plain `Vec<StatusEvent>`.

use crate::telemetry::DestinationKind;
use core::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectTarget {
    Network,
    Broker,
}

impl fmt::Display for ConnectTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectTarget::Network => write!(f, "WiFi"),
            ConnectTarget::Broker => write!(f, "MQTT"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusEvent {
    Starting,
    Connecting(ConnectTarget),
    Connected { target: ConnectTarget, detail: String },
    ConnectFailed { target: ConnectTarget, reason: String },
    Sending(DestinationKind),
    Sent(DestinationKind),
    SendFailed { destination: DestinationKind, reason: String },
    LoopError(String),
}

pub trait StatusSink {
    fn publish(&mut self, event: StatusEvent);
}

impl StatusSink for Vec<StatusEvent> {
    fn publish(&mut self, event: StatusEvent) {
        self.push(event);
    }
}
