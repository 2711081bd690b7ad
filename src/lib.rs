//! # Sensor Node
//!
//! Control firmware for a networked sensor/actuator node: two climate sensors, an
//! ultrasonic ranger, a motion sensor and a light sensor on the input side; a servo,
//! a relay, a buzzer and an RGB LED on the output side; a small text panel for status.
//!
//! ## Features
//!
//! - **Connectivity supervision**: network link and pub/sub session kept alive with
//!   bounded reconnect attempts
//! - **Command ingestion**: actuator commands from either topic schema, clamped into
//!   range and applied to hardware synchronously
//! - **Sensor acquisition**: last-known-good snapshot with per-channel validity rules
//! - **Telemetry dispatch**: broker every 10 s, storage API every 60 s, retried on
//!   the next tick after a failure
//! - **Status display**: four rotating screens plus transient status banners
//! - **Simulation**: complete simulated bench, network and storage service for host
//!   runs and tests
//!
//! ## Quick Start
//!
//! ```rust
//! use sensor_node::{sim, ManualClock, NodeConfig, SensorNode};
//! use std::rc::Rc;
//! use std::sync::atomic::AtomicBool;
//! use std::time::Duration;
//!
//! let clock = Rc::new(ManualClock::with_auto_step(Duration::from_micros(10)));
//! let rig = sim::build(clock.clone(), sim::PanelKind::Recording);
//! rig.handles.net.borrow_mut().deliver("/v2.0/devices/sensorverse-32/relay/lv", "1");
//!
//! let config = NodeConfig::default();
//! let mut node = SensorNode::new(config, clock, rig.hardware, rig.network).unwrap();
//! node.startup(&AtomicBool::new(false)).unwrap();
//! node.tick().unwrap();
//! assert!(node.state().actuators.relay);
//! ```
//!
//! ## Architecture
//!
//! - [`node`] - control loop and the shared [`NodeState`]
//! - [`connectivity`] - link and session supervision
//! - [`command`] - inbound command parsing and actuator state transitions
//! - [`sensors`] / [`actuators`] - acquisition pipeline and output drivers
//! - [`telemetry`] - per-destination cadence and delivery
//! - [`display`] / [`status`] - screens and status events
//! - [`hal`] / [`clock`] - capability traits the core runs against
//! - [`sim`] - simulated implementations of every capability

#![deny(clippy::all)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]

pub mod actuators;
pub mod clock;
pub mod command;
pub mod config;
pub mod connectivity;
pub mod display;
pub mod error;
pub mod hal;
pub mod node;
pub mod sensors;
pub mod sim;
pub mod status;
pub mod telemetry;

// Re-export main public types for convenience
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::NodeConfig;
pub use error::NodeError;
pub use node::{NodeState, SensorNode, TickReport};
pub use status::{StatusEvent, StatusSink};
