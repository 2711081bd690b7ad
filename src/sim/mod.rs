//! Host-side simulation of the node's hardware, network and storage service.
//!
//! [`build`] wires a full set of simulated devices and returns them together with
//! shared handles, so a test or the host binary can steer the environment and
//! inspect what the node did.

pub mod display;
pub mod fault_injection;
pub mod hardware;
pub mod network;
pub mod store;

use crate::clock::Clock;
use crate::node::{NodeHardware, NodeNetwork};
use display::{ConsoleDisplay, FrameLog, RecordingDisplay, SharedFrames};
use hardware::{
    Bench, PinChannel, PwmChannel, SharedBench, SimClimateSensor, SimEcho, SimLightSensor,
    SimMotionSensor, SimOutputPin, SimPwm, SimTrigger,
};
use network::{NetworkState, SharedNetwork, SharedStore, SimApiTransport, SimBroker, SimLink};
use std::cell::RefCell;
use std::rc::Rc;
use store::TelemetryStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PanelKind {
    /// Frames go to the shared [`FrameLog`].
    Recording,
    /// Frames are printed to stdout.
    Console,
}

/// Shared state behind the simulated devices.
#[derive(Clone)]
pub struct SimHandles {
    pub bench: SharedBench,
    pub net: SharedNetwork,
    pub store: SharedStore,
    pub frames: SharedFrames,
}

pub struct SimRig {
    pub hardware: NodeHardware,
    pub network: NodeNetwork,
    pub handles: SimHandles,
}

pub fn build(clock: Rc<dyn Clock>, panel: PanelKind) -> SimRig {
    build_with_store(clock, panel, TelemetryStore::new())
}

pub fn build_with_store(clock: Rc<dyn Clock>, panel: PanelKind, store: TelemetryStore) -> SimRig {
    let bench = Bench::shared();
    let net = NetworkState::shared();
    let store = Rc::new(RefCell::new(store));
    let frames = FrameLog::shared();

    let pwm = |channel| -> Box<dyn crate::hal::PwmOutput> {
        Box::new(SimPwm::new(Rc::clone(&bench), channel))
    };
    let display: Box<dyn crate::hal::TextDisplay> = match panel {
        PanelKind::Recording => {
            Box::new(RecordingDisplay::new(Rc::clone(&frames), Rc::clone(&bench)))
        }
        PanelKind::Console => Box::new(ConsoleDisplay::new()),
    };

    let hardware = NodeHardware {
        climate: [
            Box::new(SimClimateSensor::new(Rc::clone(&bench), 0)),
            Box::new(SimClimateSensor::new(Rc::clone(&bench), 1)),
        ],
        trigger: Box::new(SimTrigger::new(Rc::clone(&bench), Rc::clone(&clock))),
        echo: Box::new(SimEcho::new(Rc::clone(&bench), Rc::clone(&clock))),
        motion: Box::new(SimMotionSensor::new(Rc::clone(&bench))),
        light: Box::new(SimLightSensor::new(Rc::clone(&bench))),
        servo: pwm(PwmChannel::Servo),
        relay: Box::new(SimOutputPin::new(Rc::clone(&bench), PinChannel::Relay)),
        buzzer: pwm(PwmChannel::Buzzer),
        rgb: [pwm(PwmChannel::Red), pwm(PwmChannel::Green), pwm(PwmChannel::Blue)],
        display,
        status_led: Box::new(SimOutputPin::new(Rc::clone(&bench), PinChannel::StatusLed)),
    };

    let network = NodeNetwork {
        link: Box::new(SimLink::new(Rc::clone(&net), Rc::clone(&clock))),
        broker: Box::new(SimBroker::new(Rc::clone(&net))),
        api: Box::new(SimApiTransport::new(Rc::clone(&net), Rc::clone(&store), clock)),
    };

    SimRig {
        hardware,
        network,
        handles: SimHandles {
            bench,
            net,
            store,
            frames,
        },
    }
}
