//! The control loop tying connectivity, commands, sensors, telemetry and display
//! together.

use crate::actuators::{ActuatorBank, ActuatorState};
use crate::clock::Clock;
use crate::command::{CommandProcessor, CommandStats};
use crate::config::NodeConfig;
use crate::connectivity::{Broker, ConnectionState, ConnectivitySupervisor, NetworkLink};
use crate::display::{StatusDisplay, StatusView};
use crate::error::NodeError;
use crate::hal::{
    AnalogInput, DigitalInput, DigitalOutput, HumiditySensor, PwmOutput, TextDisplay,
};
use crate::sensors::{AcquisitionStats, SensorPipeline, SensorSnapshot, UltrasonicRanger};
use crate::status::{StatusEvent, StatusSink};
use crate::telemetry::{
    ApiTransport, DestinationKind, DispatchOutcome, DispatchTime, TelemetryDispatcher,
};
use serde::{Deserialize, Serialize};
use std::ops::ControlFlow;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, error, info, warn};

// Longest uninterrupted sleep between ticks
const SLEEP_SLICE: Duration = Duration::from_millis(100);

/// Everything the loop knows about the world. Owned by [`SensorNode`] and lent to
/// each component for the duration of a call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct NodeState {
    pub sensors: SensorSnapshot,
    pub actuators: ActuatorState,
    pub connection: ConnectionState,
}

/// Physical devices the node drives.
pub struct NodeHardware {
    pub climate: [Box<dyn HumiditySensor>; 2],
    pub trigger: Box<dyn DigitalOutput>,
    pub echo: Box<dyn DigitalInput>,
    pub motion: Box<dyn DigitalInput>,
    pub light: Box<dyn AnalogInput>,
    pub servo: Box<dyn PwmOutput>,
    pub relay: Box<dyn DigitalOutput>,
    pub buzzer: Box<dyn PwmOutput>,
    pub rgb: [Box<dyn PwmOutput>; 3],
    pub display: Box<dyn TextDisplay>,
    pub status_led: Box<dyn DigitalOutput>,
}

pub struct NodeNetwork {
    pub link: Box<dyn NetworkLink>,
    pub broker: Box<dyn Broker>,
    pub api: Box<dyn ApiTransport>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeStats {
    pub ticks: u64,
    pub offline_ticks: u64,
    pub tick_errors: u32,
    pub sensor_cycles: u32,
    pub commands_applied: u32,
    pub dispatches_sent: u32,
    pub dispatch_failures: u32,
}

/// What one tick did.
#[derive(Debug, Clone, PartialEq)]
pub struct TickReport {
    pub online: bool,
    pub commands_applied: usize,
    pub sensors_read: bool,
    pub broker: DispatchOutcome,
    pub api: DispatchOutcome,
}

impl TickReport {
    fn offline() -> Self {
        Self {
            online: false,
            commands_applied: 0,
            sensors_read: false,
            broker: DispatchOutcome::NotDue,
            api: DispatchOutcome::NotDue,
        }
    }

    pub fn outcome(&self, kind: DestinationKind) -> &DispatchOutcome {
        match kind {
            DestinationKind::Broker => &self.broker,
            DestinationKind::Api => &self.api,
        }
    }
}

pub struct SensorNode {
    config: NodeConfig,
    clock: Rc<dyn Clock>,
    state: NodeState,
    sensors: SensorPipeline,
    actuators: ActuatorBank,
    status_led: Box<dyn DigitalOutput>,
    display: StatusDisplay,
    net: ConnectivitySupervisor,
    commands: CommandProcessor,
    telemetry: TelemetryDispatcher,
    last_sensor_read_ms: Option<u64>,
    stats: NodeStats,
}

impl SensorNode {
    pub fn new(
        config: NodeConfig,
        clock: Rc<dyn Clock>,
        hardware: NodeHardware,
        network: NodeNetwork,
    ) -> Result<Self, NodeError> {
        config.validate()?;
        let timing = &config.timing;

        let ranger = UltrasonicRanger::new(hardware.trigger, hardware.echo)
            .with_timeout(timing.echo_timeout());
        let sensors =
            SensorPipeline::new(hardware.climate, ranger, hardware.motion, hardware.light)
                .with_climate_spacing(timing.dht_spacing());
        let actuators =
            ActuatorBank::new(hardware.servo, hardware.relay, hardware.buzzer, hardware.rgb);
        let display = StatusDisplay::new(hardware.display, Rc::clone(&clock))
            .with_timing(timing.display_rotation(), timing.banner_hold());
        let net =
            ConnectivitySupervisor::new(network.link, network.broker, config.session_options())
                .with_credentials(config.link_credentials())
                .with_timing(timing.link_timeout(), timing.connect_retry());
        let telemetry = TelemetryDispatcher::new(config.dispatcher_settings(), network.api);

        Ok(Self {
            config,
            clock,
            state: NodeState::default(),
            sensors,
            actuators,
            status_led: hardware.status_led,
            display,
            net,
            commands: CommandProcessor::new(),
            telemetry,
            last_sensor_read_ms: None,
            stats: NodeStats::default(),
        })
    }

    /// Drives the outputs to their defaults, then blocks until link and session are up.
    /// Fails with [`NodeError::StartupInterrupted`] if `interrupt` is raised first.
    pub fn startup(&mut self, interrupt: &AtomicBool) -> Result<(), NodeError> {
        info!(device = %self.config.device_id, "🚀 sensor node starting");
        self.status_led.set_level(false)?;
        self.actuators.apply_all(&self.state.actuators)?;
        self.display.publish(StatusEvent::Starting);

        if !self.net.establish(
            &mut self.state.connection,
            &mut self.display,
            self.clock.as_ref(),
            interrupt,
        ) {
            warn!("🛑 startup interrupted");
            return Err(NodeError::StartupInterrupted);
        }

        self.actuators.chirp(self.clock.as_ref());
        info!("✅ system initialized");
        Ok(())
    }

    /// One pass of the control loop.
    pub fn tick(&mut self) -> Result<TickReport, NodeError> {
        self.stats.ticks = self.stats.ticks.wrapping_add(1);

        let online = self.net.ensure_link(&mut self.state.connection, &mut self.display)
            && self.net.probe_session(&mut self.state.connection, &mut self.display);
        if !online {
            self.stats.offline_ticks = self.stats.offline_ticks.wrapping_add(1);
            debug!(connection = ?self.state.connection, "offline, skipping tick");
            return Ok(TickReport::offline());
        }

        let commands_applied = self.process_commands();

        // Sensor and telemetry cadences are measured from the tick start.
        let started = DispatchTime {
            elapsed_ms: self.clock.now_ms(),
            unix_seconds: self.clock.unix_seconds(),
        };
        let sensors_read = self.sensors_due(started.elapsed_ms)
            && self.sensors.read_all(&mut self.state.sensors, self.clock.as_ref());
        if sensors_read {
            self.last_sensor_read_ms = Some(started.elapsed_ms);
            self.stats.sensor_cycles = self.stats.sensor_cycles.wrapping_add(1);
        }

        let broker = self.dispatch(DestinationKind::Broker, started)?;
        let api = self.dispatch(DestinationKind::Api, started)?;

        let now_ms = self.clock.now_ms();
        let view = StatusView {
            sensors: &self.state.sensors,
            actuators: &self.state.actuators,
            connection: &self.state.connection,
            device_id: &self.config.device_id,
        };
        self.display.refresh(now_ms, &view);

        Ok(TickReport {
            online: true,
            commands_applied,
            sensors_read,
            broker,
            api,
        })
    }

    /// Runs one tick, handling any error at the loop boundary. Returns how long the
    /// caller should pause before the next tick.
    pub fn step(&mut self) -> Duration {
        match self.tick() {
            Ok(report) if report.online => self.config.timing.loop_delay(),
            Ok(_) => self.config.timing.offline_delay(),
            Err(e) => {
                self.stats.tick_errors = self.stats.tick_errors.wrapping_add(1);
                error!("❌ error in main loop: {}", e);
                self.display.publish(StatusEvent::LoopError(e.to_string()));
                self.config.timing.error_cooldown()
            }
        }
    }

    /// Startup followed by the loop, until `interrupt` is raised or `before_tick`
    /// breaks. The hook runs ahead of every tick with the count of completed ticks.
    /// Pauses are slept in short slices so a raised `interrupt` ends them early.
    /// Returns the number of ticks run.
    pub fn run<F>(&mut self, interrupt: &AtomicBool, mut before_tick: F) -> Result<u64, NodeError>
    where
        F: FnMut(u64) -> ControlFlow<()>,
    {
        self.startup(interrupt)?;

        let mut ticks: u64 = 0;
        while !interrupt.load(Ordering::Relaxed) {
            if before_tick(ticks).is_break() {
                break;
            }
            let pause = self.step();
            ticks += 1;
            self.pause(pause, interrupt);
        }

        self.shutdown();
        Ok(ticks)
    }

    pub fn shutdown(&mut self) {
        info!("🛑 program stopped by user");
        self.net.shutdown(&mut self.state.connection);
    }

    pub fn state(&self) -> &NodeState {
        &self.state
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn stats(&self) -> &NodeStats {
        &self.stats
    }

    pub fn display(&self) -> &StatusDisplay {
        &self.display
    }

    pub fn connectivity(&self) -> &ConnectivitySupervisor {
        &self.net
    }

    pub fn telemetry(&self) -> &TelemetryDispatcher {
        &self.telemetry
    }

    pub fn command_stats(&self) -> &CommandStats {
        self.commands.stats()
    }

    pub fn acquisition_stats(&self) -> &AcquisitionStats {
        self.sensors.stats()
    }

    fn sensors_due(&self, now_ms: u64) -> bool {
        let interval = self.config.timing.sensor_interval();
        self.last_sensor_read_ms.map_or(true, |last| {
            Duration::from_millis(now_ms.saturating_sub(last)) >= interval
        })
    }

    fn pause(&self, duration: Duration, interrupt: &AtomicBool) {
        let mut remaining = duration;
        while !remaining.is_zero() && !interrupt.load(Ordering::Relaxed) {
            let slice = remaining.min(SLEEP_SLICE);
            self.clock.sleep(slice);
            remaining -= slice;
        }
    }

    fn process_commands(&mut self) -> usize {
        let messages = self.net.poll_messages(&mut self.state.connection, &mut self.display);
        let mut applied = 0;
        for message in messages {
            let applied_now = self.commands.on_message(
                &message.topic,
                &message.payload,
                &mut self.state.actuators,
                &mut self.actuators,
            );
            if applied_now.is_some() {
                applied += 1;
                let view = StatusView {
                    sensors: &self.state.sensors,
                    actuators: &self.state.actuators,
                    connection: &self.state.connection,
                    device_id: &self.config.device_id,
                };
                self.display.refresh_now(&view);
            }
        }
        self.stats.commands_applied = self.stats.commands_applied.wrapping_add(applied as u32);
        applied
    }

    fn dispatch(
        &mut self,
        kind: DestinationKind,
        now: DispatchTime,
    ) -> Result<DispatchOutcome, NodeError> {
        if !self.telemetry.destination(kind).is_due(now.elapsed_ms) {
            return Ok(DispatchOutcome::NotDue);
        }

        self.status_led.set_level(false)?;
        let outcome = self
            .telemetry
            .try_dispatch(kind, now, &mut self.state, &mut self.net, &mut self.display);
        if outcome.is_sent() {
            self.status_led.set_level(true)?;
            self.stats.dispatches_sent = self.stats.dispatches_sent.wrapping_add(1);
        } else if outcome.attempted() {
            self.stats.dispatch_failures = self.stats.dispatch_failures.wrapping_add(1);
        }
        Ok(outcome)
    }
}
