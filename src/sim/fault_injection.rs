use crate::command::{ActuatorId, LAST_VALUE_SEGMENT};
use crate::sim::hardware::SharedBench;
use crate::sim::network::{ApiMode, SharedNetwork};
use heapless::Vec;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

const MAX_ACTIVE_FAULTS: usize = 8;
const MAX_EVENTS_PER_TICK: usize = 16;

// Per-tick injection rates
const LINK_DROP_RATE_PERCENT: f32 = 0.2;
const SESSION_DROP_RATE_PERCENT: f32 = 0.4;
const CLIMATE_FAULT_RATE_PERCENT: f32 = 1.0;
const ECHO_MISS_RATE_PERCENT: f32 = 1.5;
const API_FAULT_RATE_PERCENT: f32 = 0.5;
const OPERATOR_COMMAND_RATE_PERCENT: f32 = 2.0;
// Share of operator commands sent with a garbage payload
const MALFORMED_COMMAND_PERCENT: f32 = 10.0;

// Fault durations, in ticks
const MIN_FAULT_DURATION_TICKS: u32 = 5;
const MAX_FAULT_DURATION_TICKS: u32 = 50;

const DEFAULT_SEED: u64 = 0x1234_5678_9ABC_DEF0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SimFault {
    LinkDrop,
    SessionDrop,
    ClimateZero(usize),
    ClimateNoResponse(usize),
    EchoMiss,
    ApiError,
    ApiAmbiguous,
}

impl SimFault {
    fn same_target(self, other: SimFault) -> bool {
        use SimFault::*;
        match (self, other) {
            (ClimateZero(a) | ClimateNoResponse(a), ClimateZero(b) | ClimateNoResponse(b)) => {
                a == b
            }
            (ApiError | ApiAmbiguous, ApiError | ApiAmbiguous) => true,
            (a, b) => a == b,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveFault {
    pub fault: SimFault,
    pub ticks_remaining: u32,
    pub injected_at_tick: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InjectionEvent {
    Injected(SimFault),
    Recovered(SimFault),
    OperatorCommand { topic: String, payload: String },
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FaultInjectionStats {
    pub total_faults_injected: u32,
    pub link_drops: u32,
    pub session_drops: u32,
    pub climate_faults: u32,
    pub echo_misses: u32,
    pub api_faults: u32,
    pub recovered_faults: u32,
    pub manual_cleared_faults: u32,
    pub operator_commands: u32,
    pub malformed_commands: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaultInjectionConfig {
    pub enabled: bool,
    pub link_drop_rate_percent: f32,
    pub session_drop_rate_percent: f32,
    pub climate_fault_rate_percent: f32,
    pub echo_miss_rate_percent: f32,
    pub api_fault_rate_percent: f32,
    pub operator_command_rate_percent: f32,
    pub malformed_command_percent: f32,
    pub min_duration_ticks: u32,
    pub max_duration_ticks: u32,
}

impl Default for FaultInjectionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            link_drop_rate_percent: LINK_DROP_RATE_PERCENT,
            session_drop_rate_percent: SESSION_DROP_RATE_PERCENT,
            climate_fault_rate_percent: CLIMATE_FAULT_RATE_PERCENT,
            echo_miss_rate_percent: ECHO_MISS_RATE_PERCENT,
            api_fault_rate_percent: API_FAULT_RATE_PERCENT,
            operator_command_rate_percent: OPERATOR_COMMAND_RATE_PERCENT,
            malformed_command_percent: MALFORMED_COMMAND_PERCENT,
            min_duration_ticks: MIN_FAULT_DURATION_TICKS,
            max_duration_ticks: MAX_FAULT_DURATION_TICKS,
        }
    }
}

/// Probabilistic fault and operator-traffic generator for the simulated bench.
#[derive(Debug)]
pub struct FaultInjector {
    config: FaultInjectionConfig,
    device_id: String,
    schema_versions: std::vec::Vec<String>,
    active_faults: Vec<ActiveFault, MAX_ACTIVE_FAULTS>,
    stats: FaultInjectionStats,
    tick_count: u64,

    // Linear congruential generator, deterministic per seed
    rng_state: u64,
}

impl FaultInjector {
    pub fn new(device_id: impl Into<String>, schema_versions: std::vec::Vec<String>) -> Self {
        Self::with_config(FaultInjectionConfig::default(), device_id, schema_versions, DEFAULT_SEED)
    }

    pub fn with_config(
        config: FaultInjectionConfig,
        device_id: impl Into<String>,
        schema_versions: std::vec::Vec<String>,
        seed: u64,
    ) -> Self {
        Self {
            config,
            device_id: device_id.into(),
            schema_versions,
            active_faults: Vec::new(),
            stats: FaultInjectionStats::default(),
            tick_count: 0,
            rng_state: seed,
        }
    }

    /// Call once per control-loop tick, before the tick runs.
    pub fn update(
        &mut self,
        bench: &SharedBench,
        net: &SharedNetwork,
    ) -> Vec<InjectionEvent, MAX_EVENTS_PER_TICK> {
        let mut events = Vec::new();
        if !self.config.enabled {
            return events;
        }

        self.tick_count += 1;
        self.expire_faults(bench, net, &mut events);
        self.attempt_fault_injection(bench, net, &mut events);
        self.maybe_send_operator_command(net, &mut events);
        events
    }

    /// Reverts every active fault, as an operator reset would.
    pub fn clear_faults(&mut self, bench: &SharedBench, net: &SharedNetwork) {
        let cleared = self.active_faults.len() as u32;
        for active in self.active_faults.iter() {
            revert(active.fault, bench, net);
        }
        self.active_faults.clear();
        self.stats.manual_cleared_faults += cleared;
    }

    pub fn stats(&self) -> &FaultInjectionStats {
        &self.stats
    }

    pub fn active_faults(&self) -> &[ActiveFault] {
        &self.active_faults
    }

    fn expire_faults(
        &mut self,
        bench: &SharedBench,
        net: &SharedNetwork,
        events: &mut Vec<InjectionEvent, MAX_EVENTS_PER_TICK>,
    ) {
        let mut index = 0;
        while index < self.active_faults.len() {
            let active = &mut self.active_faults[index];
            if active.ticks_remaining > 0 {
                active.ticks_remaining -= 1;
                index += 1;
                continue;
            }
            let fault = active.fault;
            revert(fault, bench, net);
            self.active_faults.swap_remove(index);
            self.stats.recovered_faults += 1;
            info!(?fault, "🔧 simulated fault cleared");
            let _ = events.push(InjectionEvent::Recovered(fault));
        }
    }

    fn attempt_fault_injection(
        &mut self,
        bench: &SharedBench,
        net: &SharedNetwork,
        events: &mut Vec<InjectionEvent, MAX_EVENTS_PER_TICK>,
    ) {
        let sensor = (self.next_random() >> 33) as usize % 2;
        let candidates = [
            (SimFault::LinkDrop, self.config.link_drop_rate_percent),
            (SimFault::SessionDrop, self.config.session_drop_rate_percent),
            (
                if self.random_float() < 0.5 {
                    SimFault::ClimateZero(sensor)
                } else {
                    SimFault::ClimateNoResponse(sensor)
                },
                self.config.climate_fault_rate_percent,
            ),
            (SimFault::EchoMiss, self.config.echo_miss_rate_percent),
            (
                if self.random_float() < 0.5 {
                    SimFault::ApiError
                } else {
                    SimFault::ApiAmbiguous
                },
                self.config.api_fault_rate_percent,
            ),
        ];

        for (fault, rate_percent) in candidates {
            if self.active_faults.iter().any(|a| a.fault.same_target(fault)) {
                continue;
            }
            if !self.should_inject(rate_percent) {
                continue;
            }

            // Session drops are instantaneous; the node reconnects on its own.
            let ticks_remaining = match fault {
                SimFault::SessionDrop => 0,
                _ => self.random_duration(),
            };
            let active = ActiveFault {
                fault,
                ticks_remaining,
                injected_at_tick: self.tick_count,
            };
            if self.active_faults.push(active).is_err() {
                break;
            }
            apply(fault, bench, net);
            self.update_injection_stats(fault);
            warn!(?fault, ticks = ticks_remaining, "💥 injecting simulated fault");
            let _ = events.push(InjectionEvent::Injected(fault));
        }
    }

    fn maybe_send_operator_command(
        &mut self,
        net: &SharedNetwork,
        events: &mut Vec<InjectionEvent, MAX_EVENTS_PER_TICK>,
    ) {
        if self.schema_versions.is_empty()
            || !self.should_inject(self.config.operator_command_rate_percent)
        {
            return;
        }

        let actuator = ActuatorId::ALL[self.random_u32() as usize % ActuatorId::ALL.len()];
        let version_index = self.random_u32() as usize % self.schema_versions.len();
        let version = &self.schema_versions[version_index];
        let topic = format!(
            "/{}/devices/{}/{}/{}",
            version,
            self.device_id,
            actuator.name(),
            LAST_VALUE_SEGMENT
        );

        let payload = if self.random_float() * 100.0 < self.config.malformed_command_percent {
            self.stats.malformed_commands += 1;
            "not-a-number".to_string()
        } else {
            let max = match actuator {
                ActuatorId::ServoAngle => 200.0,
                ActuatorId::Relay => 1.0,
                ActuatorId::Buzzer => 120.0,
                _ => 300.0,
            };
            format!("{:.1}", self.random_float() * max)
        };

        self.stats.operator_commands += 1;
        info!(%topic, %payload, "🎛️ simulated operator command");
        net.borrow_mut().deliver(topic.as_str(), payload.as_bytes());
        let _ = events.push(InjectionEvent::OperatorCommand { topic, payload });
    }

    fn should_inject(&mut self, rate_percent: f32) -> bool {
        rate_percent >= 100.0 || self.random_float() < rate_percent / 100.0
    }

    fn random_duration(&mut self) -> u32 {
        let range = self
            .config
            .max_duration_ticks
            .saturating_sub(self.config.min_duration_ticks);
        if range == 0 {
            return self.config.min_duration_ticks;
        }
        self.config.min_duration_ticks + self.random_u32() % range
    }

    fn update_injection_stats(&mut self, fault: SimFault) {
        self.stats.total_faults_injected += 1;
        match fault {
            SimFault::LinkDrop => self.stats.link_drops += 1,
            SimFault::SessionDrop => self.stats.session_drops += 1,
            SimFault::ClimateZero(_) | SimFault::ClimateNoResponse(_) => {
                self.stats.climate_faults += 1
            }
            SimFault::EchoMiss => self.stats.echo_misses += 1,
            SimFault::ApiError | SimFault::ApiAmbiguous => self.stats.api_faults += 1,
        }
    }

    fn next_random(&mut self) -> u64 {
        // X(n+1) = aX(n) + c, Numerical Recipes parameters
        self.rng_state = self.rng_state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
        self.rng_state
    }

    fn random_u32(&mut self) -> u32 {
        (self.next_random() >> 16) as u32
    }

    fn random_float(&mut self) -> f32 {
        (self.next_random() as f32) / (u64::MAX as f32)
    }
}

fn apply(fault: SimFault, bench: &SharedBench, net: &SharedNetwork) {
    match fault {
        SimFault::LinkDrop => {
            let mut net = net.borrow_mut();
            net.drop_link();
            net.link_available = false;
        }
        SimFault::SessionDrop => net.borrow_mut().session_open = false,
        SimFault::ClimateZero(i) => bench.borrow_mut().faults.dht_zero[i] = true,
        SimFault::ClimateNoResponse(i) => bench.borrow_mut().faults.dht_no_response[i] = true,
        SimFault::EchoMiss => bench.borrow_mut().faults.echo_miss = true,
        SimFault::ApiError => net.borrow_mut().api_mode = ApiMode::HttpError(500),
        SimFault::ApiAmbiguous => net.borrow_mut().api_mode = ApiMode::Ambiguous,
    }
}

fn revert(fault: SimFault, bench: &SharedBench, net: &SharedNetwork) {
    match fault {
        SimFault::LinkDrop => net.borrow_mut().link_available = true,
        SimFault::SessionDrop => {}
        SimFault::ClimateZero(i) => bench.borrow_mut().faults.dht_zero[i] = false,
        SimFault::ClimateNoResponse(i) => bench.borrow_mut().faults.dht_no_response[i] = false,
        SimFault::EchoMiss => bench.borrow_mut().faults.echo_miss = false,
        SimFault::ApiError | SimFault::ApiAmbiguous => net.borrow_mut().api_mode = ApiMode::Normal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::hardware::Bench;
    use crate::sim::network::NetworkState;

    fn versions() -> std::vec::Vec<String> {
        vec!["v1.6".to_string(), "v2.0".to_string()]
    }

    #[test]
    fn test_fault_injection_disabled() {
        let config = FaultInjectionConfig {
            enabled: false,
            ..FaultInjectionConfig::default()
        };
        let mut injector = FaultInjector::with_config(config, "node", versions(), 7);
        let bench = Bench::shared();
        let net = NetworkState::shared();

        for _ in 0..100 {
            assert!(injector.update(&bench, &net).is_empty());
        }
        assert_eq!(injector.stats().total_faults_injected, 0);
    }

    #[test]
    fn test_same_seed_same_sequence() {
        let bench_a = Bench::shared();
        let net_a = NetworkState::shared();
        let bench_b = Bench::shared();
        let net_b = NetworkState::shared();
        let config = FaultInjectionConfig::default();
        let mut a = FaultInjector::with_config(config.clone(), "node", versions(), 42);
        let mut b = FaultInjector::with_config(config, "node", versions(), 42);

        for _ in 0..500 {
            assert_eq!(a.update(&bench_a, &net_a), b.update(&bench_b, &net_b));
        }
    }

    #[test]
    fn test_faults_are_applied_and_recovered() {
        let config = FaultInjectionConfig {
            echo_miss_rate_percent: 100.0,
            link_drop_rate_percent: 0.0,
            session_drop_rate_percent: 0.0,
            climate_fault_rate_percent: 0.0,
            api_fault_rate_percent: 0.0,
            operator_command_rate_percent: 0.0,
            min_duration_ticks: 2,
            max_duration_ticks: 2,
            ..FaultInjectionConfig::default()
        };
        let mut injector = FaultInjector::with_config(config, "node", versions(), 1);
        let bench = Bench::shared();
        let net = NetworkState::shared();

        let events = injector.update(&bench, &net);
        assert!(events.contains(&InjectionEvent::Injected(SimFault::EchoMiss)));
        assert!(bench.borrow().faults.echo_miss);

        injector.update(&bench, &net);
        injector.update(&bench, &net);
        let events = injector.update(&bench, &net);
        assert!(events.contains(&InjectionEvent::Recovered(SimFault::EchoMiss)));
        assert_eq!(injector.stats().recovered_faults, 1);
    }

    #[test]
    fn test_operator_commands_target_subscribed_topics() {
        let config = FaultInjectionConfig {
            operator_command_rate_percent: 100.0,
            link_drop_rate_percent: 0.0,
            session_drop_rate_percent: 0.0,
            climate_fault_rate_percent: 0.0,
            echo_miss_rate_percent: 0.0,
            api_fault_rate_percent: 0.0,
            ..FaultInjectionConfig::default()
        };
        let mut injector = FaultInjector::with_config(config, "node-9", versions(), 3);
        let bench = Bench::shared();
        let net = NetworkState::shared();
        let topics = crate::command::subscription_topics("node-9", &versions());

        for _ in 0..20 {
            injector.update(&bench, &net);
        }
        let net = net.borrow();
        assert_eq!(net.inbound.len(), 20);
        for message in &net.inbound {
            assert!(topics.contains(&message.topic), "unexpected topic {}", message.topic);
        }
    }

    #[test]
    fn test_manual_fault_clearing() {
        let config = FaultInjectionConfig {
            link_drop_rate_percent: 100.0,
            echo_miss_rate_percent: 100.0,
            session_drop_rate_percent: 0.0,
            climate_fault_rate_percent: 0.0,
            api_fault_rate_percent: 0.0,
            operator_command_rate_percent: 0.0,
            ..FaultInjectionConfig::default()
        };
        let mut injector = FaultInjector::with_config(config, "node", versions(), 5);
        let bench = Bench::shared();
        let net = NetworkState::shared();

        injector.update(&bench, &net);
        assert_eq!(injector.active_faults().len(), 2);
        assert!(!net.borrow().link_available);

        injector.clear_faults(&bench, &net);
        assert!(injector.active_faults().is_empty());
        assert!(net.borrow().link_available);
        assert!(!bench.borrow().faults.echo_miss);
        assert_eq!(injector.stats().manual_cleared_faults, 2);
    }
}
