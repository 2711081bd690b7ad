use sensor_node::clock::ManualClock;
use sensor_node::config::NodeConfig;
use sensor_node::connectivity::ConnectivitySupervisor;
use sensor_node::sim::network::{
    ApiMode, NetworkState, SharedNetwork, SharedStore, SimApiTransport, SimBroker, SimLink,
};
use sensor_node::sim::store::TelemetryStore;
use sensor_node::status::StatusEvent;
use sensor_node::telemetry::{
    AmbiguousResponsePolicy, DestinationKind, DispatchFailure, DispatchOutcome, DispatchTime,
    RetryPolicy, TelemetryDispatcher,
};
use sensor_node::NodeState;
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::atomic::AtomicBool;

struct Harness {
    clock: Rc<ManualClock>,
    net: SharedNetwork,
    store: SharedStore,
    supervisor: ConnectivitySupervisor,
    dispatcher: TelemetryDispatcher,
    state: NodeState,
    events: Vec<StatusEvent>,
}

impl Harness {
    fn new(config: NodeConfig, store: TelemetryStore) -> Self {
        let clock = Rc::new(ManualClock::new());
        let net = NetworkState::shared();
        let store = Rc::new(RefCell::new(store));
        let supervisor = ConnectivitySupervisor::new(
            Box::new(SimLink::new(net.clone(), clock.clone())),
            Box::new(SimBroker::new(net.clone())),
            config.session_options(),
        )
        .with_credentials(config.link_credentials());
        let dispatcher = TelemetryDispatcher::new(
            config.dispatcher_settings(),
            Box::new(SimApiTransport::new(net.clone(), store.clone(), clock.clone())),
        );
        let mut harness = Self {
            clock,
            net,
            store,
            supervisor,
            dispatcher,
            state: NodeState::default(),
            events: Vec::new(),
        };
        assert!(harness.supervisor.establish(
            &mut harness.state.connection,
            &mut harness.events,
            &*harness.clock,
            &AtomicBool::new(false),
        ));
        harness
    }

    fn with_defaults() -> Self {
        Self::new(NodeConfig::default(), TelemetryStore::new())
    }

    /// Mirrors one loop tick at `second`: keep-alive probe, then both destinations.
    fn tick(&mut self, second: u64) -> (DispatchOutcome, DispatchOutcome) {
        self.supervisor.ensure_link(&mut self.state.connection, &mut self.events);
        self.supervisor.probe_session(&mut self.state.connection, &mut self.events);
        let now = DispatchTime {
            elapsed_ms: second * 1000,
            unix_seconds: ManualClock::DEFAULT_EPOCH + second,
        };
        let broker = self.dispatcher.try_dispatch(
            DestinationKind::Broker,
            now,
            &mut self.state,
            &mut self.supervisor,
            &mut self.events,
        );
        let api = self.dispatcher.try_dispatch(
            DestinationKind::Api,
            now,
            &mut self.state,
            &mut self.supervisor,
            &mut self.events,
        );
        (broker, api)
    }
}

#[test]
fn test_cadences_from_time_zero() {
    let mut harness = Harness::with_defaults();
    let mut broker_sends = Vec::new();
    let mut api_sends = Vec::new();

    for second in 1..=180 {
        let (broker, api) = harness.tick(second);
        if broker.is_sent() {
            broker_sends.push(second);
        }
        if api.is_sent() {
            api_sends.push(second);
        }
    }

    assert_eq!(broker_sends, (1..=18).map(|n| n * 10).collect::<Vec<u64>>());
    assert_eq!(api_sends, vec![60, 120, 180]);
    assert_eq!(harness.net.borrow().published.len(), 18);
    assert_eq!(harness.store.borrow().len(), 3);
}

#[test]
fn test_failed_send_is_retried_next_tick() {
    let mut harness = Harness::with_defaults();
    for second in 1..60 {
        harness.tick(second);
    }

    harness.net.borrow_mut().api_mode = ApiMode::HttpError(500);
    let (_, api) = harness.tick(60);
    assert!(matches!(
        api,
        DispatchOutcome::Failed(DispatchFailure::Rejected { status: 500, .. })
    ));
    assert_eq!(harness.dispatcher.destination(DestinationKind::Api).last_send_ms, 0);

    harness.net.borrow_mut().api_mode = ApiMode::Normal;
    let (_, api) = harness.tick(61);
    assert!(api.is_sent());
    assert_eq!(harness.dispatcher.destination(DestinationKind::Api).last_send_ms, 61_000);

    let mut later = Vec::new();
    for second in 62..=125 {
        if harness.tick(second).1.is_sent() {
            later.push(second);
        }
    }
    assert_eq!(later, vec![121]);
}

#[test]
fn test_no_delivery_while_offline_then_resume() {
    let mut harness = Harness::with_defaults();
    for second in 1..10 {
        harness.tick(second);
    }

    {
        let mut net = harness.net.borrow_mut();
        net.drop_link();
        net.link_available = false;
    }
    for second in 10..15 {
        let (broker, _) = harness.tick(second);
        assert!(matches!(broker, DispatchOutcome::Failed(DispatchFailure::Offline)));
    }
    assert!(harness.net.borrow().published.is_empty());
    assert_eq!(harness.dispatcher.destination(DestinationKind::Broker).last_send_ms, 0);
    assert!(harness
        .events
        .iter()
        .any(|e| matches!(
            e,
            StatusEvent::SendFailed {
                destination: DestinationKind::Broker,
                ..
            }
        )));

    harness.net.borrow_mut().link_available = true;
    let (broker, _) = harness.tick(15);
    assert!(broker.is_sent());
    assert_eq!(harness.dispatcher.destination(DestinationKind::Broker).last_send_ms, 15_000);
    assert_eq!(harness.net.borrow().published.len(), 1);
    assert!(harness.state.connection.is_online());
}

#[test]
fn test_broker_payload_topic_and_shape() {
    let mut harness = Harness::with_defaults();
    harness.state.sensors.dht1_temperature = 23.5;
    harness.state.sensors.light = 777;
    harness.tick(10);

    let net = harness.net.borrow();
    let message = &net.published[0];
    assert_eq!(message.topic, "/v2.0/devices/sensorverse-32");
    let json: serde_json::Value = serde_json::from_str(&message.payload).unwrap();
    assert_eq!(json["DHT-1-Temp"], 23.5);
    assert_eq!(json["LDR-Intensity"], 777);
    assert_eq!(json["Ultrasonic-Distance"], -1.0);
    assert!(json.get("device_id").is_none());
}

#[test]
fn test_api_record_contents() {
    let mut harness = Harness::with_defaults();
    harness.state.actuators.servo_angle = 135;
    harness.state.actuators.relay = true;
    harness.tick(60);

    let record = harness.store.borrow().latest(Some("sensorverse-32")).unwrap();
    assert_eq!(record["device_id"], "sensorverse-32");
    assert_eq!(record["timestamp"], ManualClock::DEFAULT_EPOCH + 60);
    assert_eq!(record["actuators"]["servo-angle"], 135);
    assert_eq!(record["actuators"]["relay"], 1);
    assert!(record.get("DHT-2-Humid").is_some());
}

#[test]
fn test_ambiguous_response_policies() {
    let mut optimistic = Harness::with_defaults();
    optimistic.net.borrow_mut().api_mode = ApiMode::Ambiguous;
    let (_, api) = optimistic.tick(60);
    assert!(api.is_sent());
    assert_eq!(optimistic.store.borrow().len(), 1);

    let mut config = NodeConfig::default();
    config.telemetry.ambiguous_response = AmbiguousResponsePolicy::AssumeFailure;
    let mut strict = Harness::new(config, TelemetryStore::new());
    strict.net.borrow_mut().api_mode = ApiMode::Ambiguous;
    let (_, api) = strict.tick(60);
    assert_eq!(api, DispatchOutcome::Failed(DispatchFailure::Ambiguous));
    assert_eq!(strict.dispatcher.destination(DestinationKind::Api).last_send_ms, 0);
}

#[test]
fn test_api_key_mismatch_is_rejected() {
    let mut config = NodeConfig::default();
    config.api.api_key = "wrong".to_string();
    let mut harness = Harness::new(config, TelemetryStore::new().with_api_key("sensorvers3"));

    let (_, api) = harness.tick(60);
    assert!(matches!(
        api,
        DispatchOutcome::Failed(DispatchFailure::Rejected { status: 401, .. })
    ));
    assert!(harness.store.borrow().is_empty());
}

#[test]
fn test_transport_error_counts_failure() {
    let mut harness = Harness::with_defaults();
    harness.net.borrow_mut().api_mode = ApiMode::TransportError;
    let (_, api) = harness.tick(60);
    assert!(matches!(api, DispatchOutcome::Failed(DispatchFailure::Transport(_))));

    let stats = harness.dispatcher.destination(DestinationKind::Api).stats();
    assert_eq!(stats.attempts, 1);
    assert_eq!(stats.failures, 1);
    assert_eq!(stats.consecutive_failures, 1);
}

#[test]
fn test_backoff_policy_spaces_out_retries() {
    let mut config = NodeConfig::default();
    config.telemetry.retry = RetryPolicy::Backoff {
        initial_ms: 2_000,
        max_ms: 8_000,
    };
    let mut harness = Harness::new(config, TelemetryStore::new());
    harness.net.borrow_mut().fail_publish = true;

    let mut attempts = Vec::new();
    for second in 1..=30 {
        if harness.tick(second).0.attempted() {
            attempts.push(second);
        }
    }
    assert_eq!(attempts, vec![10, 12, 16, 24]);
    assert!(harness.net.borrow().published.is_empty());
}
