use crate::actuators::ActuatorState;
use crate::connectivity::ConnectivitySupervisor;
use crate::error::TransportError;
use crate::node::NodeState;
use crate::sensors::SensorSnapshot;
use crate::status::{StatusEvent, StatusSink};
use core::fmt;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

pub const DEFAULT_BROKER_CADENCE: Duration = Duration::from_secs(10);
pub const DEFAULT_API_CADENCE: Duration = Duration::from_secs(60);

const MAX_ERROR_BODY_CHARS: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DestinationKind {
    /// Low-latency sink reached over the pub/sub session.
    Broker,
    /// Durable storage reached over HTTP.
    Api,
}

impl DestinationKind {
    pub fn name(self) -> &'static str {
        match self {
            DestinationKind::Broker => "broker",
            DestinationKind::Api => "api",
        }
    }
}

impl fmt::Display for DestinationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DestinationKind::Broker => write!(f, "Broker"),
            DestinationKind::Api => write!(f, "API"),
        }
    }
}

/// How to treat a transport reply whose status cannot be determined.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AmbiguousResponsePolicy {
    #[default]
    AssumeSuccess,
    AssumeFailure,
}

/// When a failed destination becomes eligible again.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum RetryPolicy {
    /// Retry on every tick until the send succeeds.
    #[default]
    EveryTick,
    /// Exponential backoff between failed attempts, capped at `max_ms`.
    Backoff { initial_ms: u64, max_ms: u64 },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DestinationStats {
    pub attempts: u32,
    pub successes: u32,
    pub failures: u32,
    pub offline_failures: u32,
    pub consecutive_failures: u32,
}

#[derive(Debug, Clone)]
pub struct TelemetryDestination {
    pub kind: DestinationKind,
    pub cadence_ms: u64,
    /// Elapsed time of the last confirmed send. Never advanced by a failed attempt.
    pub last_send_ms: u64,
    retry_at_ms: Option<u64>,
    backoff_ms: u64,
    stats: DestinationStats,
}

impl TelemetryDestination {
    pub fn new(kind: DestinationKind, cadence: Duration) -> Self {
        Self {
            kind,
            cadence_ms: cadence.as_millis() as u64,
            last_send_ms: 0,
            retry_at_ms: None,
            backoff_ms: 0,
            stats: DestinationStats::default(),
        }
    }

    pub fn is_due(&self, now_ms: u64) -> bool {
        now_ms.saturating_sub(self.last_send_ms) >= self.cadence_ms
            && self.retry_at_ms.map_or(true, |at| now_ms >= at)
    }

    pub fn stats(&self) -> &DestinationStats {
        &self.stats
    }

    fn record_success(&mut self, now_ms: u64) {
        self.last_send_ms = now_ms;
        self.retry_at_ms = None;
        self.backoff_ms = 0;
        self.stats.successes = self.stats.successes.wrapping_add(1);
        self.stats.consecutive_failures = 0;
    }

    fn record_failure(&mut self, now_ms: u64, policy: RetryPolicy) {
        self.stats.failures = self.stats.failures.wrapping_add(1);
        self.stats.consecutive_failures = self.stats.consecutive_failures.saturating_add(1);

        if let RetryPolicy::Backoff { initial_ms, max_ms } = policy {
            self.backoff_ms = if self.backoff_ms == 0 {
                initial_ms
            } else {
                self.backoff_ms.saturating_mul(2)
            }
            .min(max_ms);
            self.retry_at_ms = Some(now_ms.saturating_add(self.backoff_ms));
        }
    }
}

/// HTTP reply as seen by the node. `status` is `None` when the transport could not
/// tell whether the request was accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: Option<u16>,
    pub body: String,
}

impl HttpResponse {
    pub fn with_status(status: u16, body: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            body: body.into(),
        }
    }

    pub fn unknown(body: impl Into<String>) -> Self {
        Self {
            status: None,
            body: body.into(),
        }
    }
}

pub trait ApiTransport {
    /// POSTs `body` as JSON with the `X-API-Key` header set to `api_key`.
    fn post_json(
        &mut self,
        url: &str,
        api_key: &str,
        body: &str,
    ) -> Result<HttpResponse, TransportError>;
}

/// Body sent to the storage API: the flat sensor channels plus identity, capture
/// time and the actuator snapshot.
#[derive(Debug, Serialize)]
pub struct ApiRecord<'a> {
    #[serde(flatten)]
    pub sensors: &'a SensorSnapshot,
    pub device_id: &'a str,
    pub timestamp: u64,
    pub actuators: &'a ActuatorState,
}

pub fn broker_payload(sensors: &SensorSnapshot) -> Result<String, serde_json::Error> {
    serde_json::to_string(sensors)
}

pub fn api_payload(
    sensors: &SensorSnapshot,
    actuators: &ActuatorState,
    device_id: &str,
    timestamp: u64,
) -> Result<String, serde_json::Error> {
    serde_json::to_string(&ApiRecord {
        sensors,
        device_id,
        timestamp,
        actuators,
    })
}

/// Both clocks a dispatch needs: monotonic time for cadences, epoch time for payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchTime {
    pub elapsed_ms: u64,
    pub unix_seconds: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchFailure {
    #[error("connectivity unavailable")]
    Offline,
    #[error("payload serialization failed: {0}")]
    Serialization(String),
    #[error("publish error: {0}")]
    Publish(String),
    #[error("request error: {0}")]
    Transport(String),
    #[error("api returned {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error("response status unavailable")]
    Ambiguous,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    NotDue,
    Sent,
    Failed(DispatchFailure),
}

impl DispatchOutcome {
    pub fn is_sent(&self) -> bool {
        matches!(self, DispatchOutcome::Sent)
    }

    pub fn attempted(&self) -> bool {
        !matches!(self, DispatchOutcome::NotDue)
    }
}

#[derive(Debug, Clone)]
pub struct DispatcherSettings {
    pub device_id: String,
    pub publish_topic: String,
    pub api_url: String,
    pub api_key: String,
    pub broker_cadence: Duration,
    pub api_cadence: Duration,
    pub ambiguous_response: AmbiguousResponsePolicy,
    pub retry: RetryPolicy,
}

/// Pushes the current snapshots to each destination on its own cadence.
pub struct TelemetryDispatcher {
    broker: TelemetryDestination,
    api: TelemetryDestination,
    transport: Box<dyn ApiTransport>,
    device_id: String,
    publish_topic: String,
    api_url: String,
    api_key: String,
    ambiguous_response: AmbiguousResponsePolicy,
    retry: RetryPolicy,
}

impl TelemetryDispatcher {
    pub fn new(settings: DispatcherSettings, transport: Box<dyn ApiTransport>) -> Self {
        Self {
            broker: TelemetryDestination::new(DestinationKind::Broker, settings.broker_cadence),
            api: TelemetryDestination::new(DestinationKind::Api, settings.api_cadence),
            transport,
            device_id: settings.device_id,
            publish_topic: settings.publish_topic,
            api_url: settings.api_url,
            api_key: settings.api_key,
            ambiguous_response: settings.ambiguous_response,
            retry: settings.retry,
        }
    }

    /// Sends to `kind` if its cadence window has elapsed. A failed attempt leaves
    /// `last_send_ms` untouched so the same window is retried.
    pub fn try_dispatch(
        &mut self,
        kind: DestinationKind,
        now: DispatchTime,
        state: &mut NodeState,
        net: &mut ConnectivitySupervisor,
        status: &mut dyn StatusSink,
    ) -> DispatchOutcome {
        if !self.destination(kind).is_due(now.elapsed_ms) {
            return DispatchOutcome::NotDue;
        }

        let destination = self.destination_mut(kind);
        destination.stats.attempts = destination.stats.attempts.wrapping_add(1);

        let online = match kind {
            DestinationKind::Broker => {
                net.ensure_link(&mut state.connection, status)
                    && net.ensure_session(&mut state.connection, status)
            }
            DestinationKind::Api => net.ensure_link(&mut state.connection, status),
        };
        if !online {
            let destination = self.destination_mut(kind);
            destination.stats.offline_failures = destination.stats.offline_failures.wrapping_add(1);
            return self.fail(kind, now.elapsed_ms, DispatchFailure::Offline, status);
        }

        status.publish(StatusEvent::Sending(kind));
        let result = match kind {
            DestinationKind::Broker => self.send_to_broker(&state.sensors, net),
            DestinationKind::Api => self.send_to_api(state, now.unix_seconds),
        };

        match result {
            Ok(()) => {
                self.destination_mut(kind).record_success(now.elapsed_ms);
                info!(destination = kind.name(), "✅ data sent to {}", kind);
                status.publish(StatusEvent::Sent(kind));
                DispatchOutcome::Sent
            }
            Err(failure) => self.fail(kind, now.elapsed_ms, failure, status),
        }
    }

    pub fn destination(&self, kind: DestinationKind) -> &TelemetryDestination {
        match kind {
            DestinationKind::Broker => &self.broker,
            DestinationKind::Api => &self.api,
        }
    }

    fn destination_mut(&mut self, kind: DestinationKind) -> &mut TelemetryDestination {
        match kind {
            DestinationKind::Broker => &mut self.broker,
            DestinationKind::Api => &mut self.api,
        }
    }

    fn fail(
        &mut self,
        kind: DestinationKind,
        now_ms: u64,
        failure: DispatchFailure,
        status: &mut dyn StatusSink,
    ) -> DispatchOutcome {
        let retry = self.retry;
        self.destination_mut(kind).record_failure(now_ms, retry);
        warn!(destination = kind.name(), "❌ {} send failed: {}", kind, failure);
        status.publish(StatusEvent::SendFailed {
            destination: kind,
            reason: failure.to_string(),
        });
        DispatchOutcome::Failed(failure)
    }

    fn send_to_broker(
        &mut self,
        sensors: &SensorSnapshot,
        net: &mut ConnectivitySupervisor,
    ) -> Result<(), DispatchFailure> {
        let payload =
            broker_payload(sensors).map_err(|e| DispatchFailure::Serialization(e.to_string()))?;
        net.publish(&self.publish_topic, payload.as_bytes())
            .map_err(|e| DispatchFailure::Publish(e.to_string()))
    }

    fn send_to_api(&mut self, state: &NodeState, unix_seconds: u64) -> Result<(), DispatchFailure> {
        let body = api_payload(&state.sensors, &state.actuators, &self.device_id, unix_seconds)
            .map_err(|e| DispatchFailure::Serialization(e.to_string()))?;

        let response = self
            .transport
            .post_json(&self.api_url, &self.api_key, &body)
            .map_err(|e| DispatchFailure::Transport(e.to_string()))?;

        match response.status {
            Some(code) if (200..300).contains(&code) => {
                info!(status = code, response = %response.body, "api accepted record");
                Ok(())
            }
            Some(code) => Err(DispatchFailure::Rejected {
                status: code,
                body: response.body.chars().take(MAX_ERROR_BODY_CHARS).collect(),
            }),
            None => match self.ambiguous_response {
                AmbiguousResponsePolicy::AssumeSuccess => {
                    warn!("api response status unavailable, assuming the record was stored");
                    Ok(())
                }
                AmbiguousResponsePolicy::AssumeFailure => Err(DispatchFailure::Ambiguous),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_destination_due_window() {
        let destination =
            TelemetryDestination::new(DestinationKind::Broker, Duration::from_secs(10));
        assert!(!destination.is_due(0));
        assert!(!destination.is_due(9_999));
        assert!(destination.is_due(10_000));
    }

    #[test]
    fn test_failure_does_not_advance_last_send() {
        let mut destination =
            TelemetryDestination::new(DestinationKind::Api, Duration::from_secs(60));
        destination.record_failure(60_000, RetryPolicy::EveryTick);
        assert_eq!(destination.last_send_ms, 0);
        assert!(destination.is_due(60_100));

        destination.record_success(60_100);
        assert_eq!(destination.last_send_ms, 60_100);
        assert!(!destination.is_due(61_000));
        assert_eq!(destination.stats().consecutive_failures, 0);
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy::Backoff {
            initial_ms: 1_000,
            max_ms: 3_000,
        };
        let mut destination =
            TelemetryDestination::new(DestinationKind::Broker, Duration::from_secs(10));

        destination.record_failure(10_000, policy);
        assert!(!destination.is_due(10_500));
        assert!(destination.is_due(11_000));

        destination.record_failure(11_000, policy);
        assert!(!destination.is_due(12_500));
        assert!(destination.is_due(13_000));

        destination.record_failure(13_000, policy);
        assert!(destination.is_due(16_000));
        assert!(!destination.is_due(15_999));
    }

    #[test]
    fn test_api_payload_shape() {
        let sensors = SensorSnapshot {
            dht1_temperature: 24.0,
            ..SensorSnapshot::default()
        };
        let actuators = ActuatorState::default();
        let body = api_payload(&sensors, &actuators, "node-7", 1_700_000_123).unwrap();
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();

        assert_eq!(json["device_id"], "node-7");
        assert_eq!(json["timestamp"], 1_700_000_123u64);
        assert_eq!(json["DHT-1-Temp"], 24.0);
        assert_eq!(json["actuators"]["servo-angle"], 90);
        assert_eq!(json["actuators"]["relay"], 0);
    }

    #[test]
    fn test_broker_payload_is_flat_snapshot() {
        let body = broker_payload(&SensorSnapshot::default()).unwrap();
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json.as_object().unwrap().len(), 7);
        assert_eq!(json["Ultrasonic-Distance"], -1.0);
    }
}
