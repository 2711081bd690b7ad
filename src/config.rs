//! Node configuration, loaded from a JSON file or built from defaults.

use crate::command::{subscription_topics, DEFAULT_SCHEMA_VERSIONS};
use crate::connectivity::{LinkCredentials, SessionOptions};
use crate::error::ConfigError;
use crate::telemetry::{AmbiguousResponsePolicy, DispatcherSettings, RetryPolicy};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::info;

pub const DEFAULT_DEVICE_ID: &str = "sensorverse-32";
pub const DEFAULT_CLIENT_ID: &str = "esp32glitchhunters";
pub const DEFAULT_BROKER_HOST: &str = "industrial.api.ubidots.com";
pub const DEFAULT_BROKER_PORT: u16 = 1883;
pub const DEFAULT_KEEP_ALIVE_SECS: u16 = 30;
pub const DEFAULT_API_URL: &str = "http://localhost:5000/api/sensors";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub ssid: String,
    pub password: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            ssid: "sensor-lab".to_string(),
            password: String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    /// Account token, sent as the session user name.
    pub token: String,
    pub keep_alive_secs: u16,
    pub schema_versions: Vec<String>,
    /// Overrides the `/v2.0/devices/{device}` publish topic.
    pub publish_topic: Option<String>,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_BROKER_HOST.to_string(),
            port: DEFAULT_BROKER_PORT,
            client_id: DEFAULT_CLIENT_ID.to_string(),
            token: String::new(),
            keep_alive_secs: DEFAULT_KEEP_ALIVE_SECS,
            schema_versions: DEFAULT_SCHEMA_VERSIONS.iter().map(|v| v.to_string()).collect(),
            publish_topic: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub url: String,
    pub api_key: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_API_URL.to_string(),
            api_key: String::new(),
        }
    }
}

/// Every period the node runs on, in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    pub sensor_interval_ms: u64,
    pub dht_spacing_ms: u64,
    pub echo_timeout_ms: u64,
    pub broker_cadence_ms: u64,
    pub api_cadence_ms: u64,
    pub display_rotation_ms: u64,
    pub banner_hold_ms: u64,
    pub loop_delay_ms: u64,
    pub offline_delay_ms: u64,
    pub error_cooldown_ms: u64,
    pub link_timeout_ms: u64,
    pub connect_retry_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            sensor_interval_ms: 2_000,
            dht_spacing_ms: 1_000,
            echo_timeout_ms: 30,
            broker_cadence_ms: 10_000,
            api_cadence_ms: 60_000,
            display_rotation_ms: 3_000,
            banner_hold_ms: 1_000,
            loop_delay_ms: 100,
            offline_delay_ms: 5_000,
            error_cooldown_ms: 5_000,
            link_timeout_ms: 20_000,
            connect_retry_ms: 10_000,
        }
    }
}

impl TimingConfig {
    pub fn sensor_interval(&self) -> Duration {
        Duration::from_millis(self.sensor_interval_ms)
    }

    pub fn dht_spacing(&self) -> Duration {
        Duration::from_millis(self.dht_spacing_ms)
    }

    pub fn echo_timeout(&self) -> Duration {
        Duration::from_millis(self.echo_timeout_ms)
    }

    pub fn display_rotation(&self) -> Duration {
        Duration::from_millis(self.display_rotation_ms)
    }

    pub fn banner_hold(&self) -> Duration {
        Duration::from_millis(self.banner_hold_ms)
    }

    pub fn loop_delay(&self) -> Duration {
        Duration::from_millis(self.loop_delay_ms)
    }

    pub fn offline_delay(&self) -> Duration {
        Duration::from_millis(self.offline_delay_ms)
    }

    pub fn error_cooldown(&self) -> Duration {
        Duration::from_millis(self.error_cooldown_ms)
    }

    pub fn link_timeout(&self) -> Duration {
        Duration::from_millis(self.link_timeout_ms)
    }

    pub fn connect_retry(&self) -> Duration {
        Duration::from_millis(self.connect_retry_ms)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryPolicy {
    pub ambiguous_response: AmbiguousResponsePolicy,
    pub retry: RetryPolicy,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub device_id: String,
    pub network: NetworkConfig,
    pub broker: BrokerConfig,
    pub api: ApiConfig,
    pub timing: TimingConfig,
    pub telemetry: TelemetryPolicy,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            device_id: DEFAULT_DEVICE_ID.to_string(),
            network: NetworkConfig::default(),
            broker: BrokerConfig::default(),
            api: ApiConfig::default(),
            timing: TimingConfig::default(),
            telemetry: TelemetryPolicy::default(),
        }
    }
}

impl NodeConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)?;
        let config = Self::from_json_str(&text)?;
        info!(path = %path.display(), device = %config.device_id, "⚙️ configuration loaded");
        Ok(config)
    }

    /// Parses a JSON document; missing fields take their defaults.
    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        let config: NodeConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.device_id.trim().is_empty() {
            return Err(ConfigError::Invalid("device_id must not be empty".into()));
        }
        if self.device_id.contains('/') {
            return Err(ConfigError::Invalid(format!(
                "device_id {:?} must not contain '/'",
                self.device_id
            )));
        }
        if self.network.ssid.trim().is_empty() {
            return Err(ConfigError::Invalid("network.ssid must not be empty".into()));
        }
        if self.broker.host.trim().is_empty() || self.broker.port == 0 {
            return Err(ConfigError::Invalid(format!(
                "broker address {}:{} is not usable",
                self.broker.host, self.broker.port
            )));
        }
        if self.broker.client_id.trim().is_empty() {
            return Err(ConfigError::Invalid("broker.client_id must not be empty".into()));
        }
        if self.broker.schema_versions.is_empty() {
            return Err(ConfigError::Invalid(
                "broker.schema_versions needs at least one entry".into(),
            ));
        }
        if self.api.url.trim().is_empty() {
            return Err(ConfigError::Invalid("api.url must not be empty".into()));
        }

        let t = &self.timing;
        for (name, value) in [
            ("sensor_interval_ms", t.sensor_interval_ms),
            ("echo_timeout_ms", t.echo_timeout_ms),
            ("broker_cadence_ms", t.broker_cadence_ms),
            ("api_cadence_ms", t.api_cadence_ms),
            ("display_rotation_ms", t.display_rotation_ms),
            ("link_timeout_ms", t.link_timeout_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("timing.{} must be non-zero", name)));
            }
        }

        if let RetryPolicy::Backoff { initial_ms, max_ms } = self.telemetry.retry {
            if initial_ms == 0 || max_ms < initial_ms {
                return Err(ConfigError::Invalid(format!(
                    "backoff needs 0 < initial_ms <= max_ms, got {} and {}",
                    initial_ms, max_ms
                )));
            }
        }
        Ok(())
    }

    pub fn publish_topic(&self) -> String {
        self.broker
            .publish_topic
            .clone()
            .unwrap_or_else(|| format!("/v2.0/devices/{}", self.device_id))
    }

    pub fn subscription_topics(&self) -> Vec<String> {
        subscription_topics(&self.device_id, &self.broker.schema_versions)
    }

    pub fn link_credentials(&self) -> LinkCredentials {
        LinkCredentials {
            ssid: self.network.ssid.clone(),
            password: self.network.password.clone(),
        }
    }

    pub fn session_options(&self) -> SessionOptions {
        let token = self.broker.token.trim();
        SessionOptions {
            host: self.broker.host.clone(),
            port: self.broker.port,
            client_id: self.broker.client_id.clone(),
            username: (!token.is_empty()).then(|| token.to_string()),
            keep_alive_secs: self.broker.keep_alive_secs,
            subscriptions: self.subscription_topics(),
        }
    }

    pub fn dispatcher_settings(&self) -> DispatcherSettings {
        DispatcherSettings {
            device_id: self.device_id.clone(),
            publish_topic: self.publish_topic(),
            api_url: self.api.url.clone(),
            api_key: self.api.api_key.clone(),
            broker_cadence: Duration::from_millis(self.timing.broker_cadence_ms),
            api_cadence: Duration::from_millis(self.timing.api_cadence_ms),
            ambiguous_response: self.telemetry.ambiguous_response,
            retry: self.telemetry.retry,
        }
    }
}
