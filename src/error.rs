use thiserror::Error;

/// Failure reported by a hardware capability (pin, ADC, PWM, bus device, panel).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HalError {
    #[error("bus error: {0}")]
    Bus(String),
    #[error("device not responding")]
    NoResponse,
    #[error("value {value} out of range for {channel}")]
    OutOfRange { channel: &'static str, value: u32 },
}

/// Ultrasonic ranging failures. None of them overwrite the distance channel.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RangeError {
    #[error("echo did not {edge} within {timeout_us} us")]
    EchoTimeout { edge: &'static str, timeout_us: u64 },
    #[error("distance {0:.1} cm outside valid range")]
    OutOfRange(f32),
    #[error("ranging pins unusable: {0}")]
    Pin(#[from] HalError),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LinkError {
    #[error("link association timed out after {0} ms")]
    Timeout(u64),
    #[error("link rejected: {0}")]
    Rejected(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("broker connect failed: {0}")]
    Connect(String),
    #[error("subscribe to {topic} failed: {reason}")]
    Subscribe { topic: String, reason: String },
    #[error("keep-alive ping failed: {0}")]
    Ping(String),
    #[error("publish failed: {0}")]
    Publish(String),
    #[error("message poll failed: {0}")]
    Poll(String),
    #[error("no active session")]
    NotConnected,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("request failed: {0}")]
    Request(String),
    #[error("link unavailable")]
    Offline,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CommandError {
    #[error("payload is not valid UTF-8")]
    NonUtf8,
    #[error("couldn't convert payload {0:?} to a number")]
    InvalidNumber(String),
    #[error("payload {0} is not a finite number")]
    NonFinite(f64),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Errors that escape a control-loop tick and are handled at the loop boundary.
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("hardware error: {0}")]
    Hal(#[from] HalError),
    #[error("session error: {0}")]
    Session(#[from] SessionError),
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("startup interrupted before connectivity was established")]
    StartupInterrupted,
}
