//! Network link and publish/subscribe session supervision.
//!
//! The supervisor is the only owner of the broker session handle. Every operation is
//! idempotent: asking for a link or session that is already up returns immediately,
//! otherwise one bounded (re)connection attempt is made.

use crate::clock::Clock;
use crate::error::{LinkError, SessionError};
use crate::status::{ConnectTarget, StatusEvent, StatusSink};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, error, info, warn};

pub const DEFAULT_LINK_TIMEOUT: Duration = Duration::from_secs(20);
pub const DEFAULT_CONNECT_RETRY: Duration = Duration::from_secs(10);
pub const MAX_MESSAGES_PER_POLL: usize = 16;

/// Access point the link joins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkCredentials {
    pub ssid: String,
    pub password: String,
}

/// Station-mode network interface.
pub trait NetworkLink {
    fn is_connected(&self) -> bool;

    /// Associates with the network, blocking for at most `timeout`. Returns the
    /// assigned address.
    fn connect(
        &mut self,
        credentials: &LinkCredentials,
        timeout: Duration,
    ) -> Result<String, LinkError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

impl InboundMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOptions {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    /// Account token presented as the user name, if the broker wants one.
    pub username: Option<String>,
    pub keep_alive_secs: u16,
    pub subscriptions: Vec<String>,
}

/// Factory for broker sessions.
pub trait Broker {
    fn connect(&mut self, options: &SessionOptions) -> Result<Box<dyn Session>, SessionError>;
}

/// An established publish/subscribe session.
pub trait Session {
    fn subscribe(&mut self, topic: &str) -> Result<(), SessionError>;
    fn ping(&mut self) -> Result<(), SessionError>;
    /// Non-blocking: returns the next queued inbound message, if any.
    fn poll(&mut self) -> Result<Option<InboundMessage>, SessionError>;
    fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), SessionError>;
    fn disconnect(&mut self) -> Result<(), SessionError>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionState {
    pub link_up: bool,
    pub session_up: bool,
}

impl ConnectionState {
    pub fn is_online(&self) -> bool {
        self.link_up && self.session_up
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectivityStats {
    pub link_attempts: u32,
    pub link_failures: u32,
    pub session_attempts: u32,
    pub session_failures: u32,
    pub session_drops: u32,
    pub messages_received: u32,
}

pub struct ConnectivitySupervisor {
    link: Box<dyn NetworkLink>,
    broker: Box<dyn Broker>,
    session: Option<Box<dyn Session>>,
    credentials: LinkCredentials,
    options: SessionOptions,
    link_timeout: Duration,
    retry_delay: Duration,
    stats: ConnectivityStats,
}

impl ConnectivitySupervisor {
    pub fn new(
        link: Box<dyn NetworkLink>,
        broker: Box<dyn Broker>,
        options: SessionOptions,
    ) -> Self {
        Self {
            link,
            broker,
            session: None,
            credentials: LinkCredentials::default(),
            options,
            link_timeout: DEFAULT_LINK_TIMEOUT,
            retry_delay: DEFAULT_CONNECT_RETRY,
            stats: ConnectivityStats::default(),
        }
    }

    pub fn with_credentials(mut self, credentials: LinkCredentials) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn with_timing(mut self, link_timeout: Duration, retry_delay: Duration) -> Self {
        self.link_timeout = link_timeout;
        self.retry_delay = retry_delay;
        self
    }

    pub fn ensure_link(
        &mut self,
        state: &mut ConnectionState,
        status: &mut dyn StatusSink,
    ) -> bool {
        if self.link.is_connected() {
            state.link_up = true;
            return true;
        }

        warn!(ssid = %self.credentials.ssid, "⚠️ wifi disconnected, trying to reconnect");
        self.stats.link_attempts = self.stats.link_attempts.wrapping_add(1);
        status.publish(StatusEvent::Connecting(ConnectTarget::Network));

        match self.link.connect(&self.credentials, self.link_timeout) {
            Ok(address) => {
                info!(%address, "📶 wifi connected");
                status.publish(StatusEvent::Connected {
                    target: ConnectTarget::Network,
                    detail: address,
                });
                state.link_up = true;
                true
            }
            Err(e) => {
                self.stats.link_failures = self.stats.link_failures.wrapping_add(1);
                error!("❌ wifi connection failed: {}", e);
                status.publish(StatusEvent::ConnectFailed {
                    target: ConnectTarget::Network,
                    reason: e.to_string(),
                });
                state.link_up = false;
                false
            }
        }
    }

    /// Makes sure a session exists, bringing the link up first if needed.
    pub fn ensure_session(
        &mut self,
        state: &mut ConnectionState,
        status: &mut dyn StatusSink,
    ) -> bool {
        if self.session.is_some() {
            state.session_up = true;
            return true;
        }
        if !self.ensure_link(state, status) {
            state.session_up = false;
            return false;
        }

        self.stats.session_attempts = self.stats.session_attempts.wrapping_add(1);
        status.publish(StatusEvent::Connecting(ConnectTarget::Broker));

        match self.open_session() {
            Ok(session) => {
                self.session = Some(session);
                info!(
                    host = %self.options.host,
                    client_id = %self.options.client_id,
                    subscriptions = self.options.subscriptions.len(),
                    "✅ mqtt connected"
                );
                status.publish(StatusEvent::Connected {
                    target: ConnectTarget::Broker,
                    detail: self.options.client_id.clone(),
                });
                state.session_up = true;
                true
            }
            Err(e) => {
                self.stats.session_failures = self.stats.session_failures.wrapping_add(1);
                error!("❌ mqtt connection error: {}", e);
                status.publish(StatusEvent::ConnectFailed {
                    target: ConnectTarget::Broker,
                    reason: e.to_string(),
                });
                state.session_up = false;
                false
            }
        }
    }

    /// Keep-alive probe. A dead session is torn down and re-established.
    pub fn probe_session(
        &mut self,
        state: &mut ConnectionState,
        status: &mut dyn StatusSink,
    ) -> bool {
        let Some(session) = self.session.as_mut() else {
            return self.ensure_session(state, status);
        };

        match session.ping() {
            Ok(()) => {
                state.session_up = true;
                true
            }
            Err(e) => {
                warn!("⚠️ mqtt disconnected ({}), reconnecting", e);
                self.drop_session(state);
                self.ensure_session(state, status)
            }
        }
    }

    /// Blocks until both link and session are up, retrying forever with a fixed delay.
    /// Returns `false` only if `interrupt` was raised first.
    pub fn establish(
        &mut self,
        state: &mut ConnectionState,
        status: &mut dyn StatusSink,
        clock: &dyn Clock,
        interrupt: &AtomicBool,
    ) -> bool {
        while !self.ensure_link(state, status) {
            if interrupt.load(Ordering::Relaxed) {
                return false;
            }
            clock.sleep(self.retry_delay);
        }
        while !self.ensure_session(state, status) {
            if interrupt.load(Ordering::Relaxed) {
                return false;
            }
            clock.sleep(self.retry_delay);
        }
        true
    }

    /// Drains the messages the session has queued right now, at most
    /// [`MAX_MESSAGES_PER_POLL`]. A poll failure drops the session and tries one
    /// reconnect; messages collected before the failure are still returned.
    pub fn poll_messages(
        &mut self,
        state: &mut ConnectionState,
        status: &mut dyn StatusSink,
    ) -> Vec<InboundMessage> {
        let mut messages = Vec::new();
        let Some(session) = self.session.as_mut() else {
            return messages;
        };

        let mut failure = None;
        while messages.len() < MAX_MESSAGES_PER_POLL {
            match session.poll() {
                Ok(Some(message)) => messages.push(message),
                Ok(None) => break,
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }
        self.stats.messages_received = self
            .stats
            .messages_received
            .wrapping_add(messages.len() as u32);

        if let Some(e) = failure {
            error!("❌ error checking mqtt messages: {}", e);
            self.drop_session(state);
            self.ensure_session(state, status);
        }

        messages
    }

    pub fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), SessionError> {
        let session = self.session.as_mut().ok_or(SessionError::NotConnected)?;
        session.publish(topic, payload)
    }

    /// Best-effort teardown on the way out. Errors are swallowed.
    pub fn shutdown(&mut self, state: &mut ConnectionState) {
        if let Some(mut session) = self.session.take() {
            if let Err(e) = session.disconnect() {
                debug!("ignoring disconnect error during shutdown: {}", e);
            }
            info!("🔌 mqtt session closed");
        }
        state.session_up = false;
    }

    pub fn has_session(&self) -> bool {
        self.session.is_some()
    }

    pub fn stats(&self) -> &ConnectivityStats {
        &self.stats
    }

    fn open_session(&mut self) -> Result<Box<dyn Session>, SessionError> {
        let mut session = self.broker.connect(&self.options)?;
        for topic in &self.options.subscriptions {
            if let Err(e) = session.subscribe(topic) {
                let _ = session.disconnect();
                return Err(e);
            }
            debug!(%topic, "subscribed");
        }
        Ok(session)
    }

    fn drop_session(&mut self, state: &mut ConnectionState) {
        if let Some(mut session) = self.session.take() {
            self.stats.session_drops = self.stats.session_drops.wrapping_add(1);
            let _ = session.disconnect();
        }
        state.session_up = false;
    }
}
