//! Simulated network link, broker and storage API transport.

use crate::clock::Clock;
use crate::connectivity::{
    Broker, InboundMessage, LinkCredentials, NetworkLink, Session, SessionOptions,
};
use crate::error::{LinkError, SessionError, TransportError};
use crate::sim::store::TelemetryStore;
use crate::telemetry::{ApiTransport, HttpResponse};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::Duration;
use tracing::debug;

pub type SharedNetwork = Rc<RefCell<NetworkState>>;
pub type SharedStore = Rc<RefCell<TelemetryStore>>;

/// How the simulated storage service answers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApiMode {
    #[default]
    Normal,
    /// Every request is answered with this status code.
    HttpError(u16),
    /// The record is stored but the reply carries no readable status.
    Ambiguous,
    /// The request never reaches the service.
    TransportError,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PublishedMessage {
    pub topic: String,
    pub payload: String,
}

#[derive(Debug)]
pub struct NetworkState {
    /// Whether an access point is reachable at all.
    pub link_available: bool,
    /// Network the access point broadcasts and the passphrase it expects.
    pub access_point: LinkCredentials,
    /// Token the broker requires as the user name. `None` accepts anyone.
    pub broker_token: Option<String>,
    pub link_up: bool,
    pub broker_available: bool,
    pub session_open: bool,
    pub fail_ping: bool,
    pub fail_poll: bool,
    pub fail_publish: bool,
    pub api_mode: ApiMode,
    pub address: String,
    pub inbound: VecDeque<InboundMessage>,
    pub published: Vec<PublishedMessage>,
    pub subscriptions: Vec<String>,
    pub last_options: Option<SessionOptions>,
    pub link_connects: u32,
    pub session_connects: u32,
    pub api_requests: u32,
}

impl Default for NetworkState {
    fn default() -> Self {
        Self {
            link_available: true,
            access_point: LinkCredentials {
                ssid: "sensor-lab".to_string(),
                password: String::new(),
            },
            broker_token: None,
            link_up: false,
            broker_available: true,
            session_open: false,
            fail_ping: false,
            fail_poll: false,
            fail_publish: false,
            api_mode: ApiMode::Normal,
            address: "192.168.4.23".to_string(),
            inbound: VecDeque::new(),
            published: Vec::new(),
            subscriptions: Vec::new(),
            last_options: None,
            link_connects: 0,
            session_connects: 0,
            api_requests: 0,
        }
    }
}

impl NetworkState {
    pub fn shared() -> SharedNetwork {
        Rc::new(RefCell::new(Self::default()))
    }

    /// Queues a message as if the broker had delivered it.
    pub fn deliver(&mut self, topic: impl Into<String>, payload: impl Into<Vec<u8>>) {
        self.inbound.push_back(InboundMessage::new(topic, payload));
    }

    /// Drops the link; the session goes with it.
    pub fn drop_link(&mut self) {
        self.link_up = false;
        self.session_open = false;
    }
}

pub struct SimLink {
    net: SharedNetwork,
    clock: Rc<dyn Clock>,
    connect_time: Duration,
}

impl SimLink {
    pub fn new(net: SharedNetwork, clock: Rc<dyn Clock>) -> Self {
        Self {
            net,
            clock,
            connect_time: Duration::from_millis(500),
        }
    }
}

impl NetworkLink for SimLink {
    fn is_connected(&self) -> bool {
        self.net.borrow().link_up
    }

    fn connect(
        &mut self,
        credentials: &LinkCredentials,
        timeout: Duration,
    ) -> Result<String, LinkError> {
        let (visible, accepted) = {
            let net = self.net.borrow();
            (
                net.link_available && net.access_point.ssid == credentials.ssid,
                net.access_point.password == credentials.password,
            )
        };
        if !visible {
            self.clock.sleep(timeout);
            return Err(LinkError::Timeout(timeout.as_millis() as u64));
        }
        if !accepted {
            self.clock.sleep(self.connect_time.min(timeout));
            return Err(LinkError::Rejected(format!(
                "authentication with {} failed",
                credentials.ssid
            )));
        }
        self.clock.sleep(self.connect_time.min(timeout));
        let mut net = self.net.borrow_mut();
        net.link_up = true;
        net.link_connects = net.link_connects.wrapping_add(1);
        Ok(net.address.clone())
    }
}

pub struct SimBroker {
    net: SharedNetwork,
}

impl SimBroker {
    pub fn new(net: SharedNetwork) -> Self {
        Self { net }
    }
}

impl Broker for SimBroker {
    fn connect(&mut self, options: &SessionOptions) -> Result<Box<dyn Session>, SessionError> {
        let mut net = self.net.borrow_mut();
        if !net.link_up {
            return Err(SessionError::Connect("network unreachable".into()));
        }
        if !net.broker_available {
            return Err(SessionError::Connect("connection refused".into()));
        }
        if net.broker_token.is_some() && net.broker_token != options.username {
            return Err(SessionError::Connect("not authorized".into()));
        }
        net.session_open = true;
        net.session_connects = net.session_connects.wrapping_add(1);
        net.subscriptions.clear();
        net.last_options = Some(options.clone());
        debug!(client_id = %options.client_id, "broker accepted session");
        Ok(Box::new(SimSession {
            net: Rc::clone(&self.net),
        }))
    }
}

pub struct SimSession {
    net: SharedNetwork,
}

impl SimSession {
    fn check_open(net: &NetworkState) -> Result<(), SessionError> {
        if net.link_up && net.session_open {
            Ok(())
        } else {
            Err(SessionError::NotConnected)
        }
    }
}

impl Session for SimSession {
    fn subscribe(&mut self, topic: &str) -> Result<(), SessionError> {
        let mut net = self.net.borrow_mut();
        Self::check_open(&net)?;
        net.subscriptions.push(topic.to_string());
        Ok(())
    }

    fn ping(&mut self) -> Result<(), SessionError> {
        let net = self.net.borrow();
        Self::check_open(&net)?;
        if net.fail_ping {
            return Err(SessionError::Ping("no PINGRESP".into()));
        }
        Ok(())
    }

    fn poll(&mut self) -> Result<Option<InboundMessage>, SessionError> {
        let mut net = self.net.borrow_mut();
        Self::check_open(&net)?;
        if net.fail_poll {
            return Err(SessionError::Poll("socket closed".into()));
        }
        Ok(net.inbound.pop_front())
    }

    fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), SessionError> {
        let mut net = self.net.borrow_mut();
        Self::check_open(&net)?;
        if net.fail_publish {
            return Err(SessionError::Publish("write failed".into()));
        }
        net.published.push(PublishedMessage {
            topic: topic.to_string(),
            payload: String::from_utf8_lossy(payload).into_owned(),
        });
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), SessionError> {
        self.net.borrow_mut().session_open = false;
        Ok(())
    }
}

/// Delivers API requests to an in-memory [`TelemetryStore`].
pub struct SimApiTransport {
    net: SharedNetwork,
    store: SharedStore,
    clock: Rc<dyn Clock>,
}

impl SimApiTransport {
    pub fn new(net: SharedNetwork, store: SharedStore, clock: Rc<dyn Clock>) -> Self {
        Self { net, store, clock }
    }
}

impl ApiTransport for SimApiTransport {
    fn post_json(
        &mut self,
        url: &str,
        api_key: &str,
        body: &str,
    ) -> Result<HttpResponse, TransportError> {
        let mode = {
            let mut net = self.net.borrow_mut();
            if !net.link_up {
                return Err(TransportError::Offline);
            }
            net.api_requests = net.api_requests.wrapping_add(1);
            net.api_mode
        };
        debug!(url, bytes = body.len(), ?mode, "api request");

        let key = (!api_key.is_empty()).then_some(api_key);
        match mode {
            ApiMode::Normal => {
                let response = self
                    .store
                    .borrow_mut()
                    .handle_post(key, body, self.clock.unix_seconds());
                Ok(HttpResponse::with_status(response.status, response.body.to_string()))
            }
            ApiMode::HttpError(status) => Ok(HttpResponse::with_status(
                status,
                format!("{{\"success\": false, \"error\": \"service returned {}\"}}", status),
            )),
            ApiMode::Ambiguous => {
                self.store
                    .borrow_mut()
                    .handle_post(key, body, self.clock.unix_seconds());
                Ok(HttpResponse::unknown(""))
            }
            ApiMode::TransportError => {
                Err(TransportError::Request("connection reset by peer".into()))
            }
        }
    }
}
