use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::report::Announcement;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkStatus {
    Disconnected,
    Connected,
}

impl From<bool> for LinkStatus {
    fn from(up: bool) -> Self {
        if up {
            LinkStatus::Connected
        } else {
            LinkStatus::Disconnected
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ConnectionState {
    pub transport: LinkStatus,
    pub session: LinkStatus,
}

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("association timed out")]
    Timeout,
    #[error("interface {0} not found")]
    NoInterface(String),
    #[error("io error: {0}")]
    Io(String),
}

/// Why a broker session could not be established. Diagnostic only.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectFailure {
    #[error("broker refused protocol version")]
    Protocol,
    #[error("broker rejected client id")]
    BadClientId,
    #[error("broker unavailable")]
    Unavailable,
    #[error("bad credentials")]
    Credentials,
    #[error("not authorized")]
    Unauthorized,
    #[error("connect timed out")]
    Timeout,
    #[error("network error: {0}")]
    Network(String),
    #[error("unknown failure: {0}")]
    Unknown(String),
}

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("session not connected")]
    NotConnected,
    #[error("publish rejected: {0}")]
    Rejected(String),
}

/// The wireless association to the local network.
#[async_trait]
pub trait TransportLink: Send {
    fn is_connected(&self) -> bool;
    /// Blocks until associated or the attempt gives up.
    async fn associate(&mut self) -> Result<(), LinkError>;
    fn signal_strength(&self) -> Option<i32>;
}

/// The application session with the message broker.
#[async_trait]
pub trait BrokerSession: Send {
    fn is_connected(&self) -> bool;
    async fn connect(&mut self) -> Result<(), ConnectFailure>;
    /// Services keepalive and inbound traffic; must be cheap when idle.
    async fn pump(&mut self);
    /// Fire-and-forget publish.
    fn publish(&mut self, topic: &str, payload: Vec<u8>) -> Result<(), PublishError>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LinkCounters {
    pub reassociations: u64,
    pub session_connects: u64,
    pub session_failures: u64,
}

pub struct ConnectionManager<T: TransportLink, B: BrokerSession> {
    transport: T,
    session: B,
    client_id: String,
    status_topic: String,
    device_address: u8,
    state: ConnectionState,
    counters: LinkCounters,
}

impl<T: TransportLink, B: BrokerSession> ConnectionManager<T, B> {
    pub fn new(
        transport: T,
        session: B,
        client_id: impl Into<String>,
        status_topic: impl Into<String>,
        device_address: u8,
    ) -> Self {
        let state = ConnectionState {
            transport: transport.is_connected().into(),
            session: session.is_connected().into(),
        };
        Self {
            transport,
            session,
            client_id: client_id.into(),
            status_topic: status_topic.into(),
            device_address,
            state,
            counters: LinkCounters::default(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn counters(&self) -> LinkCounters {
        self.counters
    }

    pub fn transport_up(&mut self) -> bool {
        let up = self.transport.is_connected();
        if !up && self.state.transport == LinkStatus::Connected {
            warn!("transport link lost");
        }
        self.state.transport = up.into();
        up
    }

    pub fn session_up(&mut self) -> bool {
        let up = self.session.is_connected();
        if !up && self.state.session == LinkStatus::Connected {
            warn!("broker session lost");
        }
        self.state.session = up.into();
        up
    }

    pub fn signal_strength(&self) -> Option<i32> {
        self.transport.signal_strength()
    }

    /// No-op while associated; otherwise performs one blocking association attempt.
    pub async fn ensure_connected(&mut self) -> bool {
        if self.transport_up() {
            return true;
        }

        info!("reassociating transport link");
        self.counters.reassociations += 1;
        match self.transport.associate().await {
            Ok(()) => {
                info!(signal = ?self.transport.signal_strength(), "transport link associated");
            }
            Err(err) => {
                warn!(error = %err, "transport association failed");
            }
        }
        self.transport_up()
    }

    pub async fn pump(&mut self) {
        if self.session.is_connected() {
            self.session.pump().await;
        }
        self.session_up();
    }

    /// On success, announces the device on the status topic.
    pub async fn try_connect(&mut self) -> bool {
        if !self.transport.is_connected() {
            warn!("transport link down, skipping broker connect");
            return false;
        }

        match self.session.connect().await {
            Ok(()) => {
                self.counters.session_connects += 1;
                self.state.session = LinkStatus::Connected;
                info!(client_id = %self.client_id, "broker session connected");
                self.announce();
                true
            }
            Err(cause) => {
                self.counters.session_failures += 1;
                self.state.session = LinkStatus::Disconnected;
                warn!(cause = %cause, "broker connect failed");
                false
            }
        }
    }

    pub fn publish(&mut self, topic: &str, payload: Vec<u8>) -> bool {
        if !self.session_up() {
            warn!(topic, "broker session down, cannot publish");
            return false;
        }

        match self.session.publish(topic, payload) {
            Ok(()) => true,
            Err(err) => {
                warn!(topic, error = %err, "publish failed");
                false
            }
        }
    }

    fn announce(&mut self) {
        let announcement = Announcement::connected(&self.client_id, self.device_address);
        let payload = match serde_json::to_vec(&announcement) {
            Ok(payload) => payload,
            Err(err) => {
                warn!(error = %err, "failed to encode announcement");
                return;
            }
        };

        let topic = self.status_topic.clone();
        if self.publish(&topic, payload) {
            info!(topic = %topic, "announcement published");
        }
    }
}
