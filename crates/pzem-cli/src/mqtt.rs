use std::time::Duration;

use async_trait::async_trait;
use pzem_core::{BrokerSession, ConnectFailure, PublishError};
use rumqttc::{AsyncClient, ConnectReturnCode, ConnectionError, Event, EventLoop, MqttOptions, Packet, QoS};
use tokio::time::{timeout, timeout_at, Instant};
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub keep_alive: Duration,
    pub connect_timeout: Duration,
    pub max_packet_size: usize,
    pub pump_budget: Duration,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 1883,
            client_id: pzem_core::config::CLIENT_ID.to_string(),
            username: None,
            password: None,
            keep_alive: Duration::from_secs(15),
            connect_timeout: Duration::from_secs(3),
            max_packet_size: 2048,
            pump_budget: Duration::from_millis(5),
        }
    }
}

pub struct MqttSession {
    config: BrokerConfig,
    client: Option<AsyncClient>,
    eventloop: Option<EventLoop>,
}

impl MqttSession {
    pub fn new(config: BrokerConfig) -> Self {
        Self {
            config,
            client: None,
            eventloop: None,
        }
    }

    fn options(&self) -> MqttOptions {
        let mut options = MqttOptions::new(&self.config.client_id, &self.config.host, self.config.port);
        options.set_keep_alive(self.config.keep_alive);
        options.set_clean_session(true);
        options.set_max_packet_size(self.config.max_packet_size, self.config.max_packet_size);
        if let Some(username) = self.config.username.as_deref().filter(|u| !u.is_empty()) {
            options.set_credentials(username, self.config.password.clone().unwrap_or_default());
        }
        options
    }

    fn drop_session(&mut self) {
        self.client = None;
        self.eventloop = None;
    }
}

pub fn classify(err: &ConnectionError) -> ConnectFailure {
    match err {
        ConnectionError::ConnectionRefused(code) => classify_code(*code),
        ConnectionError::Io(err) => ConnectFailure::Network(err.to_string()),
        other => ConnectFailure::Unknown(other.to_string()),
    }
}

pub fn classify_code(code: ConnectReturnCode) -> ConnectFailure {
    match code {
        ConnectReturnCode::RefusedProtocolVersion => ConnectFailure::Protocol,
        ConnectReturnCode::BadClientId => ConnectFailure::BadClientId,
        ConnectReturnCode::ServiceUnavailable => ConnectFailure::Unavailable,
        ConnectReturnCode::BadUserNamePassword => ConnectFailure::Credentials,
        ConnectReturnCode::NotAuthorized => ConnectFailure::Unauthorized,
        other => ConnectFailure::Unknown(format!("{other:?}")),
    }
}

async fn handshake(eventloop: &mut EventLoop) -> Result<(), ConnectFailure> {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                if ack.code == ConnectReturnCode::Success {
                    return Ok(());
                }
                return Err(classify_code(ack.code));
            }
            Ok(event) => debug!(?event, "handshake event"),
            Err(err) => return Err(classify(&err)),
        }
    }
}

#[async_trait]
impl BrokerSession for MqttSession {
    fn is_connected(&self) -> bool {
        self.eventloop.is_some()
    }

    async fn connect(&mut self) -> Result<(), ConnectFailure> {
        self.drop_session();
        info!(
            host = %self.config.host,
            port = self.config.port,
            client_id = %self.config.client_id,
            "connecting to broker"
        );

        let (client, mut eventloop) = AsyncClient::new(self.options(), 16);
        match timeout(self.config.connect_timeout, handshake(&mut eventloop)).await {
            Ok(Ok(())) => {
                self.client = Some(client);
                self.eventloop = Some(eventloop);
                Ok(())
            }
            Ok(Err(cause)) => Err(cause),
            Err(_) => Err(ConnectFailure::Timeout),
        }
    }

    async fn pump(&mut self) {
        let Some(eventloop) = self.eventloop.as_mut() else {
            return;
        };

        let deadline = Instant::now() + self.config.pump_budget;
        let mut lost = false;
        loop {
            match timeout_at(deadline, eventloop.poll()).await {
                Err(_) => break,
                Ok(Ok(Event::Incoming(Packet::Publish(publish)))) => {
                    info!(
                        topic = %publish.topic,
                        payload = %String::from_utf8_lossy(&publish.payload),
                        "inbound message"
                    );
                }
                Ok(Ok(Event::Incoming(Packet::Disconnect))) => {
                    warn!("broker sent disconnect");
                    lost = true;
                    break;
                }
                Ok(Ok(_)) => {}
                Ok(Err(err)) => {
                    warn!(error = %err, "broker connection error");
                    lost = true;
                    break;
                }
            }
        }

        if lost {
            self.drop_session();
        }
    }

    fn publish(&mut self, topic: &str, payload: Vec<u8>) -> Result<(), PublishError> {
        let Some(client) = self.client.as_ref() else {
            return Err(PublishError::NotConnected);
        };
        client
            .try_publish(topic, QoS::AtMostOnce, false, payload)
            .map_err(|err| PublishError::Rejected(err.to_string()))
    }
}
