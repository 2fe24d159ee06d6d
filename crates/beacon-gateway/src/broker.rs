//! Broker connection.
//!
//! The gateway holds exactly one broker session per run. It is opened at
//! start, closed at stop, and never re-established in between: if the
//! connection drops, every later publish fails with
//! [`BrokerError::NotConnected`] until the next start.
//!
//! Reports are published with QoS 0 and without the retain flag, on a
//! clean session. A report larger than the configured packet limit is
//! refused before it reaches the connection, since the client library
//! tears the session down on an oversized outgoing packet.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, MqttOptions, Packet, QoS, TlsConfiguration, Transport,
};
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use beacon_core::Retryable;

use crate::config::BrokerConfig;

/// How long `disconnect` waits for the connection task to wind down.
const DISCONNECT_GRACE: Duration = Duration::from_secs(2);

/// Errors from the broker connection.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum BrokerError {
    #[error("Invalid broker URL: {0}")]
    InvalidUrl(String),

    #[error("Failed to connect to broker: {0}")]
    ConnectFailure(String),

    #[error("Broker did not acknowledge the connection within {0:?}")]
    ConnectTimeout(Duration),

    #[error("Not connected to broker")]
    NotConnected,

    #[error("Publish failed: {0}")]
    PublishFailure(String),

    #[error("Report of {size} bytes exceeds the {limit} byte packet limit")]
    PayloadTooLarge { size: usize, limit: usize },
}

impl From<rumqttc::ClientError> for BrokerError {
    fn from(e: rumqttc::ClientError) -> Self {
        Self::PublishFailure(e.to_string())
    }
}

impl Retryable for BrokerError {
    fn is_retryable(&self) -> bool {
        // Only a publish on a live session is worth repeating; connecting
        // happens once per session.
        matches!(self, BrokerError::PublishFailure(_))
    }
}

/// A connection to a message broker.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Open the session. Calling it on an open session does nothing.
    async fn connect(&self) -> Result<(), BrokerError>;

    /// Publish `payload` on `topic`.
    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), BrokerError>;

    /// Close the session. Safe to call when not connected.
    async fn disconnect(&self);

    /// Whether the session is currently usable.
    fn is_connected(&self) -> bool;
}

/// Parse an MQTT broker URL into (host, port, use_tls).
pub fn parse_broker_url(url: &str) -> Result<(String, u16, bool), BrokerError> {
    let (scheme, rest) = if let Some(stripped) = url.strip_prefix("mqtt://") {
        ("mqtt", stripped)
    } else if let Some(stripped) = url.strip_prefix("mqtts://") {
        ("mqtts", stripped)
    } else {
        return Err(BrokerError::InvalidUrl(format!(
            "'{}' must start with mqtt:// or mqtts://",
            url
        )));
    };

    let use_tls = scheme == "mqtts";
    let default_port = if use_tls { 8883 } else { 1883 };
    let rest = rest.trim_end_matches('/');

    let (host, port) = if let Some((h, p)) = rest.rsplit_once(':') {
        let port = p
            .parse::<u16>()
            .map_err(|_| BrokerError::InvalidUrl(format!("invalid port '{}'", p)))?;
        (h.to_string(), port)
    } else {
        (rest.to_string(), default_port)
    };

    if host.is_empty() {
        return Err(BrokerError::InvalidUrl("host cannot be empty".to_string()));
    }
    if port == 0 {
        return Err(BrokerError::InvalidUrl("port cannot be 0".to_string()));
    }

    Ok((host, port, use_tls))
}

/// Remaining length of a QoS 0 PUBLISH packet.
fn publish_packet_len(topic: &str, payload: &[u8]) -> usize {
    2 + topic.len() + payload.len()
}

struct Session {
    client: AsyncClient,
    driver: JoinHandle<()>,
}

/// MQTT broker over rumqttc.
pub struct MqttBroker {
    config: BrokerConfig,
    client_id: String,
    session: Mutex<Option<Session>>,
    connected: Arc<AtomicBool>,
}

impl MqttBroker {
    /// Create a broker handle. Nothing is opened until [`Broker::connect`].
    pub fn new(config: BrokerConfig) -> Self {
        let client_id = config.client_id();
        Self {
            config,
            client_id,
            session: Mutex::new(None),
            connected: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Client id presented to the broker.
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    fn options(&self) -> Result<MqttOptions, BrokerError> {
        let (host, port, use_tls) = parse_broker_url(&self.config.url)?;

        let mut options = MqttOptions::new(&self.client_id, host, port);
        options.set_keep_alive(self.config.keep_alive());
        options.set_clean_session(true);
        let limit = self.config.max_packet_size();
        options.set_max_packet_size(limit, limit);

        if let Some(username) = &self.config.username {
            options.set_credentials(username, self.config.password.clone().unwrap_or_default());
        }

        if use_tls {
            options.set_transport(Transport::tls_with_config(TlsConfiguration::Native));
        }

        Ok(options)
    }
}

impl std::fmt::Debug for MqttBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MqttBroker")
            .field("url", &self.config.url)
            .field("client_id", &self.client_id)
            .field("connected", &self.is_connected())
            .finish()
    }
}

#[async_trait]
impl Broker for MqttBroker {
    async fn connect(&self) -> Result<(), BrokerError> {
        let mut session = self.session.lock().await;
        if session.is_some() {
            debug!("Broker session already open");
            return Ok(());
        }

        let options = self.options()?;
        let timeout = self.config.connect_timeout();
        let (client, mut eventloop) = AsyncClient::new(options, 16);

        info!("Connecting to {} as {}", self.config.url, self.client_id);

        let handshake = async {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                        return if ack.code == ConnectReturnCode::Success {
                            Ok(())
                        } else {
                            Err(BrokerError::ConnectFailure(format!(
                                "broker refused connection: {:?}",
                                ack.code
                            )))
                        };
                    }
                    Ok(_) => continue,
                    Err(e) => return Err(BrokerError::ConnectFailure(e.to_string())),
                }
            }
        };

        match tokio::time::timeout(timeout, handshake).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(_) => return Err(BrokerError::ConnectTimeout(timeout)),
        }

        self.connected.store(true, Ordering::SeqCst);
        info!("Connected to broker {}", self.config.url);

        let connected = Arc::clone(&self.connected);
        let driver = tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::PingResp)) => {
                        debug!("Broker ping response received");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        if connected.swap(false, Ordering::SeqCst) {
                            error!("Broker connection lost: {}; not reconnecting this session", e);
                        } else {
                            debug!("Broker connection closed: {}", e);
                        }
                        break;
                    }
                }
            }
        });

        *session = Some(Session { client, driver });
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), BrokerError> {
        if !self.is_connected() {
            return Err(BrokerError::NotConnected);
        }
        let size = publish_packet_len(topic, payload);
        let limit = self.config.max_packet_size();
        if size > limit {
            return Err(BrokerError::PayloadTooLarge { size, limit });
        }
        let client = match self.session.lock().await.as_ref() {
            Some(session) => session.client.clone(),
            None => return Err(BrokerError::NotConnected),
        };

        client
            .publish(topic, QoS::AtMostOnce, false, payload.to_vec())
            .await?;
        debug!("Published {} bytes to {}", payload.len(), topic);
        Ok(())
    }

    async fn disconnect(&self) {
        let Some(Session { client, mut driver }) = self.session.lock().await.take() else {
            return;
        };

        // Cleared first so the driver logs the close as expected.
        self.connected.store(false, Ordering::SeqCst);
        if let Err(e) = client.disconnect().await {
            debug!("Error sending disconnect: {}", e);
        }

        if tokio::time::timeout(DISCONNECT_GRACE, &mut driver)
            .await
            .is_err()
        {
            warn!("Broker connection task did not finish, aborting it");
            driver.abort();
        }
        info!("Disconnected from broker");
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}
