//! MQTT session transport on rumqttc
//!
//! Every connection attempt builds a fresh `AsyncClient`/`EventLoop` pair with
//! a clean session, so requests queued under an earlier session can never be
//! replayed after a reconnect. The event loop is only driven from inside the
//! transport calls; there is no background task.

use super::session::{PublishError, SessionError, Transport, TransportFuture};
use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS,
};
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};

const REQUEST_CAPACITY: usize = 10;

// Upper bound on events handled by a single housekeeping poll
const MAX_EVENTS_PER_POLL: usize = 32;

/// Shortest accepted `poll_window`.
///
/// A window that expires while the event loop is writing cancels the flush
/// partway. Idle polls stay cheap either way, so the window is kept well
/// above the time a small QoS 0 frame needs to reach the socket.
pub const MIN_POLL_WINDOW: Duration = Duration::from_millis(50);

#[derive(Debug, Clone)]
pub struct BrokerSettings {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub keep_alive: Duration,
    /// Bound on a single connection attempt (TCP + CONNACK)
    pub connect_timeout: Duration,
    /// Bound on writing one publish to the socket
    pub publish_timeout: Duration,
    /// How long `poll` waits for a ready event before returning
    pub poll_window: Duration,
}

pub struct MqttTransport {
    settings: BrokerSettings,
    session: Option<(AsyncClient, EventLoop)>,
    connected: bool,
}

impl MqttTransport {
    pub fn new(settings: BrokerSettings) -> Self {
        Self {
            settings,
            session: None,
            connected: false,
        }
    }

    fn options(&self, client_id: &str) -> MqttOptions {
        let mut options =
            MqttOptions::new(client_id, self.settings.host.clone(), self.settings.port);
        options
            .set_keep_alive(self.settings.keep_alive)
            .set_clean_session(true);
        if let Some(user) = &self.settings.username {
            let password = self.settings.password.clone().unwrap_or_default();
            options.set_credentials(user.clone(), password);
        }
        options
    }

    fn drop_session(&mut self) {
        self.session = None;
        self.connected = false;
    }

    // `None` means the publish was still queued when `limit` ran out. The
    // request and a partial write stay in the event loop, so the session is
    // discarded rather than flushing a stale reading later.
    fn settle_publish(
        &mut self,
        sent: Option<Result<(), rumqttc::ConnectionError>>,
        limit: Duration,
    ) -> Result<(), PublishError> {
        match sent {
            Some(Ok(())) => Ok(()),
            Some(Err(e)) => {
                warn!("Session lost while publishing: {}", e);
                self.drop_session();
                Err(PublishError::Rejected(e.to_string()))
            }
            None => {
                warn!("Publish not flushed within {:?}, dropping session", limit);
                self.drop_session();
                Err(PublishError::TimedOut(limit))
            }
        }
    }
}

async fn await_connack(eventloop: &mut EventLoop) -> Result<(), SessionError> {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                return if ack.code == ConnectReturnCode::Success {
                    Ok(())
                } else {
                    Err(SessionError::Rejected(format!("{:?}", ack.code)))
                };
            }
            Ok(event) => debug!("Event before CONNACK: {:?}", event),
            Err(e) => return Err(SessionError::Rejected(e.to_string())),
        }
    }
}

async fn await_outgoing_publish(
    eventloop: &mut EventLoop,
) -> Result<(), rumqttc::ConnectionError> {
    loop {
        match eventloop.poll().await? {
            Event::Outgoing(Outgoing::Publish(_)) => return Ok(()),
            event => debug!("Event while publishing: {:?}", event),
        }
    }
}

impl Transport for MqttTransport {
    fn connect<'a>(
        &'a mut self,
        client_id: &'a str,
    ) -> TransportFuture<'a, Result<(), SessionError>> {
        Box::pin(async move {
            self.drop_session();

            let (client, mut eventloop) =
                AsyncClient::new(self.options(client_id), REQUEST_CAPACITY);
            let limit = self.settings.connect_timeout;
            let outcome = timeout(limit, await_connack(&mut eventloop)).await;

            match outcome {
                Ok(Ok(())) => {
                    info!(
                        "MQTT session up at {}:{}",
                        self.settings.host, self.settings.port
                    );
                    self.session = Some((client, eventloop));
                    self.connected = true;
                    Ok(())
                }
                Ok(Err(e)) => Err(e),
                Err(_) => Err(SessionError::TimedOut(limit)),
            }
        })
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn publish<'a>(
        &'a mut self,
        topic: &'a str,
        payload: Vec<u8>,
    ) -> TransportFuture<'a, Result<(), PublishError>> {
        Box::pin(async move {
            let limit = self.settings.publish_timeout;
            let Some((client, eventloop)) = self.session.as_mut() else {
                return Err(PublishError::NotConnected);
            };

            client
                .try_publish(topic, QoS::AtMostOnce, false, payload)
                .map_err(|e| PublishError::Rejected(e.to_string()))?;

            let sent = timeout(limit, await_outgoing_publish(eventloop)).await;
            self.settle_publish(sent.ok(), limit)
        })
    }

    fn poll(&mut self) -> TransportFuture<'_, ()> {
        Box::pin(async move {
            let window = self.settings.poll_window;
            let Some((_, eventloop)) = self.session.as_mut() else {
                return;
            };

            let mut lost = false;
            for _ in 0..MAX_EVENTS_PER_POLL {
                match timeout(window, eventloop.poll()).await {
                    Err(_) => break,
                    Ok(Ok(Event::Incoming(Packet::Disconnect))) => {
                        warn!("Broker closed the session");
                        lost = true;
                        break;
                    }
                    Ok(Ok(event)) => debug!("MQTT event: {:?}", event),
                    Ok(Err(e)) => {
                        warn!("MQTT connection error: {}", e);
                        lost = true;
                        break;
                    }
                }
            }

            if lost {
                self.drop_session();
            }
        })
    }

    fn disconnect(&mut self) -> TransportFuture<'_, ()> {
        Box::pin(async move {
            let limit = self.settings.publish_timeout;
            if let Some((client, mut eventloop)) = self.session.take() {
                match client.disconnect().await {
                    Ok(()) => {
                        let flushed = timeout(limit, async {
                            loop {
                                match eventloop.poll().await {
                                    Ok(Event::Outgoing(Outgoing::Disconnect)) | Err(_) => break,
                                    Ok(_) => {}
                                }
                            }
                        })
                        .await;
                        if flushed.is_err() {
                            warn!("DISCONNECT not flushed within {:?}", limit);
                        }
                    }
                    Err(e) => warn!("Could not request disconnect: {}", e),
                }
                info!("MQTT session closed");
            }
            self.connected = false;
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unreachable_broker() -> MqttTransport {
        MqttTransport::new(BrokerSettings {
            host: "127.0.0.1".to_string(),
            port: 1,
            username: Some("user".to_string()),
            password: None,
            keep_alive: Duration::from_secs(15),
            connect_timeout: Duration::from_secs(2),
            publish_timeout: Duration::from_secs(1),
            poll_window: Duration::from_millis(50),
        })
    }

    #[tokio::test]
    async fn test_connect_failure_leaves_transport_disconnected() {
        let mut transport = unreachable_broker();
        let result = transport.connect("sensorpub-test").await;

        assert!(result.is_err());
        assert!(!transport.is_connected());
        assert!(transport.session.is_none());
    }

    #[tokio::test]
    async fn test_publish_without_session() {
        let mut transport = unreachable_broker();
        assert_eq!(
            transport.publish("topic", b"{}".to_vec()).await,
            Err(PublishError::NotConnected)
        );
    }

    #[tokio::test]
    async fn test_poll_and_disconnect_without_session_are_noops() {
        let mut transport = unreachable_broker();
        transport.poll().await;
        transport.disconnect().await;
        assert!(!transport.is_connected());
    }

    #[tokio::test]
    async fn test_publish_timeout_discards_session() {
        let mut transport = unreachable_broker();
        transport.connected = true;

        let limit = Duration::from_secs(1);
        assert_eq!(
            transport.settle_publish(None, limit),
            Err(PublishError::TimedOut(limit))
        );
        assert!(!transport.is_connected());
        assert_eq!(
            transport.publish("topic", b"{}".to_vec()).await,
            Err(PublishError::NotConnected)
        );
    }

    #[test]
    fn test_flushed_publish_keeps_session() {
        let mut transport = unreachable_broker();
        transport.connected = true;

        assert_eq!(
            transport.settle_publish(Some(Ok(())), Duration::from_secs(1)),
            Ok(())
        );
        assert!(transport.is_connected());
    }

    #[test]
    fn test_options_carry_settings() {
        let transport = unreachable_broker();
        let options = transport.options("sensorpub-abc");

        assert_eq!(options.client_id(), "sensorpub-abc");
        assert_eq!(options.broker_address(), ("127.0.0.1".to_string(), 1));
        assert_eq!(options.keep_alive(), Duration::from_secs(15));
        assert!(options.clean_session());
    }
}
