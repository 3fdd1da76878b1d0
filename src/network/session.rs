//! Session manager: the transport connection on top of the link
//!
//! Unlike the link, the session is re-established with an unbounded retry
//! loop: [`SessionManager::connect_blocking`] keeps trying with a fixed delay
//! and only returns once a session is up. Callers that need to abort it do
//! so by dropping the future (the scheduler selects it against a
//! cancellation token).
//!
//! Publishing is a single best-effort send. Nothing is retried or queued.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("Session rejected: {0}")]
    Rejected(String),

    #[error("Session attempt timed out after {0:?}")]
    TimedOut(Duration),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PublishError {
    #[error("Publish rejected: {0}")]
    Rejected(String),

    #[error("No session to publish on")]
    NotConnected,

    #[error("Publish not sent within {0:?}")]
    TimedOut(Duration),
}

pub type TransportFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// One transport-session implementation (MQTT in production)
pub trait Transport: Send {
    /// Single connection attempt
    fn connect<'a>(
        &'a mut self,
        client_id: &'a str,
    ) -> TransportFuture<'a, Result<(), SessionError>>;

    fn is_connected(&self) -> bool;

    /// Sends exactly one message
    fn publish<'a>(
        &'a mut self,
        topic: &'a str,
        payload: Vec<u8>,
    ) -> TransportFuture<'a, Result<(), PublishError>>;

    /// Services keep-alive and any inbound traffic that is ready
    fn poll(&mut self) -> TransportFuture<'_, ()>;

    fn disconnect(&mut self) -> TransportFuture<'_, ()>;
}

pub struct SessionManager {
    transport: Box<dyn Transport>,
    reconnect_delay: Duration,
    attempts: u64,
}

impl SessionManager {
    pub fn new(transport: Box<dyn Transport>, reconnect_delay: Duration) -> Self {
        Self {
            transport,
            reconnect_delay,
            attempts: 0,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    /// Total connection attempts made so far
    pub fn attempts(&self) -> u64 {
        self.attempts
    }

    /// Retries session establishment until it succeeds.
    ///
    /// Never times out and never gives up. Every other activity of the caller
    /// is suspended for the duration.
    pub async fn connect_blocking(&mut self, client_id: &str) {
        let mut failures: u64 = 0;
        loop {
            self.attempts += 1;
            info!("Connecting session as '{}'", client_id);

            match self.transport.connect(client_id).await {
                Ok(()) => {
                    info!("Session connected after {} failed attempt(s)", failures);
                    return;
                }
                Err(e) => {
                    failures += 1;
                    warn!(
                        "Session connect failed: {}; retrying in {:?}",
                        e, self.reconnect_delay
                    );
                    sleep(self.reconnect_delay).await;
                }
            }
        }
    }

    pub async fn publish(&mut self, topic: &str, payload: Vec<u8>) -> Result<(), PublishError> {
        if !self.transport.is_connected() {
            return Err(PublishError::NotConnected);
        }
        self.transport.publish(topic, payload).await
    }

    pub async fn poll(&mut self) {
        self.transport.poll().await;
        if !self.transport.is_connected() {
            debug!("Session dropped during housekeeping");
        }
    }

    pub async fn disconnect(&mut self) {
        if self.transport.is_connected() {
            self.transport.disconnect().await;
        }
    }
}
