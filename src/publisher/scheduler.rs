//! Publish scheduler with statum lifecycle states
//!
//! # Lifecycle
//!
//! ```text
//! Initializing ──start()──► Running ──run_until_cancelled()──► Stopped ──shutdown()
//! ```
//!
//! # Tick
//!
//! A tick is one pass of the loop, every `tick_interval` (100ms by default):
//!
//! ```text
//! link down?        ──► bounded link connect ──(timeout)──► LINK_DOWN, no session work
//! session down?     ──► connect_blocking (returns only on success)
//! READY             ──► session poll (a lost session downgrades the phase)
//! interval elapsed? ──► last_publish = now ──► READY ? sample/convert/encode/publish
//!                                               : log "not published"
//! ```
//!
//! The cadence clock moves forward whenever a boundary is crossed, even if
//! nothing could be published. Missed intervals are never caught up.

use crate::clock::Clock;
use crate::network::{ConnectionPhase, ConnectionState, Credentials, LinkManager, SessionManager};
use crate::sensor::{sample_measurements, MeasurementProfile, MeasurementSource, SampleError};
use crate::telemetry::{PayloadEncoder, ReadFailure};
use statum::{machine, state};
use std::fmt;
use std::time::Duration;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Fixed parameters of the publish loop
#[derive(Debug, Clone)]
pub struct PublisherSettings {
    pub topic: String,
    pub client_id: String,
    pub credentials: Credentials,
    /// Bound on one link connect attempt
    pub link_timeout: Duration,
    /// Time between publication attempts
    pub publish_interval: Duration,
    /// Scheduler polling period
    pub tick_interval: Duration,
}

/// What the cadence check did during one tick
#[derive(Debug, Clone, PartialEq)]
pub enum Publication {
    /// Interval not yet elapsed
    NotDue,
    /// Payloads were handed to the session; `rejected` of them failed
    Published { attempted: usize, rejected: usize },
    /// Interval elapsed without a usable connection
    Dropped,
    /// Sensor produced no valid reading this cycle
    SkippedInvalid(ReadFailure),
    /// Sample could not be turned into payloads
    Failed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct TickReport {
    pub phase: ConnectionPhase,
    pub publication: Publication,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishStats {
    pub ticks: u64,
    pub published: u64,
    pub rejected: u64,
    pub dropped: u64,
    pub invalid_readings: u64,
}

impl fmt::Display for PublishStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ticks, {} published, {} rejected, {} dropped (no connection), {} invalid readings",
            self.ticks, self.published, self.rejected, self.dropped, self.invalid_readings
        )
    }
}

#[state]
#[derive(Debug, Clone)]
pub enum PublisherState {
    Initializing,
    Running,
    Stopped,
}

#[machine]
pub struct Publisher<S: PublisherState> {
    settings: PublisherSettings,
    link: LinkManager,
    session: SessionManager,
    source: Box<dyn MeasurementSource>,
    profile: MeasurementProfile,
    encoder: PayloadEncoder,
    clock: Box<dyn Clock>,
    last_publish: Instant,
    stats: PublishStats,
}

impl<S: PublisherState> Publisher<S> {
    pub fn stats(&self) -> &PublishStats {
        &self.stats
    }

    /// Cadence clock: when the last interval boundary was crossed
    pub fn last_publish(&self) -> Instant {
        self.last_publish
    }

    pub fn connection_state(&self) -> ConnectionState {
        ConnectionState {
            link: self.link.is_connected(),
            session: self.session.is_connected(),
        }
    }
}

impl Publisher<Initializing> {
    pub fn create(
        settings: PublisherSettings,
        link: LinkManager,
        session: SessionManager,
        source: Box<dyn MeasurementSource>,
        profile: MeasurementProfile,
        encoder: PayloadEncoder,
        clock: Box<dyn Clock>,
    ) -> Self {
        info!(
            "Creating publisher: topic '{}', {} via {}, {:?} encoding",
            settings.topic,
            profile.name(),
            source.describe(),
            encoder.strategy()
        );
        let last_publish = clock.now();

        Self::new(
            settings,
            link,
            session,
            source,
            profile,
            encoder,
            clock,
            last_publish,
            PublishStats::default(),
        )
    }

    /// Brings the link up once (bounded) and enters the Running state.
    ///
    /// A link timeout here is not an error; the first ticks retry it.
    pub async fn start(mut self) -> Publisher<Running> {
        if self.link.is_connected() {
            info!("Link {} already up", self.link.describe());
        } else if let Err(e) = self
            .link
            .connect(&self.settings.credentials, self.settings.link_timeout)
            .await
        {
            warn!("Starting without network: {}", e);
        }

        info!("Publisher initialized, transitioning to Running state");
        self.transition()
    }
}

impl Publisher<Running> {
    /// Runs one scheduler iteration.
    pub async fn tick(&mut self) -> TickReport {
        self.stats.ticks += 1;

        let mut phase = self.recover().await;
        if phase == ConnectionPhase::Ready {
            self.session.poll().await;
            // Broker may have dropped us while polling
            phase = self.connection_state().phase();
        }

        let publication = self.check_cadence(phase).await;
        TickReport { phase, publication }
    }

    // Link first, then session. Returns the phase this tick operates in.
    async fn recover(&mut self) -> ConnectionPhase {
        let mut state = self.connection_state();

        if state.phase() == ConnectionPhase::LinkDown {
            if let Err(e) = self
                .link
                .connect(&self.settings.credentials, self.settings.link_timeout)
                .await
            {
                warn!("{}; session recovery skipped this tick", e);
                return ConnectionPhase::LinkDown;
            }
            state = self.connection_state();
        }

        if state.phase() == ConnectionPhase::LinkUpSessionDown {
            info!("Session down, reconnecting (publishing suspended)");
            self.session.connect_blocking(&self.settings.client_id).await;
            state = self.connection_state();
        }

        state.phase()
    }

    async fn check_cadence(&mut self, phase: ConnectionPhase) -> Publication {
        let now = self.clock.now();
        if now.duration_since(self.last_publish) < self.settings.publish_interval {
            return Publication::NotDue;
        }
        self.last_publish = now;

        if phase != ConnectionPhase::Ready {
            self.stats.dropped += 1;
            info!("Not published, no connection ({})", phase);
            return Publication::Dropped;
        }

        self.publish_cycle().await
    }

    async fn publish_cycle(&mut self) -> Publication {
        let measurements = match sample_measurements(self.source.as_mut(), &self.profile) {
            Ok(m) => m,
            Err(SampleError::Invalid(failure)) => {
                self.stats.invalid_readings += 1;
                warn!("Skipping cycle, sensor read failed: {}", failure);
                return Publication::SkippedInvalid(failure);
            }
            Err(SampleError::Profile(e)) => {
                error!("Cannot derive measurements: {}", e);
                return Publication::Failed(e.to_string());
            }
        };

        let timestamp = self.clock.timestamp_or_fallback();
        let payloads = match self.encoder.encode(&measurements, &timestamp) {
            Ok(p) => p,
            Err(e) => {
                error!("Cannot encode {:?}: {}", measurements, e);
                return Publication::Failed(e.to_string());
            }
        };

        let attempted = payloads.len();
        let mut rejected = 0;
        for payload in payloads {
            info!("Publishing: {}", payload);
            match self
                .session
                .publish(&self.settings.topic, payload.into_bytes())
                .await
            {
                Ok(()) => self.stats.published += 1,
                Err(e) => {
                    warn!("Payload dropped: {}", e);
                    self.stats.rejected += 1;
                    rejected += 1;
                }
            }
        }

        Publication::Published {
            attempted,
            rejected,
        }
    }

    /// Ticks until `token` is cancelled.
    ///
    /// Cancellation also interrupts a pending link or session reconnect.
    pub async fn run_until_cancelled(mut self, token: CancellationToken) -> Publisher<Stopped> {
        info!(
            "Starting publish loop: every {:?}, tick {:?}",
            self.settings.publish_interval, self.settings.tick_interval
        );

        let mut ticker = interval(self.settings.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {}
            }

            tokio::select! {
                _ = token.cancelled() => break,
                report = self.tick() => debug!("Tick: {:?}", report),
            }
        }

        info!("Cancellation received, transitioning to Stopped state");
        self.transition()
    }
}

impl Publisher<Stopped> {
    /// Closes the session and returns the final statistics.
    pub async fn shutdown(mut self) -> PublishStats {
        self.session.disconnect().await;
        info!("Publisher stopped: {}", self.stats);
        self.stats
    }
}
