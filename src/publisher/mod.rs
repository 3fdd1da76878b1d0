//! # Publisher
//!
//! Wires configuration, sensor, converter, encoder, link and session into the
//! scheduling state machine in [`scheduler`].
//!
//! ```text
//! PublisherConfig ──assemble()──► Publisher<Initializing>
//!                                   │ start()
//!                                   ▼
//!                                 Publisher<Running> ──tick()──► TickReport
//! ```
//!
//! Runtime failures (link timeouts, rejected sessions, invalid readings,
//! rejected publishes) never leave the scheduler; they are logged and the loop
//! carries on. Only assembly can fail.

pub mod scheduler;

use crate::clock::SystemClock;
use crate::config::{ConfigError, DeviceConfig, PublisherConfig};
use crate::network::link::{HostLink, InterfaceLink, LinkDriver};
use crate::network::mqtt_transport::MqttTransport;
use crate::network::{LinkManager, SessionManager};
use crate::sensor::dht::Dht;
use crate::sensor::potentiometer::{IioAdcChannel, SweepPotentiometer};
use crate::sensor::{MeasurementSource, ProfileError};
use crate::telemetry::PayloadEncoder;
use std::time::Duration;
use tracing::info;

pub use scheduler::{
    Initializing, Publication, PublishStats, Publisher, PublisherSettings, Running, Stopped,
    TickReport,
};

/// Errors that prevent the publisher from being built
#[derive(Debug, thiserror::Error)]
pub enum PublisherError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Measurement profile error: {0}")]
    Profile(#[from] ProfileError),

    #[error("GPIO error: {0}")]
    Gpio(#[from] rppal::gpio::Error),
}

fn link_driver(config: &PublisherConfig) -> Box<dyn LinkDriver> {
    match &config.network.interface {
        Some(interface) => Box::new(InterfaceLink::new(interface.clone(), config.network.join)),
        None => Box::new(HostLink),
    }
}

fn measurement_source(
    config: &PublisherConfig,
) -> Result<Box<dyn MeasurementSource>, PublisherError> {
    let source: Box<dyn MeasurementSource> = match &config.sensor.device {
        DeviceConfig::Potentiometer(pot) => match &pot.iio_path {
            Some(path) => Box::new(IioAdcChannel::new(path.clone(), pot.adc_max)),
            None => Box::new(SweepPotentiometer::new(pot.adc_max, pot.sweep_step)),
        },
        DeviceConfig::Dht { model, pin } => Box::new(Dht::open(*pin, *model)?),
    };
    Ok(source)
}

/// Builds an initialized publisher from a validated configuration.
pub fn assemble(config: &PublisherConfig) -> Result<Publisher<Initializing>, PublisherError> {
    config.validate()?;

    let link = LinkManager::new(
        link_driver(config),
        Duration::from_millis(config.network.poll_interval_ms),
    );
    let session = SessionManager::new(
        Box::new(MqttTransport::new(config.broker_settings())),
        Duration::from_millis(config.broker.reconnect_delay_ms),
    );
    let source = measurement_source(config)?;
    let profile = config.profile()?;
    let encoder = PayloadEncoder::new(config.sensor.encoding, config.sensor.id);
    let clock = Box::new(SystemClock::new(config.clock.min_valid_year));

    let settings = PublisherSettings {
        topic: config.broker.topic.clone(),
        client_id: config.client_id(),
        credentials: config.network.credentials.clone(),
        link_timeout: Duration::from_millis(config.network.connect_timeout_ms),
        publish_interval: Duration::from_millis(config.schedule.publish_interval_ms),
        tick_interval: Duration::from_millis(config.schedule.tick_interval_ms),
    };
    info!(
        "Assembled publisher for {}:{} as '{}'",
        config.broker.host, config.broker.port, settings.client_id
    );

    Ok(Publisher::create(
        settings, link, session, source, profile, encoder, clock,
    ))
}
