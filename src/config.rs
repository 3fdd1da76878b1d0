//! # Configuration
//!
//! Everything deployment specific lives in one TOML file:
//!
//! ```toml
//! [network]
//! interface = "wlan0"
//! join = true
//! ssid = "lab"
//! password = "..."
//!
//! [broker]
//! host = "broker.hivemq.com"
//! port = 1883
//! topic = "ProjetoFinalIot"
//!
//! [schedule]
//! publish_interval_ms = 5000
//!
//! [sensor]
//! id = 4
//! encoding = "per_measurement"
//!
//! [sensor.device]
//! type = "dht"
//! model = "dht22"
//! pin = 4
//! ```
//!
//! Missing keys fall back to defaults, so an empty file is a valid
//! configuration for the simulated potentiometer.

use crate::network::mqtt_transport::{BrokerSettings, MIN_POLL_WINDOW};
use crate::network::Credentials;
use crate::sensor::dht::DhtModel;
use crate::sensor::potentiometer::ADC_MAX_12BIT;
use crate::sensor::{ClimateProfile, MeasurementProfile, PotentiometerProfile, ProfileError};
use crate::telemetry::convert::Span;
use crate::telemetry::EncodingStrategy;
use color_eyre::eyre::{eyre, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

const CONFIG_DIR: &str = ".config/sensorpub";
const CONFIG_FILE: &str = "config.toml";
const CONFIG_ENV: &str = "SENSORPUB_CONFIG";
const MACHINE_ID_FILE: &str = "/etc/machine-id";

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid setting '{field}': {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error(transparent)]
    Profile(#[from] ProfileError),
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct PublisherConfig {
    pub network: NetworkConfig,
    pub broker: BrokerConfig,
    pub schedule: ScheduleConfig,
    pub sensor: SensorConfig,
    pub clock: ClockConfig,
}

/// Link layer settings
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct NetworkConfig {
    /// Interface to supervise; host networking is assumed when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interface: Option<String>,
    /// Start association through nmcli instead of only observing the interface
    pub join: bool,
    #[serde(flatten)]
    pub credentials: Credentials,
    pub connect_timeout_ms: u64,
    pub poll_interval_ms: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            interface: None,
            join: false,
            credentials: Credentials::default(),
            connect_timeout_ms: 20_000,
            poll_interval_ms: 500,
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    pub topic: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    pub keep_alive_secs: u64,
    pub reconnect_delay_ms: u64,
    pub connect_timeout_ms: u64,
    pub publish_timeout_ms: u64,
    pub poll_window_ms: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: "broker.hivemq.com".to_string(),
            port: 1883,
            topic: "ProjetoFinalIot".to_string(),
            client_id: None,
            username: None,
            password: None,
            keep_alive_secs: 15,
            reconnect_delay_ms: 2_000,
            connect_timeout_ms: 5_000,
            publish_timeout_ms: 1_000,
            poll_window_ms: 50,
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct ScheduleConfig {
    pub publish_interval_ms: u64,
    pub tick_interval_ms: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            publish_interval_ms: 5_000,
            tick_interval_ms: 100,
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct SensorConfig {
    /// Identifier written into per-measurement payloads
    pub id: u32,
    pub encoding: EncodingStrategy,
    pub device: DeviceConfig,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            id: 32,
            encoding: EncodingStrategy::Batch,
            device: DeviceConfig::default(),
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeviceConfig {
    Potentiometer(PotentiometerConfig),
    Dht { model: DhtModel, pin: u8 },
}

impl Default for DeviceConfig {
    fn default() -> Self {
        DeviceConfig::Potentiometer(PotentiometerConfig::default())
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct PotentiometerConfig {
    /// IIO sysfs file to read; a simulated sweep is used when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iio_path: Option<PathBuf>,
    pub sweep_step: u16,
    pub adc_max: u16,
    pub percent_range: Span,
    pub temperature_range: Span,
    pub humidity_range: Span,
}

impl Default for PotentiometerConfig {
    fn default() -> Self {
        Self {
            iio_path: None,
            sweep_step: 128,
            adc_max: ADC_MAX_12BIT,
            percent_range: Span(0.0, 100.0),
            temperature_range: Span(15.0, 35.0),
            humidity_range: Span(20.0, 90.0),
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct ClockConfig {
    /// Wall-clock years before this are treated as "time not synced"
    pub min_valid_year: i32,
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            min_valid_year: 2020,
        }
    }
}

impl PublisherConfig {
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| eyre!("Failed to parse config: {}", e))
    }

    pub async fn load(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;
        let config = Self::from_toml(&content)?;
        debug!("Loaded config from {}: {:?}", path.display(), config);
        Ok(config)
    }

    /// Writes the default configuration to `path` unless a file already exists.
    pub async fn ensure_default_config(path: &Path) -> Result<()> {
        if tokio::fs::try_exists(path)
            .await
            .map_err(|e| eyre!("Failed to check if config exists: {}", e))?
        {
            return Ok(());
        }

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| eyre!("Failed to create config directory: {}", e))?;
        }

        let content = toml::to_string_pretty(&Self::default())
            .map_err(|e| eyre!("Failed to serialize default config: {}", e))?;
        tokio::fs::write(path, content)
            .await
            .map_err(|e| eyre!("Failed to write default config: {}", e))?;

        info!("Wrote default configuration to {}", path.display());
        Ok(())
    }

    /// `$SENSORPUB_CONFIG`, else the first CLI argument, else `~/.config/sensorpub/config.toml`
    pub fn resolve_path() -> Result<PathBuf> {
        if let Ok(path) = std::env::var(CONFIG_ENV) {
            return Ok(PathBuf::from(path));
        }
        if let Some(arg) = std::env::args().nth(1) {
            return Ok(PathBuf::from(arg));
        }
        let mut path = dirs::home_dir().ok_or_else(|| eyre!("No home directory found"))?;
        path.push(CONFIG_DIR);
        path.push(CONFIG_FILE);
        Ok(path)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.broker.host.trim().is_empty() {
            return Err(invalid("broker.host", "must not be empty"));
        }
        if self.broker.port == 0 {
            return Err(invalid("broker.port", "must not be 0"));
        }
        if self.broker.topic.is_empty() {
            return Err(invalid("broker.topic", "must not be empty"));
        }
        if self.broker.topic.contains(['+', '#']) {
            return Err(invalid("broker.topic", "wildcards cannot be published to"));
        }
        if let Some(id) = &self.broker.client_id {
            if id.trim().is_empty() || id.starts_with(char::is_whitespace) {
                return Err(invalid("broker.client_id", "must not be blank"));
            }
        }
        for (field, value) in [
            ("schedule.publish_interval_ms", self.schedule.publish_interval_ms),
            ("schedule.tick_interval_ms", self.schedule.tick_interval_ms),
            ("network.poll_interval_ms", self.network.poll_interval_ms),
            ("broker.connect_timeout_ms", self.broker.connect_timeout_ms),
            ("broker.publish_timeout_ms", self.broker.publish_timeout_ms),
        ] {
            if value == 0 {
                return Err(invalid(field, "must be greater than 0"));
            }
        }
        if Duration::from_millis(self.broker.poll_window_ms) < MIN_POLL_WINDOW {
            return Err(invalid(
                "broker.poll_window_ms",
                format!("must be at least {}", MIN_POLL_WINDOW.as_millis()),
            ));
        }
        self.profile()?;
        Ok(())
    }

    pub fn profile(&self) -> Result<MeasurementProfile, ProfileError> {
        match &self.sensor.device {
            DeviceConfig::Potentiometer(p) => Ok(MeasurementProfile::Potentiometer(
                PotentiometerProfile::new(
                    p.adc_max,
                    p.percent_range,
                    p.temperature_range,
                    p.humidity_range,
                )?,
            )),
            DeviceConfig::Dht { .. } => Ok(MeasurementProfile::Climate(ClimateProfile::new()?)),
        }
    }

    pub fn client_id(&self) -> String {
        if let Some(id) = &self.broker.client_id {
            return id.clone();
        }
        let suffix = std::fs::read_to_string(MACHINE_ID_FILE)
            .ok()
            .map(|id| id.trim().chars().take(8).collect::<String>())
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| std::process::id().to_string());
        format!("sensorpub-{}", suffix)
    }

    pub fn broker_settings(&self) -> BrokerSettings {
        BrokerSettings {
            host: self.broker.host.clone(),
            port: self.broker.port,
            username: self.broker.username.clone(),
            password: self.broker.password.clone(),
            keep_alive: Duration::from_secs(self.broker.keep_alive_secs),
            connect_timeout: Duration::from_millis(self.broker.connect_timeout_ms),
            publish_timeout: Duration::from_millis(self.broker.publish_timeout_ms),
            poll_window: Duration::from_millis(self.broker.poll_window_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_gives_defaults() {
        let config = PublisherConfig::from_toml("").unwrap();
        assert_eq!(config, PublisherConfig::default());
        assert_eq!(config.broker.port, 1883);
        assert_eq!(config.schedule.publish_interval_ms, 5_000);
        assert_eq!(config.network.connect_timeout_ms, 20_000);
        assert_eq!(config.broker.reconnect_delay_ms, 2_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_dht_deployment() {
        let config = PublisherConfig::from_toml(
            r#"
            [network]
            interface = "wlan0"
            join = true
            ssid = "lab"
            password = "secret"

            [broker]
            topic = "sensors/room1"
            client_id = "room1"

            [sensor]
            id = 4
            encoding = "per_measurement"

            [sensor.device]
            type = "dht"
            model = "dht11"
            pin = 4
            "#,
        )
        .unwrap();

        assert_eq!(config.network.credentials.ssid, "lab");
        assert_eq!(config.network.interface.as_deref(), Some("wlan0"));
        assert_eq!(config.sensor.encoding, EncodingStrategy::PerMeasurement);
        assert_eq!(
            config.sensor.device,
            DeviceConfig::Dht {
                model: DhtModel::Dht11,
                pin: 4
            }
        );
        assert_eq!(config.client_id(), "room1");
        assert!(matches!(
            config.profile().unwrap(),
            MeasurementProfile::Climate(_)
        ));
    }

    #[test]
    fn test_potentiometer_ranges_from_toml() {
        let config = PublisherConfig::from_toml(
            r#"
            [sensor.device]
            type = "potentiometer"
            adc_max = 1023
            temperature_range = [-10.0, 50.0]
            "#,
        )
        .unwrap();

        let DeviceConfig::Potentiometer(pot) = &config.sensor.device else {
            panic!("expected potentiometer");
        };
        assert_eq!(pot.adc_max, 1023);
        assert_eq!(pot.temperature_range, Span(-10.0, 50.0));
        assert_eq!(pot.humidity_range, Span(20.0, 90.0));
    }

    #[test]
    fn test_default_config_round_trips_through_toml() {
        let written = toml::to_string_pretty(&PublisherConfig::default()).unwrap();
        assert_eq!(
            PublisherConfig::from_toml(&written).unwrap(),
            PublisherConfig::default()
        );
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = PublisherConfig::default();
        config.broker.topic = "sensors/#".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid {
                field: "broker.topic",
                ..
            })
        ));

        let mut config = PublisherConfig::default();
        config.schedule.tick_interval_ms = 0;
        assert!(config.validate().is_err());

        let mut config = PublisherConfig::default();
        config.broker.poll_window_ms = 10;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid {
                field: "broker.poll_window_ms",
                ..
            })
        ));
        config.broker.poll_window_ms = 50;
        assert!(config.validate().is_ok());

        let mut config = PublisherConfig::default();
        config.sensor.device = DeviceConfig::Potentiometer(PotentiometerConfig {
            adc_max: 0,
            ..Default::default()
        });
        assert!(matches!(config.validate(), Err(ConfigError::Profile(_))));
    }

    #[test]
    fn test_generated_client_id() {
        let config = PublisherConfig::default();
        let id = config.client_id();
        assert!(id.starts_with("sensorpub-"));
        assert!(id.len() > "sensorpub-".len());
    }

    #[tokio::test]
    async fn test_ensure_default_config_writes_once() {
        let dir = std::env::temp_dir().join(format!("sensorpub-config-{}", std::process::id()));
        let path = dir.join("nested").join(CONFIG_FILE);

        PublisherConfig::ensure_default_config(&path).await.unwrap();
        assert_eq!(
            PublisherConfig::load(&path).await.unwrap(),
            PublisherConfig::default()
        );

        tokio::fs::write(&path, "[schedule]\npublish_interval_ms = 1000\n")
            .await
            .unwrap();
        PublisherConfig::ensure_default_config(&path).await.unwrap();
        let config = PublisherConfig::load(&path).await.unwrap();
        assert_eq!(config.schedule.publish_interval_ms, 1000);

        tokio::fs::remove_dir_all(&dir).await.unwrap();
    }
}
