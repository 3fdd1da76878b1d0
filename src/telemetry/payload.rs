//! JSON payload encoding
//!
//! Two wire layouts are supported and chosen by configuration:
//!
//! ```text
//! batch:            {"Potenciometro":50.01,"Temp":25.00,"Umidade":55.01}
//! per_measurement:  {"sensor_id":4,"value":23.50,"type":"temperatura","unit":"°C","timestamp":"2026-10-19 12:00:00"}
//! ```
//!
//! Numbers are always written with exactly two decimals. Field order follows
//! the struct/measurement order and is part of the format.

use super::Measurement;
use serde::ser::{Error as _, SerializeMap};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::value::RawValue;
use std::fmt;

/// Literal written instead of a timestamp when wall-clock time is unavailable
pub const TIMESTAMP_FALLBACK: &str = "N/A";

#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// How the measurements of one cycle are split into payloads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EncodingStrategy {
    /// One object per cycle holding every measurement
    #[default]
    Batch,
    /// One object per measurement kind, with sensor id, unit and timestamp
    PerMeasurement,
}

/// Encoded message body, ready to hand to the session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload(String);

impl Payload {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0.into_bytes()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// Emits the value as a JSON number with two decimals ("25.00", not 25.0)
struct Fixed2(f64);

impl Serialize for Fixed2 {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if !self.0.is_finite() {
            return Err(S::Error::custom(format!("non-finite value {}", self.0)));
        }
        let raw = RawValue::from_string(format!("{:.2}", self.0)).map_err(S::Error::custom)?;
        raw.serialize(serializer)
    }
}

struct BatchBody<'a>(&'a [Measurement]);

impl Serialize for BatchBody<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for measurement in self.0 {
            map.serialize_entry(measurement.kind.batch_key(), &Fixed2(measurement.value))?;
        }
        map.end()
    }
}

#[derive(Serialize)]
struct MeasurementRecord<'a> {
    sensor_id: u32,
    value: Fixed2,
    #[serde(rename = "type")]
    kind: &'static str,
    unit: &'static str,
    timestamp: &'a str,
}

#[derive(Debug, Clone)]
pub struct PayloadEncoder {
    strategy: EncodingStrategy,
    sensor_id: u32,
}

impl PayloadEncoder {
    pub fn new(strategy: EncodingStrategy, sensor_id: u32) -> Self {
        Self {
            strategy,
            sensor_id,
        }
    }

    pub fn strategy(&self) -> EncodingStrategy {
        self.strategy
    }

    /// Encodes one cycle's measurements, preserving their order.
    ///
    /// `timestamp` is shared by every payload of the cycle; batch payloads
    /// do not carry it. An empty measurement slice yields no payloads.
    pub fn encode(
        &self,
        measurements: &[Measurement],
        timestamp: &str,
    ) -> Result<Vec<Payload>, EncodeError> {
        if measurements.is_empty() {
            return Ok(Vec::new());
        }

        match self.strategy {
            EncodingStrategy::Batch => {
                let body = serde_json::to_string(&BatchBody(measurements))?;
                Ok(vec![Payload(body)])
            }
            EncodingStrategy::PerMeasurement => measurements
                .iter()
                .map(|m| {
                    let record = MeasurementRecord {
                        sensor_id: self.sensor_id,
                        value: Fixed2(m.value),
                        kind: m.kind.label(),
                        unit: m.kind.unit(),
                        timestamp,
                    };
                    Ok(Payload(serde_json::to_string(&record)?))
                })
                .collect(),
        }
    }
}
