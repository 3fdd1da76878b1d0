//! # Telemetry Data Model
//!
//! Typed values that flow through one publication cycle:
//!
//! ```text
//! MeasurementSource ──► Reading ──► [LinearMap] ──► Measurement ──► [Encoder] ──► Payload
//! ```
//!
//! A [`Reading`] is produced once per cycle and is either a raw sample in
//! instrument units or a failure. [`Measurement`]s are derived from a valid
//! sample by linear conversion and carry their unit implicitly through the
//! [`MeasurementKind`]. Nothing here outlives the cycle that created it.

pub mod convert;
pub mod payload;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

pub use payload::{EncodeError, EncodingStrategy, Payload, PayloadEncoder};

/// Raw sample in instrument units
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawSample {
    /// Quantised ADC value (0..=4095 for a 12-bit converter)
    Analog(u16),

    /// One temperature/humidity sensor poll, both in tenths of their unit
    Climate {
        temperature_tenths: i16,
        humidity_tenths: u16,
    },
}

/// Why a sensor transaction produced no usable sample
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReadFailure {
    #[error("Checksum mismatch: expected {expected:#04x}, got {actual:#04x}")]
    Checksum { expected: u8, actual: u8 },

    #[error("Timing violation while waiting for {0}")]
    Timing(&'static str),

    #[error("Sensor not ready, retry in {0:?}")]
    NotReady(Duration),

    #[error("Raw value {value} outside declared range 0..={max}")]
    OutOfRange { value: u32, max: u16 },

    #[error("Sensor I/O error: {0}")]
    Io(String),
}

/// One sample per cycle, or the distinguished invalid reading
#[derive(Debug, Clone, PartialEq)]
pub enum Reading {
    Valid(RawSample),
    Invalid(ReadFailure),
}

impl Reading {
    pub fn is_valid(&self) -> bool {
        matches!(self, Reading::Valid(_))
    }
}

/// Quantities this publisher knows how to report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MeasurementKind {
    Potentiometer,
    Temperature,
    Humidity,
}

impl MeasurementKind {
    /// Field name used when several measurements share one JSON object
    pub fn batch_key(&self) -> &'static str {
        match self {
            MeasurementKind::Potentiometer => "Potenciometro",
            MeasurementKind::Temperature => "Temp",
            MeasurementKind::Humidity => "Umidade",
        }
    }

    /// Kind label used in per-measurement payloads
    pub fn label(&self) -> &'static str {
        match self {
            MeasurementKind::Potentiometer => "potenciometro",
            MeasurementKind::Temperature => "temperatura",
            MeasurementKind::Humidity => "umidade",
        }
    }

    pub fn unit(&self) -> &'static str {
        match self {
            MeasurementKind::Potentiometer => "%",
            MeasurementKind::Temperature => "°C",
            MeasurementKind::Humidity => "%",
        }
    }
}

impl fmt::Display for MeasurementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// A converted, unit-tagged quantity
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Measurement {
    pub kind: MeasurementKind,
    pub value: f64,
}

impl Measurement {
    pub fn new(kind: MeasurementKind, value: f64) -> Self {
        Self { kind, value }
    }
}

impl fmt::Display for Measurement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={:.2}{}", self.kind, self.value, self.kind.unit())
    }
}
