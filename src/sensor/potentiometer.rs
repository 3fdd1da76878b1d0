//! Potentiometer sources
//!
//! [`IioAdcChannel`] reads a real converter through the Linux Industrial I/O
//! sysfs interface. [`SweepPotentiometer`] is a deterministic surrogate that
//! walks the knob back and forth across the full range, for hosts without an
//! ADC.

use super::MeasurementSource;
use crate::telemetry::{RawSample, ReadFailure, Reading};
use std::fs;
use std::path::PathBuf;
use tracing::debug;

/// Highest raw value of a 12-bit converter
pub const ADC_MAX_12BIT: u16 = 4095;

/// Simulated knob sweeping between 0 and `max` by `step` per sample
#[derive(Debug, Clone)]
pub struct SweepPotentiometer {
    position: u16,
    step: u16,
    max: u16,
    rising: bool,
}

impl SweepPotentiometer {
    pub fn new(max: u16, step: u16) -> Self {
        Self {
            position: 0,
            step: step.max(1),
            max,
            rising: true,
        }
    }
}

impl MeasurementSource for SweepPotentiometer {
    fn sample(&mut self) -> Reading {
        let current = self.position;

        if self.rising {
            self.position = self.position.saturating_add(self.step).min(self.max);
            if self.position == self.max {
                self.rising = false;
            }
        } else {
            self.position = self.position.saturating_sub(self.step);
            if self.position == 0 {
                self.rising = true;
            }
        }

        Reading::Valid(RawSample::Analog(current))
    }

    fn describe(&self) -> String {
        format!("simulated potentiometer (0..={}, step {})", self.max, self.step)
    }
}

/// One channel of an IIO ADC, e.g. `/sys/bus/iio/devices/iio:device0/in_voltage0_raw`
#[derive(Debug, Clone)]
pub struct IioAdcChannel {
    path: PathBuf,
    max: u16,
}

impl IioAdcChannel {
    pub fn new(path: impl Into<PathBuf>, max: u16) -> Self {
        Self {
            path: path.into(),
            max,
        }
    }
}

impl MeasurementSource for IioAdcChannel {
    fn sample(&mut self) -> Reading {
        let content = match fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) => {
                return Reading::Invalid(ReadFailure::Io(format!(
                    "{}: {}",
                    self.path.display(),
                    e
                )))
            }
        };

        let value: u32 = match content.trim().parse() {
            Ok(v) => v,
            Err(e) => {
                return Reading::Invalid(ReadFailure::Io(format!(
                    "unparsable ADC value '{}': {}",
                    content.trim(),
                    e
                )))
            }
        };

        if value > self.max as u32 {
            return Reading::Invalid(ReadFailure::OutOfRange {
                value,
                max: self.max,
            });
        }

        debug!("ADC {} raw={}", self.path.display(), value);
        Reading::Valid(RawSample::Analog(value as u16))
    }

    fn describe(&self) -> String {
        format!("IIO ADC channel {} (0..={})", self.path.display(), self.max)
    }
}
