//! # Measurement Sources
//!
//! Sensor access and the derivation of measurements from raw samples.
//!
//! ```text
//! sensor/
//! ├── potentiometer.rs  - ADC-backed and simulated potentiometer sources
//! └── dht.rs            - DHT11/DHT22 temperature/humidity sensor on a GPIO pin
//! ```
//!
//! Sources only produce [`Reading`]s. Turning a raw sample into measurements is
//! the job of a [`MeasurementProfile`], which applies the configured linear
//! conversions in a fixed order.

pub mod dht;
pub mod potentiometer;

use crate::telemetry::convert::{ConvertError, LinearMap, Span};
use crate::telemetry::{Measurement, MeasurementKind, RawSample, Reading};

/// Anything that can be sampled once per publication cycle
///
/// `sample` must not block for longer than one sensor transaction. Failures
/// are reported through [`Reading::Invalid`], never by panicking.
pub trait MeasurementSource: Send {
    fn sample(&mut self) -> Reading;

    /// Human readable description for logs
    fn describe(&self) -> String;
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProfileError {
    #[error("Profile '{profile}' cannot interpret sample {sample:?}")]
    UnexpectedSample {
        profile: &'static str,
        sample: RawSample,
    },

    #[error("Invalid conversion range: {0}")]
    Range(#[from] ConvertError),
}

/// Three synthetic quantities derived from one potentiometer position
#[derive(Debug, Clone)]
pub struct PotentiometerProfile {
    percent: LinearMap,
    temperature: LinearMap,
    humidity: LinearMap,
}

impl PotentiometerProfile {
    pub fn new(
        adc_max: u16,
        percent: Span,
        temperature: Span,
        humidity: Span,
    ) -> Result<Self, ProfileError> {
        let input = Span(0.0, adc_max as f64);
        Ok(Self {
            percent: LinearMap::try_new(input, percent)?,
            temperature: LinearMap::try_new(input, temperature)?,
            humidity: LinearMap::try_new(input, humidity)?,
        })
    }
}

/// Sensor-native temperature and humidity, reported in tenths
#[derive(Debug, Clone)]
pub struct ClimateProfile {
    tenths: LinearMap,
}

impl ClimateProfile {
    pub fn new() -> Result<Self, ProfileError> {
        Ok(Self {
            tenths: LinearMap::try_new(Span(0.0, 10.0), Span(0.0, 1.0))?,
        })
    }
}

/// Derivation rules for one deployment variant
///
/// Output order is fixed: potentiometer, temperature, humidity for the
/// potentiometer variant; temperature, humidity for the climate variant.
#[derive(Debug, Clone)]
pub enum MeasurementProfile {
    Potentiometer(PotentiometerProfile),
    Climate(ClimateProfile),
}

impl MeasurementProfile {
    pub fn name(&self) -> &'static str {
        match self {
            MeasurementProfile::Potentiometer(_) => "potentiometer",
            MeasurementProfile::Climate(_) => "climate",
        }
    }

    pub fn derive(&self, sample: &RawSample) -> Result<Vec<Measurement>, ProfileError> {
        match (self, sample) {
            (MeasurementProfile::Potentiometer(p), RawSample::Analog(raw)) => {
                let raw = *raw as f64;
                Ok(vec![
                    Measurement::new(MeasurementKind::Potentiometer, p.percent.apply(raw)),
                    Measurement::new(MeasurementKind::Temperature, p.temperature.apply(raw)),
                    Measurement::new(MeasurementKind::Humidity, p.humidity.apply(raw)),
                ])
            }
            (
                MeasurementProfile::Climate(c),
                RawSample::Climate {
                    temperature_tenths,
                    humidity_tenths,
                },
            ) => Ok(vec![
                Measurement::new(
                    MeasurementKind::Temperature,
                    c.tenths.apply(*temperature_tenths as f64),
                ),
                Measurement::new(
                    MeasurementKind::Humidity,
                    c.tenths.apply(*humidity_tenths as f64),
                ),
            ]),
            _ => Err(ProfileError::UnexpectedSample {
                profile: self.name(),
                sample: *sample,
            }),
        }
    }
}

/// Reads a [`Reading`] and derives its measurements in one step
pub fn sample_measurements(
    source: &mut dyn MeasurementSource,
    profile: &MeasurementProfile,
) -> Result<Vec<Measurement>, SampleError> {
    match source.sample() {
        Reading::Valid(sample) => Ok(profile.derive(&sample)?),
        Reading::Invalid(failure) => Err(SampleError::Invalid(failure)),
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SampleError {
    #[error("Invalid reading: {0}")]
    Invalid(crate::telemetry::ReadFailure),

    #[error(transparent)]
    Profile(#[from] ProfileError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::ReadFailure;

    fn default_potentiometer() -> PotentiometerProfile {
        PotentiometerProfile::new(4095, Span(0.0, 100.0), Span(15.0, 35.0), Span(20.0, 90.0))
            .unwrap()
    }

    struct Fixed(Reading);

    impl MeasurementSource for Fixed {
        fn sample(&mut self) -> Reading {
            self.0.clone()
        }

        fn describe(&self) -> String {
            "fixed".to_string()
        }
    }

    #[test]
    fn test_potentiometer_profile_order_and_values() {
        let profile = MeasurementProfile::Potentiometer(default_potentiometer());
        let measurements = profile.derive(&RawSample::Analog(4095)).unwrap();

        let kinds: Vec<_> = measurements.iter().map(|m| m.kind).collect();
        assert_eq!(
            kinds,
            vec![
                MeasurementKind::Potentiometer,
                MeasurementKind::Temperature,
                MeasurementKind::Humidity
            ]
        );
        assert_eq!(measurements[0].value, 100.0);
        assert_eq!(measurements[1].value, 35.0);
        assert_eq!(measurements[2].value, 90.0);
    }

    #[test]
    fn test_potentiometer_profile_custom_ranges() {
        let profile =
            PotentiometerProfile::new(1023, Span(0.0, 1.0), Span(0.0, 10.0), Span(0.0, 5.0))
                .unwrap();
        let measurements = MeasurementProfile::Potentiometer(profile)
            .derive(&RawSample::Analog(0))
            .unwrap();
        assert!(measurements.iter().all(|m| m.value == 0.0));
    }

    #[test]
    fn test_zero_resolution_is_rejected() {
        let result =
            PotentiometerProfile::new(0, Span(0.0, 100.0), Span(15.0, 35.0), Span(20.0, 90.0));
        assert!(matches!(result, Err(ProfileError::Range(_))));
    }

    #[test]
    fn test_climate_profile_converts_tenths() {
        let profile = MeasurementProfile::Climate(ClimateProfile::new().unwrap());
        let measurements = profile
            .derive(&RawSample::Climate {
                temperature_tenths: -25,
                humidity_tenths: 612,
            })
            .unwrap();

        assert_eq!(measurements[0].kind, MeasurementKind::Temperature);
        assert!((measurements[0].value + 2.5).abs() < 1e-9);
        assert_eq!(measurements[1].kind, MeasurementKind::Humidity);
        assert!((measurements[1].value - 61.2).abs() < 1e-9);
    }

    #[test]
    fn test_mismatched_sample_is_reported() {
        let profile = MeasurementProfile::Climate(ClimateProfile::new().unwrap());
        assert!(matches!(
            profile.derive(&RawSample::Analog(1)),
            Err(ProfileError::UnexpectedSample { profile: "climate", .. })
        ));
    }

    #[test]
    fn test_sample_measurements_passes_failure_through() {
        let profile = MeasurementProfile::Potentiometer(default_potentiometer());
        let mut source = Fixed(Reading::Invalid(ReadFailure::Timing("data bit")));
        assert_eq!(
            sample_measurements(&mut source, &profile),
            Err(SampleError::Invalid(ReadFailure::Timing("data bit")))
        );
    }
}
