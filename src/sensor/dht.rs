//! DHT11 / DHT22 single-wire temperature and humidity sensor
//!
//! The sensor answers a start pulse with a 40-bit frame:
//!
//! ```text
//! [humidity hi][humidity lo][temperature hi][temperature lo][checksum]
//! ```
//!
//! Each bit is a ~50µs low followed by a high pulse whose width encodes the
//! value (~27µs = 0, ~70µs = 1). Pulse capture needs the GPIO; everything after
//! that ([`bits_to_frame`], [`decode_frame`]) is plain data handling.

use super::MeasurementSource;
use crate::telemetry::{RawSample, ReadFailure, Reading};
use rppal::gpio::{Bias, Gpio, IoPin, Level, Mode};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

pub const FRAME_BITS: usize = 40;

// High pulses longer than this are ones
const ONE_THRESHOLD: Duration = Duration::from_micros(50);

const RESPONSE_TIMEOUT: Duration = Duration::from_micros(200);
const BIT_TIMEOUT: Duration = Duration::from_micros(120);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DhtModel {
    Dht11,
    #[default]
    Dht22,
}

impl DhtModel {
    /// How long the host holds the line low to wake the sensor
    pub fn start_signal(&self) -> Duration {
        match self {
            DhtModel::Dht11 => Duration::from_millis(18),
            DhtModel::Dht22 => Duration::from_micros(1100),
        }
    }

    /// Minimum spacing between two transactions
    pub fn min_interval(&self) -> Duration {
        match self {
            DhtModel::Dht11 => Duration::from_secs(1),
            DhtModel::Dht22 => Duration::from_secs(2),
        }
    }
}

/// Turns 40 measured high-pulse widths into frame bytes, MSB first.
pub fn bits_to_frame(high_pulses: &[Duration]) -> Result<[u8; 5], ReadFailure> {
    if high_pulses.len() != FRAME_BITS {
        return Err(ReadFailure::Timing("complete data frame"));
    }

    let mut frame = [0u8; 5];
    for (i, pulse) in high_pulses.iter().enumerate() {
        frame[i / 8] <<= 1;
        if *pulse > ONE_THRESHOLD {
            frame[i / 8] |= 1;
        }
    }
    Ok(frame)
}

/// Validates the checksum and converts a frame into tenths of °C / %RH.
pub fn decode_frame(model: DhtModel, frame: [u8; 5]) -> Result<RawSample, ReadFailure> {
    let expected = frame[0]
        .wrapping_add(frame[1])
        .wrapping_add(frame[2])
        .wrapping_add(frame[3]);
    if expected != frame[4] {
        return Err(ReadFailure::Checksum {
            expected,
            actual: frame[4],
        });
    }

    let (temperature_tenths, humidity_tenths) = match model {
        DhtModel::Dht11 => {
            let humidity = frame[0] as u16 * 10 + frame[1] as u16;
            let magnitude = frame[2] as i16 * 10 + (frame[3] & 0x0f) as i16;
            let temperature = if frame[3] & 0x80 != 0 {
                -magnitude
            } else {
                magnitude
            };
            (temperature, humidity)
        }
        DhtModel::Dht22 => {
            let humidity = u16::from_be_bytes([frame[0], frame[1]]);
            let magnitude = u16::from_be_bytes([frame[2] & 0x7f, frame[3]]) as i16;
            let temperature = if frame[2] & 0x80 != 0 {
                -magnitude
            } else {
                magnitude
            };
            (temperature, humidity)
        }
    };

    Ok(RawSample::Climate {
        temperature_tenths,
        humidity_tenths,
    })
}

// The data line idles high between frames
const DATA_LINE_BIAS: Bias = Bias::PullUp;

/// DHT sensor attached to a BCM-numbered Raspberry Pi GPIO pin
pub struct Dht {
    pin: IoPin,
    bcm_pin: u8,
    model: DhtModel,
    last_attempt: Option<Instant>,
}

impl Dht {
    pub fn open(bcm_pin: u8, model: DhtModel) -> Result<Self, rppal::gpio::Error> {
        let gpio = Gpio::new()?;
        let mut pin = gpio.get(bcm_pin)?.into_io(Mode::Input);
        pin.set_bias(DATA_LINE_BIAS);
        debug!("Opened {:?} on GPIO{}", model, bcm_pin);

        Ok(Self {
            pin,
            bcm_pin,
            model,
            last_attempt: None,
        })
    }

    // Busy-waits while the line stays at `level`, returning how long it did
    fn wait_while(
        &self,
        level: Level,
        limit: Duration,
        phase: &'static str,
    ) -> Result<Duration, ReadFailure> {
        let start = Instant::now();
        while self.pin.read() == level {
            if start.elapsed() > limit {
                return Err(ReadFailure::Timing(phase));
            }
        }
        Ok(start.elapsed())
    }

    fn transaction(&mut self) -> Result<[u8; 5], ReadFailure> {
        self.pin.set_mode(Mode::Output);
        self.pin.set_low();
        std::thread::sleep(self.model.start_signal());
        self.pin.set_high();
        self.pin.set_mode(Mode::Input);

        self.wait_while(Level::High, RESPONSE_TIMEOUT, "sensor response")?;
        self.wait_while(Level::Low, RESPONSE_TIMEOUT, "response low phase")?;
        self.wait_while(Level::High, RESPONSE_TIMEOUT, "response high phase")?;

        let mut pulses = [Duration::ZERO; FRAME_BITS];
        for pulse in pulses.iter_mut() {
            self.wait_while(Level::Low, BIT_TIMEOUT, "bit start")?;
            *pulse = self.wait_while(Level::High, BIT_TIMEOUT, "bit value")?;
        }

        bits_to_frame(&pulses)
    }
}

impl MeasurementSource for Dht {
    fn sample(&mut self) -> Reading {
        if let Some(last) = self.last_attempt {
            let since = last.elapsed();
            let min = self.model.min_interval();
            if since < min {
                return Reading::Invalid(ReadFailure::NotReady(min - since));
            }
        }
        self.last_attempt = Some(Instant::now());

        match self
            .transaction()
            .and_then(|frame| decode_frame(self.model, frame))
        {
            Ok(sample) => Reading::Valid(sample),
            Err(failure) => {
                warn!("GPIO{} {:?} read failed: {}", self.bcm_pin, self.model, failure);
                Reading::Invalid(failure)
            }
        }
    }

    fn describe(&self) -> String {
        format!("{:?} on GPIO{}", self.model, self.bcm_pin)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_line_idles_high() {
        assert_eq!(DATA_LINE_BIAS, Bias::PullUp);
    }

    fn pulses_for(frame: [u8; 5]) -> Vec<Duration> {
        frame
            .iter()
            .flat_map(|byte| (0..8).rev().map(move |bit| (byte >> bit) & 1))
            .map(|bit| {
                if bit == 1 {
                    Duration::from_micros(70)
                } else {
                    Duration::from_micros(27)
                }
            })
            .collect()
    }

    fn with_checksum(bytes: [u8; 4]) -> [u8; 5] {
        let sum = bytes.iter().fold(0u8, |acc, b| acc.wrapping_add(*b));
        [bytes[0], bytes[1], bytes[2], bytes[3], sum]
    }

    #[test]
    fn test_bits_to_frame_msb_first() {
        let frame = with_checksum([0x02, 0x8c, 0x01, 0x5f]);
        assert_eq!(bits_to_frame(&pulses_for(frame)), Ok(frame));
    }

    #[test]
    fn test_short_pulse_train_is_timing_failure() {
        let pulses = vec![Duration::from_micros(27); 39];
        assert!(matches!(
            bits_to_frame(&pulses),
            Err(ReadFailure::Timing(_))
        ));
    }

    #[test]
    fn test_dht22_decode() {
        // 65.2 %RH, 35.1 °C
        let frame = with_checksum([0x02, 0x8c, 0x01, 0x5f]);
        assert_eq!(
            decode_frame(DhtModel::Dht22, frame),
            Ok(RawSample::Climate {
                temperature_tenths: 351,
                humidity_tenths: 652
            })
        );
    }

    #[test]
    fn test_dht22_negative_temperature() {
        let frame = with_checksum([0x01, 0xf4, 0x80, 0x65]);
        assert_eq!(
            decode_frame(DhtModel::Dht22, frame),
            Ok(RawSample::Climate {
                temperature_tenths: -101,
                humidity_tenths: 500
            })
        );
    }

    #[test]
    fn test_dht11_decode() {
        let frame = with_checksum([45, 0, 23, 4]);
        assert_eq!(
            decode_frame(DhtModel::Dht11, frame),
            Ok(RawSample::Climate {
                temperature_tenths: 234,
                humidity_tenths: 450
            })
        );
    }

    #[test]
    fn test_checksum_mismatch() {
        let mut frame = with_checksum([0x02, 0x8c, 0x01, 0x5f]);
        frame[4] ^= 0x01;
        assert_eq!(
            decode_frame(DhtModel::Dht22, frame),
            Err(ReadFailure::Checksum {
                expected: 0xee,
                actual: 0xef
            })
        );
    }

    #[test]
    fn test_model_timings() {
        assert!(DhtModel::Dht11.start_signal() > DhtModel::Dht22.start_signal());
        assert_eq!(DhtModel::Dht22.min_interval(), Duration::from_secs(2));
    }
}
