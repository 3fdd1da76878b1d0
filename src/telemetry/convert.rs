//! Linear unit conversion ("rule of three") between an input and output range.
//!
//! Values outside the input range are extrapolated, never clamped. Callers
//! that need bounded output must guarantee the raw value stays in range.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, thiserror::Error)]
pub enum ConvertError {
    #[error("Input range is degenerate (in_min == in_max == {0})")]
    DivideByZero(f64),
}

/// Maps `raw` from `[in_min, in_max]` onto `[out_min, out_max]`.
pub fn map_range(
    raw: f64,
    in_min: f64,
    in_max: f64,
    out_min: f64,
    out_max: f64,
) -> Result<f64, ConvertError> {
    if in_max == in_min {
        return Err(ConvertError::DivideByZero(in_min));
    }
    Ok((raw - in_min) * (out_max - out_min) / (in_max - in_min) + out_min)
}

/// Inclusive numeric range as written in configuration files: `[min, max]`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Span(pub f64, pub f64);

impl Span {
    pub fn min(&self) -> f64 {
        self.0
    }

    pub fn max(&self) -> f64 {
        self.1
    }
}

/// Pre-validated linear mapping
///
/// The degenerate-range check happens once in [`LinearMap::try_new`], so
/// [`LinearMap::apply`] is total.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearMap {
    input: Span,
    output: Span,
}

impl LinearMap {
    pub fn try_new(input: Span, output: Span) -> Result<Self, ConvertError> {
        if input.min() == input.max() {
            return Err(ConvertError::DivideByZero(input.min()));
        }
        Ok(Self { input, output })
    }

    pub fn apply(&self, raw: f64) -> f64 {
        (raw - self.input.min()) * (self.output.max() - self.output.min())
            / (self.input.max() - self.input.min())
            + self.output.min()
    }

    pub fn input(&self) -> Span {
        self.input
    }

    pub fn output(&self) -> Span {
        self.output
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoints_are_exact() {
        for (out_min, out_max) in [(0.0, 100.0), (15.0, 35.0), (20.0, 90.0)] {
            assert_eq!(map_range(0.0, 0.0, 4095.0, out_min, out_max), Ok(out_min));
            assert_eq!(map_range(4095.0, 0.0, 4095.0, out_min, out_max), Ok(out_max));
        }
    }

    #[test]
    fn test_midpoint_is_not_rounded() {
        let t = map_range(2048.0, 0.0, 4095.0, 15.0, 35.0).unwrap();
        assert!((t - 25.002_442).abs() < 1e-5, "got {}", t);
        assert_ne!(t, 25.0);
    }

    #[test]
    fn test_monotonic_and_linear_over_domain() {
        let map = LinearMap::try_new(Span(0.0, 4095.0), Span(20.0, 90.0)).unwrap();
        let step = map.apply(1.0) - map.apply(0.0);
        let mut previous = map.apply(0.0);
        for raw in 1..=4095 {
            let current = map.apply(raw as f64);
            assert!(current > previous);
            assert!((current - previous - step).abs() < 1e-9);
            previous = current;
        }
    }

    #[test]
    fn test_out_of_domain_is_extrapolated() {
        let map = LinearMap::try_new(Span(0.0, 10.0), Span(0.0, 100.0)).unwrap();
        assert_eq!(map.apply(-1.0), -10.0);
        assert_eq!(map.apply(20.0), 200.0);
    }

    #[test]
    fn test_degenerate_input_range() {
        assert_eq!(
            map_range(5.0, 3.0, 3.0, 0.0, 1.0),
            Err(ConvertError::DivideByZero(3.0))
        );
        assert!(LinearMap::try_new(Span(7.0, 7.0), Span(0.0, 1.0)).is_err());
    }

    #[test]
    fn test_inverted_output_range() {
        let map = LinearMap::try_new(Span(0.0, 100.0), Span(1.0, 0.0)).unwrap();
        assert_eq!(map.apply(0.0), 1.0);
        assert_eq!(map.apply(100.0), 0.0);
    }
}
