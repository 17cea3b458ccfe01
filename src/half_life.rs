use crate::Measurement;
use std::{f64::consts::LN_2, fmt};

/// Decay constant measured in the laboratory run [1/ns]
pub const DECAY_CONSTANT: Measurement = Measurement {
    value: 0.116569,
    error: 0.0044064,
};
/// Tabulated half-life the measurement is compared to [ns]
pub const REFERENCE_HALF_LIFE: f64 = 6.283;

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum HalfLifeError {
    #[error("the decay constant must be finite and non-zero, found {0}")]
    DecayConstant(f64),
    #[error("the reference half-life must be finite and non-zero, found {0}")]
    Reference(f64),
}
type Result<T> = std::result::Result<T, HalfLifeError>;

/// Half-life `ln(2)/lambda` of an exponential decay `exp(-lambda t)`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HalfLife(Measurement);
impl HalfLife {
    /// Computes the half-life and its first-order uncertainty
    /// `ln(2)/lambda^2 sigma_lambda` from the decay constant `lambda`
    pub fn from_decay_constant(decay_constant: Measurement) -> Result<Self> {
        let Measurement { value, error } = decay_constant;
        if !value.is_finite() || value == 0f64 {
            return Err(HalfLifeError::DecayConstant(value));
        }
        Ok(Self(Measurement::new(
            LN_2 / value,
            LN_2 / (value * value) * error,
        )))
    }
    pub fn value(&self) -> f64 {
        self.0.value
    }
    pub fn error(&self) -> f64 {
        self.0.error
    }
    pub fn measurement(&self) -> Measurement {
        self.0
    }
    /// Relative difference to the reference value in percent
    pub fn relative_error(&self, reference: f64) -> Result<f64> {
        if !reference.is_finite() || reference == 0f64 {
            return Err(HalfLifeError::Reference(reference));
        }
        Ok((reference - self.value()).abs() / reference * 100f64)
    }
}
impl fmt::Display for HalfLife {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Calculated half-life: {:.6} ns", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn laboratory_value() {
        let half_life = HalfLife::from_decay_constant(DECAY_CONSTANT).unwrap();
        assert!((half_life.value() - LN_2 / 0.116569).abs() < 1e-12);
        assert!((half_life.error() - LN_2 / 0.116569f64.powi(2) * 0.0044064).abs() < 1e-12);
        // within the propagated uncertainty of the tabulated estimate
        assert!((half_life.value() - 5.9435).abs() < half_life.error());
        let relative_error = half_life.relative_error(REFERENCE_HALF_LIFE).unwrap();
        assert!((relative_error - 5.35987).abs() < 1e-4);
    }

    #[test]
    fn report() {
        let half_life = HalfLife::from_decay_constant(DECAY_CONSTANT).unwrap();
        assert_eq!(
            half_life.to_string(),
            "Calculated half-life: 5.946239 +- 0.224773 ns"
        );
    }

    #[test]
    fn zero_decay_constant() {
        assert_eq!(
            HalfLife::from_decay_constant(Measurement::new(0., 0.1)),
            Err(HalfLifeError::DecayConstant(0.))
        );
    }
}
