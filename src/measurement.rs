use std::fmt;

/// A value with its 1-sigma uncertainty
#[derive(Default, Debug, Clone, Copy, PartialEq)]
pub struct Measurement {
    pub value: f64,
    pub error: f64,
}
impl Measurement {
    pub fn new(value: f64, error: f64) -> Self {
        Self {
            value,
            error: error.abs(),
        }
    }
    /// A value known without uncertainty
    pub fn exact(value: f64) -> Self {
        Self { value, error: 0f64 }
    }
    /// Relative uncertainty `error/|value|`
    pub fn relative_error(&self) -> f64 {
        self.error / self.value.abs()
    }
    pub fn is_finite(&self) -> bool {
        self.value.is_finite() && self.error.is_finite()
    }
    pub fn as_tuple(&self) -> (f64, f64) {
        (self.value, self.error)
    }
}
impl From<(f64, f64)> for Measurement {
    fn from((value, error): (f64, f64)) -> Self {
        Self::new(value, error)
    }
}
impl From<f64> for Measurement {
    fn from(value: f64) -> Self {
        Self::exact(value)
    }
}
/// Formats as `value +- error`, the precision applies to both numbers
impl fmt::Display for Measurement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match f.precision() {
            Some(p) => write!(f, "{:.*} +- {:.*}", p, self.value, p, self.error),
            None => write!(f, "{} +- {}", self.value, self.error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_with_precision() {
        let m = Measurement::new(1107.123456, 0.04321);
        assert_eq!(format!("{:.4}", m), "1107.1235 +- 0.0432");
        assert_eq!(format!("{:.6}", Measurement::exact(-1.5)), "-1.500000 +- 0.000000");
    }

    #[test]
    fn negative_error_is_folded() {
        let m: Measurement = (2.0, -0.5).into();
        assert_eq!(m.error, 0.5);
        assert_eq!(m.relative_error(), 0.25);
    }
}
