//! Channel to energy calibration
//!
//! The energy is a quadratic function of the channel,
//! `E = a c^2 + b c + c0`, fitted to the centers of peaks of known energy.

use crate::{
    lsq::{self, FitError, Sigma},
    params::{ParameterFile, ParamsError, SEPARATOR},
    Measurement, Spectrum, SpectrumError,
};
use nalgebra::DMatrix;
use std::{
    fs::File,
    io::{BufWriter, Write},
    path::Path,
};

#[derive(thiserror::Error, Debug)]
pub enum CalibrationError {
    #[error("{usable} usable calibration points, at least 3 are required")]
    Underdetermined { usable: usize },
    #[error("quadratic calibration fit failed")]
    Fit(#[from] FitError),
    #[error("Failed to read the calibration parameters")]
    Params(#[from] ParamsError),
    #[error("Failed to write the calibration parameters")]
    Io(#[from] std::io::Error),
    #[error("Failed to add the energies to the spectrum")]
    Spectrum(#[from] SpectrumError),
}
type Result<T> = std::result::Result<T, CalibrationError>;

/// A peak center with the reference energy of the peak
///
/// Every field is optional as the points are gathered from parameter files
/// that may be incomplete.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct CalibrationPoint {
    /// Peak center [channel]
    pub channel: Option<f64>,
    pub channel_error: Option<f64>,
    /// Reference energy [keV]
    pub energy: Option<f64>,
}
impl CalibrationPoint {
    pub fn new(channel: Measurement, energy: f64) -> Self {
        Self {
            channel: Some(channel.value),
            channel_error: Some(channel.error),
            energy: Some(energy),
        }
    }
    /// Reads the peak center and the reference energy from a fitted-parameter file
    pub fn from_path<P: AsRef<Path>>(path: P) -> std::result::Result<Self, ParamsError> {
        let params = ParameterFile::from_path(path)?;
        Ok(Self::new(
            params.measurement("xc (peak center)")?,
            params.value("Gaussian peak energy")?,
        ))
    }
    /// Returns `(channel, channel error, energy)` if the point can enter the fit
    pub fn usable(&self) -> Option<(f64, f64, f64)> {
        match *self {
            CalibrationPoint {
                channel: Some(channel),
                channel_error: Some(error),
                energy: Some(energy),
            } if channel.is_finite() && energy.is_finite() && error.is_finite() && error > 0f64 => {
                Some((channel, error, energy))
            }
            _ => None,
        }
    }
}

/// Quadratic calibration `energy = a channel^2 + b channel + c`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Calibration {
    pub a: Measurement,
    pub b: Measurement,
    pub c: Measurement,
}
impl Calibration {
    /// The calibration with `energy = channel`
    pub fn identity() -> Self {
        Self {
            a: Measurement::exact(0f64),
            b: Measurement::exact(1f64),
            c: Measurement::exact(0f64),
        }
    }
    /// Weighted least-squares fit to the calibration points
    ///
    /// The weights are the inverse squared channel errors, taken as
    /// absolute uncertainties. Incomplete points are skipped.
    pub fn fit(points: &[CalibrationPoint]) -> Result<Self> {
        let usable: Vec<_> = points
            .iter()
            .enumerate()
            .filter_map(|(k, point)| {
                let usable = point.usable();
                if usable.is_none() {
                    log::warn!("calibration point #{} is incomplete, skipping: {:?}", k, point);
                }
                usable
            })
            .collect();
        if usable.len() < 3 {
            return Err(CalibrationError::Underdetermined {
                usable: usable.len(),
            });
        }
        let design = DMatrix::from_fn(usable.len(), 3, |i, j| usable[i].0.powi(2 - j as i32));
        let (sigma, energy): (Vec<f64>, Vec<f64>) = usable.iter().map(|&(_, s, e)| (s, e)).unzip();
        let solution = lsq::linear_least_squares(&design, &energy, &sigma, Sigma::Absolute)?;
        let p = solution.measurements();
        let calibration = Self {
            a: p[0],
            b: p[1],
            c: p[2],
        };
        log::info!(
            "calibration from {} points: a={:.6e}, b={:.6e}, c={:.6e}",
            usable.len(),
            calibration.a.value,
            calibration.b.value,
            calibration.c.value
        );
        Ok(calibration)
    }
    /// Energy at the given channel
    pub fn energy(&self, channel: f64) -> f64 {
        (self.a.value * channel + self.b.value) * channel + self.c.value
    }
    /// Energy uncertainty at the given channel
    ///
    /// First-order propagation with the channel taken as exact and without
    /// the a-b-c covariance terms:
    /// `sigma_E^2 = (2 a channel sigma_a)^2 + (b sigma_b)^2`
    pub fn energy_error(&self, channel: f64) -> f64 {
        let ea = 2f64 * self.a.value * channel * self.a.error;
        let eb = self.b.value * self.b.error;
        ea.hypot(eb)
    }
    pub fn energy_measurement(&self, channel: f64) -> Measurement {
        Measurement::new(self.energy(channel), self.energy_error(channel))
    }
    /// Adds the energy columns to a spectrum, one energy per channel
    pub fn apply(&self, spectrum: &Spectrum) -> Result<Spectrum> {
        let energies = spectrum
            .channels()
            .map(|c| self.energy_measurement(c as f64))
            .collect();
        Ok(spectrum.with_energies(energies)?)
    }
    /// Reads a calibration parameter file
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let params = ParameterFile::from_path(path)?;
        Ok(Self {
            a: params.measurement("a (quadratic term)")?,
            b: params.measurement("b (linear term)")?,
            c: params.measurement("c (constant term)")?,
        })
    }
    pub fn to_path<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut buffer = BufWriter::new(File::create(path.as_ref())?);
        self.write_to(&mut buffer)?;
        buffer.flush()?;
        log::info!("Fitted quadratic parameters saved to {:?}", path.as_ref());
        Ok(())
    }
    pub fn write_to<W: Write>(&self, mut writer: W) -> std::io::Result<()> {
        writeln!(writer, "Fitted parameters for quadratic energy calibration:")?;
        writeln!(writer, "{}", SEPARATOR)?;
        writeln!(writer, "a (quadratic term): {:.6}", self.a)?;
        writeln!(writer, "b (linear term): {:.6}", self.b)?;
        writeln!(writer, "c (constant term): {:.6}", self.c)?;
        writeln!(writer, "{}", SEPARATOR)
    }
    /// Formula caption `y = (a) x^2 + (b) x + (c)`
    pub fn formula(&self) -> String {
        format!(
            "y = ({:.4e}) x^2 + ({:.4e}) x + ({:.4e})",
            self.a.value, self.b.value, self.c.value
        )
    }
}
