//! Gaussian peak fitting
//!
//! A photopeak sitting on a linear background is modeled as
//! `offset + slope x + height exp(-(x-center)^2/(2 width^2))`
//! and fitted to a channel window of a [Spectrum] with the counts errors as
//! weights.

use crate::{
    calibration::CalibrationPoint,
    lsq::{self, FitError, Model, Options},
    params::SEPARATOR,
    Measurement, PeakConfig, Spectrum,
};
use std::{
    fs::File,
    io::{BufWriter, Write},
    path::Path,
};

#[derive(thiserror::Error, Debug)]
pub enum PeakError {
    #[error("{0}: the spectrum has no error column")]
    MissingUncertainties(String),
    #[error("{name}: no channel in [{min},{max}]")]
    EmptyWindow { name: String, min: usize, max: usize },
    #[error("{name}: curve fitting failed")]
    Fit {
        name: String,
        #[source]
        source: FitError,
    },
    #[error("Failed to write the fitted parameters")]
    Io(#[from] std::io::Error),
}
type Result<T> = std::result::Result<T, PeakError>;

/// Gaussian with a linear background
///
/// Parameters: `[offset, slope, height, center, width]`
#[derive(Debug, Default, Clone, Copy)]
pub struct GaussianPeak;
impl GaussianPeak {
    pub fn eval(x: f64, p: &[f64]) -> f64 {
        let u = (x - p[3]) / p[4];
        p[0] + p[1] * x + p[2] * (-0.5 * u * u).exp()
    }
}
impl Model for GaussianPeak {
    fn n_parameter(&self) -> usize {
        5
    }
    fn value(&self, x: f64, p: &[f64]) -> f64 {
        Self::eval(x, p)
    }
    fn gradient(&self, x: f64, p: &[f64]) -> Vec<f64> {
        let (height, center, width) = (p[2], p[3], p[4]);
        let dx = x - center;
        let g = (-0.5 * dx * dx / (width * width)).exp();
        vec![
            1f64,
            x,
            g,
            height * g * dx / (width * width),
            height * g * dx * dx / (width * width * width),
        ]
    }
}

/// Result of a peak fit
#[derive(Debug, Clone)]
pub struct PeakFit {
    pub name: String,
    pub offset: Measurement,
    pub slope: Measurement,
    pub height: Measurement,
    /// Peak position [channel]
    pub center: Measurement,
    /// Gaussian standard deviation [channel]
    pub width: Measurement,
    /// Reference energy of the peak [keV]
    pub energy: f64,
    pub chi_squared: f64,
    pub dof: usize,
    /// Fitted channel range
    pub window: (usize, usize),
}
impl PeakFit {
    /// Fits the peak described by `config` to the spectrum
    ///
    /// Every channel of the window must have a positive error: a window
    /// holding an empty channel (Poisson error 0) fails with
    /// [FitError::InvalidUncertainty] and the peak is skipped by the batch
    /// stage. Move or widen the window away from empty channels.
    pub fn fit(spectrum: &Spectrum, config: &PeakConfig) -> Result<Self> {
        let window = spectrum.window(config.min, config.max);
        if window.is_empty() {
            return Err(PeakError::EmptyWindow {
                name: config.name.clone(),
                min: config.min,
                max: config.max,
            });
        }
        let errors = window
            .errors
            .as_ref()
            .ok_or_else(|| PeakError::MissingUncertainties(config.name.clone()))?;
        let solution = lsq::levenberg_marquardt(
            &GaussianPeak,
            &window.channels,
            &window.counts,
            errors,
            &config.initial_guess,
            Options::default(),
        )
        .map_err(|source| PeakError::Fit {
            name: config.name.clone(),
            source,
        })?;
        let p = solution.measurements();
        let fit = Self {
            name: config.name.clone(),
            offset: p[0],
            slope: p[1],
            height: p[2],
            center: p[3],
            width: Measurement::new(p[4].value.abs(), p[4].error),
            energy: config.energy,
            chi_squared: solution.chi_squared,
            dof: solution.dof,
            window: (config.min, config.max.min(spectrum.len().saturating_sub(1))),
        };
        log::info!(
            "{}: center={:.4} channel, width={:.4} channel, chi2/dof={:.3} ({} iterations)",
            fit.name,
            fit.center,
            fit.width,
            fit.chi_squared / fit.dof as f64,
            solution.iterations
        );
        Ok(fit)
    }
    pub fn parameters(&self) -> [f64; 5] {
        [
            self.offset.value,
            self.slope.value,
            self.height.value,
            self.center.value,
            self.width.value,
        ]
    }
    /// Fitted model sampled at every channel of the fitted window
    pub fn curve(&self) -> Vec<(f64, f64)> {
        let p = self.parameters();
        (self.window.0..=self.window.1)
            .map(|c| c as f64)
            .map(|x| (x, GaussianPeak::eval(x, &p)))
            .collect()
    }
    /// The (channel, energy) pair for the energy calibration
    pub fn calibration_point(&self) -> CalibrationPoint {
        CalibrationPoint::new(self.center, self.energy)
    }
    pub fn to_path<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut buffer = BufWriter::new(File::create(path.as_ref())?);
        self.write_to(&mut buffer)?;
        buffer.flush()?;
        log::info!(
            "Fitted parameters and errors for {} saved to {:?}",
            self.name,
            path.as_ref()
        );
        Ok(())
    }
    pub fn write_to<W: Write>(&self, mut writer: W) -> std::io::Result<()> {
        writeln!(writer, "Fitted parameters for {}:", self.name)?;
        writeln!(writer, "{}", SEPARATOR)?;
        writeln!(writer, "a (offset): {:.4}", self.offset)?;
        writeln!(writer, "b (background slope): {:.4}", self.slope)?;
        writeln!(writer, "c (peak height): {:.4}", self.height)?;
        writeln!(writer, "xc (peak center): {:.4} channel", self.center)?;
        writeln!(writer, "s (peak width): {:.4} channel", self.width)?;
        writeln!(writer, "{}", SEPARATOR)?;
        writeln!(writer, "Gaussian peak energy: {:?} keV", self.energy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::ParameterFile;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    const TRUTH: [f64; 5] = [40., 0.02, 3600., 1112.3, 9.5];

    fn synthetic(noise: Option<u64>) -> Spectrum {
        let mut rng = noise.map(StdRng::seed_from_u64);
        let counts: Vec<f64> = (0..1300)
            .map(|c| GaussianPeak::eval(c as f64, &TRUTH))
            .map(|y| match rng.as_mut() {
                Some(rng) => (y + y.sqrt() * rng.gen_range(-1.7..1.7)).max(0.),
                None => y,
            })
            .collect();
        Spectrum::from_counts(counts).with_poisson_errors()
    }

    fn config() -> PeakConfig {
        PeakConfig {
            name: "Ch1energy1".into(),
            energy: 1173.228,
            min: 1076,
            max: 1151,
            initial_guess: [0., 0., 3e3, 1110., 7.],
        }
    }

    #[test]
    fn gradient_matches_finite_differences() {
        let p = [1., 0.5, 100., 10., 2.];
        let g = GaussianPeak.gradient(11.3, &p);
        for j in 0..5 {
            let h = 1e-6 * p[j].abs().max(1.);
            let mut pp = p;
            pp[j] += h;
            let mut pm = p;
            pm[j] -= h;
            let fd = (GaussianPeak::eval(11.3, &pp) - GaussianPeak::eval(11.3, &pm)) / (2. * h);
            assert!((fd - g[j]).abs() < 1e-5 * fd.abs().max(1.), "{j}: {fd} vs {}", g[j]);
        }
    }

    #[test]
    fn noiseless_peak() {
        let fit = PeakFit::fit(&synthetic(None), &config()).unwrap();
        for (fitted, truth) in fit.parameters().iter().zip(TRUTH) {
            assert!(
                (fitted - truth).abs() < 1e-6 * truth.abs().max(1.),
                "{fitted} vs {truth}"
            );
        }
        assert_eq!(fit.dof, 76 - 5);
        assert_eq!(fit.curve().len(), 76);
    }

    #[test]
    fn noisy_peak() {
        let fit = PeakFit::fit(&synthetic(Some(7)), &config()).unwrap();
        assert!((fit.center.value - TRUTH[3]).abs() < 0.5);
        assert!((fit.width.value - TRUTH[4]).abs() < 0.5);
        assert!(fit.center.error > 0. && fit.center.error < 0.5);
    }

    #[test]
    fn missing_errors() {
        let spectrum = Spectrum::from_counts(vec![1.; 1200]);
        assert!(matches!(
            PeakFit::fit(&spectrum, &config()),
            Err(PeakError::MissingUncertainties(_))
        ));
    }

    #[test]
    fn window_beyond_spectrum() {
        let spectrum = Spectrum::from_counts(vec![1.; 100]).with_poisson_errors();
        assert!(matches!(
            PeakFit::fit(&spectrum, &config()),
            Err(PeakError::EmptyWindow { .. })
        ));
    }

    #[test]
    fn too_narrow_window() {
        let config = PeakConfig {
            min: 1100,
            max: 1103,
            ..config()
        };
        assert!(matches!(
            PeakFit::fit(&synthetic(None), &config),
            Err(PeakError::Fit {
                source: FitError::Underdetermined { .. },
                ..
            })
        ));
    }

    #[test]
    fn empty_channel_in_window() {
        let mut counts = synthetic(None).counts().to_vec();
        counts[1080] = 0.;
        let spectrum = Spectrum::from_counts(counts).with_poisson_errors();
        match PeakFit::fit(&spectrum, &config()) {
            Err(PeakError::Fit {
                source: FitError::InvalidUncertainty { x, sigma },
                ..
            }) => {
                assert_eq!(x, 1080.);
                assert_eq!(sigma, 0.);
            }
            other => panic!("expected an invalid uncertainty, found {:?}", other),
        }
    }

    #[test]
    fn parameter_file_round_trip() {
        let fit = PeakFit::fit(&synthetic(Some(1)), &config()).unwrap();
        let mut buffer = vec![];
        fit.write_to(&mut buffer).unwrap();
        let text = String::from_utf8(buffer).unwrap();
        assert!(text.starts_with("Fitted parameters for Ch1energy1:\n----"));
        assert!(text.ends_with("Gaussian peak energy: 1173.228 keV\n"));
        let params = ParameterFile::parse(&text).unwrap();
        let center = params.measurement("xc (peak center)").unwrap();
        assert!((center.value - fit.center.value).abs() < 1e-4);
    }
}
