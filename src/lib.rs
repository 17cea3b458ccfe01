//! # Gamma-ray spectrum analysis
//!
//! Offline analysis of multichannel analyzer spectra:
//!  - Poisson errors are added to the raw counts ([Spectrum::with_poisson_errors]),
//!  - photopeaks are fitted with a Gaussian on a linear background ([PeakFit]),
//!  - the peak centers of known energies give a quadratic channel to energy
//!    calibration ([Calibration::fit]),
//!  - the calibration adds the energy columns to the spectra ([Calibration::apply]).
//!
//! The stages exchange typed values in-process and the `name: value +- error`
//! text files of [params] on disk.
//! A half-life calculator for exponential decays completes the set ([HalfLife]).

pub mod calibration;
pub mod config;
mod error;
pub mod half_life;
pub mod lsq;
mod measurement;
pub mod params;
pub mod peak;
pub mod pipeline;
#[cfg(feature = "plot")]
pub mod plot;
pub mod spectrum;

pub use calibration::{Calibration, CalibrationError, CalibrationPoint};
pub use config::{Axis, PeakConfig, PeakTable, PlotSettings, Scale};
pub use error::Error;
pub use half_life::HalfLife;
pub use measurement::Measurement;
pub use peak::{GaussianPeak, PeakError, PeakFit};
pub use spectrum::{Spectrum, SpectrumError};
