use std::path::PathBuf;

use crate::{
    calibration::CalibrationError, config::ConfigError, half_life::HalfLifeError,
    params::ParamsError, peak::PeakError, spectrum::SpectrumError,
};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Error in the `spectrum` module")]
    Spectrum(#[from] SpectrumError),
    #[error("Error in the `params` module")]
    Params(#[from] ParamsError),
    #[error("Error in the `peak` module")]
    Peak(#[from] PeakError),
    #[error("Error in the `calibration` module")]
    Calibration(#[from] CalibrationError),
    #[error("Error in the `half_life` module")]
    HalfLife(#[from] HalfLifeError),
    #[error("Error in the `config` module")]
    Config(#[from] ConfigError),
    #[error("Failed to create the output directory {path:?}")]
    Output {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
