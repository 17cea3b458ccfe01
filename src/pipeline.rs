//! Batch processing stages
//!
//! Each stage works through a list of units (spectrum files, peaks,
//! parameter files). A unit that fails is logged and skipped, the other
//! units are still processed.

use crate::{
    Calibration, CalibrationError, CalibrationPoint, Error, PeakFit, PeakTable, Spectrum,
};
use std::{
    fs,
    path::{Path, PathBuf},
};

/// Outcome of a batch stage
#[derive(Debug, Default)]
pub struct BatchReport {
    /// Files written
    pub written: Vec<PathBuf>,
    /// Units that failed, with the reason
    pub skipped: Vec<(String, Error)>,
}
impl BatchReport {
    fn skip(&mut self, unit: impl ToString, error: impl Into<Error>) {
        let unit = unit.to_string();
        let error = error.into();
        log::warn!("{}: {}, skipping", unit, error_chain(&error));
        self.skipped.push((unit, error));
    }
    pub fn is_complete(&self) -> bool {
        self.skipped.is_empty()
    }
}

/// `error: cause: cause ...`
pub fn error_chain(error: &dyn std::error::Error) -> String {
    let mut message = error.to_string();
    let mut current = error.source();
    while let Some(cause) = current {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        current = cause.source();
    }
    message
}

/// `{out_dir}/{input stem}_{tag}.txt`
pub fn tagged_path<P, Q>(input: P, out_dir: Q, tag: &str) -> PathBuf
where
    P: AsRef<Path>,
    Q: AsRef<Path>,
{
    let stem = input
        .as_ref()
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "spectrum".to_string());
    out_dir.as_ref().join(format!("{}_{}.txt", stem, tag))
}

fn create_dir<P: AsRef<Path>>(dir: P) -> Result<(), Error> {
    fs::create_dir_all(dir.as_ref()).map_err(|source| Error::Output {
        path: dir.as_ref().to_path_buf(),
        source,
    })
}

/// Adds the Poisson error column to every spectrum
///
/// Writes `{stem}_errors.txt` in `out_dir` for each input
pub fn add_errors<P: AsRef<Path>>(
    inputs: &[P],
    out_dir: impl AsRef<Path>,
) -> Result<BatchReport, Error> {
    create_dir(&out_dir)?;
    let mut report = BatchReport::default();
    for input in inputs {
        let input = input.as_ref();
        let output = tagged_path(input, &out_dir, "errors");
        match Spectrum::from_path(input).and_then(|s| s.with_poisson_errors().to_path(&output)) {
            Ok(()) => report.written.push(output),
            Err(e) => report.skip(input.display(), e),
        }
    }
    Ok(report)
}

/// Fits every peak of the table to the spectrum
///
/// Writes `{name}_fitted_parameters.txt` in `out_dir` for each converged fit
pub fn fit_peaks<P: AsRef<Path>>(
    spectrum: &Spectrum,
    peaks: &PeakTable,
    out_dir: P,
) -> Result<(Vec<PeakFit>, BatchReport), Error> {
    create_dir(&out_dir)?;
    let mut report = BatchReport::default();
    let mut fits = vec![];
    for peak in peaks.iter() {
        let fit = match PeakFit::fit(spectrum, peak) {
            Ok(fit) => fit,
            Err(e) => {
                report.skip(&peak.name, e);
                continue;
            }
        };
        let output = out_dir
            .as_ref()
            .join(format!("{}_fitted_parameters.txt", peak.name));
        match fit.to_path(&output) {
            Ok(()) => report.written.push(output),
            Err(e) => report.skip(&peak.name, e),
        }
        fits.push(fit);
    }
    Ok((fits, report))
}

/// Reads the calibration points from fitted-parameter files
///
/// Missing or incomplete files are skipped
pub fn calibration_points<P: AsRef<Path>>(
    param_files: &[P],
) -> (Vec<CalibrationPoint>, BatchReport) {
    let mut report = BatchReport::default();
    let points = param_files
        .iter()
        .filter_map(|path| match CalibrationPoint::from_path(path) {
            Ok(point) => Some(point),
            Err(e) => {
                report.skip(path.as_ref().display(), e);
                None
            }
        })
        .collect();
    (points, report)
}

/// Fits the energy calibration to the peaks of the parameter files
///
/// The calibration file is written only if the fit succeeds
pub fn calibrate<P: AsRef<Path>>(
    param_files: &[P],
    output: impl AsRef<Path>,
) -> Result<(Calibration, BatchReport), Error> {
    let (points, mut report) = calibration_points(param_files);
    let calibration = Calibration::fit(&points)?;
    if let Some(dir) = output.as_ref().parent() {
        create_dir(dir)?;
    }
    calibration.to_path(&output)?;
    report.written.push(output.as_ref().to_path_buf());
    Ok((calibration, report))
}

/// Adds the energy columns to every spectrum
///
/// Writes `{stem}_energies.txt` in `out_dir` for each input
pub fn add_energies<P: AsRef<Path>>(
    calibration: &Calibration,
    inputs: &[P],
    out_dir: impl AsRef<Path>,
) -> Result<BatchReport, Error> {
    create_dir(&out_dir)?;
    let mut report = BatchReport::default();
    for input in inputs {
        let input = input.as_ref();
        let output = tagged_path(input, &out_dir, "energies");
        let result = Spectrum::from_path(input)
            .map_err(CalibrationError::from)
            .and_then(|spectrum| calibration.apply(&spectrum))
            .and_then(|spectrum| Ok(spectrum.to_path(&output)?));
        match result {
            Ok(()) => report.written.push(output),
            Err(e) => report.skip(input.display(), e),
        }
    }
    Ok(report)
}
