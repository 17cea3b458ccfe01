use parse_spectra::{
    pipeline, CalibrationError, Error, GaussianPeak, PeakConfig, PeakTable, Spectrum,
};
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::{fs, path::Path};
use tempfile::TempDir;

// E = A ch^2 + B ch + C
const A: f64 = 2e-5;
const B: f64 = 0.9;
const C: f64 = 10.;
const CENTERS: [f64; 3] = [400., 900., 1400.];

fn energy(channel: f64) -> f64 {
    A * channel * channel + B * channel + C
}

fn write_raw(path: &Path, seed: u64) {
    let mut rng = StdRng::seed_from_u64(seed);
    let text: String = (0..2000)
        .map(|c| {
            let x = c as f64;
            let y = 50.
                + CENTERS
                    .iter()
                    .map(|&center| GaussianPeak::eval(x, &[0., 0., 2000., center, 8.]))
                    .sum::<f64>();
            let y = (y + y.sqrt() * rng.gen_range(-1.5..1.5)).max(0.).round();
            format!("{}\n", y)
        })
        .collect();
    fs::write(path, text).unwrap();
}

fn peak_table() -> PeakTable {
    CENTERS
        .iter()
        .enumerate()
        .map(|(i, &center)| {
            PeakConfig::new(
                format!("peak{}", i + 1),
                energy(center),
                (center as usize - 40, center as usize + 40),
                [40., 0., 1800., center + 2., 6.],
            )
        })
        .collect::<Vec<_>>()
        .into()
}

fn write_params(path: &Path, center: &str, energy: f64) {
    fs::write(
        path,
        format!(
            "Fitted parameters for {}:\nxc (peak center): {} channel\nGaussian peak energy: {} keV\n",
            path.display(),
            center,
            energy
        ),
    )
    .unwrap();
}

#[test]
fn missing_input_is_skipped() {
    let dir = TempDir::new().unwrap();
    let raw = dir.path().join("run.txt");
    write_raw(&raw, 3);
    let inputs = [raw, dir.path().join("absent.txt")];
    let report = pipeline::add_errors(&inputs, dir.path().join("out")).unwrap();
    assert_eq!(report.written, vec![dir.path().join("out").join("run_errors.txt")]);
    assert_eq!(report.skipped.len(), 1);
    assert!(report.skipped[0].0.ends_with("absent.txt"));
    assert!(!report.is_complete());

    let spectrum = Spectrum::from_path(&report.written[0]).unwrap();
    assert_eq!(spectrum.len(), 2000);
    let errors = spectrum.errors().unwrap();
    for (count, error) in spectrum.counts().iter().zip(errors) {
        assert!((error - count.sqrt()).abs() < 1e-4);
    }
}

#[test]
fn full_chain() {
    let dir = TempDir::new().unwrap();
    let raw = dir.path().join("calib.txt");
    write_raw(&raw, 11);
    let errors = pipeline::add_errors(&[&raw], dir.path()).unwrap();
    assert!(errors.is_complete());

    let spectrum = Spectrum::from_path(&errors.written[0]).unwrap();
    let (fits, report) =
        pipeline::fit_peaks(&spectrum, &peak_table(), dir.path().join("Results")).unwrap();
    assert!(report.is_complete());
    assert_eq!(fits.len(), 3);
    for (fit, center) in fits.iter().zip(CENTERS) {
        assert!((fit.center.value - center).abs() < 0.5, "{}", fit.center);
        assert!(fit.center.error > 0.);
    }

    let (calibration, report) = pipeline::calibrate(
        &report.written,
        dir.path().join("Results").join("Quadratic_fit_parameters.txt"),
    )
    .unwrap();
    assert!(report.is_complete());
    assert!(dir.path().join("Results/Quadratic_fit_parameters.txt").exists());
    for center in CENTERS {
        assert!((calibration.energy(center) - energy(center)).abs() < 1.);
    }

    let report = pipeline::add_energies(&calibration, &errors.written, dir.path().join("energies"))
        .unwrap();
    assert!(report.is_complete());
    let calibrated = Spectrum::from_path(&report.written[0]).unwrap();
    let energies = calibrated.energies().unwrap();
    assert_eq!(energies.len(), 2000);
    assert!((energies[900].value - energy(900.)).abs() < 1.);
    assert!(energies[900].error > 0.);
}

#[test]
fn failing_peaks_are_skipped() {
    let dir = TempDir::new().unwrap();
    let raw = dir.path().join("run.txt");
    write_raw(&raw, 5);
    let spectrum = Spectrum::from_path(&raw).unwrap().with_poisson_errors();
    let mut peaks: Vec<PeakConfig> = peak_table().to_vec();
    peaks.insert(
        1,
        PeakConfig::new("beyond", 2500., (2100, 2200), [40., 0., 1800., 2150., 6.]),
    );
    peaks.insert(
        3,
        PeakConfig::new("narrow", 836., (900, 902), [40., 0., 1800., 901., 6.]),
    );

    let out_dir = dir.path().join("Results");
    let (fits, report) = pipeline::fit_peaks(&spectrum, &peaks.into(), &out_dir).unwrap();
    assert_eq!(
        fits.iter().map(|fit| fit.name.as_str()).collect::<Vec<_>>(),
        vec!["peak1", "peak2", "peak3"]
    );
    assert_eq!(report.written.len(), 3);
    assert_eq!(
        report
            .skipped
            .iter()
            .map(|(unit, _)| unit.as_str())
            .collect::<Vec<_>>(),
        vec!["beyond", "narrow"]
    );
    assert!(!out_dir.join("beyond_fitted_parameters.txt").exists());
    assert!(!out_dir.join("narrow_fitted_parameters.txt").exists());
    assert!(out_dir.join("peak3_fitted_parameters.txt").exists());
}

#[test]
fn underdetermined_calibration_writes_nothing() {
    let dir = TempDir::new().unwrap();
    let files = vec![
        dir.path().join("peak1_fitted_parameters.txt"),
        dir.path().join("peak2_fitted_parameters.txt"),
        dir.path().join("peak3_fitted_parameters.txt"),
    ];
    write_params(&files[0], "400.0000 +- 0.0500", energy(400.));
    write_params(&files[1], "900.0000 +- 0.0500", energy(900.));
    // no uncertainty on the center
    write_params(&files[2], "1400.0000", energy(1400.));
    let output = dir.path().join("Quadratic_fit_parameters.txt");

    let result = pipeline::calibrate(&files, &output);
    assert!(matches!(
        result,
        Err(Error::Calibration(CalibrationError::Underdetermined { .. }))
    ));
    assert!(!output.exists());

    let (points, report) = pipeline::calibration_points(&files);
    assert_eq!(points.len(), 2);
    assert_eq!(report.skipped.len(), 1);
}
