use anyhow::Context;
use parse_spectra::{
    pipeline, Calibration, HalfLife, Measurement, PeakTable, PlotSettings, Scale, Spectrum,
};
#[cfg(feature = "plot")]
use std::path::Path;
use std::path::PathBuf;
use structopt::StructOpt;

#[derive(Debug, StructOpt)]
#[structopt(
    name = "parse-spectra",
    about = "Gamma-ray spectrum peak fitting and energy calibration"
)]
enum Opt {
    /// Adds the Poisson error column sqrt(counts) to raw spectra
    AddErrors {
        /// Raw spectrum files
        #[structopt(parse(from_os_str), required = true)]
        inputs: Vec<PathBuf>,
        /// Output directory
        #[structopt(short, long, parse(from_os_str), default_value = ".")]
        out_dir: PathBuf,
    },
    /// Fits the Gaussian photopeaks of a spectrum with an error column
    FitPeaks {
        #[structopt(parse(from_os_str))]
        spectrum: PathBuf,
        /// Peak table CSV file (name,energy,min,max,offset,slope,height,center,width),
        /// the 60Co peaks if omitted
        #[structopt(short, long, parse(from_os_str))]
        peaks: Option<PathBuf>,
        /// Output directory
        #[structopt(short, long, parse(from_os_str), default_value = "Results")]
        out_dir: PathBuf,
        /// Plot the spectrum with the fitted peaks
        #[structopt(long)]
        plot: bool,
        /// Y axis scale: log or linear
        #[structopt(short, long, default_value = "log")]
        scale: Scale,
    },
    /// Fits the quadratic channel to energy calibration to fitted peaks
    Calibrate {
        /// Fitted-parameter files or glob patterns
        #[structopt(required = true)]
        params: Vec<String>,
        /// Calibration parameter file
        #[structopt(
            short,
            long,
            parse(from_os_str),
            default_value = "Results/Quadratic_fit_parameters.txt"
        )]
        output: PathBuf,
        /// Plot the calibration curve
        #[structopt(long)]
        plot: bool,
    },
    /// Adds the energy columns to spectra with an error column
    AddEnergies {
        /// Calibration parameter file
        #[structopt(short, long, parse(from_os_str))]
        calibration: PathBuf,
        #[structopt(parse(from_os_str), required = true)]
        inputs: Vec<PathBuf>,
        /// Output directory
        #[structopt(short, long, parse(from_os_str), default_value = ".")]
        out_dir: PathBuf,
    },
    /// Plots spectra against channels or energies
    Plot {
        #[structopt(parse(from_os_str), required = true)]
        inputs: Vec<PathBuf>,
        /// X axis: channel or energy
        #[structopt(short, long, default_value = "channel")]
        axis: parse_spectra::Axis,
        /// Y axis scale: log or linear
        #[structopt(short, long, default_value = "log")]
        scale: Scale,
        /// X axis upper limit
        #[structopt(long, default_value = "2000")]
        x_max: f64,
        /// Output directory
        #[structopt(short, long, parse(from_os_str), default_value = "Results")]
        out_dir: PathBuf,
    },
    /// Half-life of an exponential decay from its decay constant
    HalfLife {
        /// Decay constant [1/ns]
        #[structopt(long, default_value = "0.116569")]
        slope: f64,
        /// Decay constant uncertainty [1/ns]
        #[structopt(long, default_value = "0.0044064")]
        slope_error: f64,
        /// Reference half-life [ns]
        #[structopt(long, default_value = "6.283")]
        reference: f64,
    },
}

/// Expands the glob patterns, keeping the paths that match nothing so that
/// they are reported as missing
fn expand(patterns: &[String]) -> anyhow::Result<Vec<PathBuf>> {
    let mut paths = vec![];
    for pattern in patterns {
        let matches = glob::glob(pattern)
            .with_context(|| format!("invalid pattern {:?}", pattern))?
            .collect::<Result<Vec<_>, _>>()?;
        if matches.is_empty() {
            paths.push(PathBuf::from(pattern));
        } else {
            paths.extend(matches);
        }
    }
    Ok(paths)
}

fn summary(stage: &str, report: &pipeline::BatchReport) {
    println!(
        "{}: {} file(s) written, {} unit(s) skipped",
        stage,
        report.written.len(),
        report.skipped.len()
    );
    for path in &report.written {
        println!(" - {}", path.display());
    }
}

#[cfg(feature = "plot")]
fn stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "spectrum".to_string())
}

#[cfg(not(feature = "plot"))]
fn plots_disabled() {
    log::warn!("built without the `plot` feature, no plot is produced");
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let opt = Opt::from_args();
    log::debug!("{:?}", opt);

    match opt {
        Opt::AddErrors { inputs, out_dir } => {
            let report = pipeline::add_errors(&inputs, &out_dir)?;
            summary("add-errors", &report);
        }
        Opt::FitPeaks {
            spectrum,
            peaks,
            out_dir,
            plot,
            scale,
        } => {
            let table = match peaks {
                Some(path) => PeakTable::from_path(&path)
                    .with_context(|| format!("failed to load the peak table {:?}", path))?,
                None => PeakTable::cobalt_60(),
            };
            let data = Spectrum::from_path(&spectrum)?;
            let (fits, report) = pipeline::fit_peaks(&data, &table, &out_dir)?;
            summary("fit-peaks", &report);
            if plot {
                let settings = PlotSettings {
                    scale,
                    ..Default::default()
                };
                #[cfg(feature = "plot")]
                parse_spectra::plot::peak_fits(
                    &data,
                    &fits,
                    &settings,
                    out_dir.join(settings.file_name(&stem(&spectrum), "Fit", "png")),
                )
                .map_err(|e| anyhow::anyhow!("{}", e))?;
                #[cfg(not(feature = "plot"))]
                {
                    let _ = (&fits, &settings);
                    plots_disabled();
                }
            }
        }
        Opt::Calibrate {
            params,
            output,
            plot,
        } => {
            let files = expand(&params)?;
            let (calibration, report) = pipeline::calibrate(&files, &output)
                .context("energy calibration aborted, no parameter file written")?;
            summary("calibrate", &report);
            println!("{}", calibration.formula());
            if plot {
                #[cfg(feature = "plot")]
                {
                    let (points, _) = pipeline::calibration_points(&files);
                    parse_spectra::plot::calibration(
                        &points,
                        &calibration,
                        output.with_file_name(format!("{}_calibration.png", stem(&output))),
                    )
                    .map_err(|e| anyhow::anyhow!("{}", e))?;
                }
                #[cfg(not(feature = "plot"))]
                plots_disabled();
            }
        }
        Opt::AddEnergies {
            calibration,
            inputs,
            out_dir,
        } => {
            let calibration = Calibration::from_path(&calibration)
                .with_context(|| format!("failed to read the calibration {:?}", calibration))?;
            let report = pipeline::add_energies(&calibration, &inputs, &out_dir)?;
            summary("add-energies", &report);
        }
        Opt::Plot {
            inputs,
            axis,
            scale,
            x_max,
            out_dir,
        } => {
            let settings = PlotSettings { scale, x_max };
            #[cfg(feature = "plot")]
            {
                std::fs::create_dir_all(&out_dir)?;
                let kind = match axis {
                    parse_spectra::Axis::Channel => "ChannelSpectre",
                    parse_spectra::Axis::Energy => "EnergySpectre",
                };
                for input in &inputs {
                    let name = stem(input);
                    let path = out_dir.join(settings.file_name(&name, kind, "png"));
                    let result = Spectrum::from_path(input)
                        .map_err(|e| Box::new(e) as Box<dyn std::error::Error>)
                        .and_then(|spectrum| {
                            parse_spectra::plot::spectrum(&spectrum, &name, axis, &settings, &path)
                        });
                    if let Err(e) = result {
                        log::warn!("{}: {}, skipping", input.display(), e);
                    }
                }
            }
            #[cfg(not(feature = "plot"))]
            {
                let _ = (inputs, axis, settings, out_dir);
                plots_disabled();
            }
        }
        Opt::HalfLife {
            slope,
            slope_error,
            reference,
        } => {
            let decay_constant = Measurement::new(slope, slope_error);
            log::info!("decay constant: {} 1/ns", decay_constant);
            let half_life = HalfLife::from_decay_constant(decay_constant)?;
            println!("{}", half_life);
            println!("Relative error is: {}", half_life.relative_error(reference)?);
        }
    }
    Ok(())
}
