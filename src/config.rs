//! Run configuration: the peaks to fit and the plot settings

use serde::Deserialize;
use std::{fs::File, ops::Deref, path::Path};
use strum_macros::{Display, EnumIter, EnumString};

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("Failed to open the peak table")]
    Io(#[from] std::io::Error),
    #[error("Failed to deserialize the peak table")]
    Csv(#[from] csv::Error),
    #[error("{name}: empty channel window [{min},{max}]")]
    Window { name: String, min: usize, max: usize },
    #[error("{0}: the initial peak width must be non-zero")]
    Width(String),
}
type Result<T> = std::result::Result<T, ConfigError>;

/// A peak table row: `name,energy,min,max,offset,slope,height,center,width`
#[derive(Deserialize, Debug)]
struct Record {
    name: String,
    #[serde(rename = "energy")]
    energy_kev: f64,
    min: usize,
    max: usize,
    offset: f64,
    slope: f64,
    height: f64,
    center: f64,
    width: f64,
}

/// A peak of known energy and how to fit it
#[derive(Debug, Clone, PartialEq)]
pub struct PeakConfig {
    /// Label of the peak, also the stem of its parameter file
    pub name: String,
    /// Reference energy [keV]
    pub energy: f64,
    /// First channel of the fitting window
    pub min: usize,
    /// Last channel of the fitting window
    pub max: usize,
    /// `[offset, slope, height, center, width]`
    pub initial_guess: [f64; 5],
}
impl PeakConfig {
    pub fn new(
        name: impl ToString,
        energy: f64,
        window: (usize, usize),
        initial_guess: [f64; 5],
    ) -> Self {
        Self {
            name: name.to_string(),
            energy,
            min: window.0,
            max: window.1,
            initial_guess,
        }
    }
    fn check(self) -> Result<Self> {
        if self.min > self.max {
            return Err(ConfigError::Window {
                name: self.name,
                min: self.min,
                max: self.max,
            });
        }
        if self.initial_guess[4] == 0f64 {
            return Err(ConfigError::Width(self.name));
        }
        Ok(self)
    }
}
impl From<Record> for PeakConfig {
    fn from(record: Record) -> Self {
        Self {
            name: record.name,
            energy: record.energy_kev,
            min: record.min,
            max: record.max,
            initial_guess: [
                record.offset,
                record.slope,
                record.height,
                record.center,
                record.width,
            ],
        }
    }
}

/// The list of peaks to fit in a spectrum
#[derive(Debug, Clone, Default)]
pub struct PeakTable(Vec<PeakConfig>);
impl Deref for PeakTable {
    type Target = Vec<PeakConfig>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}
impl From<Vec<PeakConfig>> for PeakTable {
    fn from(peaks: Vec<PeakConfig>) -> Self {
        Self(peaks)
    }
}
impl PeakTable {
    /// Loads the peak table from a CSV file with a header row
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        let table = Self::from_reader(file)?;
        log::info!("{} peaks loaded from {:?}", table.len(), path.as_ref());
        Ok(table)
    }
    pub fn from_reader<R: std::io::Read>(reader: R) -> Result<Self> {
        let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
        let mut peaks = vec![];
        for result in rdr.deserialize() {
            let record: Record = result?;
            peaks.push(PeakConfig::from(record).check()?);
        }
        Ok(Self(peaks))
    }
    /// The two photopeaks of a <sup>60</sup>Co source
    pub fn cobalt_60() -> Self {
        Self(vec![
            PeakConfig::new("Ch1energy1", 1173.228, (1076, 1151), [-1., -3., 3.6e3, 1107., 3.]),
            PeakConfig::new("Ch1energy2", 1332.492, (1151, 1228), [-1., -3., 3e3, 1190., 3.]),
        ])
    }
}

/// Y axis scale of the spectrum plots
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, EnumString, Display, EnumIter)]
#[strum(serialize_all = "lowercase")]
pub enum Scale {
    #[default]
    Log,
    Linear,
}

/// X axis of the spectrum plots
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, EnumString, Display, EnumIter)]
#[strum(serialize_all = "lowercase")]
pub enum Axis {
    #[default]
    Channel,
    Energy,
}
impl Axis {
    pub fn label(&self) -> &'static str {
        match self {
            Axis::Channel => "Channel",
            Axis::Energy => "Energy [keV]",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PlotSettings {
    pub scale: Scale,
    /// Upper limit of the x axis
    pub x_max: f64,
}
impl Default for PlotSettings {
    fn default() -> Self {
        Self {
            scale: Scale::Log,
            x_max: 2000f64,
        }
    }
}
impl PlotSettings {
    /// Plot file name `{name}_{kind}[Log].{extension}`
    pub fn file_name(&self, name: &str, kind: &str, extension: &str) -> String {
        let suffix = match self.scale {
            Scale::Log => "Log",
            Scale::Linear => "",
        };
        format!("{}_{}{}.{}", name.replace(' ', "_"), kind, suffix, extension)
    }
}
