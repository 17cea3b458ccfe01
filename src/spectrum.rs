//! Multichannel analyzer spectra
//!
//! A spectrum is one row per channel, the channel being the row index.
//! On disk the rows are whitespace-delimited with up to 4 columns:
//! counts, counts error, energy [keV] and energy error [keV].

use crate::Measurement;
use itertools::izip;
use std::{
    fs::File,
    io::{BufRead, BufReader, BufWriter, Write},
    path::{Path, PathBuf},
};

#[derive(thiserror::Error, Debug)]
pub enum SpectrumError {
    #[error("Failed to open the spectrum file {path:?}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to read or write the spectrum")]
    Io(#[from] std::io::Error),
    #[error("line {line}: cannot parse {token:?} as a number")]
    Number { line: usize, token: String },
    #[error("line {line}: expected {expected} columns, found {found}")]
    Ragged {
        line: usize,
        expected: usize,
        found: usize,
    },
    #[error("line {line}: found {found} columns (counts, error, energy, energy error at most)")]
    TooManyColumns { line: usize, found: usize },
    #[error("line {line}: negative {column} ({value})")]
    Negative {
        line: usize,
        column: &'static str,
        value: f64,
    },
    #[error("{column} column has {found} rows, expected {expected}")]
    Length {
        column: &'static str,
        expected: usize,
        found: usize,
    },
    #[error("cannot write energies without an error column")]
    EnergiesWithoutErrors,
}
type Result<T> = std::result::Result<T, SpectrumError>;

/// Counts per channel with optional error and energy columns
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Spectrum {
    counts: Vec<f64>,
    errors: Option<Vec<f64>>,
    energies: Option<Vec<Measurement>>,
}

/// A contiguous channel range of a [Spectrum]
#[derive(Debug, Clone, Default)]
pub struct Window {
    pub channels: Vec<f64>,
    pub counts: Vec<f64>,
    pub errors: Option<Vec<f64>>,
}
impl Window {
    pub fn len(&self) -> usize {
        self.channels.len()
    }
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}

impl Spectrum {
    pub fn from_counts(counts: Vec<f64>) -> Self {
        Self {
            counts,
            ..Default::default()
        }
    }
    /// Loads a spectrum from a text file
    ///
    /// Blank lines and lines starting with `#` are skipped
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| SpectrumError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        let spectrum = Self::from_reader(BufReader::new(file))?;
        log::debug!("{:?}: {} channels", path, spectrum.len());
        Ok(spectrum)
    }
    pub fn from_reader<R: BufRead>(reader: R) -> Result<Self> {
        let mut n_column: Option<usize> = None;
        let mut rows: Vec<Vec<f64>> = vec![];
        for (k, line) in reader.lines().enumerate() {
            let line = line?;
            let line_number = k + 1;
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            let row = trimmed
                .split_whitespace()
                .map(|token| {
                    token.parse::<f64>().map_err(|_| SpectrumError::Number {
                        line: line_number,
                        token: token.to_string(),
                    })
                })
                .collect::<Result<Vec<f64>>>()?;
            match n_column {
                None if row.len() > 4 => {
                    return Err(SpectrumError::TooManyColumns {
                        line: line_number,
                        found: row.len(),
                    })
                }
                None => n_column = Some(row.len()),
                Some(n) if n != row.len() => {
                    return Err(SpectrumError::Ragged {
                        line: line_number,
                        expected: n,
                        found: row.len(),
                    })
                }
                _ => (),
            }
            for (&column, &value) in ["counts", "error"].iter().zip(row.iter()) {
                if value < 0f64 {
                    return Err(SpectrumError::Negative {
                        line: line_number,
                        column,
                        value,
                    });
                }
            }
            rows.push(row);
        }
        let n_column = n_column.unwrap_or(1);
        let column = |i: usize| rows.iter().map(|row| row[i]).collect::<Vec<f64>>();
        Ok(Self {
            counts: column(0),
            errors: (n_column > 1).then(|| column(1)),
            energies: (n_column > 2).then(|| {
                rows.iter()
                    .map(|row| Measurement::new(row[2], row.get(3).copied().unwrap_or_default()))
                    .collect()
            }),
        })
    }
    pub fn len(&self) -> usize {
        self.counts.len()
    }
    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }
    pub fn counts(&self) -> &[f64] {
        &self.counts
    }
    pub fn errors(&self) -> Option<&[f64]> {
        self.errors.as_deref()
    }
    pub fn energies(&self) -> Option<&[Measurement]> {
        self.energies.as_deref()
    }
    /// Iterator over the channel indices
    pub fn channels(&self) -> impl Iterator<Item = usize> {
        0..self.len()
    }
    /// Returns a copy with the given error column
    pub fn with_errors(&self, errors: Vec<f64>) -> Result<Self> {
        if errors.len() != self.len() {
            return Err(SpectrumError::Length {
                column: "error",
                expected: self.len(),
                found: errors.len(),
            });
        }
        Ok(Self {
            errors: Some(errors),
            ..self.clone()
        })
    }
    /// Returns a copy with the Poisson counting error `sqrt(counts)`
    pub fn with_poisson_errors(&self) -> Self {
        Self {
            errors: Some(self.counts.iter().map(|c| c.sqrt()).collect()),
            ..self.clone()
        }
    }
    /// Returns a copy with the given energy column
    pub fn with_energies(&self, energies: Vec<Measurement>) -> Result<Self> {
        if energies.len() != self.len() {
            return Err(SpectrumError::Length {
                column: "energy",
                expected: self.len(),
                found: energies.len(),
            });
        }
        Ok(Self {
            energies: Some(energies),
            ..self.clone()
        })
    }
    /// Selects the channels in `[min,max]`, clipped to the spectrum length
    pub fn window(&self, min: usize, max: usize) -> Window {
        let end = max.saturating_add(1).min(self.len());
        let start = min.min(end);
        Window {
            channels: (start..end).map(|c| c as f64).collect(),
            counts: self.counts[start..end].to_vec(),
            errors: self.errors.as_ref().map(|e| e[start..end].to_vec()),
        }
    }
    /// Writes the spectrum as tab-delimited text with a `#` header line
    pub fn to_path<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut buffer = BufWriter::new(File::create(path.as_ref())?);
        self.write_to(&mut buffer)?;
        buffer.flush()?;
        log::info!("Spectrum saved to {:?}", path.as_ref());
        Ok(())
    }
    pub fn write_to<W: Write>(&self, mut writer: W) -> Result<()> {
        match (&self.errors, &self.energies) {
            (None, None) => {
                writeln!(writer, "# Net Counts")?;
                for c in &self.counts {
                    writeln!(writer, "{:.0}", c)?;
                }
            }
            (Some(errors), None) => {
                writeln!(writer, "# Net Counts\tError")?;
                for (c, e) in self.counts.iter().zip(errors) {
                    writeln!(writer, "{:.0}\t{:.4}", c, e)?;
                }
            }
            (Some(errors), Some(energies)) => {
                writeln!(writer, "# Counts\tError\tEnergy (keV)\t ErrorEnergy")?;
                for (c, e, energy) in izip!(&self.counts, errors, energies) {
                    writeln!(
                        writer,
                        "{:.0}\t{:.4}\t{:.3}\t{:.15}",
                        c, e, energy.value, energy.error
                    )?;
                }
            }
            (None, Some(_)) => return Err(SpectrumError::EnergiesWithoutErrors),
        }
        Ok(())
    }
}
