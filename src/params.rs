//! Fitted-parameter text files
//!
//! The stages hand their results over through small text files made of
//! `label: value +- uncertainty [unit]` lines framed by a title and
//! separator lines. Values are looked up by substring match on the label.

use crate::Measurement;
use regex::Regex;
use std::{
    fs,
    path::{Path, PathBuf},
};

pub(crate) const SEPARATOR: &str = "------------------------------------------------";

#[derive(thiserror::Error, Debug)]
pub enum ParamsError {
    #[error("Failed to open the parameter file {path:?}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to write the parameter file")]
    Io(#[from] std::io::Error),
    #[error("Invalid parameter line pattern")]
    Regex(#[from] regex::Error),
    #[error("no line labeled {0:?}")]
    MissingLabel(String),
    #[error("{0:?} has no uncertainty")]
    MissingUncertainty(String),
}
type Result<T> = std::result::Result<T, ParamsError>;

/// A `label: value [+- error] [unit]` line
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    pub label: String,
    pub value: f64,
    pub error: Option<f64>,
    pub unit: Option<String>,
}
impl Entry {
    pub fn measurement(&self) -> Option<Measurement> {
        self.error.map(|error| Measurement::new(self.value, error))
    }
}

/// The parsed content of a parameter file
#[derive(Debug, Clone, Default)]
pub struct ParameterFile {
    entries: Vec<Entry>,
}
impl ParameterFile {
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ParamsError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text)
    }
    /// Parses the text of a parameter file
    ///
    /// Lines that are not `label: number ...` (title, separators) are ignored
    pub fn parse(text: &str) -> Result<Self> {
        let re_entry = Regex::new(
            r"^\s*(?P<label>[^:]+?)\s*:\s*(?P<value>[^\s+]\S*)(?:\s*\+-\s*(?P<error>\S+))?(?:\s+(?P<unit>\S.*?))?\s*$",
        )?;
        let entries = text
            .lines()
            .filter_map(|line| re_entry.captures(line))
            .filter_map(|capts| {
                let value = capts["value"].parse::<f64>().ok()?;
                let error = match capts.name("error") {
                    Some(error) => Some(error.as_str().parse::<f64>().ok()?),
                    None => None,
                };
                Some(Entry {
                    label: capts["label"].to_string(),
                    value,
                    error,
                    unit: capts.name("unit").map(|unit| unit.as_str().to_string()),
                })
            })
            .collect();
        Ok(Self { entries })
    }
    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }
    /// Returns the first entry which label contains `label`
    pub fn entry(&self, label: &str) -> Result<&Entry> {
        self.entries
            .iter()
            .find(|entry| entry.label.contains(label))
            .ok_or_else(|| ParamsError::MissingLabel(label.to_string()))
    }
    pub fn value(&self, label: &str) -> Result<f64> {
        self.entry(label).map(|entry| entry.value)
    }
    pub fn measurement(&self, label: &str) -> Result<Measurement> {
        self.entry(label)?
            .measurement()
            .ok_or_else(|| ParamsError::MissingUncertainty(label.to_string()))
    }
}
