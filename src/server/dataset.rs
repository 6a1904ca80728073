//! In-memory ECG dataset
//!
//! Patient `p`'s recording lives in `{data_dir}/{p}.csv`, one row per sample:
//!
//! ```text
//! time,ecg1,ecg2
//! 0.000,-0.145,-0.065
//! 0.004,-0.145,-0.065
//! ```
//!
//! The time column is ignored; a sample's position in the file is its index.
//! Everything is parsed once, before any channel is served, and never mutated
//! afterwards, so lookups need no locking.

use anyhow::{Context, Result};
use std::path::Path;
use thiserror::Error;

/// Lookup failures answered with a sentinel reply
#[derive(Debug, Error, PartialEq)]
pub enum LookupError {
    #[error("no sample for person {person} at {seconds}s on lead {lead}")]
    NotFound { person: i32, seconds: f64, lead: i32 },
}

/// Two ECG leads per sample
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub ecg1: f64,
    pub ecg2: f64,
}

/// All patients' recordings
#[derive(Debug, Clone)]
pub struct Dataset {
    /// Index 0 holds patient 1
    patients: Vec<Vec<Sample>>,
    sample_period: f64,
}

impl Dataset {
    /// Load patients `1..=num_persons` from `data_dir`
    ///
    /// A missing or malformed patient file is an error; the server cannot
    /// answer DATA requests without the full dataset.
    pub fn load(data_dir: &Path, num_persons: usize, sample_period: f64) -> Result<Self> {
        let patients = (1..=num_persons)
            .map(|person| {
                let path = data_dir.join(format!("{}.csv", person));
                load_patient(&path)
                    .with_context(|| format!("Failed to load patient {} from {}", person, path.display()))
            })
            .collect::<Result<Vec<_>>>()?;

        let total: usize = patients.iter().map(Vec::len).sum();
        tracing::info!(
            persons = num_persons,
            samples = total,
            dir = %data_dir.display(),
            "Dataset loaded"
        );

        Ok(Self::from_samples(patients, sample_period))
    }

    /// Build a dataset from samples already in memory (patient 1 first)
    pub fn from_samples(patients: Vec<Vec<Sample>>, sample_period: f64) -> Self {
        Self {
            patients,
            sample_period,
        }
    }

    /// Value of `lead` for `person` at `seconds` into the recording
    ///
    /// The sample index is `round(seconds / sample_period)`.
    pub fn sample(&self, person: i32, seconds: f64, lead: i32) -> Result<f64, LookupError> {
        let not_found = || LookupError::NotFound {
            person,
            seconds,
            lead,
        };

        let rows = self.patient(person).ok_or_else(not_found)?;

        let index = (seconds / self.sample_period).round();
        // Also rejects NaN
        if !(index >= 0.0 && index < rows.len() as f64) {
            return Err(not_found());
        }
        let row = rows[index as usize];

        match lead {
            1 => Ok(row.ecg1),
            2 => Ok(row.ecg2),
            _ => Err(not_found()),
        }
    }

    fn patient(&self, person: i32) -> Option<&Vec<Sample>> {
        usize::try_from(person)
            .ok()
            .and_then(|p| p.checked_sub(1))
            .and_then(|idx| self.patients.get(idx))
    }
}

/// Parse one patient's CSV file
fn load_patient(path: &Path) -> Result<Vec<Sample>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(path)?;

    let mut samples = Vec::new();
    for (line, record) in reader.records().enumerate() {
        let record = record?;
        let field = |i: usize| -> Result<f64> {
            let raw = record
                .get(i)
                .with_context(|| format!("line {}: expected 3 columns, got {}", line + 1, record.len()))?;
            raw.parse::<f64>()
                .with_context(|| format!("line {}: invalid number '{}'", line + 1, raw))
        };

        samples.push(Sample {
            ecg1: field(1)?,
            ecg2: field(2)?,
        });
    }

    Ok(samples)
}
