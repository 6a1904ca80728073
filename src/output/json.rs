//! JSON output formatting
//!
//! One document per run: settings, timing, per-worker counters, and either
//! the per-patient histograms or the transferred file.

use crate::client::{Outcome, WorkloadReport};
use crate::client::worker::WorkerSummary;
use crate::config::{ClientConfig, Workload};
use crate::stats::Histogram;
use crate::Result;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Duration with both microseconds and human-readable format
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonDuration {
    pub micros: u64,
    pub human: String,
}

impl JsonDuration {
    pub fn from_duration(d: Duration) -> Self {
        let micros = d.as_micros() as u64;
        let human = format_duration_human(d);
        Self { micros, human }
    }
}

/// Settings the run used
#[derive(Debug, Clone, Serialize)]
pub struct JsonRunConfig {
    pub workload: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    pub requests_per_patient: usize,
    pub patients: usize,
    pub workers: usize,
    pub sinks: usize,
    pub queue_capacity: usize,
    pub max_message: usize,
    pub lead: i32,
}

/// One patient's histogram with explicit bucket bounds
#[derive(Debug, Clone, Serialize)]
pub struct JsonHistogram {
    pub person: usize,
    pub buckets: Vec<JsonBucket>,
    pub underflow: u64,
    pub overflow: u64,
    pub total: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct JsonBucket {
    pub low: f64,
    pub high: f64,
    pub count: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct JsonFileTransfer {
    pub path: PathBuf,
    pub bytes: u64,
}

/// Complete report document
#[derive(Debug, Clone, Serialize)]
pub struct JsonReport {
    /// RFC 3339 time the report was written
    pub timestamp: String,
    pub config: JsonRunConfig,
    pub elapsed: JsonDuration,
    pub requests: u64,
    pub bytes_received: u64,
    pub workers: Vec<WorkerSummary>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub histograms: Vec<JsonHistogram>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<JsonFileTransfer>,
}

/// Build the JSON document for a finished run
pub fn build_report(config: &ClientConfig, report: &WorkloadReport) -> JsonReport {
    let (workload, file) = match &report.workload {
        Workload::Data => ("data", None),
        Workload::File(name) => ("file", Some(name.clone())),
    };

    let (histograms, transfer) = match &report.outcome {
        Outcome::Histograms(hists) => (
            hists
                .iter()
                .enumerate()
                .map(|(idx, h)| histogram_to_json(idx + 1, h))
                .collect(),
            None,
        ),
        Outcome::File { path, bytes } => (
            Vec::new(),
            Some(JsonFileTransfer {
                path: path.clone(),
                bytes: *bytes,
            }),
        ),
    };

    JsonReport {
        timestamp: chrono::Utc::now().to_rfc3339(),
        config: JsonRunConfig {
            workload: workload.to_string(),
            file,
            requests_per_patient: config.requests_per_patient,
            patients: config.patients,
            workers: config.workers,
            sinks: config.sinks,
            queue_capacity: config.queue_capacity,
            max_message: config.max_message,
            lead: config.lead,
        },
        elapsed: JsonDuration::from_duration(report.elapsed),
        requests: report.requests,
        bytes_received: report.bytes_received(),
        workers: report.workers.clone(),
        histograms,
        file: transfer,
    }
}

fn histogram_to_json(person: usize, hist: &Histogram) -> JsonHistogram {
    JsonHistogram {
        person,
        buckets: hist
            .buckets()
            .iter()
            .enumerate()
            .map(|(i, &count)| {
                let (low, high) = hist.bucket_range(i);
                JsonBucket { low, high, count }
            })
            .collect(),
        underflow: hist.underflow(),
        overflow: hist.overflow(),
        total: hist.total(),
    }
}

/// Write JSON output to file
pub fn write_json_output(output_path: &Path, report: &JsonReport, pretty: bool) -> Result<()> {
    let file = File::create(output_path)
        .with_context(|| format!("Failed to create JSON output: {}", output_path.display()))?;
    let mut writer = BufWriter::new(file);

    if pretty {
        serde_json::to_writer_pretty(&mut writer, report)?;
    } else {
        serde_json::to_writer(&mut writer, report)?;
    }
    writer.flush()?;

    Ok(())
}

fn format_duration_human(d: Duration) -> String {
    let micros = d.as_micros() as u64;

    if micros == 0 {
        return "0µs".to_string();
    }

    if micros < 1000 {
        format!("{}µs", micros)
    } else if micros < 1_000_000 {
        format!("{:.3}ms", micros as f64 / 1000.0)
    } else if micros < 60_000_000 {
        format!("{:.3}s", micros as f64 / 1_000_000.0)
    } else {
        format!("{:.2}m", micros as f64 / 60_000_000.0)
    }
}
