//! Configuration for both process roles
//!
//! The client and the server child take separate settings. The client's
//! settings can come from a TOML file, the command line, or both (command
//! line wins). The server only ever receives its settings on the command line
//! from the client that launched it.

pub mod cli;
pub mod toml;
pub mod validator;

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Number of patient files in the dataset
pub const NUM_PERSONS: usize = 15;

/// Seconds between two consecutive ECG samples
pub const SAMPLE_PERIOD: f64 = 0.004;

/// Default maximum message size in bytes
pub const DEFAULT_MAX_MESSAGE: usize = 256;

/// Client workload configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// DATA requests issued per patient
    #[serde(default = "default_requests")]
    pub requests_per_patient: usize,

    /// Number of patients, starting at patient 1
    #[serde(default = "default_patients")]
    pub patients: usize,

    /// Worker threads, one data channel each
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Sink threads draining the response queue
    #[serde(default = "default_sinks")]
    pub sinks: usize,

    /// Capacity of the request and response queues
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Maximum message size, shared with the server
    #[serde(default = "default_max_message")]
    pub max_message: usize,

    /// Transfer this file instead of running the data workload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,

    /// ECG lead (1 or 2)
    #[serde(default = "default_lead")]
    pub lead: i32,

    #[serde(default)]
    pub histogram: HistogramConfig,

    #[serde(default)]
    pub paths: PathConfig,

    /// Simulated server latency per DATA request, in microseconds
    #[serde(default)]
    pub jitter_us: u64,

    /// Write a JSON report here
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub json_output: Option<PathBuf>,
}

/// Bucket layout shared by every patient's histogram
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistogramConfig {
    #[serde(default = "default_buckets")]
    pub buckets: usize,
    #[serde(default = "default_hist_min")]
    pub min: f64,
    #[serde(default = "default_hist_max")]
    pub max: f64,
}

/// Directories used by a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathConfig {
    /// Patient CSV files and files served by FILE requests
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Where the named pipes live
    #[serde(default = "default_fifo_dir")]
    pub fifo_dir: PathBuf,

    /// Where transferred files are written
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
}

/// Server child configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub max_message: usize,
    pub data_dir: PathBuf,
    pub fifo_dir: PathBuf,
    pub num_persons: usize,
    pub sample_period: f64,
    pub jitter_us: u64,
}

/// What the client does once its channels are open
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Workload {
    /// Per-patient DATA requests feeding histograms
    Data,
    /// Chunked transfer of one named file
    File(String),
}

impl ClientConfig {
    pub fn workload(&self) -> Workload {
        match &self.file {
            Some(name) => Workload::File(name.clone()),
            None => Workload::Data,
        }
    }

    /// Settings the server child is launched with
    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            max_message: self.max_message,
            data_dir: self.paths.data_dir.clone(),
            fifo_dir: self.paths.fifo_dir.clone(),
            num_persons: NUM_PERSONS,
            sample_period: SAMPLE_PERIOD,
            jitter_us: self.jitter_us,
        }
    }
}

fn default_requests() -> usize {
    1000
}

fn default_patients() -> usize {
    10
}

fn default_workers() -> usize {
    100
}

fn default_sinks() -> usize {
    20
}

fn default_queue_capacity() -> usize {
    20
}

fn default_max_message() -> usize {
    DEFAULT_MAX_MESSAGE
}

fn default_lead() -> i32 {
    1
}

fn default_buckets() -> usize {
    10
}

fn default_hist_min() -> f64 {
    -2.0
}

fn default_hist_max() -> f64 {
    2.0
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("BIMDC")
}

fn default_fifo_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("received")
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            requests_per_patient: default_requests(),
            patients: default_patients(),
            workers: default_workers(),
            sinks: default_sinks(),
            queue_capacity: default_queue_capacity(),
            max_message: default_max_message(),
            file: None,
            lead: default_lead(),
            histogram: HistogramConfig::default(),
            paths: PathConfig::default(),
            jitter_us: 0,
            json_output: None,
        }
    }
}

impl Default for HistogramConfig {
    fn default() -> Self {
        Self {
            buckets: default_buckets(),
            min: default_hist_min(),
            max: default_hist_max(),
        }
    }
}

impl Default for PathConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            fifo_dir: default_fifo_dir(),
            output_dir: default_output_dir(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        ClientConfig::default().server_config()
    }
}
