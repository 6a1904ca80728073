//! CLI argument parsing using clap

use super::{ClientConfig, ServerConfig, DEFAULT_MAX_MESSAGE, NUM_PERSONS, SAMPLE_PERIOD};
use clap::{ArgAction, Parser, ValueEnum};
use std::path::PathBuf;

/// Execution mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ExecutionMode {
    /// Client mode (default) - launch the server and run the workload
    Client,
    /// Server mode - serve the control channel and spawned data channels
    Server,
}

/// ecgpipe - ECG sample streaming over named pipes
///
/// `-h` sets the number of sink threads, so help is only available as `--help`.
#[derive(Parser, Debug)]
#[command(name = "ecgpipe")]
#[command(version, about, long_about = None, disable_help_flag = true)]
pub struct Cli {
    /// Print help
    #[arg(long, action = ArgAction::Help)]
    pub help: Option<bool>,

    /// Execution mode: client or server
    #[arg(long, value_enum, default_value = "client")]
    pub mode: ExecutionMode,

    // === Workload Options ===
    /// DATA requests per patient
    #[arg(short = 'n', long = "requests")]
    pub requests: Option<usize>,

    /// Number of patients (1-15)
    #[arg(short = 'p', long)]
    pub patients: Option<usize>,

    /// Transfer this file from the data directory instead of ECG samples
    #[arg(short = 'f', long)]
    pub file: Option<String>,

    /// ECG lead to sample (1 or 2)
    #[arg(long)]
    pub lead: Option<i32>,

    // === Concurrency Options ===
    /// Worker threads (each gets its own data channel)
    #[arg(short = 'w', long)]
    pub workers: Option<usize>,

    /// Sink threads draining the response queue
    #[arg(short = 'h', long)]
    pub sinks: Option<usize>,

    /// Request and response queue capacity
    #[arg(short = 'b', long = "buffer-capacity")]
    pub buffer_capacity: Option<usize>,

    /// Maximum message size in bytes
    #[arg(short = 'm', long)]
    pub max_message: Option<usize>,

    // === Histogram Options ===
    /// Number of histogram buckets
    #[arg(long)]
    pub hist_buckets: Option<usize>,

    /// Lower bound of the histogram range
    #[arg(long, allow_negative_numbers = true)]
    pub hist_min: Option<f64>,

    /// Upper bound of the histogram range
    #[arg(long, allow_negative_numbers = true)]
    pub hist_max: Option<f64>,

    // === Paths ===
    /// Directory holding {person}.csv and files served by FILE requests
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    /// Directory for the named pipes
    #[arg(long)]
    pub fifo_dir: Option<PathBuf>,

    /// Directory where transferred files are written
    #[arg(long)]
    pub output_dir: Option<PathBuf>,

    // === Server Options ===
    /// Upper bound of the simulated latency per DATA request (microseconds)
    #[arg(long)]
    pub jitter_us: Option<u64>,

    // === Output Options ===
    /// Write a JSON report to this file
    #[arg(long)]
    pub json_output: Option<PathBuf>,

    // === Configuration File ===
    /// TOML configuration file
    #[arg(short = 'c', long)]
    pub config: Option<PathBuf>,

    /// Enable debug logging (also keeps a server log in /tmp)
    #[arg(long)]
    pub debug: bool,
}

impl Cli {
    /// Parse CLI arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Client settings: TOML file (if any), then CLI overrides, then defaults
    pub fn client_config(&self) -> anyhow::Result<ClientConfig> {
        let config = match &self.config {
            Some(path) => super::toml::parse_toml_file(path)?,
            None => ClientConfig::default(),
        };
        Ok(super::toml::merge_cli_with_config(self, config))
    }

    /// Server settings, as passed down by the launching client
    pub fn server_config(&self) -> ServerConfig {
        let defaults = ClientConfig::default();
        ServerConfig {
            max_message: self.max_message.unwrap_or(DEFAULT_MAX_MESSAGE),
            data_dir: self.data_dir.clone().unwrap_or(defaults.paths.data_dir),
            fifo_dir: self.fifo_dir.clone().unwrap_or(defaults.paths.fifo_dir),
            num_persons: NUM_PERSONS,
            sample_period: SAMPLE_PERIOD,
            jitter_us: self.jitter_us.unwrap_or(0),
        }
    }
}
