//! TOML configuration file parsing
//!
//! ```toml
//! requests_per_patient = 500
//! patients = 4
//! workers = 16
//!
//! [histogram]
//! buckets = 20
//!
//! [paths]
//! data_dir = "BIMDC"
//! ```

use super::ClientConfig;
use crate::config::cli::Cli;
use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

/// Parse TOML configuration file
pub fn parse_toml_file(path: &Path) -> Result<ClientConfig> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    parse_toml_string(&contents)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Parse TOML configuration from string
pub fn parse_toml_string(contents: &str) -> Result<ClientConfig> {
    let config: ClientConfig =
        ::toml::from_str(contents).context("Failed to parse TOML configuration")?;

    Ok(config)
}

/// Merge CLI arguments with TOML configuration (CLI takes precedence)
pub fn merge_cli_with_config(cli: &Cli, mut config: ClientConfig) -> ClientConfig {
    // Workload
    if let Some(n) = cli.requests {
        config.requests_per_patient = n;
    }
    if let Some(p) = cli.patients {
        config.patients = p;
    }
    if let Some(file) = &cli.file {
        config.file = Some(file.clone());
    }
    if let Some(lead) = cli.lead {
        config.lead = lead;
    }

    // Concurrency
    if let Some(w) = cli.workers {
        config.workers = w;
    }
    if let Some(h) = cli.sinks {
        config.sinks = h;
    }
    if let Some(b) = cli.buffer_capacity {
        config.queue_capacity = b;
    }
    if let Some(m) = cli.max_message {
        config.max_message = m;
    }

    // Histogram
    if let Some(buckets) = cli.hist_buckets {
        config.histogram.buckets = buckets;
    }
    if let Some(min) = cli.hist_min {
        config.histogram.min = min;
    }
    if let Some(max) = cli.hist_max {
        config.histogram.max = max;
    }

    // Paths
    if let Some(dir) = &cli.data_dir {
        config.paths.data_dir = dir.clone();
    }
    if let Some(dir) = &cli.fifo_dir {
        config.paths.fifo_dir = dir.clone();
    }
    if let Some(dir) = &cli.output_dir {
        config.paths.output_dir = dir.clone();
    }

    if let Some(jitter) = cli.jitter_us {
        config.jitter_us = jitter;
    }
    if let Some(path) = &cli.json_output {
        config.json_output = Some(path.clone());
    }

    config
}
