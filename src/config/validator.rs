//! Configuration validation
//!
//! Every check here runs before any thread, pipe or child process exists, so
//! a bad setting never leaves half a pipeline behind.

use super::*;
use crate::protocol::{FileRequest, DATA_REQUEST_LEN};
use anyhow::Result;

/// Validate complete client configuration
pub fn validate_client_config(config: &ClientConfig) -> Result<()> {
    validate_workload(config)?;
    validate_concurrency(config)?;
    validate_histogram(&config.histogram)?;
    validate_message_size(config.max_message)?;

    if let Some(name) = &config.file {
        validate_file_name(name)?;

        let needed = FileRequest::encoded_len_for(name);
        if config.max_message < needed {
            anyhow::bail!(
                "max_message ({}) is too small for a FILE request for '{}' ({} bytes)",
                config.max_message,
                name,
                needed
            );
        }
    }

    Ok(())
}

/// Validate server configuration
pub fn validate_server_config(config: &ServerConfig) -> Result<()> {
    validate_message_size(config.max_message)?;

    if config.num_persons == 0 {
        anyhow::bail!("num_persons must be at least 1");
    }
    if !(config.sample_period > 0.0) {
        anyhow::bail!("sample_period must be positive, got {}", config.sample_period);
    }

    Ok(())
}

/// Validate workload settings
fn validate_workload(config: &ClientConfig) -> Result<()> {
    if config.patients == 0 || config.patients > NUM_PERSONS {
        anyhow::bail!(
            "patients must be between 1 and {}, got {}",
            NUM_PERSONS,
            config.patients
        );
    }

    if config.lead != 1 && config.lead != 2 {
        anyhow::bail!("lead must be 1 or 2, got {}", config.lead);
    }

    Ok(())
}

/// Validate thread and queue counts
fn validate_concurrency(config: &ClientConfig) -> Result<()> {
    if config.workers == 0 {
        anyhow::bail!("workers must be at least 1");
    }
    if config.sinks == 0 {
        anyhow::bail!("sinks must be at least 1");
    }
    if config.queue_capacity == 0 {
        anyhow::bail!("queue capacity must be at least 1");
    }

    Ok(())
}

/// Validate histogram layout
fn validate_histogram(histogram: &HistogramConfig) -> Result<()> {
    if histogram.buckets == 0 {
        anyhow::bail!("histogram needs at least one bucket");
    }
    if !histogram.min.is_finite() || !histogram.max.is_finite() {
        anyhow::bail!("histogram bounds must be finite");
    }
    if histogram.min >= histogram.max {
        anyhow::bail!(
            "histogram min ({}) must be less than max ({})",
            histogram.min,
            histogram.max
        );
    }

    Ok(())
}

/// Every request kind and fixed-size reply must fit in one message
fn validate_message_size(max_message: usize) -> Result<()> {
    if max_message < DATA_REQUEST_LEN {
        anyhow::bail!(
            "max_message must be at least {} bytes, got {}",
            DATA_REQUEST_LEN,
            max_message
        );
    }
    if max_message > u32::MAX as usize {
        anyhow::bail!("max_message must fit in 32 bits, got {}", max_message);
    }

    Ok(())
}

/// File names are plain names inside the data directory
fn validate_file_name(name: &str) -> Result<()> {
    if name.is_empty() {
        anyhow::bail!("file name must not be empty");
    }
    if name.contains('/') || name.contains('\0') || name == "." || name == ".." {
        anyhow::bail!("file name must be a plain name inside the data directory, got '{}'", name);
    }

    Ok(())
}
