//! Sink threads
//!
//! Sinks drain the response queue and apply each record to shared result
//! state. The workload decides what that state is:
//!
//! - [`HistogramSink`]: SAMPLE records update a patient's histogram
//! - [`FileSink`]: CHUNK records are written at their offset with `pwrite(2)`
//!
//! Both are shared by every sink thread, so [`Sink::consume`] takes `&self`.

use crate::protocol::record::ResponseRecord;
use crate::stats::HistogramCollection;
use crate::util::bounded_queue::BoundedQueue;
use anyhow::{Context, Result};
use std::fs::{self, File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

/// Destination for response records
pub trait Sink: Sync {
    /// Apply one record (never [`ResponseRecord::Quit`])
    fn consume(&self, record: ResponseRecord) -> Result<()>;

    /// Called by each sink thread once its QUIT arrives, unless it failed
    fn finish(&self) -> Result<()> {
        Ok(())
    }
}

/// Per-sink counters
#[derive(Debug, Clone, Default)]
pub struct SinkSummary {
    pub sink: usize,
    pub records: u64,
    pub dropped: u64,
}

/// Run one sink thread until it dequeues QUIT
///
/// After the first failed record the sink keeps draining (and dropping)
/// records so workers are never blocked on a full response queue, then
/// reports the failure.
pub fn run_sink(
    id: usize,
    responses: &BoundedQueue,
    sink: &dyn Sink,
    max_record: usize,
) -> Result<SinkSummary> {
    let mut summary = SinkSummary {
        sink: id,
        ..Default::default()
    };
    let mut failure: Option<anyhow::Error> = None;

    loop {
        let msg = responses.dequeue(max_record);
        let record = match ResponseRecord::decode(&msg) {
            Ok(ResponseRecord::Quit) => break,
            Ok(record) => record,
            Err(e) => {
                tracing::error!(sink = id, error = %e, "Undecodable response record");
                summary.dropped += 1;
                continue;
            }
        };

        if failure.is_some() {
            summary.dropped += 1;
            continue;
        }

        match sink.consume(record) {
            Ok(()) => summary.records += 1,
            Err(e) => {
                let reason = format!("{:#}", e);
                tracing::warn!(sink = id, error = %reason, "Sink failed");
                summary.dropped += 1;
                failure = Some(e);
            }
        }
    }

    if failure.is_none() {
        failure = sink.finish().err();
    }

    tracing::debug!(sink = id, records = summary.records, "Sink finished");
    match failure {
        Some(e) => Err(e.context(format!("sink {}", id))),
        None => Ok(summary),
    }
}

/// Feeds SAMPLE records into per-patient histograms
pub struct HistogramSink<'a> {
    histograms: &'a HistogramCollection,
}

impl<'a> HistogramSink<'a> {
    pub fn new(histograms: &'a HistogramCollection) -> Self {
        Self { histograms }
    }
}

impl Sink for HistogramSink<'_> {
    fn consume(&self, record: ResponseRecord) -> Result<()> {
        match record {
            ResponseRecord::Sample { person, value } => {
                if !self.histograms.update(person, value) {
                    anyhow::bail!(
                        "sample for untracked patient {} ({} tracked)",
                        person,
                        self.histograms.patients()
                    );
                }
                Ok(())
            }
            other => anyhow::bail!("histogram sink cannot take {:?}", other),
        }
    }
}

/// Writes CHUNK records into a preallocated output file
#[derive(Debug)]
pub struct FileSink {
    file: File,
    path: PathBuf,
    size: u64,
}

impl FileSink {
    /// Create (or truncate) `path` and size it to `size` bytes
    pub fn create(path: &Path, size: u64) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create output directory: {}", parent.display()))?;
        }

        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .with_context(|| format!("Failed to create output file: {}", path.display()))?;
        file.set_len(size)
            .with_context(|| format!("Failed to preallocate {} bytes for {}", size, path.display()))?;

        Ok(Self {
            file,
            path: path.to_path_buf(),
            size,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Sink for FileSink {
    fn consume(&self, record: ResponseRecord) -> Result<()> {
        match record {
            ResponseRecord::Chunk { offset, data } => {
                let end = offset + data.len() as u64;
                if end > self.size {
                    anyhow::bail!("chunk [{}, {}) lies outside a {}-byte file", offset, end, self.size);
                }
                self.file
                    .write_all_at(&data, offset)
                    .with_context(|| format!("Failed to write {} at offset {}", self.path.display(), offset))
            }
            other => anyhow::bail!("file sink cannot take {:?}", other),
        }
    }

    /// Each sink thread flushes the chunks it wrote before exiting
    fn finish(&self) -> Result<()> {
        self.file
            .sync_all()
            .with_context(|| format!("Failed to sync {}", self.path.display()))
    }
}
