//! Client orchestrator
//!
//! # Architecture
//!
//! ```text
//! producers ──> request queue ──> workers (1:1 data channels) ──> server
//!                                    │
//!                                    └──> response queue ──> sinks ──> histograms / output file
//! ```
//!
//! Every worker asks for its own data channel over the control channel before
//! any thread starts, so no two workers ever share a pipe pair. All threads
//! run inside one `crossbeam::scope` and are shut down in a fixed order:
//!
//! 1. join producers
//! 2. enqueue one QUIT per worker; each worker forwards it on its channel
//!    and waits for the service loop to close that channel
//! 3. join workers
//! 4. enqueue one QUIT per sink
//! 5. join sinks
//!
//! The control channel QUIT that stops the server is sent by the caller
//! ([`shutdown_server`]) once the workload is over.

pub mod producer;
pub mod sink;
pub mod worker;

use crate::channel::{DuplexChannel, Side};
use crate::config::{ClientConfig, Workload};
use crate::protocol::record::{ResponseRecord, CHUNK_HEADER_LEN};
use crate::protocol::{decode_channel_name, decode_file_size, FileRequest, Request, SCALAR_REPLY_LEN};
use crate::stats::{Histogram, HistogramCollection};
use crate::util::bounded_queue::BoundedQueue;
use anyhow::{Context, Result};
use crossbeam::thread::ScopedJoinHandle;
use sink::{FileSink, HistogramSink, Sink};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use worker::WorkerSummary;

/// Largest NEW_CHANNEL reply the client accepts
const CHANNEL_NAME_REPLY_MAX: usize = 64;

/// A request producer, run on its own thread
type Producer<'a> = Box<dyn FnOnce(&BoundedQueue) -> u64 + Send + 'a>;

/// What the workload produced
#[derive(Debug, Clone)]
pub enum Outcome {
    /// One histogram per patient, patient 1 first
    Histograms(Vec<Histogram>),
    /// The transferred file
    File { path: PathBuf, bytes: u64 },
}

/// Everything the report printers need
#[derive(Debug, Clone)]
pub struct WorkloadReport {
    pub workload: Workload,
    pub elapsed: Duration,
    /// Requests enqueued by producers
    pub requests: u64,
    pub workers: Vec<WorkerSummary>,
    pub outcome: Outcome,
}

impl WorkloadReport {
    /// Reply payload bytes received across all workers
    pub fn bytes_received(&self) -> u64 {
        self.workers.iter().map(|w| w.bytes_received).sum()
    }
}

/// Ask the server for a fresh data channel and open it as acceptor
pub fn open_data_channel(control: &mut DuplexChannel, fifo_dir: &Path) -> Result<DuplexChannel> {
    control
        .send(&Request::NewChannel.encode())
        .context("Failed to request a data channel")?;
    let reply = control
        .receive(CHANNEL_NAME_REPLY_MAX)
        .context("No reply to NEW_CHANNEL")?;
    let name = decode_channel_name(&reply).context("Invalid NEW_CHANNEL reply")?;

    DuplexChannel::open(fifo_dir, &name, Side::Acceptor)
        .with_context(|| format!("Failed to open data channel {}", name))
}

/// Tell the server to stop; it exits once every data channel has ended
pub fn shutdown_server(control: &mut DuplexChannel) -> Result<()> {
    control
        .send(&Request::Quit.encode())
        .context("Failed to send QUIT on the control channel")
}

/// Size of `name` on the server, asked over `channel`
pub fn query_file_size(channel: &mut DuplexChannel, name: &str) -> Result<u64> {
    channel
        .send(&Request::File(FileRequest::size_query(name)).encode())
        .context("Failed to send file size query")?;
    let reply = channel
        .receive_exact(SCALAR_REPLY_LEN)
        .context("No reply to file size query")?;

    let size = decode_file_size(&reply)?;
    if size < 0 {
        anyhow::bail!("File '{}' not found on the server", name);
    }
    Ok(size as u64)
}

/// Runs one workload against a connected server
pub struct Orchestrator {
    config: ClientConfig,
}

impl Orchestrator {
    pub fn new(config: ClientConfig) -> Self {
        Self { config }
    }

    /// Open the data channels, run the workload, and collect its results
    pub fn run(&self, control: &mut DuplexChannel) -> Result<WorkloadReport> {
        let start = Instant::now();

        let channels = (0..self.config.workers)
            .map(|_| open_data_channel(control, &self.config.paths.fifo_dir))
            .collect::<Result<Vec<_>>>()?;
        tracing::info!(channels = channels.len(), "Data channels open");

        let workload = self.config.workload();
        let (requests, workers, outcome) = match &workload {
            Workload::Data => self.run_data(channels)?,
            Workload::File(name) => self.run_file(name, channels)?,
        };

        Ok(WorkloadReport {
            workload,
            elapsed: start.elapsed(),
            requests,
            workers,
            outcome,
        })
    }

    /// One producer per patient, sinks fill the histograms
    fn run_data(&self, channels: Vec<DuplexChannel>) -> Result<(u64, Vec<WorkerSummary>, Outcome)> {
        let hist = &self.config.histogram;
        let histograms = HistogramCollection::new(self.config.patients, hist.buckets, hist.min, hist.max);

        let count = self.config.requests_per_patient;
        let lead = self.config.lead;
        let producers: Vec<Producer> = (1..=self.config.patients as i32)
            .map(|person| {
                Box::new(move |queue: &BoundedQueue| producer::patient_requests(queue, person, count, lead))
                    as Producer
            })
            .collect();

        let (requests, workers) = self.pump(channels, producers, &HistogramSink::new(&histograms))?;
        tracing::debug!(samples = histograms.total(), "Histograms filled");
        Ok((requests, workers, Outcome::Histograms(histograms.snapshot())))
    }

    /// One producer walking the file, sinks write chunks into the copy
    fn run_file(
        &self,
        name: &str,
        mut channels: Vec<DuplexChannel>,
    ) -> Result<(u64, Vec<WorkerSummary>, Outcome)> {
        let first = channels.first_mut().context("No data channel to query the file size")?;
        let size = query_file_size(first, name)?;
        tracing::info!(file = %name, size, "Transferring file");

        let sink = FileSink::create(&self.config.paths.output_dir.join(name), size)?;

        let chunk = u32::try_from(self.config.max_message).context("max_message does not fit a FILE request")?;
        let file_name = name.to_string();
        let producers: Vec<Producer> = vec![Box::new(move |queue: &BoundedQueue| {
            producer::file_requests(queue, &file_name, size, chunk)
        }) as Producer];

        let (requests, workers) = self.pump(channels, producers, &sink)?;

        let path = sink.path().to_path_buf();
        Ok((requests, workers, Outcome::File { path, bytes: size }))
    }

    /// Run producers, workers and sinks to completion in shutdown order
    fn pump(
        &self,
        channels: Vec<DuplexChannel>,
        producers: Vec<Producer<'_>>,
        target: &dyn Sink,
    ) -> Result<(u64, Vec<WorkerSummary>)> {
        let requests = BoundedQueue::new(self.config.queue_capacity);
        let responses = BoundedQueue::new(self.config.queue_capacity);
        let max_message = self.config.max_message;
        let max_record = CHUNK_HEADER_LEN + max_message;
        let num_workers = channels.len();
        let num_sinks = self.config.sinks;

        crossbeam::scope(|s| {
            let requests = &requests;
            let responses = &responses;

            let producer_handles: Vec<_> = producers
                .into_iter()
                .map(|produce| s.spawn(move |_| produce(requests)))
                .collect();

            let worker_handles: Vec<_> = channels
                .into_iter()
                .enumerate()
                .map(|(id, channel)| {
                    s.spawn(move |_| worker::run_worker(id, channel, requests, responses, max_message))
                })
                .collect();

            let sink_handles: Vec<_> = (0..num_sinks)
                .map(|id| s.spawn(move |_| sink::run_sink(id, responses, target, max_record)))
                .collect();

            // Shutdown runs to the end even after a failure, so no thread is left blocked
            let mut first_error: Option<anyhow::Error> = None;

            let mut produced = 0;
            for handle in producer_handles {
                match join(handle) {
                    Ok(n) => produced += n,
                    Err(e) => keep_first(&mut first_error, e),
                }
            }
            tracing::debug!(requests = produced, "Producers finished");

            for _ in 0..num_workers {
                requests.enqueue(Request::Quit.encode());
            }
            let mut summaries = Vec::with_capacity(num_workers);
            for handle in worker_handles {
                match join(handle).and_then(|r| r) {
                    Ok(summary) => summaries.push(summary),
                    Err(e) => keep_first(&mut first_error, e),
                }
            }
            tracing::debug!("Workers finished");

            for _ in 0..num_sinks {
                responses.enqueue(ResponseRecord::Quit.encode());
            }
            for handle in sink_handles {
                if let Err(e) = join(handle).and_then(|r| r) {
                    keep_first(&mut first_error, e);
                }
            }
            tracing::debug!("Sinks finished");

            match first_error {
                Some(e) => Err(e),
                None => Ok((produced, summaries)),
            }
        })
        .map_err(|_| anyhow::anyhow!("client thread scope panicked"))?
    }
}

fn join<T>(handle: ScopedJoinHandle<'_, T>) -> Result<T> {
    handle
        .join()
        .map_err(|_| anyhow::anyhow!("client thread panicked"))
}

fn keep_first(slot: &mut Option<anyhow::Error>, e: anyhow::Error) {
    let reason = format!("{:#}", e);
    tracing::error!(error = %reason, "Client thread failed");
    slot.get_or_insert(e);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::encode_sample;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Mutex;
    use std::thread;
    use tempfile::TempDir;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
    enum Stage {
        Producer,
        Worker,
        Sink,
    }

    /// Stages in the order they reported finishing
    #[derive(Default)]
    struct Timeline(Mutex<Vec<Stage>>);

    impl Timeline {
        fn record(&self, stage: Stage) {
            self.0.lock().unwrap().push(stage);
        }

        fn stages(&self) -> Vec<Stage> {
            self.0.lock().unwrap().clone()
        }
    }

    struct TimelineSink<'a> {
        timeline: &'a Timeline,
        samples: AtomicU64,
    }

    impl Sink for TimelineSink<'_> {
        fn consume(&self, record: ResponseRecord) -> Result<()> {
            anyhow::ensure!(matches!(record, ResponseRecord::Sample { .. }), "unexpected {:?}", record);
            self.samples.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }

        fn finish(&self) -> Result<()> {
            self.timeline.record(Stage::Sink);
            Ok(())
        }
    }

    /// Service end answering DATA with 1.0; a worker's QUIT is recorded before the channel closes
    fn serve(mut channel: DuplexChannel, timeline: &Timeline) {
        loop {
            match Request::decode(&channel.receive(64).unwrap()).unwrap() {
                Request::Data(_) => channel.send(&encode_sample(1.0)).unwrap(),
                Request::Quit => {
                    timeline.record(Stage::Worker);
                    return;
                }
                other => panic!("unexpected request {:?}", other),
            }
        }
    }

    #[test]
    fn test_pump_stops_producers_then_workers_then_sinks() {
        const WORKERS: usize = 3;
        const SINKS: usize = 2;
        const PATIENTS: i32 = 4;
        const PER_PATIENT: usize = 25;

        let dir = TempDir::new().unwrap();
        let timeline = Timeline::default();
        let orchestrator = Orchestrator::new(ClientConfig {
            workers: WORKERS,
            sinks: SINKS,
            queue_capacity: 2,
            ..Default::default()
        });

        thread::scope(|s| {
            let timeline = &timeline;
            let channels: Vec<DuplexChannel> = (0..WORKERS)
                .map(|i| {
                    let name = format!("order{}_", i);
                    let server_dir = dir.path().to_path_buf();
                    let server_name = name.clone();
                    s.spawn(move || {
                        serve(
                            DuplexChannel::open(&server_dir, &server_name, Side::Initiator).unwrap(),
                            timeline,
                        )
                    });
                    DuplexChannel::open(dir.path(), &name, Side::Acceptor).unwrap()
                })
                .collect();

            let producers: Vec<Producer> = (1..=PATIENTS)
                .map(|person| {
                    Box::new(move |queue: &BoundedQueue| {
                        let n = producer::patient_requests(queue, person, PER_PATIENT, 1);
                        timeline.record(Stage::Producer);
                        n
                    }) as Producer
                })
                .collect();

            let sink = TimelineSink {
                timeline,
                samples: AtomicU64::new(0),
            };
            let (requests, workers) = orchestrator.pump(channels, producers, &sink).unwrap();

            assert_eq!(requests, (PATIENTS as usize * PER_PATIENT) as u64);
            assert_eq!(workers.iter().map(|w| w.requests).sum::<u64>(), requests);
            assert_eq!(sink.samples.load(Ordering::Relaxed), requests);
        });

        let stages = timeline.stages();
        assert_eq!(stages.len(), PATIENTS as usize + WORKERS + SINKS);
        let mut ordered = stages.clone();
        ordered.sort();
        assert_eq!(stages, ordered, "stages finished out of order");
    }
}
