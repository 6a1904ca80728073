//! Worker threads
//!
//! Each worker owns exactly one data channel and performs synchronous round
//! trips on it: dequeue a request, send it, read the one reply, turn the reply
//! into a [`ResponseRecord`] for the sinks. Reply sizes are known from the
//! request (8 bytes for DATA and size queries, `length` bytes for chunks), so
//! replies are read with [`DuplexChannel::receive_exact`].
//!
//! A worker whose channel fails keeps draining the request queue until its
//! QUIT arrives, counting what it drops. Producers and the other workers
//! therefore never stall behind a dead channel.

use crate::channel::{ChannelError, DuplexChannel};
use crate::protocol::record::ResponseRecord;
use crate::protocol::{decode_file_size, decode_sample, Request, SCALAR_REPLY_LEN};
use crate::util::bounded_queue::BoundedQueue;
use anyhow::{Context, Result};
use serde::Serialize;

/// Per-worker counters
#[derive(Debug, Clone, Default, Serialize)]
pub struct WorkerSummary {
    pub worker: usize,
    pub channel: String,
    /// Round trips completed
    pub requests: u64,
    /// Reply payload bytes received
    pub bytes_received: u64,
    /// Requests discarded after the channel failed
    pub dropped: u64,
}

/// Run one worker until it dequeues QUIT
///
/// QUIT is forwarded on the worker's channel, and the worker returns only
/// after the paired service loop has closed it. Returns an error if the
/// channel failed at any point.
pub fn run_worker(
    id: usize,
    mut channel: DuplexChannel,
    requests: &BoundedQueue,
    responses: &BoundedQueue,
    max_message: usize,
) -> Result<WorkerSummary> {
    let mut summary = WorkerSummary {
        worker: id,
        channel: channel.name().to_string(),
        ..Default::default()
    };
    let mut failure: Option<anyhow::Error> = None;

    loop {
        let msg = requests.dequeue(max_message);
        let request = match Request::decode(&msg) {
            Ok(request) => request,
            Err(e) => {
                tracing::error!(worker = id, error = %e, "Undecodable request on the queue");
                summary.dropped += 1;
                continue;
            }
        };

        if request == Request::Quit {
            if failure.is_none() {
                forward_quit(id, &mut channel, &msg);
            }
            break;
        }

        if failure.is_some() {
            summary.dropped += 1;
            continue;
        }

        match round_trip(&mut channel, &request, &msg) {
            Ok(reply) => {
                summary.requests += 1;
                summary.bytes_received += reply.bytes;
                if let Some(record) = reply.record {
                    responses.enqueue(record.encode());
                }
            }
            Err(e) => {
                let reason = format!("{:#}", e);
                tracing::warn!(worker = id, channel = %summary.channel, error = %reason, "Channel failed");
                summary.dropped += 1;
                failure = Some(e);
            }
        }
    }

    channel.close();
    tracing::debug!(
        worker = id,
        channel = %summary.channel,
        requests = summary.requests,
        dropped = summary.dropped,
        "Worker finished"
    );

    match failure {
        Some(e) => Err(e.context(format!("worker {} on channel {}", id, summary.channel))),
        None => Ok(summary),
    }
}

/// Send QUIT and wait until the service loop closes its end of the channel
fn forward_quit(id: usize, channel: &mut DuplexChannel, quit: &[u8]) {
    if let Err(e) = channel.send(quit) {
        tracing::warn!(worker = id, channel = %channel.name(), error = %e, "Failed to forward QUIT");
        return;
    }
    match channel.receive(1) {
        Err(ChannelError::PeerClosed) => {}
        Ok(bytes) => {
            tracing::warn!(worker = id, channel = %channel.name(), bytes = bytes.len(), "Reply to QUIT")
        }
        Err(e) => tracing::warn!(worker = id, channel = %channel.name(), error = %e, "Channel failed after QUIT"),
    }
}

struct Reply {
    record: Option<ResponseRecord>,
    bytes: u64,
}

/// Send `raw` (the encoded `request`) and read its reply
fn round_trip(channel: &mut DuplexChannel, request: &Request, raw: &[u8]) -> Result<Reply> {
    match request {
        Request::Data(req) => {
            channel.send(raw).context("send DATA")?;
            let bytes = channel.receive_exact(SCALAR_REPLY_LEN).context("receive DATA reply")?;
            Ok(Reply {
                record: Some(ResponseRecord::Sample {
                    person: req.person,
                    value: decode_sample(&bytes)?,
                }),
                bytes: bytes.len() as u64,
            })
        }
        Request::File(req) if req.is_size_query() => {
            channel.send(raw).context("send FILE size query")?;
            let bytes = channel.receive_exact(SCALAR_REPLY_LEN).context("receive FILE size")?;
            let size = decode_file_size(&bytes)?;
            tracing::debug!(file = %req.name, size, "Size query on worker channel");
            Ok(Reply {
                record: None,
                bytes: bytes.len() as u64,
            })
        }
        Request::File(req) => {
            channel.send(raw).context("send FILE")?;
            let data = channel
                .receive_exact(req.length as usize)
                .context("receive FILE chunk")?;
            Ok(Reply {
                bytes: data.len() as u64,
                record: Some(ResponseRecord::Chunk {
                    offset: req.offset,
                    data,
                }),
            })
        }
        Request::Unknown(_) => {
            channel.send(raw).context("send unknown request")?;
            let bytes = channel.receive(raw.len().max(1)).context("receive acknowledgment")?;
            Ok(Reply {
                record: None,
                bytes: bytes.len() as u64,
            })
        }
        Request::NewChannel | Request::Quit => {
            tracing::warn!(kind = ?request.kind(), "Control request on a data queue, skipped");
            Ok(Reply {
                record: None,
                bytes: 0,
            })
        }
    }
}
