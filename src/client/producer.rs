//! Request producers
//!
//! Producers only encode requests and push them onto the request queue; they
//! never touch a channel. Backpressure from the bounded queue is what paces
//! them.

use crate::config::SAMPLE_PERIOD;
use crate::protocol::{DataRequest, FileRequest, Request};
use crate::util::bounded_queue::BoundedQueue;

/// Enqueue `count` DATA requests for one patient, one per sample period
///
/// Returns the number of requests enqueued.
pub fn patient_requests(requests: &BoundedQueue, person: i32, count: usize, lead: i32) -> u64 {
    for i in 0..count {
        let req = Request::Data(DataRequest {
            person,
            seconds: i as f64 * SAMPLE_PERIOD,
            lead,
        });
        requests.enqueue(req.encode());
    }

    tracing::debug!(person, count, "Patient producer finished");
    count as u64
}

/// Enqueue FILE requests covering `file_size` bytes of `name` in `chunk`-sized pieces
///
/// The last chunk is shorter when `chunk` does not divide the size. Returns
/// the number of requests enqueued.
pub fn file_requests(requests: &BoundedQueue, name: &str, file_size: u64, chunk: u32) -> u64 {
    assert!(chunk > 0, "chunk size must be positive");

    let mut offset = 0u64;
    let mut issued = 0u64;
    while offset < file_size {
        let length = (file_size - offset).min(chunk as u64) as u32;
        let req = Request::File(FileRequest {
            offset,
            length,
            name: name.to_string(),
        });
        requests.enqueue(req.encode());

        offset += length as u64;
        issued += 1;
    }

    tracing::debug!(file = %name, chunks = issued, "File producer finished");
    issued
}
