//! Response records carried by the client's response queue
//!
//! Workers turn each server reply into one of these records and hand it to
//! the sink threads through a [`BoundedQueue`](crate::util::bounded_queue::BoundedQueue),
//! which only moves bytes. Same tag discipline as requests:
//!
//! ```text
//! SAMPLE  [tag=1 u32][person i32][value f64]       16 bytes
//! CHUNK   [tag=2 u32][offset u64][bytes ...]       12 + chunk
//! QUIT    [tag=4 u32]                              4 bytes
//! ```

use super::{le_f64, le_i32, le_u64, peek_kind, MessageKind, ProtocolError};

/// Encoded size of a SAMPLE record
pub const SAMPLE_RECORD_LEN: usize = 16;

/// Encoded size of a CHUNK record without its payload
pub const CHUNK_HEADER_LEN: usize = 12;

/// One unit of work for a sink thread
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseRecord {
    /// A sample value for one patient's histogram
    Sample { person: i32, value: f64 },
    /// A file chunk to be written at `offset`
    Chunk { offset: u64, data: Vec<u8> },
    /// No more records for this sink
    Quit,
}

impl ResponseRecord {
    pub fn encode(&self) -> Vec<u8> {
        match self {
            ResponseRecord::Sample { person, value } => {
                let mut buf = Vec::with_capacity(SAMPLE_RECORD_LEN);
                buf.extend_from_slice(&MessageKind::Data.tag().to_le_bytes());
                buf.extend_from_slice(&person.to_le_bytes());
                buf.extend_from_slice(&value.to_le_bytes());
                buf
            }
            ResponseRecord::Chunk { offset, data } => {
                let mut buf = Vec::with_capacity(CHUNK_HEADER_LEN + data.len());
                buf.extend_from_slice(&MessageKind::File.tag().to_le_bytes());
                buf.extend_from_slice(&offset.to_le_bytes());
                buf.extend_from_slice(data);
                buf
            }
            ResponseRecord::Quit => MessageKind::Quit.tag().to_le_bytes().to_vec(),
        }
    }

    pub fn decode(buf: &[u8]) -> Result<Self, ProtocolError> {
        let kind = peek_kind(buf).ok_or(ProtocolError::Truncated {
            kind: MessageKind::Unknown,
            needed: super::TAG_LEN,
            got: buf.len(),
        })?;

        let truncated = |needed: usize| ProtocolError::Truncated {
            kind,
            needed,
            got: buf.len(),
        };

        match kind {
            MessageKind::Data => {
                if buf.len() < SAMPLE_RECORD_LEN {
                    return Err(truncated(SAMPLE_RECORD_LEN));
                }
                Ok(ResponseRecord::Sample {
                    person: le_i32(buf, 4),
                    value: le_f64(buf, 8),
                })
            }
            MessageKind::File => {
                if buf.len() < CHUNK_HEADER_LEN {
                    return Err(truncated(CHUNK_HEADER_LEN));
                }
                Ok(ResponseRecord::Chunk {
                    offset: le_u64(buf, 4),
                    data: buf[CHUNK_HEADER_LEN..].to_vec(),
                })
            }
            // Anything else tells the sink to stop
            _ => Ok(ResponseRecord::Quit),
        }
    }
}
