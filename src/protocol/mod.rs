//! Request channel wire protocol
//!
//! Every message is one contiguous buffer: a little-endian `u32` discriminant
//! followed by kind-specific fields in a fixed layout. There is no length
//! prefix; each kind has a known size except the file name carried by FILE
//! requests, which is NUL-terminated.
//!
//! # Request Layout
//!
//! ```text
//! DATA         [tag=1 u32][person i32][seconds f64][lead i32]          20 bytes
//! FILE         [tag=2 u32][offset u64][length u32][name ...][NUL]      16 + name + 1
//! NEW_CHANNEL  [tag=3 u32]                                              4 bytes
//! QUIT         [tag=4 u32]                                              4 bytes
//! ```
//!
//! Any other tag decodes to [`Request::Unknown`].
//!
//! # Replies
//!
//! ```text
//! DATA               sample value f64 (8 bytes)
//! FILE size query    total size i64 (8 bytes), -1 if the file is missing
//! FILE chunk         exactly `length` raw bytes (zero bytes on a bad request)
//! NEW_CHANNEL        channel name + NUL
//! unknown            a single 0 byte
//! QUIT               nothing
//! ```
//!
//! Buffers are decoded once at the channel boundary into [`Request`]; nothing
//! past that point looks at raw bytes.

pub mod record;

use thiserror::Error;

/// Size of the leading discriminant
pub const TAG_LEN: usize = 4;

/// Encoded size of a DATA request
pub const DATA_REQUEST_LEN: usize = 20;

/// Encoded size of a FILE request without its name and terminator
pub const FILE_HEADER_LEN: usize = 16;

/// Encoded size of a DATA reply and a FILE size reply
pub const SCALAR_REPLY_LEN: usize = 8;

/// DATA reply when the sample does not exist
pub const SAMPLE_NOT_FOUND: f64 = 0.0;

/// FILE size reply when the file does not exist
pub const FILE_SIZE_NOT_FOUND: i64 = -1;

/// Reply to an unrecognised request
pub const UNKNOWN_ACK: [u8; 1] = [0];

/// Message discriminant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum MessageKind {
    Unknown = 0,
    Data = 1,
    File = 2,
    NewChannel = 3,
    Quit = 4,
}

impl MessageKind {
    /// Map a wire tag to its kind; unrecognised tags are `Unknown`
    pub fn from_tag(tag: u32) -> Self {
        match tag {
            1 => MessageKind::Data,
            2 => MessageKind::File,
            3 => MessageKind::NewChannel,
            4 => MessageKind::Quit,
            _ => MessageKind::Unknown,
        }
    }

    pub fn tag(self) -> u32 {
        self as u32
    }
}

/// Request for one ECG sample
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DataRequest {
    /// Patient number, 1-based
    pub person: i32,
    /// Seconds since the start of the recording
    pub seconds: f64,
    /// ECG lead (1 or 2)
    pub lead: i32,
}

/// Request for a byte range of a file (or its size)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRequest {
    pub offset: u64,
    pub length: u32,
    /// File name relative to the server's data directory
    pub name: String,
}

impl FileRequest {
    /// The reserved `offset = 0, length = 0` request that asks for the file size
    pub fn size_query(name: impl Into<String>) -> Self {
        Self {
            offset: 0,
            length: 0,
            name: name.into(),
        }
    }

    pub fn is_size_query(&self) -> bool {
        self.offset == 0 && self.length == 0
    }

    /// Encoded size of a FILE request carrying `name`
    pub fn encoded_len_for(name: &str) -> usize {
        FILE_HEADER_LEN + name.len() + 1
    }
}

/// Decoded request
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    Data(DataRequest),
    File(FileRequest),
    NewChannel,
    Quit,
    /// Any other discriminant (carried for logging)
    Unknown(u32),
}

/// Malformed request buffers
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("{kind:?} message needs {needed} bytes, got {got}")]
    Truncated {
        kind: MessageKind,
        needed: usize,
        got: usize,
    },

    #[error("file request name is not NUL-terminated")]
    MissingName,

    #[error("file request name is not valid UTF-8")]
    InvalidName,

    #[error("channel name reply is not NUL-terminated UTF-8")]
    InvalidChannelName,
}

impl Request {
    pub fn kind(&self) -> MessageKind {
        match self {
            Request::Data(_) => MessageKind::Data,
            Request::File(_) => MessageKind::File,
            Request::NewChannel => MessageKind::NewChannel,
            Request::Quit => MessageKind::Quit,
            Request::Unknown(_) => MessageKind::Unknown,
        }
    }

    /// Serialize into the fixed wire layout
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Request::Data(d) => {
                let mut buf = Vec::with_capacity(DATA_REQUEST_LEN);
                buf.extend_from_slice(&MessageKind::Data.tag().to_le_bytes());
                buf.extend_from_slice(&d.person.to_le_bytes());
                buf.extend_from_slice(&d.seconds.to_le_bytes());
                buf.extend_from_slice(&d.lead.to_le_bytes());
                buf
            }
            Request::File(f) => {
                let mut buf = Vec::with_capacity(FileRequest::encoded_len_for(&f.name));
                buf.extend_from_slice(&MessageKind::File.tag().to_le_bytes());
                buf.extend_from_slice(&f.offset.to_le_bytes());
                buf.extend_from_slice(&f.length.to_le_bytes());
                buf.extend_from_slice(f.name.as_bytes());
                buf.push(0);
                buf
            }
            Request::NewChannel => MessageKind::NewChannel.tag().to_le_bytes().to_vec(),
            Request::Quit => MessageKind::Quit.tag().to_le_bytes().to_vec(),
            Request::Unknown(tag) => tag.to_le_bytes().to_vec(),
        }
    }

    /// Parse a wire buffer
    pub fn decode(buf: &[u8]) -> Result<Self, ProtocolError> {
        let kind = peek_kind(buf).ok_or(ProtocolError::Truncated {
            kind: MessageKind::Unknown,
            needed: TAG_LEN,
            got: buf.len(),
        })?;

        match kind {
            MessageKind::Data => {
                require_len(kind, buf, DATA_REQUEST_LEN)?;
                Ok(Request::Data(DataRequest {
                    person: le_i32(buf, 4),
                    seconds: le_f64(buf, 8),
                    lead: le_i32(buf, 16),
                }))
            }
            MessageKind::File => {
                require_len(kind, buf, FILE_HEADER_LEN + 1)?;
                let name_bytes = &buf[FILE_HEADER_LEN..];
                let nul = name_bytes
                    .iter()
                    .position(|&b| b == 0)
                    .ok_or(ProtocolError::MissingName)?;
                let name = std::str::from_utf8(&name_bytes[..nul])
                    .map_err(|_| ProtocolError::InvalidName)?;

                Ok(Request::File(FileRequest {
                    offset: le_u64(buf, 4),
                    length: le_u32(buf, 12),
                    name: name.to_string(),
                }))
            }
            MessageKind::NewChannel => Ok(Request::NewChannel),
            MessageKind::Quit => Ok(Request::Quit),
            MessageKind::Unknown => Ok(Request::Unknown(le_u32(buf, 0))),
        }
    }
}

/// Read just the discriminant, if the buffer is long enough to hold one
pub fn peek_kind(buf: &[u8]) -> Option<MessageKind> {
    if buf.len() < TAG_LEN {
        return None;
    }
    Some(MessageKind::from_tag(le_u32(buf, 0)))
}

/// Encode a DATA reply
pub fn encode_sample(value: f64) -> [u8; SCALAR_REPLY_LEN] {
    value.to_le_bytes()
}

/// Decode a DATA reply
pub fn decode_sample(buf: &[u8]) -> Result<f64, ProtocolError> {
    require_len(MessageKind::Data, buf, SCALAR_REPLY_LEN)?;
    Ok(le_f64(buf, 0))
}

/// Encode a FILE size reply
pub fn encode_file_size(size: i64) -> [u8; SCALAR_REPLY_LEN] {
    size.to_le_bytes()
}

/// Decode a FILE size reply
pub fn decode_file_size(buf: &[u8]) -> Result<i64, ProtocolError> {
    require_len(MessageKind::File, buf, SCALAR_REPLY_LEN)?;
    Ok(le_u64(buf, 0) as i64)
}

/// Encode a NEW_CHANNEL reply
pub fn encode_channel_name(name: &str) -> Vec<u8> {
    let mut buf = Vec::with_capacity(name.len() + 1);
    buf.extend_from_slice(name.as_bytes());
    buf.push(0);
    buf
}

/// Decode a NEW_CHANNEL reply
pub fn decode_channel_name(buf: &[u8]) -> Result<String, ProtocolError> {
    let nul = buf
        .iter()
        .position(|&b| b == 0)
        .ok_or(ProtocolError::InvalidChannelName)?;
    let name = std::str::from_utf8(&buf[..nul]).map_err(|_| ProtocolError::InvalidChannelName)?;
    if name.is_empty() {
        return Err(ProtocolError::InvalidChannelName);
    }
    Ok(name.to_string())
}

fn require_len(kind: MessageKind, buf: &[u8], needed: usize) -> Result<(), ProtocolError> {
    if buf.len() < needed {
        return Err(ProtocolError::Truncated {
            kind,
            needed,
            got: buf.len(),
        });
    }
    Ok(())
}

// Callers check lengths first; these only slice in-bounds ranges.
pub(crate) fn le_u32(buf: &[u8], at: usize) -> u32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&buf[at..at + 4]);
    u32::from_le_bytes(bytes)
}

pub(crate) fn le_i32(buf: &[u8], at: usize) -> i32 {
    le_u32(buf, at) as i32
}

pub(crate) fn le_u64(buf: &[u8], at: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&buf[at..at + 8]);
    u64::from_le_bytes(bytes)
}

pub(crate) fn le_f64(buf: &[u8], at: usize) -> f64 {
    f64::from_bits(le_u64(buf, at))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_request_layout() {
        let req = Request::Data(DataRequest {
            person: 3,
            seconds: 0.004,
            lead: 1,
        });
        let bytes = req.encode();

        assert_eq!(bytes.len(), DATA_REQUEST_LEN);
        assert_eq!(&bytes[0..4], &1u32.to_le_bytes());
        assert_eq!(&bytes[4..8], &3i32.to_le_bytes());
        assert_eq!(&bytes[8..16], &0.004f64.to_le_bytes());
        assert_eq!(&bytes[16..20], &1i32.to_le_bytes());

        assert_eq!(Request::decode(&bytes).unwrap(), req);
    }

    #[test]
    fn test_file_request_layout() {
        let req = Request::File(FileRequest {
            offset: 4096,
            length: 256,
            name: "1.csv".to_string(),
        });
        let bytes = req.encode();

        assert_eq!(bytes.len(), FileRequest::encoded_len_for("1.csv"));
        assert_eq!(&bytes[16..21], b"1.csv");
        assert_eq!(*bytes.last().unwrap(), 0);

        match Request::decode(&bytes).unwrap() {
            Request::File(f) => {
                assert_eq!(f.offset, 4096);
                assert_eq!(f.length, 256);
                assert_eq!(f.name, "1.csv");
                assert!(!f.is_size_query());
            }
            other => panic!("wrong request: {:?}", other),
        }
    }

    #[test]
    fn test_size_query() {
        let req = FileRequest::size_query("big.bin");
        assert!(req.is_size_query());
    }

    #[test]
    fn test_control_messages_are_tag_only() {
        assert_eq!(Request::NewChannel.encode(), 3u32.to_le_bytes());
        assert_eq!(Request::Quit.encode(), 4u32.to_le_bytes());
        assert_eq!(Request::decode(&4u32.to_le_bytes()).unwrap(), Request::Quit);
    }

    #[test]
    fn test_unknown_tag_decodes_to_unknown() {
        let mut bytes = 99u32.to_le_bytes().to_vec();
        bytes.extend_from_slice(b"trailing junk");
        assert_eq!(Request::decode(&bytes).unwrap(), Request::Unknown(99));
        assert_eq!(peek_kind(&bytes), Some(MessageKind::Unknown));
    }

    #[test]
    fn test_truncated_data_request() {
        let bytes = Request::Data(DataRequest {
            person: 1,
            seconds: 0.0,
            lead: 1,
        })
        .encode();

        let err = Request::decode(&bytes[..12]).unwrap_err();
        assert_eq!(
            err,
            ProtocolError::Truncated {
                kind: MessageKind::Data,
                needed: DATA_REQUEST_LEN,
                got: 12
            }
        );
    }

    #[test]
    fn test_short_buffer_has_no_kind() {
        assert_eq!(peek_kind(&[1, 0]), None);
        assert!(matches!(
            Request::decode(&[]),
            Err(ProtocolError::Truncated { needed: TAG_LEN, .. })
        ));
    }

    #[test]
    fn test_file_request_without_terminator() {
        let mut bytes = Request::File(FileRequest::size_query("x")).encode();
        bytes.pop();
        assert_eq!(Request::decode(&bytes).unwrap_err(), ProtocolError::MissingName);
    }

    #[test]
    fn test_file_request_invalid_utf8_name() {
        let mut bytes = Request::File(FileRequest::size_query("ab")).encode();
        bytes[16] = 0xFF;
        assert_eq!(Request::decode(&bytes).unwrap_err(), ProtocolError::InvalidName);
    }

    #[test]
    fn test_scalar_replies() {
        assert_eq!(decode_sample(&encode_sample(-0.125)).unwrap(), -0.125);
        assert_eq!(decode_file_size(&encode_file_size(1 << 40)).unwrap(), 1 << 40);
        assert_eq!(
            decode_file_size(&encode_file_size(FILE_SIZE_NOT_FOUND)).unwrap(),
            FILE_SIZE_NOT_FOUND
        );
        assert!(decode_sample(&[0u8; 4]).is_err());
    }

    #[test]
    fn test_channel_name_reply() {
        let bytes = encode_channel_name("data7_");
        assert_eq!(bytes, b"data7_\0");
        assert_eq!(decode_channel_name(&bytes).unwrap(), "data7_");
        assert_eq!(
            decode_channel_name(b"no terminator"),
            Err(ProtocolError::InvalidChannelName)
        );
        assert_eq!(decode_channel_name(b"\0"), Err(ProtocolError::InvalidChannelName));
    }
}
