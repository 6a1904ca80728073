//! Request handling and per-channel service loops
//!
//! [`ServerContext::handle`] turns one decoded request into an [`Action`]
//! without touching any channel, so every reply rule can be tested without
//! pipes. [`serve_channel`] is the loop that owns one channel: receive,
//! decode, handle, reply, until the peer quits or goes away.
//!
//! Reply rules:
//!
//! - DATA: the sample value, or `0.0` when the lookup fails
//! - FILE size query (`offset = 0, length = 0`): the file size, or `-1`
//! - FILE chunk: exactly `length` bytes, or an empty reply when the request
//!   exceeds the maximum message size, runs past the end of the file, or
//!   names a file that does not exist
//! - NEW_CHANNEL: the name of a freshly spawned data channel
//! - QUIT: no reply, the loop ends
//! - anything else, including undecodable buffers: a one-byte acknowledgment

use super::dataset::Dataset;
use crate::channel::{fifo, ChannelError, DuplexChannel, Side};
use crate::config::ServerConfig;
use crate::protocol::{
    encode_channel_name, encode_file_size, encode_sample, DataRequest, FileRequest, Request,
    FILE_SIZE_NOT_FOUND, SAMPLE_NOT_FOUND, UNKNOWN_ACK,
};
use rand::Rng;
use serde::Serialize;
use std::fs::{self, File};
use std::io;
use std::os::unix::fs::FileExt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// How a reply came about
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyStatus {
    Served,
    /// Unknown person, index, lead or file
    NotFound,
    /// Malformed or oversized request
    ProtocolViolation,
}

/// What a service loop does with one request
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Send these bytes back (an empty reply is not written)
    Reply { bytes: Vec<u8>, status: ReplyStatus },
    /// Allocate a data channel and reply with its name
    OpenChannel,
    /// Stop this loop without replying
    Quit,
}

impl Action {
    fn reply(bytes: impl Into<Vec<u8>>, status: ReplyStatus) -> Self {
        Action::Reply {
            bytes: bytes.into(),
            status,
        }
    }
}

/// Shared, read-only server state plus the channel name sequence
#[derive(Debug)]
pub struct ServerContext {
    config: ServerConfig,
    dataset: Dataset,
    next_channel: AtomicU64,
}

impl ServerContext {
    pub fn new(config: ServerConfig, dataset: Dataset) -> Self {
        Self {
            config,
            dataset,
            next_channel: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Next unused data channel name: `data1_`, `data2_`, ...
    pub fn next_channel_name(&self) -> String {
        let n = self.next_channel.fetch_add(1, Ordering::Relaxed) + 1;
        format!("data{}_", n)
    }

    /// Decide how to answer `request`
    pub fn handle(&self, request: &Request) -> Action {
        match request {
            Request::Data(req) => self.handle_data(req),
            Request::File(req) => self.handle_file(req),
            Request::NewChannel => Action::OpenChannel,
            Request::Quit => Action::Quit,
            Request::Unknown(tag) => {
                tracing::debug!(tag, "Unknown request");
                Action::reply(UNKNOWN_ACK, ReplyStatus::Served)
            }
        }
    }

    fn handle_data(&self, req: &DataRequest) -> Action {
        if self.config.jitter_us > 0 {
            let micros = rand::thread_rng().gen_range(0..self.config.jitter_us);
            thread::sleep(Duration::from_micros(micros));
        }

        match self.dataset.sample(req.person, req.seconds, req.lead) {
            Ok(value) => Action::reply(encode_sample(value), ReplyStatus::Served),
            Err(e) => {
                tracing::debug!(error = %e, "DATA lookup failed");
                Action::reply(encode_sample(SAMPLE_NOT_FOUND), ReplyStatus::NotFound)
            }
        }
    }

    fn handle_file(&self, req: &FileRequest) -> Action {
        if req.is_size_query() {
            return match self.file_size(&req.name) {
                Some(size) => Action::reply(encode_file_size(size as i64), ReplyStatus::Served),
                None => Action::reply(encode_file_size(FILE_SIZE_NOT_FOUND), ReplyStatus::NotFound),
            };
        }

        if req.length as usize > self.config.max_message {
            tracing::warn!(
                file = %req.name,
                length = req.length,
                max = self.config.max_message,
                "FILE chunk larger than the maximum message"
            );
            return Action::reply(Vec::new(), ReplyStatus::ProtocolViolation);
        }

        let Some(path) = self.resolve(&req.name) else {
            return Action::reply(Vec::new(), ReplyStatus::NotFound);
        };

        match read_chunk(&path, req.offset, req.length) {
            Ok(bytes) => Action::reply(bytes, ReplyStatus::Served),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::debug!(file = %req.name, "FILE not found");
                Action::reply(Vec::new(), ReplyStatus::NotFound)
            }
            Err(e) => {
                tracing::warn!(
                    file = %req.name,
                    offset = req.offset,
                    length = req.length,
                    error = %e,
                    "FILE chunk read failed"
                );
                Action::reply(Vec::new(), ReplyStatus::ProtocolViolation)
            }
        }
    }

    fn file_size(&self, name: &str) -> Option<u64> {
        let path = self.resolve(name)?;
        match fs::metadata(&path) {
            Ok(meta) if meta.is_file() => Some(meta.len()),
            Ok(_) => None,
            Err(e) => {
                tracing::debug!(file = %name, error = %e, "FILE size query failed");
                None
            }
        }
    }

    /// Map a requested name to a path inside the data directory
    fn resolve(&self, name: &str) -> Option<PathBuf> {
        if name.is_empty() || name.contains('/') || name == "." || name == ".." {
            tracing::warn!(file = %name, "Rejected file name");
            return None;
        }
        Some(self.config.data_dir.join(name))
    }
}

/// Read exactly `length` bytes at `offset`; a short file is `UnexpectedEof`
fn read_chunk(path: &std::path::Path, offset: u64, length: u32) -> io::Result<Vec<u8>> {
    let file = File::open(path)?;
    let mut buf = vec![0u8; length as usize];
    file.read_exact_at(&mut buf, offset)?;
    Ok(buf)
}

/// What one service loop did before it ended
#[derive(Debug, Clone, Default, Serialize)]
pub struct ChannelSummary {
    pub channel: String,
    pub requests: u64,
    pub not_found: u64,
    pub violations: u64,
    /// Ended by QUIT rather than by the peer going away
    pub quit: bool,
}

impl ChannelSummary {
    fn new(channel: &str) -> Self {
        Self {
            channel: channel.to_string(),
            ..Default::default()
        }
    }

    fn record(&mut self, status: ReplyStatus) {
        match status {
            ReplyStatus::Served => {}
            ReplyStatus::NotFound => self.not_found += 1,
            ReplyStatus::ProtocolViolation => self.violations += 1,
        }
    }
}

/// Every service loop spawned so far, joined at shutdown
#[derive(Debug, Default)]
pub struct ServiceGroup {
    handles: Mutex<Vec<JoinHandle<ChannelSummary>>>,
}

impl ServiceGroup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn a service loop that opens channel `name` as initiator
    pub fn spawn(self: &Arc<Self>, ctx: &Arc<ServerContext>, name: String) -> io::Result<()> {
        let ctx = Arc::clone(ctx);
        let group = Arc::clone(self);

        let handle = thread::Builder::new()
            .name(format!("svc-{}", name))
            .spawn(move || match DuplexChannel::open(&ctx.config.fifo_dir, &name, Side::Initiator) {
                Ok(channel) => serve_channel(&ctx, &group, channel),
                Err(e) => {
                    tracing::warn!(channel = %name, error = %e, "Failed to open data channel");
                    ChannelSummary::new(&name)
                }
            })?;

        self.handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handle);
        Ok(())
    }

    /// Number of loops spawned and not yet joined
    pub fn pending(&self) -> usize {
        self.handles.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Join every loop, including ones spawned while joining
    pub fn join_all(&self) -> Vec<ChannelSummary> {
        let mut summaries = Vec::new();
        loop {
            let batch = std::mem::take(&mut *self.handles.lock().unwrap_or_else(PoisonError::into_inner));
            if batch.is_empty() {
                return summaries;
            }
            for handle in batch {
                match handle.join() {
                    Ok(summary) => summaries.push(summary),
                    Err(_) => tracing::error!("Service loop panicked"),
                }
            }
        }
    }
}

/// Serve `channel` until QUIT, peer close, or an I/O failure
///
/// I/O failures end only this loop. The channel is dropped on return, which
/// removes its pipes.
pub fn serve_channel(
    ctx: &Arc<ServerContext>,
    group: &Arc<ServiceGroup>,
    mut channel: DuplexChannel,
) -> ChannelSummary {
    let mut summary = ChannelSummary::new(channel.name());
    tracing::debug!(channel = %channel.name(), "Service loop started");

    loop {
        let buf = match channel.receive(ctx.config.max_message) {
            Ok(buf) => buf,
            Err(ChannelError::PeerClosed) => {
                tracing::debug!(channel = %channel.name(), "Peer closed channel");
                break;
            }
            Err(e) => {
                tracing::warn!(channel = %channel.name(), error = %e, "Receive failed");
                break;
            }
        };
        summary.requests += 1;

        let action = match Request::decode(&buf) {
            Ok(request) => ctx.handle(&request),
            Err(e) => {
                tracing::warn!(channel = %channel.name(), error = %e, "Malformed request");
                Action::reply(UNKNOWN_ACK, ReplyStatus::ProtocolViolation)
            }
        };

        let result = match action {
            Action::Reply { bytes, status } => {
                summary.record(status);
                channel.send(&bytes)
            }
            Action::OpenChannel => open_channel(ctx, group, &mut channel),
            Action::Quit => {
                summary.quit = true;
                break;
            }
        };

        if let Err(e) = result {
            tracing::warn!(channel = %channel.name(), error = %e, "Send failed");
            break;
        }
    }

    tracing::debug!(
        channel = %channel.name(),
        requests = summary.requests,
        quit = summary.quit,
        "Service loop finished"
    );
    summary
}

/// Allocate a data channel, reply with its name, then hand it to a new loop
fn open_channel(
    ctx: &Arc<ServerContext>,
    group: &Arc<ServiceGroup>,
    channel: &mut DuplexChannel,
) -> Result<(), ChannelError> {
    let name = ctx.next_channel_name();

    if let Err(e) = fifo::create_pair(&ctx.config.fifo_dir, &name) {
        // The acknowledgment is not a valid channel name, so the peer fails cleanly
        tracing::error!(channel = %name, error = %e, "Failed to create data channel pipes");
        return channel.send(&UNKNOWN_ACK);
    }

    channel.send(&encode_channel_name(&name))?;

    if let Err(e) = group.spawn(ctx, name.clone()) {
        tracing::error!(channel = %name, error = %e, "Failed to spawn service loop");
        let (forward, backward) = fifo::pipe_paths(&ctx.config.fifo_dir, &name);
        let _ = fifo::remove_fifo(&forward);
        let _ = fifo::remove_fifo(&backward);
    } else {
        tracing::debug!(via = %channel.name(), channel = %name, "Data channel spawned");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{decode_file_size, decode_sample};
    use crate::server::dataset::Sample;
    use std::io::Write;
    use tempfile::TempDir;

    fn context(data_dir: PathBuf, max_message: usize) -> ServerContext {
        let dataset = Dataset::from_samples(
            vec![
                vec![
                    Sample { ecg1: 0.25, ecg2: -0.5 },
                    Sample { ecg1: 0.75, ecg2: 1.25 },
                ],
                vec![Sample { ecg1: 1.5, ecg2: 1.75 }],
            ],
            0.004,
        );
        let config = ServerConfig {
            max_message,
            data_dir,
            ..Default::default()
        };
        ServerContext::new(config, dataset)
    }

    fn reply_bytes(action: Action) -> (Vec<u8>, ReplyStatus) {
        match action {
            Action::Reply { bytes, status } => (bytes, status),
            other => panic!("expected a reply, got {:?}", other),
        }
    }

    fn data(person: i32, seconds: f64, lead: i32) -> Request {
        Request::Data(DataRequest {
            person,
            seconds,
            lead,
        })
    }

    #[test]
    fn test_data_request() {
        let ctx = context(PathBuf::from("."), 256);

        let (bytes, status) = reply_bytes(ctx.handle(&data(1, 0.004, 1)));
        assert_eq!(status, ReplyStatus::Served);
        assert_eq!(decode_sample(&bytes).unwrap(), 0.75);

        let (bytes, _) = reply_bytes(ctx.handle(&data(1, 0.004, 2)));
        assert_eq!(decode_sample(&bytes).unwrap(), 1.25);
    }

    #[test]
    fn test_data_request_is_deterministic() {
        let ctx = context(PathBuf::from("."), 256);
        let first = ctx.handle(&data(2, 0.0, 1));
        for _ in 0..10 {
            assert_eq!(ctx.handle(&data(2, 0.0, 1)), first);
        }
    }

    #[test]
    fn test_out_of_range_person_gets_sentinel() {
        let ctx = context(PathBuf::from("."), 256);

        for person in [0, 3, 16, -1] {
            let (bytes, status) = reply_bytes(ctx.handle(&data(person, 0.0, 1)));
            assert_eq!(status, ReplyStatus::NotFound);
            assert_eq!(decode_sample(&bytes).unwrap(), SAMPLE_NOT_FOUND);
        }

        let (_, status) = reply_bytes(ctx.handle(&data(1, 100.0, 1)));
        assert_eq!(status, ReplyStatus::NotFound);
    }

    #[test]
    fn test_file_size_query() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("blob.bin"), vec![9u8; 1000]).unwrap();
        let ctx = context(dir.path().to_path_buf(), 256);

        let (bytes, status) = reply_bytes(ctx.handle(&Request::File(FileRequest::size_query("blob.bin"))));
        assert_eq!(status, ReplyStatus::Served);
        assert_eq!(decode_file_size(&bytes).unwrap(), 1000);

        let (bytes, status) = reply_bytes(ctx.handle(&Request::File(FileRequest::size_query("missing.bin"))));
        assert_eq!(status, ReplyStatus::NotFound);
        assert_eq!(decode_file_size(&bytes).unwrap(), FILE_SIZE_NOT_FOUND);
    }

    #[test]
    fn test_file_chunk() {
        let dir = TempDir::new().unwrap();
        let contents: Vec<u8> = (0..=255u8).cycle().take(600).collect();
        fs::File::create(dir.path().join("blob.bin"))
            .unwrap()
            .write_all(&contents)
            .unwrap();
        let ctx = context(dir.path().to_path_buf(), 256);

        let req = Request::File(FileRequest {
            offset: 300,
            length: 200,
            name: "blob.bin".into(),
        });
        let (bytes, status) = reply_bytes(ctx.handle(&req));
        assert_eq!(status, ReplyStatus::Served);
        assert_eq!(bytes, &contents[300..500]);
    }

    #[test]
    fn test_oversized_chunk_gets_empty_reply() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("blob.bin"), vec![1u8; 4096]).unwrap();
        let ctx = context(dir.path().to_path_buf(), 256);

        let req = Request::File(FileRequest {
            offset: 0,
            length: 257,
            name: "blob.bin".into(),
        });
        let (bytes, status) = reply_bytes(ctx.handle(&req));
        assert!(bytes.is_empty());
        assert_eq!(status, ReplyStatus::ProtocolViolation);
    }

    #[test]
    fn test_chunk_past_end_of_file() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("short.bin"), vec![1u8; 100]).unwrap();
        let ctx = context(dir.path().to_path_buf(), 256);

        let req = Request::File(FileRequest {
            offset: 50,
            length: 100,
            name: "short.bin".into(),
        });
        let (bytes, status) = reply_bytes(ctx.handle(&req));
        assert!(bytes.is_empty());
        assert_eq!(status, ReplyStatus::ProtocolViolation);
    }

    #[test]
    fn test_file_names_confined_to_data_dir() {
        let dir = TempDir::new().unwrap();
        let ctx = context(dir.path().join("data"), 256);

        for name in ["../escape", "/etc/passwd", "..", ""] {
            let (bytes, status) = reply_bytes(ctx.handle(&Request::File(FileRequest::size_query(name))));
            assert_eq!(status, ReplyStatus::NotFound, "{name:?}");
            assert_eq!(decode_file_size(&bytes).unwrap(), FILE_SIZE_NOT_FOUND);
        }
    }

    #[test]
    fn test_control_requests() {
        let ctx = context(PathBuf::from("."), 256);

        assert_eq!(ctx.handle(&Request::NewChannel), Action::OpenChannel);
        assert_eq!(ctx.handle(&Request::Quit), Action::Quit);

        let (bytes, _) = reply_bytes(ctx.handle(&Request::Unknown(77)));
        assert_eq!(bytes, UNKNOWN_ACK);
    }

    #[test]
    fn test_channel_names_are_sequential() {
        let ctx = context(PathBuf::from("."), 256);
        assert_eq!(ctx.next_channel_name(), "data1_");
        assert_eq!(ctx.next_channel_name(), "data2_");
        assert_eq!(ctx.next_channel_name(), "data3_");
    }

    #[test]
    fn test_serve_channel_until_quit() {
        let dir = TempDir::new().unwrap();
        let fifo_dir = dir.path().to_path_buf();
        let ctx = Arc::new(ServerContext::new(
            ServerConfig {
                fifo_dir: fifo_dir.clone(),
                ..Default::default()
            },
            Dataset::from_samples(vec![vec![Sample { ecg1: 0.5, ecg2: 0.0 }]], 0.004),
        ));
        let group = Arc::new(ServiceGroup::new());

        let server = {
            let ctx = Arc::clone(&ctx);
            let group = Arc::clone(&group);
            let dir = fifo_dir.clone();
            thread::spawn(move || {
                let channel = DuplexChannel::open(&dir, "loop_", Side::Initiator).unwrap();
                serve_channel(&ctx, &group, channel)
            })
        };

        let mut client = DuplexChannel::open(&fifo_dir, "loop_", Side::Acceptor).unwrap();

        client.send(&data(1, 0.0, 1).encode()).unwrap();
        assert_eq!(decode_sample(&client.receive_exact(8).unwrap()).unwrap(), 0.5);

        // Garbage gets the acknowledgment and the loop keeps going
        client.send(&[1, 0]).unwrap();
        assert_eq!(client.receive(16).unwrap(), UNKNOWN_ACK);

        client.send(&Request::Unknown(99).encode()).unwrap();
        assert_eq!(client.receive(16).unwrap(), UNKNOWN_ACK);

        client.send(&Request::Quit.encode()).unwrap();
        let summary = server.join().unwrap();

        assert!(summary.quit);
        assert_eq!(summary.requests, 4);
        assert_eq!(summary.violations, 1);
        assert_eq!(group.pending(), 0);
    }
}
