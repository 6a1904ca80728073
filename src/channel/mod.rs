//! Duplex request channel over a pair of named pipes
//!
//! A [`DuplexChannel`] is one logical bidirectional link built from two
//! unidirectional FIFOs. Both sides agree on the pipe roles purely by the
//! order in which they open them:
//!
//! ```text
//! Initiator                              Acceptor
//!   open fifo_{name}1 for write  <---->  open fifo_{name}1 for read
//!   open fifo_{name}2 for read   <---->  open fifo_{name}2 for write
//! ```
//!
//! Opening a FIFO blocks until its other end is opened, so the two `open`
//! calls are the whole handshake.
//!
//! Channels carry one outstanding request at a time: send one request, read
//! one reply, repeat. There is no framing beyond what a single `write(2)`
//! delivers, so the receiver must know how large a reply to expect
//! ([`DuplexChannel::receive_exact`]) or accept whatever one read returns
//! ([`DuplexChannel::receive`]).
//!
//! The initiator owns the pipe files and unlinks them when the channel is
//! closed or dropped, on every exit path.

pub mod fifo;

use std::fs::File;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Name of the well-known control channel
pub const CONTROL_CHANNEL: &str = "control";

/// Which end of the channel this process holds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    /// Writes pipe 1, reads pipe 2, owns (and removes) the pipe files
    Initiator,
    /// Reads pipe 1, writes pipe 2
    Acceptor,
}

/// Channel failures surfaced to the calling loop
#[derive(Debug, Error)]
pub enum ChannelError {
    /// The underlying pipe read/write/open failed
    #[error("pipe I/O failed: {0}")]
    Io(#[from] io::Error),

    /// The peer closed its end (read returned EOF)
    #[error("peer closed the channel")]
    PeerClosed,

    /// The channel was already closed on this side
    #[error("channel is closed")]
    Closed,
}

/// Bidirectional, single-outstanding-request channel
#[derive(Debug)]
pub struct DuplexChannel {
    name: String,
    side: Side,
    forward_path: PathBuf,
    backward_path: PathBuf,
    reader: Option<File>,
    writer: Option<File>,
    closed: bool,
}

impl DuplexChannel {
    /// Open channel `name` in `dir` as `side`
    ///
    /// Creates the pipe files if they are missing, then opens both ends in the
    /// side's fixed order. Blocks until the peer opens its ends.
    pub fn open(dir: &Path, name: &str, side: Side) -> Result<Self, ChannelError> {
        fifo::create_pair(dir, name)?;

        let (forward_path, backward_path) = fifo::pipe_paths(dir, name);
        let mut channel = Self {
            name: name.to_string(),
            side,
            forward_path,
            backward_path,
            reader: None,
            writer: None,
            closed: false,
        };

        // Any early return drops `channel`, which removes the pipes if we own them
        match side {
            Side::Initiator => {
                channel.writer = Some(fifo::open_write(&channel.forward_path)?);
                channel.reader = Some(fifo::open_read(&channel.backward_path)?);
            }
            Side::Acceptor => {
                channel.reader = Some(fifo::open_read(&channel.forward_path)?);
                channel.writer = Some(fifo::open_write(&channel.backward_path)?);
            }
        }

        tracing::debug!(channel = %channel.name, side = ?side, "Channel open");
        Ok(channel)
    }

    /// Channel identity
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Write one whole message
    ///
    /// An empty message performs no write; a zero-length payload is not
    /// observable on a pipe.
    pub fn send(&mut self, msg: &[u8]) -> Result<(), ChannelError> {
        let writer = self.writer.as_mut().ok_or(ChannelError::Closed)?;
        if msg.is_empty() {
            return Ok(());
        }
        writer.write_all(msg)?;
        Ok(())
    }

    /// Read one message of at most `max_len` bytes
    ///
    /// Returns what a single read delivered. EOF is reported as
    /// [`ChannelError::PeerClosed`], never as an empty message.
    pub fn receive(&mut self, max_len: usize) -> Result<Vec<u8>, ChannelError> {
        let reader = self.reader.as_mut().ok_or(ChannelError::Closed)?;
        let mut buf = vec![0u8; max_len];

        let nbytes = loop {
            match reader.read(&mut buf) {
                Ok(n) => break n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        };

        if nbytes == 0 {
            return Err(ChannelError::PeerClosed);
        }

        buf.truncate(nbytes);
        Ok(buf)
    }

    /// Read exactly `len` bytes, across as many reads as the pipe needs
    ///
    /// Used for replies whose size the caller already knows, including file
    /// chunks larger than `PIPE_BUF`.
    pub fn receive_exact(&mut self, len: usize) -> Result<Vec<u8>, ChannelError> {
        let reader = self.reader.as_mut().ok_or(ChannelError::Closed)?;
        let mut buf = vec![0u8; len];

        match reader.read_exact(&mut buf) {
            Ok(()) => Ok(buf),
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Err(ChannelError::PeerClosed),
            Err(e) => Err(e.into()),
        }
    }

    /// Close both ends and, on the initiator, remove the pipe files
    ///
    /// Safe to call any number of times.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        self.writer.take();
        self.reader.take();

        if self.side == Side::Initiator {
            for path in [&self.forward_path, &self.backward_path] {
                if let Err(e) = fifo::remove_fifo(path) {
                    tracing::warn!(channel = %self.name, path = %path.display(), error = %e, "Failed to remove pipe");
                }
            }
        }

        tracing::debug!(channel = %self.name, "Channel closed");
    }
}

impl Drop for DuplexChannel {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use tempfile::TempDir;

    /// Open both ends of `name` on two threads and return (initiator, acceptor)
    fn open_pair(dir: &Path, name: &str) -> (DuplexChannel, DuplexChannel) {
        let init_dir = dir.to_path_buf();
        let init_name = name.to_string();
        let initiator = thread::spawn(move || {
            DuplexChannel::open(&init_dir, &init_name, Side::Initiator).unwrap()
        });

        let acceptor = DuplexChannel::open(dir, name, Side::Acceptor).unwrap();
        (initiator.join().unwrap(), acceptor)
    }

    #[test]
    fn test_round_trip_both_directions() {
        let dir = TempDir::new().unwrap();
        let (mut server, mut client) = open_pair(dir.path(), "rt_");

        client.send(b"request").unwrap();
        assert_eq!(server.receive(64).unwrap(), b"request");

        server.send(b"reply!").unwrap();
        assert_eq!(client.receive(64).unwrap(), b"reply!");
    }

    #[test]
    fn test_receive_exact_spans_multiple_reads() {
        let dir = TempDir::new().unwrap();
        let (mut server, mut client) = open_pair(dir.path(), "big_");

        // Larger than PIPE_BUF, so the reader will see it in pieces
        let payload: Vec<u8> = (0..20_000u32).map(|i| (i % 251) as u8).collect();
        let expected = payload.clone();
        let writer = thread::spawn(move || {
            server.send(&payload).unwrap();
            server
        });

        let got = client.receive_exact(expected.len()).unwrap();
        assert_eq!(got, expected);
        drop(writer.join().unwrap());
    }

    #[test]
    fn test_close_twice_is_noop() {
        let dir = TempDir::new().unwrap();
        let (mut server, mut client) = open_pair(dir.path(), "twice_");

        server.close();
        server.close();
        client.close();
        client.close();

        assert!(matches!(server.send(b"x"), Err(ChannelError::Closed)));
        assert!(matches!(client.receive(8), Err(ChannelError::Closed)));
    }

    #[test]
    fn test_initiator_removes_pipes() {
        let dir = TempDir::new().unwrap();
        let (forward, backward) = fifo::pipe_paths(dir.path(), "owned_");

        let (server, client) = open_pair(dir.path(), "owned_");
        assert!(forward.exists() && backward.exists());

        drop(client);
        assert!(forward.exists(), "acceptor must not unlink the pipes");

        drop(server);
        assert!(!forward.exists());
        assert!(!backward.exists());
    }

    #[test]
    fn test_receive_after_peer_close_reports_peer_closed() {
        let dir = TempDir::new().unwrap();
        let (mut server, mut client) = open_pair(dir.path(), "eof_");

        client.close();
        assert!(matches!(server.receive(16), Err(ChannelError::PeerClosed)));
        assert!(matches!(server.receive_exact(8), Err(ChannelError::PeerClosed)));
    }

    #[test]
    fn test_send_after_peer_close_is_io_error() {
        let dir = TempDir::new().unwrap();
        let (mut server, mut client) = open_pair(dir.path(), "epipe_");

        server.close();
        match client.send(b"anyone there?") {
            Err(ChannelError::Io(e)) => assert_eq!(e.kind(), io::ErrorKind::BrokenPipe),
            other => panic!("expected broken pipe, got {:?}", other),
        }
    }

    #[test]
    fn test_empty_send_is_not_a_write() {
        let dir = TempDir::new().unwrap();
        let (mut server, mut client) = open_pair(dir.path(), "empty_");

        server.send(&[]).unwrap();
        server.send(b"z").unwrap();
        assert_eq!(client.receive(8).unwrap(), b"z");
    }
}
