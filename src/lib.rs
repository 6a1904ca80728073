//! ecgpipe - ECG sample streaming over named-pipe request channels
//!
//! A client process fans requests out across many worker threads, each with a
//! private duplex channel (a pair of FIFOs) to a server process. The server
//! answers per-patient ECG sample lookups and file-chunk reads; the client
//! aggregates samples into per-patient histograms or reassembles the file.
//!
//! # Architecture
//!
//! - **Bounded queues**: byte-message queues with blocking backpressure
//!   decouple producers, workers and sinks ([`util::bounded_queue`])
//! - **Duplex channels**: two named pipes per channel, handshake by open
//!   order, pipes removed by their owner on drop ([`channel`])
//! - **Tagged wire protocol**: fixed little-endian layouts decoded once at
//!   the channel boundary ([`protocol`])
//! - **Server dispatcher**: control channel plus one joined service loop
//!   per data channel ([`server`])
//! - **Client orchestrator**: producers, workers and sinks under one scope
//!   with an ordered shutdown ([`client`])

pub mod channel;
pub mod client;
pub mod config;
pub mod output;
pub mod protocol;
pub mod server;
pub mod stats;
pub mod util;

// Re-export commonly used types
pub use channel::{DuplexChannel, Side};
pub use config::{ClientConfig, ServerConfig};
pub use util::bounded_queue::BoundedQueue;

/// Result type used throughout ecgpipe
pub type Result<T> = anyhow::Result<T>;
