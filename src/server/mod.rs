//! Server dispatcher
//!
//! The server is the initiator of every channel. It opens the well-known
//! control channel and serves it like any other channel; each NEW_CHANNEL
//! request spawns a dedicated service loop bound to a fresh data channel.
//!
//! # Lifecycle
//!
//! 1. The dataset is loaded completely (single-threaded) before the control
//!    channel is opened.
//! 2. The control loop runs until QUIT (or until the client goes away).
//! 3. Every spawned service loop is joined. Each one ends when its worker
//!    forwards QUIT or closes its end of the channel.

pub mod dataset;
pub mod service;

use crate::channel::{DuplexChannel, Side, CONTROL_CHANNEL};
use crate::config::ServerConfig;
use anyhow::{Context, Result};
use dataset::Dataset;
use serde::Serialize;
use service::{serve_channel, ChannelSummary, ServerContext, ServiceGroup};
use std::sync::Arc;

/// Totals reported when the server shuts down
#[derive(Debug, Clone, Serialize)]
pub struct ServerSummary {
    pub control: ChannelSummary,
    pub channels: Vec<ChannelSummary>,
}

impl ServerSummary {
    /// Requests served on data channels
    pub fn data_requests(&self) -> u64 {
        self.channels.iter().map(|c| c.requests).sum()
    }
}

pub struct Server {
    ctx: Arc<ServerContext>,
    services: Arc<ServiceGroup>,
}

impl Server {
    pub fn new(config: ServerConfig, dataset: Dataset) -> Self {
        Self {
            ctx: Arc::new(ServerContext::new(config, dataset)),
            services: Arc::new(ServiceGroup::new()),
        }
    }

    /// Serve the control channel until QUIT, then join every service loop
    pub fn run(&self) -> Result<ServerSummary> {
        let fifo_dir = &self.ctx.config().fifo_dir;
        tracing::info!(dir = %fifo_dir.display(), "Waiting for client on control channel");

        let control = DuplexChannel::open(fifo_dir, CONTROL_CHANNEL, Side::Initiator)
            .context("Failed to open control channel")?;
        tracing::info!("Client connected");

        let control = serve_channel(&self.ctx, &self.services, control);
        if !control.quit {
            tracing::warn!("Control channel closed without QUIT");
        }

        tracing::debug!(loops = self.services.pending(), "Joining service loops");
        let channels = self.services.join_all();
        for summary in &channels {
            tracing::debug!(
                channel = %summary.channel,
                requests = summary.requests,
                not_found = summary.not_found,
                violations = summary.violations,
                "Channel summary"
            );
        }

        let summary = ServerSummary { control, channels };
        tracing::info!(
            channels = summary.channels.len(),
            requests = summary.data_requests(),
            "Server shutting down"
        );
        Ok(summary)
    }
}
