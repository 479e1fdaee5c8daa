//! The UDP protocol speaking feed.
//!
//! Each datagram carries one payload or several separated by newlines.
//!
//! ## Metrics
//!
//! `bytes_received`: Total bytes received
//! `datagram_received`: Total datagrams received
//! `line_received`: Payloads received, recorded or not
//! `line_rejected`: Payloads dropped as malformed
//!

use std::{io, net::SocketAddr};

use metrics::counter;
use serde::Deserialize;
use tokio::net::UdpSocket;
use tracing::{debug, info};

use super::General;
use crate::{pipeline::Pipeline, signals::Watcher};

#[derive(thiserror::Error, Debug)]
/// Errors produced by [`Udp`].
pub enum Error {
    /// Error binding UDP socket
    #[error("Failed to bind UDP socket to {addr}: {source}")]
    Bind {
        /// Binding address
        addr: SocketAddr,
        /// Underlying IO error
        #[source]
        source: Box<io::Error>,
    },
    /// Error receiving packet
    #[error("Failed to receive packet on {addr}: {source}")]
    Recv {
        /// Listening address
        addr: SocketAddr,
        /// Underlying IO error
        #[source]
        source: Box<io::Error>,
    },
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
/// Configuration for [`Udp`].
pub struct Config {
    /// address -- IP plus port -- to bind to
    pub binding_addr: SocketAddr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
/// Outcome of handling a single datagram.
struct Handled {
    recorded: u64,
    rejected: u64,
}

impl Handled {
    fn received(self) -> u64 {
        self.recorded + self.rejected
    }
}

#[derive(Debug)]
/// The UDP feed.
pub struct Udp {
    binding_addr: SocketAddr,
    pipeline: Pipeline,
    shutdown: Watcher,
    metric_labels: Vec<(String, String)>,
}

impl Udp {
    /// Create a new [`Udp`] server instance
    #[must_use]
    pub fn new(general: General, config: &Config, pipeline: Pipeline, shutdown: Watcher) -> Self {
        Self {
            binding_addr: config.binding_addr,
            pipeline,
            shutdown,
            metric_labels: general.metric_labels("udp"),
        }
    }

    fn handle_datagram(pipeline: &Pipeline, datagram: &[u8]) -> Handled {
        let mut handled = Handled::default();
        for payload in datagram.split(|b| *b == b'\n') {
            if payload.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            match pipeline.ingest(payload) {
                Ok(_) => handled.recorded += 1,
                Err(err) => {
                    handled.rejected += 1;
                    debug!("dropping payload: {err}");
                }
            }
        }
        handled
    }

    /// Run [`Udp`] to completion
    ///
    /// This function runs the UDP server forever, unless a shutdown signal is
    /// received or an unrecoverable error is encountered.
    ///
    /// # Errors
    ///
    /// Function will return an error if binding or receiving a packet fails.
    ///
    /// # Panics
    ///
    /// None known.
    pub async fn run(self) -> Result<(), Error> {
        let socket = UdpSocket::bind(&self.binding_addr)
            .await
            .map_err(|source| Error::Bind {
                addr: self.binding_addr,
                source: Box::new(source),
            })?;
        info!("udp feed listening on {}", self.binding_addr);
        let mut buf = vec![0; 65536];

        let bytes_received = counter!("bytes_received", &self.metric_labels);
        let datagram_received = counter!("datagram_received", &self.metric_labels);
        let line_received = counter!("line_received", &self.metric_labels);
        let line_rejected = counter!("line_rejected", &self.metric_labels);

        let shutdown_wait = self.shutdown.recv();
        tokio::pin!(shutdown_wait);
        loop {
            tokio::select! {
                packet = socket.recv_from(&mut buf) => {
                    let (bytes, _) = packet.map_err(|source| Error::Recv {
                        addr: self.binding_addr,
                        source: Box::new(source),
                    })?;
                    datagram_received.increment(1);
                    bytes_received.increment(bytes as u64);
                    let handled = Self::handle_datagram(&self.pipeline, &buf[..bytes]);
                    line_received.increment(handled.received());
                    line_rejected.increment(handled.rejected);
                }
                () = &mut shutdown_wait => {
                    info!("shutdown signal received");
                    return Ok(())
                }
            }
        }
    }
}
