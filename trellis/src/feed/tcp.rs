//! The TCP protocol speaking feed.
//!
//! Each connection carries newline-delimited payloads, one sample per line.
//! Lines that fail to decode, or run past [`MAX_LINE_BYTES`], are dropped.
//!
//! ## Metrics
//!
//! `connection_accepted`: Incoming connections received
//! `bytes_received`: Total bytes received
//! `line_received`: Total non-empty lines received
//! `line_rejected`: Lines dropped as malformed or oversized
//!

use std::{io, net::SocketAddr};

use futures::stream::StreamExt;
use metrics::counter;
use serde::Deserialize;
use tokio::{io::AsyncRead, net::TcpListener, task::JoinSet};
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};
use tracing::{debug, info, warn};

use super::General;
use crate::{pipeline::Pipeline, signals::Watcher};

/// Longest line accepted from a connection, in bytes.
pub const MAX_LINE_BYTES: usize = 64 * 1024;

#[derive(thiserror::Error, Debug)]
/// Errors emitted by [`Tcp`]
pub enum Error {
    /// Error binding TCP listener
    #[error("Failed to bind TCP listener to {addr}: {source}")]
    Bind {
        /// Binding address
        addr: SocketAddr,
        /// Underlying IO error
        #[source]
        source: Box<io::Error>,
    },
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
/// Configuration for [`Tcp`]
pub struct Config {
    /// address -- IP plus port -- to bind to
    pub binding_addr: SocketAddr,
}

#[derive(Debug)]
/// The TCP feed.
pub struct Tcp {
    binding_addr: SocketAddr,
    pipeline: Pipeline,
    shutdown: Watcher,
    metric_labels: Vec<(String, String)>,
}

impl Tcp {
    /// Create a new [`Tcp`] server instance
    #[must_use]
    pub fn new(general: General, config: &Config, pipeline: Pipeline, shutdown: Watcher) -> Self {
        Self {
            binding_addr: config.binding_addr,
            pipeline,
            shutdown,
            metric_labels: general.metric_labels("tcp"),
        }
    }

    /// Read lines from `reader` until it closes or shutdown is signaled,
    /// returning the number of samples recorded.
    async fn handle_connection<R>(
        reader: R,
        pipeline: Pipeline,
        labels: Vec<(String, String)>,
        shutdown: Watcher,
    ) -> u64
    where
        R: AsyncRead + Unpin,
    {
        let mut lines = FramedRead::new(reader, LinesCodec::new_with_max_length(MAX_LINE_BYTES));
        let bytes_received = counter!("bytes_received", &labels);
        let line_received = counter!("line_received", &labels);
        let line_rejected = counter!("line_rejected", &labels);

        let mut recorded = 0;
        // `FramedRead` yields `None` once after a decode error and resumes
        // reading on the next poll. Only a `None` without a preceding error is
        // the end of the connection.
        let mut errored = false;
        let shutdown_wait = shutdown.recv();
        tokio::pin!(shutdown_wait);
        loop {
            tokio::select! {
                frame = lines.next() => match frame {
                    Some(Ok(line)) => {
                        errored = false;
                        // The codec strips the delimiter.
                        bytes_received.increment(line.len() as u64 + 1);
                        if line.trim().is_empty() {
                            continue;
                        }
                        line_received.increment(1);
                        match pipeline.ingest(line.as_bytes()) {
                            Ok(_) => recorded += 1,
                            Err(err) => {
                                line_rejected.increment(1);
                                debug!("dropping line: {err}");
                            }
                        }
                    }
                    Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                        errored = true;
                        line_rejected.increment(1);
                        debug!("dropping line longer than {MAX_LINE_BYTES} bytes");
                    }
                    Some(Err(LinesCodecError::Io(err))) => {
                        warn!("connection read failed: {err}");
                        break;
                    }
                    None if errored => errored = false,
                    None => break,
                },
                () = &mut shutdown_wait => break,
            }
        }
        recorded
    }

    /// Run [`Tcp`] to completion
    ///
    /// This function runs the TCP server forever, unless a shutdown signal is
    /// received or an unrecoverable error is encountered.
    ///
    /// # Errors
    ///
    /// Function will return an error if binding to the assigned address fails.
    ///
    /// # Panics
    ///
    /// None known.
    pub async fn run(self) -> Result<(), Error> {
        let listener = TcpListener::bind(self.binding_addr)
            .await
            .map_err(|source| Error::Bind {
                addr: self.binding_addr,
                source: Box::new(source),
            })?;
        info!("tcp feed listening on {}", self.binding_addr);

        let connection_accepted = counter!("connection_accepted", &self.metric_labels);
        let mut connections = JoinSet::new();

        let shutdown_wait = self.shutdown.clone().recv();
        tokio::pin!(shutdown_wait);
        loop {
            tokio::select! {
                conn = listener.accept() => {
                    let (socket, addr) = match conn {
                        Ok(sa) => sa,
                        Err(err) => {
                            warn!("Error accepting connection: {err}");
                            continue;
                        }
                    };
                    debug!("Accepted connection from {addr}");
                    connection_accepted.increment(1);
                    connections.spawn(Self::handle_connection(
                        socket,
                        self.pipeline.clone(),
                        self.metric_labels.clone(),
                        self.shutdown.clone(),
                    ));
                }
                Some(res) = connections.join_next() => {
                    match res {
                        Ok(recorded) => debug!("connection closed after {recorded} samples"),
                        Err(err) => warn!("connection task failed: {err}"),
                    }
                }
                () = &mut shutdown_wait => {
                    info!("shutdown signal received");
                    break;
                }
            }
        }

        // Connections watch the same signal and wind down on their own.
        while connections.join_next().await.is_some() {}
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use std::{sync::Arc, time::Duration};

    use tokio::{io::AsyncWriteExt, net::TcpStream};
    use trellis_accumulator::RollingAccumulator;

    use super::{Config, MAX_LINE_BYTES, Tcp};
    use crate::{feed::General, pipeline::Pipeline, report, signals};

    fn pipeline(window_size: i64) -> Pipeline {
        Pipeline::new(
            Arc::new(RollingAccumulator::with_window_size(window_size)),
            &report::Config::default(),
        )
    }

    #[tokio::test]
    async fn records_well_formed_lines() {
        let (watcher, _broadcaster) = signals::signal();
        let pipeline = pipeline(2);
        let input: &[u8] = b"{\"amount\": 1.0, \"seq\": 1}\n\
            garbage\n\
            \n\
            {\"amount\": 2.0, \"seq\": 2}\r\n\
            {\"amount\": 6.0, \"seq\": 3}";

        let recorded = Tcp::handle_connection(input, pipeline.clone(), Vec::new(), watcher).await;
        assert_eq!(recorded, 3);

        let snapshot = pipeline.accumulator().snapshot();
        assert_eq!(snapshot.count, 3);
        assert_eq!(snapshot.sum, 9.0);
        assert_eq!(snapshot.rolling_average, 4.0);
    }

    #[tokio::test]
    async fn oversized_line_is_skipped() {
        let (watcher, _broadcaster) = signals::signal();
        let pipeline = pipeline(4);
        let mut input = vec![b'x'; MAX_LINE_BYTES + 10];
        input.extend_from_slice(b"\n{\"amount\": 5.0, \"seq\": 1}\n");

        let recorded =
            Tcp::handle_connection(input.as_slice(), pipeline.clone(), Vec::new(), watcher).await;
        assert_eq!(recorded, 1);
        assert_eq!(pipeline.accumulator().snapshot().sum, 5.0);
    }

    #[tokio::test]
    async fn serves_until_shutdown() {
        let (watcher, broadcaster) = signals::signal();
        let pipeline = pipeline(8);

        // Reserve a free port, then release it for the feed to bind.
        let addr = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap()
        };
        let tcp = Tcp::new(
            General { id: None },
            &Config { binding_addr: addr },
            pipeline.clone(),
            watcher,
        );
        let server = tokio::spawn(tcp.run());

        let mut stream = None;
        for _ in 0..50 {
            if let Ok(s) = TcpStream::connect(addr).await {
                stream = Some(s);
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        let mut stream = stream.expect("feed never started listening");
        for seq in 0..4 {
            let line = format!("{{\"amount\": {seq}.0, \"seq\": {seq}}}\n");
            stream.write_all(line.as_bytes()).await.unwrap();
        }
        stream.shutdown().await.unwrap();

        for _ in 0..100 {
            if pipeline.accumulator().snapshot().count == 4 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(pipeline.accumulator().snapshot().sum, 6.0);

        broadcaster.signal();
        tokio::time::timeout(Duration::from_secs(5), server)
            .await
            .expect("feed did not stop")
            .unwrap()
            .unwrap();
    }
}
