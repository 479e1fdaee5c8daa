//! trellis sample feeds
//!
//! A feed is a producer of samples. Listening feeds accept payloads from
//! outside the process, the synthetic feed makes its own. Every feed records
//! through a shared [`Pipeline`] and runs until the shutdown signal is
//! received. Each TCP connection and each synthetic producer is its own task,
//! so the accumulator sees concurrent writers.

use serde::Deserialize;

use crate::{pipeline::Pipeline, signals::Watcher};

pub mod synthetic;
pub mod tcp;
pub mod udp;

#[derive(thiserror::Error, Debug)]
/// Errors produced by [`Server`].
pub enum Error {
    /// See [`crate::feed::tcp::Error`] for details.
    #[error(transparent)]
    Tcp(#[from] tcp::Error),
    /// See [`crate::feed::udp::Error`] for details.
    #[error(transparent)]
    Udp(#[from] udp::Error),
    /// See [`crate::feed::synthetic::Error`] for details.
    #[error(transparent)]
    Synthetic(#[from] synthetic::Error),
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "snake_case")]
#[serde(deny_unknown_fields)]
/// Configuration for [`Server`]
pub struct Config {
    /// Common feed configs
    #[serde(flatten)]
    pub general: General,
    /// The feed config
    #[serde(flatten)]
    pub inner: Inner,
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
#[serde(deny_unknown_fields)]
/// Configurations common to all [`Server`] variants
pub struct General {
    /// The ID assigned to this feed
    pub id: Option<String>,
}

impl General {
    /// Metric labels for a feed of the given kind.
    pub(crate) fn metric_labels(&self, component_name: &str) -> Vec<(String, String)> {
        let mut labels = vec![
            ("component".to_string(), "feed".to_string()),
            ("component_name".to_string(), component_name.to_string()),
        ];
        if let Some(id) = &self.id {
            labels.push(("id".to_string(), id.clone()));
        }
        labels
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq)]
#[serde(rename_all = "snake_case")]
#[serde(deny_unknown_fields)]
/// Configuration for [`Server`]
pub enum Inner {
    /// See [`crate::feed::tcp::Config`] for details.
    Tcp(tcp::Config),
    /// See [`crate::feed::udp::Config`] for details.
    Udp(udp::Config),
    /// See [`crate::feed::synthetic::Config`] for details.
    Synthetic(synthetic::Config),
}

#[derive(Debug)]
/// The feed server.
///
/// All feeds supported by trellis are a variant of this enum. Please see
/// variant documentation for details.
pub enum Server {
    /// See [`crate::feed::tcp::Tcp`] for details.
    Tcp(tcp::Tcp),
    /// See [`crate::feed::udp::Udp`] for details.
    Udp(udp::Udp),
    /// See [`crate::feed::synthetic::Synthetic`] for details.
    Synthetic(synthetic::Synthetic),
}

impl Server {
    /// Create a new [`Server`]
    ///
    /// # Errors
    ///
    /// Function will return an error if the underlying feed rejects its
    /// configuration.
    pub fn new(config: Config, pipeline: Pipeline, shutdown: Watcher) -> Result<Self, Error> {
        let server = match config.inner {
            Inner::Tcp(conf) => Self::Tcp(tcp::Tcp::new(config.general, &conf, pipeline, shutdown)),
            Inner::Udp(conf) => Self::Udp(udp::Udp::new(config.general, &conf, pipeline, shutdown)),
            Inner::Synthetic(conf) => Self::Synthetic(synthetic::Synthetic::new(
                config.general,
                &conf,
                pipeline,
                shutdown,
            )?),
        };
        Ok(server)
    }

    /// Runs this [`Server`] to completion
    ///
    /// # Errors
    ///
    /// Function will return an error if the underlying feed signals error.
    pub async fn run(self) -> Result<(), Error> {
        match self {
            Server::Tcp(inner) => inner.run().await.map_err(Error::Tcp),
            Server::Udp(inner) => inner.run().await.map_err(Error::Udp),
            Server::Synthetic(inner) => inner.run().await.map_err(Error::Synthetic),
        }
    }
}
