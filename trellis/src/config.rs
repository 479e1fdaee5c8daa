//! This module controls configuration parsing from the end user, providing a
//! convenience mechanism for the rest of the program. Crashes are most likely
//! to originate from this code, intentionally.
use std::{
    fs, io,
    net::SocketAddr,
    path::{Path, PathBuf},
};

use rustc_hash::{FxHashMap, FxHashSet};
use serde::Deserialize;

use crate::{feed, report};

/// Errors produced by [`Config`]
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Error for a serde [`serde_yaml`].
    #[error("Failed to deserialize yaml: {0}")]
    SerdeYaml(#[from] serde_yaml::Error),
    /// Error for duplicate IDs in feeds
    #[error("Duplicate feed ID found: {0}")]
    DuplicateFeedId(String),
    /// Error reading config file
    #[error("Failed to read config file {path:?}: {source}")]
    ReadFile {
        /// File path
        path: PathBuf,
        /// Underlying IO error
        #[source]
        source: Box<io::Error>,
    },
}

/// Main configuration struct for this program
#[derive(Debug, Default, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Window and capacity of the rolling accumulator
    #[serde(default)]
    pub accumulator: trellis_accumulator::Config,
    /// The feeds producing samples
    #[serde(default)]
    #[serde(with = "serde_yaml::with::singleton_map_recursive")]
    pub feed: Vec<feed::Config>,
    /// When and how statistics are reported
    #[serde(default)]
    pub report: report::Config,
    /// The method by which to express telemetry
    #[serde(default)]
    #[serde(with = "serde_yaml::with::singleton_map_recursive")]
    pub telemetry: Option<Telemetry>,
}

#[derive(Debug, Deserialize, PartialEq, Eq, Clone)]
#[serde(rename_all = "snake_case")]
#[serde(deny_unknown_fields)]
/// Defines the manner of trellis' telemetry.
pub enum Telemetry {
    /// In prometheus mode trellis will emit its internal telemetry for
    /// scraping at a prometheus poll endpoint.
    Prometheus {
        /// Address and port for prometheus exporter
        addr: SocketAddr,
        /// Additional labels to include in every metric
        #[serde(default)]
        global_labels: FxHashMap<String, String>,
    },
}

impl Config {
    /// Parse a [`Config`] from YAML text.
    ///
    /// # Errors
    ///
    /// Returns an error if `contents` is not valid configuration YAML or two
    /// feeds share an ID.
    pub fn from_yaml(contents: &str) -> Result<Self, Error> {
        let config: Config = serde_yaml::from_str(contents)?;
        check_duplicate_feed_ids(&config.feed)?;
        Ok(config)
    }
}

fn check_duplicate_feed_ids(feeds: &[feed::Config]) -> Result<(), Error> {
    let mut seen_ids = FxHashSet::default();
    for feed in feeds {
        if let Some(ref id) = feed.general.id
            && !seen_ids.insert(id.clone())
        {
            return Err(Error::DuplicateFeedId(id.clone()));
        }
    }
    Ok(())
}

/// Load configuration from a file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or its contents do not parse,
/// see [`Config::from_yaml`].
pub fn load_config_from_path(path: &Path) -> Result<Config, Error> {
    let contents = fs::read_to_string(path).map_err(|source| Error::ReadFile {
        path: path.to_path_buf(),
        source: Box::new(source),
    })?;
    Config::from_yaml(&contents)
}
