//! Reporting of accumulator statistics
//!
//! Two cadences are supported and may be combined. With `every_window` set the
//! [`crate::pipeline::Pipeline`] logs a line each time the record count crosses
//! a multiple of the window size, naming the sample that crossed it. With
//! `period_milliseconds` set a [`Reporter`] task snapshots the accumulator on a
//! timer and publishes it as gauges as well as a log line.
//!
//! Each window boundary is reported exactly once, by the record that took the
//! pipeline's count across it. The snapshot in that line may already include
//! records that completed after the triggering one.
//!
//! ## Metrics
//!
//! `running_sum`: Sum of every recorded sample
//! `sample_count`: Number of recorded samples
//! `rolling_average`: Mean of the samples in the window
//!

use std::{fmt, num::NonZeroU64, sync::Arc, time::Duration};

use metrics::gauge;
use serde::Deserialize;
use tokio::time::{self, MissedTickBehavior};
use tracing::info;
use trellis_accumulator::{RollingAccumulator, Snapshot};

use crate::{payload::Sample, signals::Watcher};

fn default_every_window() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
/// Configuration for reporting.
pub struct Config {
    /// Log a line each time the count reaches a multiple of the window size.
    #[serde(default = "default_every_window")]
    pub every_window: bool,
    /// If set, also report on this period.
    #[serde(default)]
    pub period_milliseconds: Option<NonZeroU64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            every_window: default_every_window(),
            period_milliseconds: None,
        }
    }
}

/// Whether `count` sits exactly on a window boundary.
#[must_use]
pub fn window_crossed(count: u64, window_size: usize) -> bool {
    let Ok(window_size) = u64::try_from(window_size) else {
        return false;
    };
    window_size > 0 && count > 0 && count % window_size == 0
}

#[derive(Debug, Clone, Copy, PartialEq)]
/// One reported observation of the accumulator.
pub struct Line {
    /// The sample whose record prompted this line, if any.
    pub trigger: Option<Sample>,
    /// Window size of the rolling average.
    pub window_size: usize,
    /// The accumulator state reported.
    pub snapshot: Snapshot,
}

impl fmt::Display for Line {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(sample) = self.trigger {
            write!(f, "seq={} amount={:.2} ", sample.seq, sample.value)?;
        }
        write!(
            f,
            "running_sum={:.2} count={} rolling_avg[{}]={:.2}",
            self.snapshot.sum, self.snapshot.count, self.window_size, self.snapshot.rolling_average,
        )
    }
}

/// Snapshot `accumulator`, set the statistics gauges and return the line.
#[must_use]
pub fn publish(accumulator: &RollingAccumulator) -> Line {
    let snapshot = accumulator.snapshot();
    gauge!("running_sum").set(snapshot.sum);
    gauge!("sample_count").set(snapshot.count as f64);
    gauge!("rolling_average").set(snapshot.rolling_average);
    Line {
        trigger: None,
        window_size: accumulator.window_size(),
        snapshot,
    }
}

#[derive(Debug)]
/// Periodic reporter of accumulator statistics.
pub struct Reporter {
    accumulator: Arc<RollingAccumulator>,
    period: Duration,
    shutdown: Watcher,
}

impl Reporter {
    /// Create a new [`Reporter`], returning `None` if `config` sets no period.
    #[must_use]
    pub fn new(
        config: &Config,
        accumulator: Arc<RollingAccumulator>,
        shutdown: Watcher,
    ) -> Option<Self> {
        let period = Duration::from_millis(config.period_milliseconds?.get());
        Some(Self {
            accumulator,
            period,
            shutdown,
        })
    }

    /// Run [`Reporter`] until the shutdown signal is received.
    pub async fn run(self) {
        let mut interval = time::interval(self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately and there is nothing to report.
        interval.tick().await;

        let shutdown_wait = self.shutdown.recv();
        tokio::pin!(shutdown_wait);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let line = publish(&self.accumulator);
                    info!("{line}");
                }
                () = &mut shutdown_wait => {
                    info!("shutdown signal received");
                    return;
                }
            }
        }
    }
}
