//! The synthetic feed.
//!
//! Stands in for external producers. A configured number of producer tasks
//! each draw samples uniformly from `[min, max)` at a fixed rate and record
//! them concurrently. Sequence numbers are shared across producers and
//! assigned in claim order, so they are unique but, as with any concurrent
//! producers, not recorded in order.
//!
//! ## Metrics
//!
//! `samples_generated`: Samples produced by this feed
//! `samples_per_second`: Configured rate of each producer
//!

use std::{
    num::{NonZeroU16, NonZeroU32},
    ops::Range,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use metrics::{counter, gauge};
use rand::{
    Rng, SeedableRng,
    rngs::{SmallRng, StdRng},
};
use serde::Deserialize;
use tokio::{
    task::JoinSet,
    time::{self, MissedTickBehavior},
};
use tracing::{error, info};

use super::General;
use crate::{payload::Sample, pipeline::Pipeline, signals::Watcher};

#[derive(thiserror::Error, Debug, Clone, Copy)]
/// Errors produced by [`Synthetic`].
pub enum Error {
    /// The sample range is empty or not finite.
    #[error("Sample range [{min}, {max}) is empty or not finite")]
    Range {
        /// Configured lower bound
        min: f64,
        /// Configured upper bound
        max: f64,
    },
}

fn default_producers() -> NonZeroU16 {
    NonZeroU16::MIN
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq)]
#[serde(deny_unknown_fields)]
/// Configuration of this feed.
pub struct Config {
    /// The seed for random operations against this feed
    pub seed: [u8; 32],
    /// Samples each producer generates per second
    pub samples_per_second: NonZeroU32,
    /// Number of concurrent producers
    #[serde(default = "default_producers")]
    pub producers: NonZeroU16,
    /// Inclusive lower bound of generated values
    pub min: f64,
    /// Exclusive upper bound of generated values
    pub max: f64,
    /// Stop once this many samples have been generated across all producers
    pub maximum_samples: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            seed: [0; 32],
            samples_per_second: NonZeroU32::new(100).unwrap_or(NonZeroU32::MIN),
            producers: default_producers(),
            min: 0.0,
            max: 100.0,
            maximum_samples: None,
        }
    }
}

#[derive(Debug)]
/// The synthetic feed.
pub struct Synthetic {
    config: Config,
    pipeline: Pipeline,
    shutdown: Watcher,
    metric_labels: Vec<(String, String)>,
}

impl Synthetic {
    /// Create a new [`Synthetic`] instance
    ///
    /// # Errors
    ///
    /// Function will return an error if `min` is not less than `max` or either
    /// bound is not finite.
    pub fn new(
        general: General,
        config: &Config,
        pipeline: Pipeline,
        shutdown: Watcher,
    ) -> Result<Self, Error> {
        if !(config.min.is_finite() && config.max.is_finite() && config.min < config.max) {
            return Err(Error::Range {
                min: config.min,
                max: config.max,
            });
        }

        Ok(Self {
            config: *config,
            pipeline,
            shutdown,
            metric_labels: general.metric_labels("synthetic"),
        })
    }

    /// Run [`Synthetic`] to completion
    ///
    /// Producers run until the shutdown signal is received or, if configured,
    /// `maximum_samples` have been generated.
    ///
    /// # Errors
    ///
    /// None known.
    ///
    /// # Panics
    ///
    /// None known.
    pub async fn run(self) -> Result<(), Error> {
        let mut root = StdRng::from_seed(self.config.seed);
        let next_seq = Arc::new(AtomicU64::new(0));
        // Rates above one per nanosecond saturate.
        let period = (Duration::from_secs(1) / self.config.samples_per_second.get())
            .max(Duration::from_nanos(1));
        gauge!("samples_per_second", &self.metric_labels)
            .set(f64::from(self.config.samples_per_second.get()));

        let mut producers = JoinSet::new();
        for _ in 0..self.config.producers.get() {
            producers.spawn(produce(Producer {
                rng: SmallRng::from_rng(&mut root),
                range: self.config.min..self.config.max,
                period,
                next_seq: Arc::clone(&next_seq),
                maximum_samples: self.config.maximum_samples,
                pipeline: self.pipeline.clone(),
                shutdown: self.shutdown.clone(),
                labels: self.metric_labels.clone(),
            }));
        }
        info!(
            "synthetic feed started {} producers",
            self.config.producers.get()
        );

        while let Some(res) = producers.join_next().await {
            if let Err(err) = res {
                error!("synthetic producer failed: {err}");
            }
        }
        Ok(())
    }
}

struct Producer {
    rng: SmallRng,
    range: Range<f64>,
    period: Duration,
    next_seq: Arc<AtomicU64>,
    maximum_samples: Option<u64>,
    pipeline: Pipeline,
    shutdown: Watcher,
    labels: Vec<(String, String)>,
}

async fn produce(mut producer: Producer) {
    let samples_generated = counter!("samples_generated", &producer.labels);
    let mut interval = time::interval(producer.period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let shutdown_wait = producer.shutdown.recv();
    tokio::pin!(shutdown_wait);
    loop {
        tokio::select! {
            _ = interval.tick() => {
                let seq = producer.next_seq.fetch_add(1, Ordering::Relaxed);
                if producer.maximum_samples.is_some_and(|max| seq >= max) {
                    return;
                }
                let value = producer.rng.random_range(producer.range.clone());
                producer.pipeline.record(Sample { seq, value });
                samples_generated.increment(1);
            }
            () = &mut shutdown_wait => return,
        }
    }
}

#[cfg(test)]
mod test {
    use std::{
        num::{NonZeroU16, NonZeroU32},
        sync::Arc,
        time::Duration,
    };

    use trellis_accumulator::RollingAccumulator;

    use super::{Config, Error, Synthetic};
    use crate::{feed::General, pipeline::Pipeline, report, signals};

    fn pipeline(window_size: i64) -> Pipeline {
        Pipeline::new(
            Arc::new(RollingAccumulator::with_window_size(window_size)),
            &report::Config::default(),
        )
    }

    #[test]
    fn rejects_empty_or_infinite_range() {
        for (min, max) in [
            (1.0, 1.0),
            (2.0, 1.0),
            (f64::NAN, 1.0),
            (0.0, f64::INFINITY),
        ] {
            let (watcher, _broadcaster) = signals::signal();
            let config = Config {
                min,
                max,
                ..Config::default()
            };
            assert!(matches!(
                Synthetic::new(General { id: None }, &config, pipeline(4), watcher),
                Err(Error::Range { .. })
            ));
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_producers_stop_at_maximum() {
        let (watcher, _broadcaster) = signals::signal();
        let pipeline = pipeline(16);
        let config = Config {
            seed: [7; 32],
            samples_per_second: NonZeroU32::new(100_000).unwrap(),
            producers: NonZeroU16::new(4).unwrap(),
            min: 10.0,
            max: 20.0,
            maximum_samples: Some(200),
        };
        let synthetic =
            Synthetic::new(General { id: None }, &config, pipeline.clone(), watcher).unwrap();

        tokio::time::timeout(Duration::from_secs(30), synthetic.run())
            .await
            .expect("producers did not stop")
            .unwrap();

        let snapshot = pipeline.accumulator().snapshot();
        assert_eq!(snapshot.count, 200);
        assert!(snapshot.sum >= 10.0 * 200.0 && snapshot.sum < 20.0 * 200.0);
        assert!((10.0..20.0).contains(&snapshot.rolling_average));
    }

    #[tokio::test]
    async fn producers_stop_on_shutdown() {
        let (watcher, broadcaster) = signals::signal();
        let synthetic = Synthetic::new(
            General { id: None },
            &Config::default(),
            pipeline(4),
            watcher,
        )
        .unwrap();
        let handle = tokio::spawn(synthetic.run());
        tokio::time::sleep(Duration::from_millis(20)).await;
        broadcaster.signal();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("producers did not stop")
            .unwrap()
            .unwrap();
    }
}
