//! The path from a received payload to the accumulator
//!
//! Every feed shares one [`Pipeline`]. It decodes payloads, records samples and,
//! when configured, logs a report line each time a window fills.
//!
//! ## Metrics
//!
//! `samples_recorded`: Samples recorded into the accumulator
//! `payload_rejected`: Payloads dropped because they failed to decode
//!

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use metrics::counter;
use tracing::info;
use trellis_accumulator::RollingAccumulator;

use crate::{
    payload::{self, Sample},
    report,
};

#[derive(Debug, Clone)]
/// Shared handle from feeds to the accumulator.
pub struct Pipeline {
    accumulator: Arc<RollingAccumulator>,
    // Records made through this pipeline. Each increment is unique, so exactly
    // one record observes each window boundary.
    recorded: Arc<AtomicU64>,
    every_window: bool,
}

impl Pipeline {
    /// Create a new [`Pipeline`] recording into `accumulator`.
    #[must_use]
    pub fn new(accumulator: Arc<RollingAccumulator>, report: &report::Config) -> Self {
        Self {
            accumulator,
            recorded: Arc::new(AtomicU64::new(0)),
            every_window: report.every_window,
        }
    }

    /// The accumulator this pipeline records into.
    #[must_use]
    pub fn accumulator(&self) -> &Arc<RollingAccumulator> {
        &self.accumulator
    }

    /// Decode `payload` and record the sample it carries.
    ///
    /// # Errors
    ///
    /// Function will return an error if `payload` does not decode. Nothing is
    /// recorded in that case.
    pub fn ingest(&self, payload: &[u8]) -> Result<Sample, payload::Error> {
        match payload::decode(payload) {
            Ok(sample) => {
                self.record(sample);
                Ok(sample)
            }
            Err(err) => {
                counter!("payload_rejected").increment(1);
                Err(err)
            }
        }
    }

    /// Record `sample`, returning the report line if this record filled a
    /// window and every-window reporting is on.
    pub fn record(&self, sample: Sample) -> Option<report::Line> {
        self.accumulator.record(sample.value);
        let recorded = self.recorded.fetch_add(1, Ordering::Relaxed) + 1;
        counter!("samples_recorded").increment(1);

        let window_size = self.accumulator.window_size();
        if !self.every_window || !report::window_crossed(recorded, window_size) {
            return None;
        }
        let line = report::Line {
            trigger: Some(sample),
            window_size,
            snapshot: self.accumulator.snapshot(),
        };
        info!("{line}");
        Some(line)
    }
}
