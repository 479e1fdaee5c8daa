//! Lock-free running sum and rolling average
//!
//! This library holds the statistics core of trellis. A single
//! [`RollingAccumulator`] is shared between any number of writers calling
//! [`RollingAccumulator::record`] and readers calling
//! [`RollingAccumulator::snapshot`]. Neither operation takes a lock, blocks or
//! fails.
//!
//! # Consistency
//!
//! The accumulator tracks three things: an exact running sum, a count of
//! records and a ring of the last `window_size` samples. Each is updated
//! atomically on its own, but a record is not a transaction across all three.
//! A [`Snapshot`] taken while writers are active may therefore observe a count
//! that already includes a sample whose contribution to the sum or the ring is
//! not yet visible, or the reverse. The skew is bounded by the number of
//! records completing while the snapshot runs. Callers must not assume
//! `rolling_average * count == sum`.

#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![deny(clippy::print_stdout)]
#![deny(clippy::print_stderr)]
#![deny(clippy::dbg_macro)]
#![deny(clippy::unwrap_used)]
#![deny(unused_extern_crates)]
#![deny(unused_allocation)]
#![deny(unused_assignments)]
#![deny(unused_comparisons)]
#![deny(unreachable_pub)]
#![deny(missing_docs)]
#![deny(missing_copy_implementations)]
#![deny(missing_debug_implementations)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::multiple_crate_versions)]

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

mod ring;
mod sum;

use ring::Ring;
use sum::RunningSum;

mod sync {
    #[cfg(not(loom))]
    pub(crate) use std::sync::atomic::{AtomicU64, Ordering};

    #[cfg(loom)]
    pub(crate) use loom::sync::atomic::{AtomicU64, Ordering};
}

use sync::{AtomicU64, Ordering};

/// Window size used when the configured value is zero or negative.
pub const DEFAULT_WINDOW_SIZE: usize = 50;
/// Upper bound on the ring capacity, and so on the window size.
pub const MAX_CAPACITY: usize = 2048;

#[allow(clippy::cast_possible_wrap)]
fn default_window_size() -> i64 {
    DEFAULT_WINDOW_SIZE as i64
}

fn default_capacity() -> usize {
    MAX_CAPACITY
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
/// Construction parameters for [`RollingAccumulator`].
///
/// Neither field is validated at parse time. Out of range values are clamped
/// when the accumulator is built, see [`Config::effective_window_size`].
pub struct Config {
    /// Number of most recent samples the rolling average covers.
    #[serde(default = "default_window_size")]
    pub window_size: i64,
    /// Fixed upper bound on the ring, at most [`MAX_CAPACITY`].
    #[serde(default = "default_capacity")]
    pub capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            window_size: default_window_size(),
            capacity: default_capacity(),
        }
    }
}

impl Config {
    /// The ring capacity after clamping.
    ///
    /// Zero, or anything above [`MAX_CAPACITY`], becomes [`MAX_CAPACITY`].
    #[must_use]
    pub fn effective_capacity(&self) -> usize {
        if self.capacity == 0 {
            MAX_CAPACITY
        } else {
            self.capacity.min(MAX_CAPACITY)
        }
    }

    /// The window size after clamping.
    ///
    /// Non-positive values fall back to [`DEFAULT_WINDOW_SIZE`]. The result is
    /// never larger than [`Config::effective_capacity`].
    #[must_use]
    pub fn effective_window_size(&self) -> usize {
        let capacity = self.effective_capacity();
        if self.window_size <= 0 {
            return DEFAULT_WINDOW_SIZE.min(capacity);
        }
        usize::try_from(self.window_size).map_or(capacity, |window| window.min(capacity))
    }
}

#[derive(Debug, Serialize, Clone, Copy, PartialEq)]
/// A single read of [`RollingAccumulator`] state.
///
/// The three fields are loaded independently. See the crate documentation for
/// the consistency they provide. While the window is still filling,
/// `rolling_average` may count a slot whose sample is not yet stored as `0.0`,
/// so a concurrent record can be missing from it rather than merely late.
pub struct Snapshot {
    /// Sum of every sample recorded since construction.
    pub sum: f64,
    /// Number of samples recorded since construction.
    pub count: u64,
    /// Mean of the samples resident in the window, `0.0` if there are none.
    pub rolling_average: f64,
}

/// Concurrent running sum, count and rolling average.
///
/// Share between threads behind an `Arc`. All methods take `&self`.
pub struct RollingAccumulator {
    sum: RunningSum,
    count: AtomicU64,
    ring: Ring,
    capacity: usize,
}

impl RollingAccumulator {
    /// Create a new [`RollingAccumulator`], clamping `config` as documented on
    /// [`Config`].
    #[must_use]
    pub fn new(config: Config) -> Self {
        let capacity = config.effective_capacity();
        let window_size = config.effective_window_size();
        if i64::try_from(window_size) != Ok(config.window_size) || capacity != config.capacity {
            debug!(
                requested_window_size = config.window_size,
                requested_capacity = config.capacity,
                window_size,
                capacity,
                "rolling accumulator configuration clamped"
            );
        }

        Self {
            sum: RunningSum::new(),
            count: AtomicU64::new(0),
            ring: Ring::new(window_size),
            capacity,
        }
    }

    /// Create a new [`RollingAccumulator`] with the default capacity and the
    /// given window size.
    #[must_use]
    pub fn with_window_size(window_size: i64) -> Self {
        Self::new(Config {
            window_size,
            ..Config::default()
        })
    }

    /// The number of samples the rolling average covers.
    #[must_use]
    pub fn window_size(&self) -> usize {
        self.ring.len()
    }

    /// The fixed ring capacity this accumulator was built with.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Record a single sample.
    ///
    /// Any value is accepted. A NaN or infinite sample is summed as given and
    /// will poison the running sum.
    pub fn record(&self, value: f64) {
        self.sum.add(value);
        self.count.fetch_add(1, Ordering::AcqRel);
        self.ring.push(value);
    }

    /// Read the current sum, count and rolling average.
    ///
    /// Wait-free and free of side effects. Two snapshots with no intervening
    /// record return identical values.
    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        let sum = self.sum.load();
        let count = self.count.load(Ordering::Acquire);
        let rolling_average = self.ring.mean();
        Snapshot {
            sum,
            count,
            rolling_average,
        }
    }
}

impl Default for RollingAccumulator {
    fn default() -> Self {
        Self::new(Config::default())
    }
}

impl fmt::Debug for RollingAccumulator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RollingAccumulator")
            .field("window_size", &self.window_size())
            .field("capacity", &self.capacity)
            .field("snapshot", &self.snapshot())
            .finish_non_exhaustive()
    }
}


#[cfg(all(test, loom))]
mod loom_test {
    use loom::{sync::Arc, thread};

    use crate::RollingAccumulator;

    #[test]
    fn concurrent_records_are_all_counted() {
        loom::model(|| {
            let acc = Arc::new(RollingAccumulator::with_window_size(2));

            let handles: Vec<_> = [1.0, 2.0]
                .into_iter()
                .map(|v| {
                    let acc = Arc::clone(&acc);
                    thread::spawn(move || acc.record(v))
                })
                .collect();
            for handle in handles {
                handle.join().unwrap();
            }

            let snap = acc.snapshot();
            assert_eq!(snap.count, 2);
            assert_eq!(snap.sum, 3.0);
            assert_eq!(snap.rolling_average, 1.5);
        });
    }

    #[test]
    fn snapshot_during_record_is_bounded() {
        loom::model(|| {
            let acc = Arc::new(RollingAccumulator::with_window_size(2));
            acc.record(4.0);

            let writer = {
                let acc = Arc::clone(&acc);
                thread::spawn(move || acc.record(8.0))
            };

            let snap = acc.snapshot();
            assert!(snap.count == 1 || snap.count == 2);
            assert!(snap.sum == 4.0 || snap.sum == 12.0);
            assert!(snap.rolling_average == 4.0 || snap.rolling_average == 6.0);

            writer.join().unwrap();
            assert_eq!(acc.snapshot().rolling_average, 6.0);
        });
    }

    #[test]
    fn overwrite_races_leave_whole_samples() {
        loom::model(|| {
            let acc = Arc::new(RollingAccumulator::with_window_size(1));

            let handles: Vec<_> = [3.0, 5.0]
                .into_iter()
                .map(|v| {
                    let acc = Arc::clone(&acc);
                    thread::spawn(move || acc.record(v))
                })
                .collect();
            for handle in handles {
                handle.join().unwrap();
            }

            let avg = acc.snapshot().rolling_average;
            assert!(avg == 3.0 || avg == 5.0);
        });
    }
}
