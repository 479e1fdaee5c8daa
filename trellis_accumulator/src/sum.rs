//! Running totals
//!
//! Floating point addition has no native atomic instruction. [`RunningSum`]
//! stores the bit pattern of an `f64` in an `AtomicU64` and adds by
//! compare-and-swap: read the current bits, compute the new value, replace only
//! if the bits are unchanged since the read, else retry with the bits observed.

use crate::sync::{AtomicU64, Ordering};

/// An `f64` that may be added to concurrently without locking.
#[derive(Debug)]
pub(crate) struct RunningSum {
    bits: AtomicU64,
}

impl RunningSum {
    pub(crate) fn new() -> Self {
        Self {
            bits: AtomicU64::new(0.0_f64.to_bits()),
        }
    }

    /// Add `value` to the sum.
    ///
    /// Lock-free: a failed exchange means some other writer's addition
    /// succeeded, so the system as a whole always makes progress.
    pub(crate) fn add(&self, value: f64) {
        let mut current = self.bits.load(Ordering::Relaxed);
        loop {
            let next = (f64::from_bits(current) + value).to_bits();
            // Equality is on bits, not on float semantics. A NaN sum compares
            // equal to itself here and the loop terminates.
            match self.bits.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return,
                Err(observed) => current = observed,
            }
        }
    }

    pub(crate) fn load(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::Acquire))
    }
}
