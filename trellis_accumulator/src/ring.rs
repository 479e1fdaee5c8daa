//! Fixed-capacity ring of the most recent samples
//!
//! Writers never share a cursor. Each [`Ring::push`] takes a unique ticket from
//! `reserved` and writes into slot `ticket % len`, so every sample lands in
//! exactly one slot and no two writers store into a slot for the same ticket.
//! Once the write is visible the writer bumps `committed`, the count readers
//! use to decide how many slots are occupied.
//!
//! Readers take no part in the writers' protocol. A mean computed while writes
//! are in flight may include a slot that is reserved but not yet rewritten, or
//! miss the newest sample. While the ring is still filling such a slot holds
//! `0.0`, so a sample can be absent from the mean rather than merely stale.
//! That approximation of "the last N" is accepted; the values themselves are
//! never torn because each slot is a single atomic word.

use crate::sync::{AtomicU64, Ordering};

#[derive(Debug)]
pub(crate) struct Ring {
    /// `f64` bit patterns. Unoccupied slots hold `0.0`.
    slots: Box<[AtomicU64]>,
    /// Tickets handed out to writers, one per push.
    reserved: AtomicU64,
    /// Pushes whose slot store has completed.
    committed: AtomicU64,
}

impl Ring {
    /// Create a new `Ring` with `len` slots.
    ///
    /// Caller must ensure `len` is non-zero.
    pub(crate) fn new(len: usize) -> Self {
        debug_assert!(len > 0, "ring must have at least one slot");
        let slots = (0..len)
            .map(|_| AtomicU64::new(0.0_f64.to_bits()))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            slots,
            reserved: AtomicU64::new(0),
            committed: AtomicU64::new(0),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }

    #[allow(clippy::cast_possible_truncation)]
    pub(crate) fn push(&self, value: f64) {
        let ticket = self.reserved.fetch_add(1, Ordering::Relaxed);
        // The modulus is bounded by `len`, a usize, so the cast is lossless.
        let index = (ticket % self.slots.len() as u64) as usize;
        self.slots[index].store(value.to_bits(), Ordering::Release);
        self.committed.fetch_add(1, Ordering::Release);
    }

    /// Number of slots holding a sample, `min(committed, len)`.
    #[allow(clippy::cast_possible_truncation)]
    pub(crate) fn occupied(&self) -> usize {
        let committed = self.committed.load(Ordering::Acquire);
        // Capped by `len` before the cast.
        committed.min(self.slots.len() as u64) as usize
    }

    /// Arithmetic mean of the occupied slots, `0.0` when empty.
    pub(crate) fn mean(&self) -> f64 {
        let occupied = self.occupied();
        if occupied == 0 {
            return 0.0;
        }
        let total: f64 = self.slots[..occupied]
            .iter()
            .map(|slot| f64::from_bits(slot.load(Ordering::Acquire)))
            .sum();
        total / occupied as f64
    }
}

#[cfg(all(test, not(loom)))]
mod test {
    use super::Ring;

    #[test]
    fn empty_mean_is_zero() {
        let ring = Ring::new(4);
        assert_eq!(ring.occupied(), 0);
        assert_eq!(ring.mean(), 0.0);
    }

    #[test]
    fn fills_then_overwrites_oldest() {
        let ring = Ring::new(3);
        ring.push(1.0);
        assert_eq!(ring.occupied(), 1);
        assert_eq!(ring.mean(), 1.0);
        ring.push(2.0);
        ring.push(3.0);
        assert_eq!(ring.occupied(), 3);
        assert_eq!(ring.mean(), 2.0);
        ring.push(4.0);
        ring.push(5.0);
        assert_eq!(ring.occupied(), 3);
        assert_eq!(ring.mean(), 4.0);
    }

    #[test]
    fn unwritten_slot_reads_as_zero_while_filling() {
        use crate::sync::Ordering;

        let ring = Ring::new(4);
        // A writer holding ticket 0 that has not stored yet.
        ring.reserved.fetch_add(1, Ordering::Relaxed);
        ring.push(6.0);
        assert_eq!(ring.occupied(), 1);
        assert_eq!(ring.mean(), 0.0);

        ring.push(2.0);
        assert_eq!(ring.mean(), 3.0);
    }

    #[test]
    fn single_slot_tracks_latest() {
        let ring = Ring::new(1);
        for v in [3.0, -7.0, 11.0] {
            ring.push(v);
            assert_eq!(ring.mean(), v);
        }
        assert_eq!(ring.len(), 1);
    }
}
