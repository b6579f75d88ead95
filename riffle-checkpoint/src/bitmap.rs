//! `RoaringBitmap` utilities for tracking-index bookkeeping.
//!
//! Provides an extension trait for working with tracking indices relative
//! to a base watermark using `RoaringBitmap`.

#![allow(clippy::items_after_statements)]

use riffle_core::TrackingIndex;
use roaring::RoaringBitmap;

/// Extension trait for `RoaringBitmap` tracking-index operations.
///
/// Bit `i` represents index `base + 1 + i`: the base itself is already
/// resolved, so the first interesting index sits at bit 0.
pub trait IndexBitmap {
    /// Sets the bit for the given index relative to base.
    ///
    /// # Panics
    ///
    /// Panics if `index <= base`.
    fn set_index(&mut self, base: TrackingIndex, index: TrackingIndex);

    /// Checks if the bit is set for the given index relative to base.
    ///
    /// Returns `false` if `index <= base`.
    fn has_index(&self, base: TrackingIndex, index: TrackingIndex) -> bool;

    /// Returns the number of contiguous bits set starting from bit 0.
    ///
    /// This is how far the watermark can advance.
    fn contiguous_count(&self) -> u64;

    /// Shifts all bits down by the given amount.
    ///
    /// Bits at positions `< shift_by` are discarded.
    /// Returns a new bitmap with shifted positions.
    fn shift_down(&self, shift_by: u64) -> RoaringBitmap;
}

impl IndexBitmap for RoaringBitmap {
    fn set_index(&mut self, base: TrackingIndex, index: TrackingIndex) {
        assert!(
            index.get() > base.get(),
            "index ({}) must be > base ({})",
            index.get(),
            base.get()
        );
        let position = index.get() - base.get() - 1;
        #[allow(clippy::cast_possible_truncation)]
        self.insert(position as u32);
    }

    fn has_index(&self, base: TrackingIndex, index: TrackingIndex) -> bool {
        if index.get() <= base.get() {
            return false;
        }
        let position = index.get() - base.get() - 1;
        #[allow(clippy::cast_possible_truncation)]
        self.contains(position as u32)
    }

    fn contiguous_count(&self) -> u64 {
        let mut count = 0u64;
        // Bound the loop.
        const MAX_CHECK: u64 = 10_000_000;
        while count < MAX_CHECK {
            #[allow(clippy::cast_possible_truncation)]
            if !self.contains(count as u32) {
                break;
            }
            count += 1;
        }
        count
    }

    fn shift_down(&self, shift_by: u64) -> Self {
        let mut new_bitmap = Self::new();
        for bit in self {
            let bit_u64 = u64::from(bit);
            if bit_u64 >= shift_by {
                let new_pos = bit_u64 - shift_by;
                #[allow(clippy::cast_possible_truncation)]
                new_bitmap.insert(new_pos as u32);
            }
        }
        new_bitmap
    }
}
