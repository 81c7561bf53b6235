//! Bucket storage: chain heads plus per-bucket occupancy counters.
//!
//! # Architecture
//! - **Heads**: array of kovan `Atomic` pointers (null-initialized), one per bucket.
//! - **Entries**: singly linked, newest first. An entry is published with one
//!   Release store of a head or `next` link, so readers see a fully old or a
//!   fully new chain.
//! - **Counters**: one `AtomicU32` per bucket, written only by the (single)
//!   writer and read by stats.
//!
//! The bucket count is a power of two picked at construction and never
//! changes. Placement uses the *high* bits of the re-mixed folded key, which
//! are the well-mixed ones under multiplicative hashing.

use alloc::alloc::{Layout, alloc};
use alloc::boxed::Box;
use alloc::vec::Vec;
use core::mem;
use core::sync::atomic::Ordering;
use kovan::{Atomic, RetiredNode, pin};
use portable_atomic::AtomicU32;

use crate::error::TableError;
use crate::key::{CompositeKey, mix64};

/// Upper bound for the index bit-width (2^24 buckets).
pub const MAX_BITS: u32 = 24;

/// A linked table entry.
///
/// # Safety Layout
///
/// `RetiredNode` **must** be the first field. Kovan casts `*mut T` to
/// `*mut RetiredNode` when the entry is retired.
#[repr(C)]
pub(crate) struct Entry<V> {
    retired: RetiredNode,
    pub(crate) key: CompositeKey,
    pub(crate) value: V,
    pub(crate) next: Atomic<Entry<V>>,
}

impl<V> Entry<V> {
    /// Allocates an unpublished entry whose `next` already points at `next`.
    ///
    /// Uses the global allocator directly so that exhaustion is reported
    /// instead of aborting. The layout matches `Box<Entry<V>>`, which is how
    /// both kovan and [`BucketStore`]'s drop release it.
    pub(crate) fn try_alloc(
        key: CompositeKey,
        value: V,
        next: *mut Entry<V>,
    ) -> Result<*mut Entry<V>, TableError> {
        let layout = Layout::new::<Entry<V>>();
        // SAFETY: Entry embeds RetiredNode, so the layout is never zero-sized.
        let ptr = unsafe { alloc(layout) } as *mut Entry<V>;
        if ptr.is_null() {
            tracing::warn!(size = layout.size(), "entry allocation failed");
            return Err(TableError::AllocationFailure);
        }

        // SAFETY: ptr is non-null, properly aligned and sized for Entry<V>.
        unsafe {
            ptr.write(Entry {
                retired: RetiredNode::new(),
                key,
                value,
                next: Atomic::new(next),
            });
        }
        Ok(ptr)
    }
}

/// Fixed array of bucket chains with occupancy counters.
pub(crate) struct BucketStore<V> {
    heads: Box<[Atomic<Entry<V>>]>,
    counters: Box<[AtomicU32]>,
    bits: u32,
}

/// Index bit-width for a requested capacity: `ceil(log2(max(1, capacity)))`,
/// capped at [`MAX_BITS`].
pub fn bits_for(capacity: u32) -> u32 {
    let mut bits = 0;
    while (1u64 << bits) < capacity as u64 && bits < MAX_BITS {
        bits += 1;
    }
    bits
}

fn try_filled<T>(len: usize, mut init: impl FnMut() -> T) -> Result<Box<[T]>, TableError> {
    let mut slots = Vec::new();
    slots
        .try_reserve_exact(len)
        .map_err(|_| TableError::AllocationFailure)?;
    for _ in 0..len {
        slots.push(init());
    }
    Ok(slots.into_boxed_slice())
}

impl<V> BucketStore<V> {
    /// Allocates `2^bits_for(capacity)` empty buckets.
    ///
    /// If the counter array cannot be allocated the already allocated heads
    /// are dropped before the error is returned.
    pub(crate) fn new(capacity: u32) -> Result<Self, TableError> {
        let bits = bits_for(capacity);
        let len = 1usize << bits;

        let heads = try_filled(len, Atomic::null).inspect_err(|_| {
            tracing::warn!(buckets = len, "bucket array allocation failed");
        })?;
        let counters = try_filled(len, || AtomicU32::new(0)).inspect_err(|_| {
            tracing::warn!(buckets = len, "bucket counter allocation failed");
        })?;

        Ok(Self {
            heads,
            counters,
            bits,
        })
    }

    /// Index bit-width.
    #[inline]
    pub(crate) fn bits(&self) -> u32 {
        self.bits
    }

    /// Number of buckets, always a power of two.
    #[inline]
    pub(crate) fn bucket_count(&self) -> usize {
        self.heads.len()
    }

    /// Bucket index for a key. Same scheme for add, remove and lookup.
    #[inline(always)]
    pub(crate) fn index_of(&self, key: &CompositeKey) -> usize {
        if self.bits == 0 {
            return 0;
        }
        (mix64(key.folded()) >> (64 - self.bits)) as usize
    }

    #[inline(always)]
    pub(crate) fn head(&self, idx: usize) -> &Atomic<Entry<V>> {
        &self.heads[idx]
    }

    #[cfg(test)]
    pub(crate) fn occupancy(&self, idx: usize) -> u32 {
        self.counters[idx].load(Ordering::Relaxed)
    }

    /// Snapshot of every counter, in bucket order.
    pub(crate) fn occupancies(&self) -> impl ExactSizeIterator<Item = u32> + '_ {
        self.counters.iter().map(|c| c.load(Ordering::Relaxed))
    }

    #[inline]
    pub(crate) fn increment(&self, idx: usize) {
        self.counters[idx].fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn decrement(&self, idx: usize) {
        self.counters[idx].fetch_sub(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn reset(&self, idx: usize) {
        self.counters[idx].store(0, Ordering::Relaxed);
    }

    /// Bytes held by heads and counters.
    pub(crate) fn footprint(&self) -> u64 {
        let per_bucket = mem::size_of::<Atomic<Entry<V>>>() + mem::size_of::<AtomicU32>();
        (per_bucket * self.bucket_count()) as u64
    }
}

// SAFETY: entries are shared with readers on other threads (V: Sync) and may
// be dropped by whichever thread runs reclamation (V: Send).
unsafe impl<V: Send + Sync> Send for BucketStore<V> {}
unsafe impl<V: Send + Sync> Sync for BucketStore<V> {}

impl<V> Drop for BucketStore<V> {
    fn drop(&mut self) {
        // Only still-linked entries are owned here; unlinked ones belong to kovan.
        let guard = pin();

        for head in self.heads.iter() {
            let mut current = head.load(Ordering::Acquire, &guard);

            unsafe {
                while !current.is_null() {
                    let entry = current.deref();
                    let next = entry.next.load(Ordering::Relaxed, &guard);
                    drop(Box::from_raw(current.as_raw()));
                    current = next;
                }
            }
        }
    }
}
