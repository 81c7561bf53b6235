//! Table engine: single writer, any number of wait-free readers.
//!
//! # Concurrency
//! - **Readers** ([`TableReader`], or the read methods of [`Table`]) pin a
//!   kovan guard for the duration of one operation and walk chains with
//!   Acquire loads. They never block and never retry.
//! - **Writer** ([`Table`]) mutates through `&mut self`. There is exactly one
//!   writer handle per table, so writers are serialized by ownership; callers
//!   that want several writer threads put the `Table` behind their own lock.
//! - **Reclamation**: unlinked entries go to `kovan::retire` and are freed only
//!   after every reader that could still see them has unpinned.
//! - **Storage**: bucket arrays live in an `Arc` shared by the writer and all
//!   readers, and are released with the last handle.

use alloc::sync::Arc;
use core::mem;
use core::ops::ControlFlow;
use core::sync::atomic::{AtomicBool, Ordering};
use kovan::{Guard, Shared, pin, retire};
use portable_atomic::AtomicUsize;

use crate::buckets::{BucketStore, Entry};
use crate::error::TableError;
use crate::key::CompositeKey;
use crate::stats::TableStats;

/// Bucket capacity requested by [`TableConfig::default`].
pub const DEFAULT_CAPACITY: u32 = 1024;

/// Construction parameters for a [`Table`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableConfig {
    /// Requested number of buckets. Rounded up to a power of two, at most 2^24.
    pub capacity: u32,
}

impl TableConfig {
    /// Config requesting `capacity` buckets.
    pub const fn with_capacity(capacity: u32) -> Self {
        Self { capacity }
    }
}

impl Default for TableConfig {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

struct Core<V> {
    store: BucketStore<V>,
    count: AtomicUsize,
    terminated: AtomicBool,
}

impl<V> Core<V> {
    /// Finds the entry for `key`. The reference lives as long as the guard.
    #[inline(always)]
    fn find<'g>(&self, key: &CompositeKey, guard: &'g Guard) -> Option<&'g Entry<V>> {
        let bucket = self.store.head(self.store.index_of(key));
        let mut current = bucket.load(Ordering::Acquire, guard);

        while !current.is_null() {
            unsafe {
                let entry = current.deref();
                if entry.key == *key {
                    return Some(entry);
                }
                current = entry.next.load(Ordering::Acquire, guard);
            }
        }
        None
    }

    fn lookup_with<R>(&self, key: &CompositeKey, f: impl FnOnce(&V) -> R) -> Result<R, TableError> {
        let guard = pin();
        self.find(key, &guard)
            .map(|entry| f(&entry.value))
            .ok_or(TableError::NotFound)
    }

    fn foreach<F>(&self, mut visitor: F) -> ControlFlow<()>
    where
        F: FnMut(&CompositeKey, &V) -> ControlFlow<()>,
    {
        let guard = pin();

        for idx in 0..self.store.bucket_count() {
            let mut current = self.store.head(idx).load(Ordering::Acquire, &guard);

            while !current.is_null() {
                unsafe {
                    let entry = current.deref();
                    visitor(&entry.key, &entry.value)?;
                    current = entry.next.load(Ordering::Acquire, &guard);
                }
            }
        }
        ControlFlow::Continue(())
    }

    fn nth(&self, offset: usize) -> Option<(CompositeKey, V)>
    where
        V: Clone,
    {
        let mut skip = offset;
        let mut found = None;

        let _ = self.foreach(|key, value| {
            if skip > 0 {
                skip -= 1;
                return ControlFlow::Continue(());
            }
            found = Some((*key, value.clone()));
            ControlFlow::Break(())
        });

        found
    }

    fn stats(&self) -> Result<TableStats, TableError> {
        if self.terminated.load(Ordering::Acquire) {
            return Err(TableError::InvalidArgument("table terminated"));
        }
        TableStats::from_occupancies(
            self.count.load(Ordering::Relaxed) as u64,
            self.store.occupancies(),
        )
    }

    fn footprint(&self) -> u64 {
        mem::size_of::<Self>() as u64 + self.store.footprint()
    }
}

impl<V: Send + Sync + 'static> Core<V> {
    /// Unlinks every chain and retires its entries. Returns how many were retired.
    fn unlink_all(&self) -> usize {
        let guard = pin();
        let mut retired = 0;

        for idx in 0..self.store.bucket_count() {
            let mut current = self.store.head(idx).swap(
                unsafe { Shared::from_raw(core::ptr::null_mut()) },
                Ordering::AcqRel,
                &guard,
            );
            self.store.reset(idx);

            while !current.is_null() {
                unsafe {
                    let next = current.deref().next.load(Ordering::Acquire, &guard);
                    retire(current.as_raw());
                    current = next;
                }
                retired += 1;
            }
        }

        self.count.store(0, Ordering::Relaxed);
        retired
    }
}

/// Writer handle of a fixed-bucket table.
///
/// # Examples
///
/// ```
/// use kovan_table::{CompositeKey, Table, TableError};
///
/// let mut table = Table::new(16).unwrap();
/// let key = CompositeKey::from_u160(177, 277, 7);
///
/// table.add(key, "session").unwrap();
/// assert_eq!(table.add(key, "other"), Err(TableError::DuplicateKey));
/// assert_eq!(table.lookup(&key), Ok("session"));
///
/// let reader = table.reader();
/// assert_eq!(table.remove(&key), Ok("session"));
/// assert_eq!(reader.lookup(&key), Err(TableError::NotFound));
/// ```
///
/// Values must be `Send + Sync`: readers on other threads borrow them, and
/// retired entries are dropped by whichever thread runs kovan reclamation.
///
/// ```compile_fail
/// use kovan_table::Table;
/// use std::rc::Rc;
///
/// let _table = Table::<Rc<u64>>::new(16);
/// ```
pub struct Table<V: Send + Sync + 'static> {
    core: Arc<Core<V>>,
}

/// Cloneable read-only handle to a [`Table`].
///
/// Readers stay valid after the writer is terminated or dropped; they then
/// observe an empty, terminated table.
pub struct TableReader<V: Send + Sync + 'static> {
    core: Arc<Core<V>>,
}

impl<V: Send + Sync + 'static> Table<V> {
    /// Creates a table with `capacity` buckets rounded up to a power of two
    /// (at least one, at most 2^24).
    pub fn new(capacity: u32) -> Result<Self, TableError> {
        Self::with_config(TableConfig::with_capacity(capacity))
    }

    /// Creates a table from a [`TableConfig`].
    pub fn with_config(config: TableConfig) -> Result<Self, TableError> {
        let store = BucketStore::new(config.capacity)?;

        tracing::debug!(
            capacity = config.capacity,
            bits = store.bits(),
            buckets = store.bucket_count(),
            "table created"
        );

        Ok(Self {
            core: Arc::new(Core {
                store,
                count: AtomicUsize::new(0),
                terminated: AtomicBool::new(false),
            }),
        })
    }

    /// Returns a new read handle.
    pub fn reader(&self) -> TableReader<V> {
        TableReader {
            core: Arc::clone(&self.core),
        }
    }

    /// Links a new entry at the head of its bucket.
    ///
    /// Fails with [`TableError::DuplicateKey`] without touching the table when
    /// `key` is already present, and with [`TableError::AllocationFailure`]
    /// when the entry cannot be allocated.
    ///
    /// Entries always come from the global allocator; there is no per-call
    /// allocation hint.
    pub fn add(&mut self, key: CompositeKey, value: V) -> Result<(), TableError> {
        let core = &*self.core;
        let idx = core.store.index_of(&key);
        let bucket = core.store.head(idx);

        let guard = pin();
        let head = bucket.load(Ordering::Acquire, &guard);

        let mut current = head;
        while !current.is_null() {
            unsafe {
                let entry = current.deref();
                if entry.key == key {
                    tracing::trace!(bucket = idx, "duplicate key rejected");
                    return Err(TableError::DuplicateKey);
                }
                current = entry.next.load(Ordering::Acquire, &guard);
            }
        }

        let entry = Entry::try_alloc(key, value, head.as_raw())?;

        // Fully built before this Release store makes it reachable.
        bucket.store(unsafe { Shared::from_raw(entry) }, Ordering::Release);

        core.store.increment(idx);
        core.count.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Unlinks the entry for `key` and returns its value.
    ///
    /// The entry itself is retired, not freed: readers already walking the
    /// chain can still read it until they unpin. For values that are not
    /// `Clone`, use [`remove_with`](Self::remove_with) or
    /// [`discard`](Self::discard).
    pub fn remove(&mut self, key: &CompositeKey) -> Result<V, TableError>
    where
        V: Clone,
    {
        self.remove_with(key, V::clone)
    }

    /// Unlinks the entry for `key`, discarding its value.
    pub fn discard(&mut self, key: &CompositeKey) -> Result<(), TableError> {
        self.remove_with(key, |_| ())
    }

    /// Unlinks the entry for `key` and runs `f` on its value just before the
    /// entry is retired.
    pub fn remove_with<R>(
        &mut self,
        key: &CompositeKey,
        f: impl FnOnce(&V) -> R,
    ) -> Result<R, TableError> {
        let core = &*self.core;
        let idx = core.store.index_of(key);

        let guard = pin();
        let mut link = core.store.head(idx);
        let mut current = link.load(Ordering::Acquire, &guard);

        while !current.is_null() {
            unsafe {
                let entry = current.deref();
                let next = entry.next.load(Ordering::Acquire, &guard);

                if entry.key == *key {
                    link.store(next, Ordering::Release);

                    core.store.decrement(idx);
                    core.count.fetch_sub(1, Ordering::Relaxed);

                    let out = f(&entry.value);
                    retire(current.as_raw());
                    return Ok(out);
                }

                link = &entry.next;
                current = next;
            }
        }

        Err(TableError::NotFound)
    }

    /// Removes every entry. Bucket storage is kept and the table stays usable.
    pub fn flush(&mut self) {
        let retired = self.core.unlink_all();
        tracing::debug!(retired, "table flushed");
    }

    /// Flushes the table and gives up this handle's share of the storage.
    ///
    /// Outstanding readers keep the bucket arrays alive until they are dropped.
    pub fn terminate(self) {
        drop(self);
    }

    /// Returns a clone of the value stored for `key`.
    pub fn lookup(&self, key: &CompositeKey) -> Result<V, TableError>
    where
        V: Clone,
    {
        self.core.lookup_with(key, V::clone)
    }

    /// Runs `f` on the value stored for `key` inside the read-side critical section.
    pub fn lookup_with<R>(&self, key: &CompositeKey, f: impl FnOnce(&V) -> R) -> Result<R, TableError> {
        self.core.lookup_with(key, f)
    }

    /// Returns true if `key` is present.
    pub fn contains(&self, key: &CompositeKey) -> bool {
        self.core.lookup_with(key, |_| ()).is_ok()
    }

    /// Number of live entries. O(1).
    pub fn size(&self) -> usize {
        self.core.count.load(Ordering::Relaxed)
    }

    /// Returns true if the table holds no entries.
    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Visits every entry, bucket by bucket, until `visitor` breaks.
    ///
    /// See [`TableReader::foreach`] for the consistency contract.
    pub fn foreach<F>(&self, visitor: F) -> ControlFlow<()>
    where
        F: FnMut(&CompositeKey, &V) -> ControlFlow<()>,
    {
        self.core.foreach(visitor)
    }

    /// Returns the entry at position `offset` in traversal order.
    pub fn nth(&self, offset: usize) -> Option<(CompositeKey, V)>
    where
        V: Clone,
    {
        self.core.nth(offset)
    }

    /// Occupancy statistics over all buckets.
    pub fn stats(&self) -> Result<TableStats, TableError> {
        self.core.stats()
    }

    /// Bytes held by the table header, bucket heads and counters.
    pub fn footprint(&self) -> u64 {
        self.core.footprint()
    }

    /// Bytes held by one entry.
    pub fn entry_footprint() -> u64 {
        mem::size_of::<Entry<V>>() as u64
    }

    /// Number of buckets.
    pub fn bucket_count(&self) -> usize {
        self.core.store.bucket_count()
    }

    /// Index bit-width (`bucket_count == 1 << bits`).
    pub fn bits(&self) -> u32 {
        self.core.store.bits()
    }

    /// Bucket index `key` is placed in.
    pub fn bucket_of(&self, key: &CompositeKey) -> usize {
        self.core.store.index_of(key)
    }
}

impl<V: Send + Sync + 'static> Drop for Table<V> {
    fn drop(&mut self) {
        let retired = self.core.unlink_all();
        // Published after the chains are empty: a reader that sees the flag
        // can no longer find any entry.
        self.core.terminated.store(true, Ordering::Release);
        tracing::debug!(retired, "table terminated");
    }
}

impl<V: Send + Sync + 'static> TableReader<V> {
    /// Returns a clone of the value stored for `key`.
    pub fn lookup(&self, key: &CompositeKey) -> Result<V, TableError>
    where
        V: Clone,
    {
        self.core.lookup_with(key, V::clone)
    }

    /// Runs `f` on the value stored for `key` inside the read-side critical section.
    pub fn lookup_with<R>(&self, key: &CompositeKey, f: impl FnOnce(&V) -> R) -> Result<R, TableError> {
        self.core.lookup_with(key, f)
    }

    /// Returns true if `key` is present.
    pub fn contains(&self, key: &CompositeKey) -> bool {
        self.core.lookup_with(key, |_| ()).is_ok()
    }

    /// Number of live entries. O(1).
    pub fn size(&self) -> usize {
        self.core.count.load(Ordering::Relaxed)
    }

    /// Returns true if the table holds no entries.
    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Visits every entry, bucket by bucket in index order and newest first
    /// within a bucket, until `visitor` returns `ControlFlow::Break`.
    ///
    /// This is not a snapshot. Entries added or removed while the traversal
    /// runs may or may not be visited; entries present for the whole
    /// traversal are visited exactly once.
    pub fn foreach<F>(&self, visitor: F) -> ControlFlow<()>
    where
        F: FnMut(&CompositeKey, &V) -> ControlFlow<()>,
    {
        self.core.foreach(visitor)
    }

    /// Returns the entry at position `offset` (zero-based) in traversal order.
    ///
    /// Stateless pagination: each call walks from the first bucket again.
    pub fn nth(&self, offset: usize) -> Option<(CompositeKey, V)>
    where
        V: Clone,
    {
        self.core.nth(offset)
    }

    /// Occupancy statistics over all buckets.
    ///
    /// Fails with [`TableError::InvalidArgument`] once the table is terminated.
    pub fn stats(&self) -> Result<TableStats, TableError> {
        self.core.stats()
    }

    /// Bytes held by the table header, bucket heads and counters.
    pub fn footprint(&self) -> u64 {
        self.core.footprint()
    }

    /// Number of buckets.
    pub fn bucket_count(&self) -> usize {
        self.core.store.bucket_count()
    }

    /// Index bit-width.
    pub fn bits(&self) -> u32 {
        self.core.store.bits()
    }

    /// Bucket index `key` is placed in.
    pub fn bucket_of(&self, key: &CompositeKey) -> usize {
        self.core.store.index_of(key)
    }

    /// Returns true once the writer has been terminated or dropped.
    pub fn is_terminated(&self) -> bool {
        self.core.terminated.load(Ordering::Acquire)
    }
}

impl<V: Send + Sync + 'static> Clone for TableReader<V> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec::Vec;

    fn key(i: u64) -> CompositeKey {
        CompositeKey::from_u64(i)
    }

    #[test]
    fn test_add_and_lookup() {
        let mut table = Table::new(16).unwrap();
        table.add(key(1), 100u64).unwrap();
        assert_eq!(table.lookup(&key(1)), Ok(100));
        assert_eq!(table.lookup(&key(2)), Err(TableError::NotFound));
        assert_eq!(table.size(), 1);
    }

    #[test]
    fn test_duplicate_keeps_first() {
        let mut table = Table::new(16).unwrap();
        table.add(key(1), 1u64).unwrap();
        assert_eq!(table.add(key(1), 2), Err(TableError::DuplicateKey));
        assert_eq!(table.lookup(&key(1)), Ok(1));
        assert_eq!(table.size(), 1);
    }

    #[test]
    fn test_remove_from_chain_middle() {
        // One bucket: everything shares a chain.
        let mut table = Table::new(1).unwrap();
        for i in 0..5 {
            table.add(key(i), i).unwrap();
        }
        assert_eq!(table.remove(&key(2)), Ok(2));
        assert_eq!(table.remove(&key(2)), Err(TableError::NotFound));
        for i in [0, 1, 3, 4] {
            assert_eq!(table.lookup(&key(i)), Ok(i));
        }
        assert_eq!(table.core.store.occupancy(0), 4);
    }

    #[test]
    fn test_chain_order_newest_first() {
        let mut table = Table::new(1).unwrap();
        for i in 0..4u64 {
            table.add(key(i), i).unwrap();
        }
        let mut order = Vec::new();
        let _ = table.foreach(|_, v| {
            order.push(*v);
            ControlFlow::Continue(())
        });
        assert_eq!(order, [3, 2, 1, 0]);
    }

    #[test]
    fn test_flush_resets_counters() {
        let mut table = Table::new(8).unwrap();
        for i in 0..100 {
            table.add(key(i), i).unwrap();
        }
        table.flush();
        assert_eq!(table.size(), 0);
        assert!(table.core.store.occupancies().all(|c| c == 0));
        table.add(key(1), 1).unwrap();
        assert_eq!(table.size(), 1);
    }

    #[test]
    fn test_lookup_with_borrows() {
        let mut table = Table::new(4).unwrap();
        table.add(key(7), alloc::string::String::from("seven")).unwrap();
        assert_eq!(table.lookup_with(&key(7), |s| s.len()), Ok(5));
    }

    #[test]
    fn test_terminate_leaves_readers_empty() {
        let mut table = Table::new(4).unwrap();
        table.add(key(1), 1u64).unwrap();
        let reader = table.reader();
        table.terminate();

        assert!(reader.is_terminated());
        assert_eq!(reader.size(), 0);
        assert_eq!(reader.lookup(&key(1)), Err(TableError::NotFound));
        assert_eq!(
            reader.stats(),
            Err(TableError::InvalidArgument("table terminated"))
        );
    }

    #[test]
    fn test_discard_without_clone() {
        struct Handle(u64);

        let mut table = Table::new(1).unwrap();
        for i in 0..3 {
            table.add(key(i), Handle(i)).unwrap();
        }
        assert_eq!(table.discard(&key(1)), Ok(()));
        assert_eq!(table.discard(&key(1)), Err(TableError::NotFound));
        assert_eq!(table.remove_with(&key(2), |h| h.0), Ok(2));
        assert_eq!(table.lookup_with(&key(0), |h| h.0), Ok(0));
        assert_eq!(table.size(), 1);
        assert_eq!(table.core.store.occupancy(0), 1);
    }

    #[test]
    fn test_handles_are_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Table<u64>>();
        assert_send_sync::<TableReader<alloc::string::String>>();
    }

    #[test]
    fn test_footprint() {
        let table = Table::<u64>::new(16).unwrap();
        assert!(table.footprint() >= 16 * 12);
        assert!(Table::<u64>::entry_footprint() >= mem::size_of::<CompositeKey>() as u64 + 8);
    }

    #[cfg(feature = "std")]
    #[test]
    fn test_concurrent_readers_single_writer() {
        extern crate std;
        use std::thread;

        let mut table = Table::new(64).unwrap();
        for i in 0..100 {
            table.add(key(i), i).unwrap();
        }

        let mut handles = Vec::new();
        for _ in 0..4 {
            let reader = table.reader();
            handles.push(thread::spawn(move || {
                for _ in 0..50 {
                    for i in 0..100 {
                        assert_eq!(reader.lookup(&key(i)), Ok(i));
                    }
                }
            }));
        }

        for round in 0..50 {
            let k = key(1000 + round);
            table.add(k, round).unwrap();
            assert_eq!(table.remove(&k), Ok(round));
        }

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(table.size(), 100);
    }
}
