//! The cache itself: the entry list, size accounting, and the lock
//! generation counter that gates block stealing.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use log::debug;

use crate::entry::EntryRef;

/// Shared, reference-counted cache state.
pub struct BlobCacheInner {
    pub(crate) name: String,
    pub(crate) entries: Vec<EntryRef>,
    pub(crate) data_limit: Cell<u64>,
    pub(crate) alloc_quantum: usize,
    pub(crate) read_quantum: usize,
    pub(crate) trim_limit: u32,
    pub(crate) data_size: Cell<usize>,
    pub(crate) lock_generation: Cell<u64>,
    pub(crate) open_map_count: Cell<u32>,
    /// Manual reference count mirroring the registry/entries/handles that
    /// hold a logical claim on this cache. Rust's own `Rc` already manages
    /// the memory; this field exists to make the cache's logical lifetime
    /// (spec invariant: refcount == 1 + |entries| + |open handles|)
    /// independently observable and testable.
    pub(crate) refcount: Cell<u32>,
    pub(crate) save_level: Cell<u32>,
    pub(crate) destroyed: Cell<bool>,
}

impl fmt::Debug for BlobCacheInner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlobCacheInner")
            .field("name", &self.name)
            .field("entries", &self.entries.len())
            .field("data_size", &self.data_size.get())
            .field("data_limit", &self.data_limit.get())
            .field("lock_generation", &self.lock_generation.get())
            .field("refcount", &self.refcount.get())
            .finish()
    }
}

/// Reference-counted pointer to the shared cache state.
pub type CacheRef = Rc<RefCell<BlobCacheInner>>;

/// A handle to a shared blob cache. Clones are cheap and share state; the
/// cache is torn down only once every clone has called [`BlobCache::destroy`]
/// and no entries or handles remain.
#[derive(Clone, Debug)]
pub struct BlobCache(pub(crate) CacheRef);

impl BlobCache {
    /// Create a new cache. `data_limit` bounds `data_size()`; `alloc_quantum`
    /// and `read_quantum` set the Frame Engine's minimum allocation and
    /// read-ahead granularity; `trim_limit` is how many most-recently-used
    /// entries are exempt from opportunistic eviction during `open`.
    pub fn init(
        name: impl Into<String>,
        data_limit: u64,
        alloc_quantum: usize,
        read_quantum: usize,
        trim_limit: u32,
    ) -> Self {
        let name = name.into();
        debug!("blob cache '{name}' initialized, data_limit={data_limit}");
        let inner = Rc::new(RefCell::new(BlobCacheInner {
            name,
            entries: Vec::new(),
            data_limit: Cell::new(data_limit),
            alloc_quantum: alloc_quantum.max(1),
            read_quantum: read_quantum.max(1),
            trim_limit,
            data_size: Cell::new(0),
            lock_generation: Cell::new(0),
            open_map_count: Cell::new(0),
            refcount: Cell::new(1),
            save_level: Cell::new(0),
            destroyed: Cell::new(false),
        }));
        crate::registry::register(&inner);
        BlobCache(inner)
    }

    pub(crate) fn inner(&self) -> &CacheRef {
        &self.0
    }

    /// Current accounting-level size of everything the cache holds: entry
    /// headers plus block allocations.
    pub fn data_size(&self) -> usize {
        self.0.borrow().data_size.get()
    }

    /// The configured ceiling for `data_size()`.
    pub fn get_limit(&self) -> u64 {
        self.0.borrow().data_limit.get()
    }

    /// Change the ceiling for `data_size()`. If shrinking the limit leaves
    /// the cache over it, purges the difference before the new limit takes
    /// effect.
    pub fn set_limit(&self, limit: u64) {
        let data_size = self.data_size() as u64;
        if data_size > limit {
            crate::purge::purge(self, (data_size - limit) as usize);
        }
        self.0.borrow().data_limit.set(limit);
    }

    /// The cache's display name, as given to `init`.
    pub fn name(&self) -> String {
        self.0.borrow().name.clone()
    }

    /// Number of entries currently tracked, independent of `in_use` state.
    pub fn entry_count(&self) -> usize {
        self.0.borrow().entries.len()
    }

    /// The current lock generation. Blocks stamped with this generation are
    /// locked against stealing and purging.
    pub fn lock_generation(&self) -> u64 {
        self.0.borrow().lock_generation.get()
    }

    /// Advance the lock generation. Called when the last open mapping
    /// context on the cache closes (spec §4.5): blocks locked under the
    /// generation that is now ending become eligible for stealing again.
    pub fn bump_lock_generation(&self) {
        let inner = self.0.borrow();
        inner.lock_generation.set(inner.lock_generation.get() + 1);
    }

    /// Release this handle's claim on the cache. The cache's resources are
    /// torn down once the logical refcount reaches zero (no entries, no
    /// open handles, and every `BlobCache` clone has called `destroy`).
    pub fn destroy(self) {
        let rc = {
            let inner = self.0.borrow();
            let rc = inner.refcount.get().saturating_sub(1);
            inner.refcount.set(rc);
            rc
        };
        if rc == 0 {
            teardown(&self.0);
        }
    }
}

pub(crate) fn recompute_data_size(cache: &CacheRef) {
    let inner = cache.borrow();
    let mut total = 0usize;
    for entry in &inner.entries {
        total += std::mem::size_of::<crate::entry::BlobDataInner>();
        for block in &entry.borrow().blocks {
            total += block.footprint();
        }
    }
    inner.data_size.set(total);
}

fn teardown(cache: &CacheRef) {
    let entries = {
        let mut inner = cache.borrow_mut();
        if inner.destroyed.get() {
            return;
        }
        inner.destroyed.set(true);
        std::mem::take(&mut inner.entries)
    };
    for entry in entries {
        let mut e = entry.borrow_mut();
        if e.in_use > 0 {
            e.methods.close(e.source.as_ref(), &mut **e.private.borrow_mut());
        }
        e.methods.destroy(e.source.as_ref(), &mut e.private.borrow_mut());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_sets_limits() {
        let cache = BlobCache::init("test", 1 << 20, 4096, 8192, 4);
        assert_eq!(cache.get_limit(), 1 << 20);
        assert_eq!(cache.data_size(), 0);
        assert_eq!(cache.entry_count(), 0);
    }

    #[test]
    fn set_limit_updates_ceiling() {
        let cache = BlobCache::init("test", 1024, 64, 64, 0);
        cache.set_limit(2048);
        assert_eq!(cache.get_limit(), 2048);
    }

    #[test]
    fn bump_lock_generation_advances_counter() {
        let cache = BlobCache::init("test", 1024, 64, 64, 0);
        assert_eq!(cache.lock_generation(), 0);
        cache.bump_lock_generation();
        assert_eq!(cache.lock_generation(), 1);
    }

    #[test]
    fn destroy_with_no_entries_is_immediate() {
        let cache = BlobCache::init("test", 1024, 64, 64, 0);
        let inner = cache.0.clone();
        cache.destroy();
        assert!(inner.borrow().destroyed.get());
    }
}
