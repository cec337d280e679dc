//! Process-wide registry of live caches.
//!
//! The spec's concurrency model is single-threaded and cooperative (see the
//! crate-level docs), so the registry is a `thread_local!`, not a global
//! behind a `Mutex`/`DashMap` as a multi-threaded cache would use. Each slot
//! is a `Weak` reference: the registry observes caches, it does not keep
//! them alive.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use crate::cache::{BlobCache, BlobCacheInner, CacheRef};

thread_local! {
    static CACHES: RefCell<Vec<Weak<RefCell<BlobCacheInner>>>> = RefCell::new(Vec::new());
}

pub(crate) fn register(cache: &CacheRef) {
    CACHES.with(|caches| {
        let mut caches = caches.borrow_mut();
        caches.retain(|w| w.upgrade().is_some());
        caches.push(Rc::downgrade(cache));
    });
}

/// Every cache currently alive on this thread. Used by the GC's scan pass
/// and by `restore_commit`, which must visit every cache regardless of which
/// one the caller happens to hold.
pub fn live_caches() -> Vec<BlobCache> {
    CACHES.with(|caches| {
        let mut caches = caches.borrow_mut();
        caches.retain(|w| w.upgrade().is_some());
        caches.iter().filter_map(|w| w.upgrade().map(BlobCache)).collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registered_caches_are_visible_until_dropped() {
        let before = live_caches().len();
        let cache = BlobCache::init("registry-test", 1024, 64, 64, 0);
        assert_eq!(live_caches().len(), before + 1);
        drop(cache);
        assert_eq!(live_caches().len(), before);
    }
}
