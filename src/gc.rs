//! Garbage-collector cooperation: the cache participates in host GC sweeps
//! as a *scanner*, never as a scanned object itself.

use std::any::Any;
use std::collections::HashSet;

use log::debug;

use crate::cache::BlobCache;
use crate::error::BlobError;
use crate::methods::SourceIdentity;

/// Implemented by the host's garbage collector. `retain` is called once per
/// live source identity found in a cache during `scan`; the scanner must
/// not allocate or call back into the cache — see the crate docs'
/// reentrancy rules.
pub trait Scanner {
    /// Mark `source` reachable. Must not allocate or call any source
    /// method.
    fn retain(&mut self, source: &dyn SourceIdentity);
}

/// An opaque root registered with a cache's GC participation. Dropping it
/// (or calling `gc_root_destroy`) ends the cache's participation in future
/// scans via that root; it does not affect the cache's entries.
#[derive(Debug)]
pub struct GcRoot {
    cache_name: String,
}

/// Register `cache` as a GC root.
pub fn gc_root_create(cache: &BlobCache) -> GcRoot {
    GcRoot {
        cache_name: cache.name(),
    }
}

/// Unregister a GC root. A no-op beyond dropping it; kept as an explicit
/// call to mirror the paired create/destroy style used throughout this
/// crate's surface.
pub fn gc_root_destroy(root: GcRoot) {
    debug!("gc root for '{}' destroyed", root.cache_name);
}

/// Walk every entry in `cache`, calling `scanner.retain` once per distinct
/// source identity. Read-only: does not touch blocks, does not call any
/// source method.
pub fn scan(cache: &BlobCache, scanner: &mut dyn Scanner) {
    let entries = cache.inner().borrow().entries.clone();
    for entry in entries {
        let e = entry.borrow();
        scanner.retain(e.source.as_ref());
    }
}

/// The cache-side consequence of a GC sweep that did not retain some
/// sources: mark their entries cleared so subsequent handle operations
/// return [`BlobError::Expired`], then free every block they held (the data
/// is no longer reachable, so there is nothing left to serve from it).
///
/// `retained` identifies survivors by the raw address their `SourceIdentity`
/// occupies inside the cache (obtained via `scan`'s `retain` callback
/// against `as_any()`'s pointer).
pub fn expire_unreachable(cache: &BlobCache, retained: &HashSet<*const ()>) {
    let entries = cache.inner().borrow().entries.clone();
    for entry in entries {
        let mut e = entry.borrow_mut();
        let addr = e.source.as_any() as *const dyn Any as *const ();
        if !retained.contains(&addr) {
            e.cleared = true;
            e.blocks.clear();
        }
    }
}

/// Convenience identity extraction matching `expire_unreachable`'s keying
/// scheme, so a `Scanner` can build its `retained` set consistently.
pub fn identity_key(source: &dyn SourceIdentity) -> *const () {
    source.as_any() as *const dyn Any as *const ()
}

/// Error returned by handle operations against a cleared entry; re-exported
/// here since this module is the natural place callers look for it.
pub type ExpiredError = BlobError;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::demo_source::MemorySource;
    use crate::entry::open_entry;
    use crate::frame::frame;
    use crate::mode::ModeFlags;

    struct RecordingScanner(Vec<*const ()>);
    impl Scanner for RecordingScanner {
        fn retain(&mut self, source: &dyn SourceIdentity) {
            self.0.push(identity_key(source));
        }
    }

    #[test]
    fn scan_visits_every_entry() {
        let cache = BlobCache::init("gc-test", 1 << 20, 16, 64, 4);
        let (s1, m1) = MemorySource::new(b"a".to_vec());
        let (s2, m2) = MemorySource::new(b"b".to_vec());
        open_entry(cache.inner(), &s1, m1, ModeFlags::RDONLY).unwrap();
        open_entry(cache.inner(), &s2, m2, ModeFlags::RDONLY).unwrap();

        let mut scanner = RecordingScanner(Vec::new());
        scan(&cache, &mut scanner);
        assert_eq!(scanner.0.len(), 2);
    }

    #[test]
    fn expire_unreachable_clears_and_drops_blocks() {
        let cache = BlobCache::init("gc-test-2", 1 << 20, 16, 64, 4);
        let (source, methods) = MemorySource::new(b"0123456789".to_vec());
        let entry = open_entry(cache.inner(), &source, methods, ModeFlags::RDONLY).unwrap();
        frame(&cache, &entry, 0, 4, 1).unwrap();
        assert!(!entry.borrow().blocks.is_empty());

        expire_unreachable(&cache, &HashSet::new());
        assert!(entry.borrow().cleared);
        assert!(entry.borrow().blocks.is_empty());
    }
}
