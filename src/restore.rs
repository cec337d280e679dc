//! Save/restore commit protocol.
//!
//! PostScript-style save/restore VMs periodically roll back to an earlier
//! save level; this module is the cache's hook into that protocol, letting
//! each source decide whether it survives the rollback.

use log::warn;

use crate::cache::BlobCache;
use crate::methods::SourceIdentity;

/// Above this save level, a successful restore commit must leave the cache
/// with no entries at all — anything still present indicates a source that
/// claimed to survive a restore it had no business surviving. Violating
/// this is a programming error in a `SourceMethods` implementation, not a
/// caller mistake, so it is reported via `assert!`, not `BlobError`.
pub const RESTORE_GLOBAL_THRESHOLD: u32 = 0;

/// Commit a restore to `save_level`.
///
/// `survives(save_level, source)` is a host-provided predicate: `true`
/// means the entry was created at or below the level being restored to and
/// is left untouched. `false` means the entry's save level is being rolled
/// back, so `methods.restored` is asked whether the source can be kept
/// alive under a new identity; `None` means it cannot, and the entry is
/// torn down — freed outright if unused, or left as a cleared husk
/// (subsequent handle operations on it return `Expired`) if still in-use.
///
/// Panics if `save_level` is at or below [`RESTORE_GLOBAL_THRESHOLD`] and
/// the cache is not empty once every entry has been asked.
pub fn restore_commit(
    cache: &BlobCache,
    save_level: u32,
    survives: impl Fn(u32, &dyn SourceIdentity) -> bool,
) {
    let entries = cache.inner().borrow().entries.clone();
    let mut to_unlink = Vec::new();

    for entry in &entries {
        let mut e = entry.borrow_mut();
        if survives(save_level, e.source.as_ref()) {
            continue;
        }

        let restored = e
            .methods
            .restored(e.source.as_ref(), &mut **e.private.borrow_mut(), save_level);
        match restored {
            Some(new_identity) => {
                e.source = new_identity;
            }
            None => {
                e.blocks.clear();
                e.methods.destroy(e.source.as_ref(), &mut e.private.borrow_mut());
                if e.in_use > 0 {
                    warn!("restore_commit cleared an entry with in_use > 0");
                    e.cleared = true;
                } else {
                    to_unlink.push(entry.clone());
                }
            }
        }
    }

    if !to_unlink.is_empty() {
        let mut inner = cache.inner().borrow_mut();
        inner.entries.retain(|e| !to_unlink.iter().any(|r| std::rc::Rc::ptr_eq(e, r)));
        let count = to_unlink.len() as u32;
        inner.refcount.set(inner.refcount.get().saturating_sub(count));
    }
    crate::cache::recompute_data_size(cache.inner());

    if save_level <= RESTORE_GLOBAL_THRESHOLD {
        assert!(
            cache.entry_count() == 0,
            "restore_commit at or below the global threshold left {} entries alive in '{}'",
            cache.entry_count(),
            cache.name()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::demo_source::MemorySource;
    use crate::entry::open_entry;
    use crate::frame::frame;
    use crate::mode::ModeFlags;

    #[test]
    fn surviving_entries_are_left_untouched() {
        let cache = BlobCache::init("restore-test", 1 << 20, 16, 64, 4);
        let (source, methods) = MemorySource::new(b"data".to_vec());
        open_entry(cache.inner(), &source, methods, ModeFlags::RDONLY).unwrap();

        restore_commit(&cache, 5, |_, _| true);
        assert_eq!(cache.entry_count(), 1);
    }

    #[test]
    fn non_surviving_unused_entry_is_unlinked_when_restored_fails() {
        let cache = BlobCache::init("restore-test-2", 1 << 20, 16, 64, 4);
        let (source, methods) = MemorySource::new(b"data".to_vec());
        let entry = open_entry(cache.inner(), &source, methods, ModeFlags::RDONLY).unwrap();
        crate::entry::close_entry(&entry); // in_use -> 0

        restore_commit(&cache, 1, |_, _| false);
        assert_eq!(cache.entry_count(), 0);
    }

    #[test]
    fn non_surviving_in_use_entry_is_cleared_not_unlinked() {
        let cache = BlobCache::init("restore-test-3", 1 << 20, 16, 64, 4);
        let (source, methods) = MemorySource::new(b"0123456789".to_vec());
        let entry = open_entry(cache.inner(), &source, methods, ModeFlags::RDONLY).unwrap();
        frame(&cache, &entry, 0, 4, 1).unwrap();

        restore_commit(&cache, 1, |_, _| false);
        assert_eq!(cache.entry_count(), 1);
        assert!(entry.borrow().cleared);
        assert!(entry.borrow().blocks.is_empty());
    }

    #[test]
    #[should_panic(expected = "left")]
    fn restore_commit_at_threshold_panics_if_not_empty() {
        let cache = BlobCache::init("restore-test-4", 1 << 20, 16, 64, 4);
        let (source, methods) = MemorySource::new(b"data".to_vec());
        open_entry(cache.inner(), &source, methods, ModeFlags::RDONLY).unwrap();

        restore_commit(&cache, RESTORE_GLOBAL_THRESHOLD, |_, _| true);
    }
}
