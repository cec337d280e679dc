//! The Purge Engine: reclaim blocks (and, where possible, whole entries) to
//! bring the cache back under a size target.

use log::debug;

use crate::cache::{recompute_data_size, BlobCache};

/// Classification the low-memory handler registry attaches to a cache:
/// storage tier plus a relative cost, used to decide which caches to purge
/// first under pressure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PurgeTier {
    /// Backed by virtual memory / swap.
    Virtual,
    /// Backed by disk.
    Disk,
    /// Backed by physical memory — purging this tier is most expensive.
    PhysicalMemory,
}

/// Purge cost attached to a cache at registration time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PurgeCost {
    /// Storage tier this cache's data ultimately lives on.
    pub tier: PurgeTier,
    /// Relative cost of purging and later re-fetching this cache's data.
    pub cost: f32,
}

impl Default for PurgeCost {
    fn default() -> Self {
        PurgeCost {
            tier: PurgeTier::Disk,
            cost: 5.0,
        }
    }
}

/// Attempt to free at least `requested` bytes from `cache`. Returns `true`
/// if any bytes were actually freed.
pub fn purge(cache: &BlobCache, requested: usize) -> bool {
    recompute_data_size(cache.inner());
    let current_size = cache.data_size();
    let target_floor = current_size.saturating_sub(requested);
    let generation = cache.lock_generation();

    let entries = cache.inner().borrow().entries.clone();
    let mut freed_any = false;
    let mut retained_size = 0usize;
    let mut to_remove = Vec::new();

    for entry in &entries {
        let mut e = entry.borrow_mut();
        let cheap = e.methods.cheap_to_regenerate(e.source.as_ref());
        let already_under_target = retained_size <= target_floor;

        if cheap || already_under_target {
            let before = e.blocks.len();
            let in_use = e.in_use;
            e.blocks.retain(|b| b.is_locked(generation) && in_use > 0);
            if e.blocks.len() != before {
                freed_any = true;
            }
        }

        retained_size += std::mem::size_of::<crate::entry::BlobDataInner>();
        for b in &e.blocks {
            retained_size += b.footprint();
        }

        if e.blocks.is_empty() && e.in_use == 0 {
            e.methods.destroy(e.source.as_ref(), &mut e.private.borrow_mut());
            to_remove.push(entry.clone());
        }
    }

    if !to_remove.is_empty() {
        let mut inner = cache.inner().borrow_mut();
        inner.entries.retain(|e| !to_remove.iter().any(|r| std::rc::Rc::ptr_eq(e, r)));
        let count = to_remove.len() as u32;
        inner.refcount.set(inner.refcount.get().saturating_sub(count));
        freed_any = true;
    }

    recompute_data_size(cache.inner());
    debug!(
        "purge on '{}' requested {requested}, data_size now {}",
        cache.name(),
        cache.data_size()
    );
    freed_any
}
