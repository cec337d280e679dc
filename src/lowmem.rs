//! Low-memory handler registration: lets a cache advertise itself to the
//! host's memory-pressure dispatcher, alongside every other subsystem
//! competing for the same pool.

use crate::cache::BlobCache;
use crate::purge::{purge, PurgeCost, PurgeTier};

/// What a cache tells the low-memory dispatcher about itself at
/// registration time.
#[derive(Debug, Clone)]
pub struct LowMemHandlerRegistration {
    /// Display name, surfaced in logs when the handler runs.
    pub name: String,
    /// Storage tier this cache's data lives on.
    pub tier: PurgeTier,
    /// Relative cost of purging this cache versus others competing for the
    /// same memory.
    pub cost: f32,
    /// Whether this cache declared itself safe to purge from a different
    /// thread than the one that created it. Advisory only — see the
    /// crate-level docs' concurrency model.
    pub mt_safe: bool,
}

impl LowMemHandlerRegistration {
    /// Build a registration from a cache's name and purge cost.
    pub fn new(cache: &BlobCache, cost: PurgeCost, mt_safe: bool) -> Self {
        LowMemHandlerRegistration {
            name: cache.name(),
            tier: cost.tier,
            cost: cost.cost,
            mt_safe,
        }
    }
}

/// Implemented by anything the low-memory dispatcher can ask to free
/// memory. [`BlobCache`] implements this by delegating to the Purge Engine.
pub trait LowMemHandler {
    /// Attempt to free at least `bytes_requested` bytes. Returns `true` if
    /// any were actually freed.
    fn purge(&self, bytes_requested: usize) -> bool;
}

impl LowMemHandler for BlobCache {
    fn purge(&self, bytes_requested: usize) -> bool {
        purge(self, bytes_requested)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registration_carries_cache_identity() {
        let cache = BlobCache::init("lowmem-test", 1024, 16, 64, 0);
        let reg = LowMemHandlerRegistration::new(&cache, PurgeCost::default(), false);
        assert_eq!(reg.name, "lowmem-test");
        assert_eq!(reg.tier, PurgeTier::Disk);
    }

    #[test]
    fn blob_cache_implements_low_mem_handler() {
        let cache = BlobCache::init("lowmem-test-2", 1024, 16, 64, 0);
        assert!(!LowMemHandler::purge(&cache, 10));
    }
}
