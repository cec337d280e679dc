//! The source methods table: the sole interface through which the cache
//! touches the data a caller has asked it to manage.
//!
//! A methods table is a *value* — the same `Rc<dyn SourceMethods>` must be
//! passed every time a caller opens the same kind of source, since identity
//! comparison between two `BlobData` entries is partly based on methods-table
//! pointer equality (`Rc::ptr_eq`).

use std::any::Any;
use std::fmt::Debug;

use crate::error::BlobResult;
use crate::mode::ModeFlags;

/// An opaque, per-source identity object the cache copies into its own
/// storage and compares with `SourceMethods::same`.
///
/// Concrete source implementations (files, in-memory buffers, strings, …)
/// implement this directly; the blanket impl below covers the common case of
/// any `Clone + Debug + 'static` identity type.
pub trait SourceIdentity: Debug {
    /// View this identity as `Any`, for methods tables that need to
    /// downcast to compare two identities structurally.
    fn as_any(&self) -> &dyn Any;

    /// Clone this identity into a new box. Used when an entry is created:
    /// the cache never retains a caller's transient pointer, only a copy it
    /// controls.
    fn clone_box(&self) -> Box<dyn SourceIdentity>;
}

impl<T> SourceIdentity for T
where
    T: Clone + Debug + 'static,
{
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn clone_box(&self) -> Box<dyn SourceIdentity> {
        Box::new(self.clone())
    }
}

impl Clone for Box<dyn SourceIdentity> {
    fn clone(&self) -> Self {
        self.as_ref().clone_box()
    }
}

/// Opaque protection classification a source may report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protection {
    /// No special protection.
    None,
    /// Source-defined protection scheme A.
    SchemeA,
    /// Source-defined protection scheme B.
    SchemeB,
}

/// A zero-copy view a source offers into its own memory, starting at a
/// requested offset. The pointer's alignment is source-determined — the
/// Frame Engine only uses it directly when it happens to satisfy the
/// requested alignment.
#[derive(Debug, Clone, Copy)]
pub struct AvailableData {
    /// Pointer to the first available byte at the requested offset.
    pub ptr: *const u8,
    /// Number of contiguous bytes available from `ptr`.
    pub len: usize,
}

/// The capability set a caller supplies per source. See the module docs for
/// the identity/lifetime contract.
pub trait SourceMethods: Debug {
    /// Are two source identities equivalent for caching purposes? Must be
    /// reflexive, symmetric, and deterministic.
    fn same(&self, a: &dyn SourceIdentity, b: &dyn SourceIdentity) -> bool;

    /// Prepare per-source private state. Called once per entry creation.
    fn create(&self, source: &dyn SourceIdentity) -> BlobResult<Box<dyn Any>>;

    /// Release private state.
    fn destroy(&self, source: &dyn SourceIdentity, private: &mut Box<dyn Any>);

    /// Assert a session. The cache guarantees exactly one unmatched `open`
    /// per entry at a time.
    fn open(
        &self,
        source: &dyn SourceIdentity,
        private: &mut dyn Any,
        mode: ModeFlags,
    ) -> BlobResult<()>;

    /// End the session opened by `open`.
    fn close(&self, source: &dyn SourceIdentity, private: &mut dyn Any);

    /// If the source can offer a contiguous, zero-copy view beginning at
    /// `offset`, return it.
    fn available(
        &self,
        source: &dyn SourceIdentity,
        private: &mut dyn Any,
        offset: u64,
    ) -> Option<AvailableData>;

    /// Read up to `dst.len()` bytes starting at `offset`. Short reads are
    /// permitted; zero indicates end-of-data.
    fn read(
        &self,
        source: &dyn SourceIdentity,
        private: &mut dyn Any,
        dst: &mut [u8],
        offset: u64,
    ) -> usize;

    /// Write `src` at `offset`. Only called when the blob's mode includes
    /// write access and the entry has no live blocks.
    fn write(
        &self,
        source: &dyn SourceIdentity,
        private: &mut dyn Any,
        src: &[u8],
        offset: u64,
    ) -> BlobResult<()>;

    /// Report the current length of the source.
    fn length(&self, source: &dyn SourceIdentity, private: &mut dyn Any) -> BlobResult<u64>;

    /// Report the source's protection classification.
    fn protection(&self, source: &dyn SourceIdentity, private: &mut dyn Any) -> Protection;

    /// Called during a save/restore commit. `Some` means the method has kept
    /// the data alive under a (possibly new) identity; `None` means the
    /// entry must be torn down.
    fn restored(
        &self,
        source: &dyn SourceIdentity,
        private: &mut dyn Any,
        save_level: u32,
    ) -> Option<Box<dyn SourceIdentity>>;

    /// Is this source cheap enough to regenerate from scratch that the
    /// Purge Engine should free its blocks unconditionally, rather than
    /// only when short on space? Sources backing strings, small arrays, and
    /// other trivially-recomputed values answer `true`; anything backed by
    /// real I/O should keep the default.
    fn cheap_to_regenerate(&self, _source: &dyn SourceIdentity) -> bool {
        false
    }
}
