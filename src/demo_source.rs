//! A minimal in-memory [`SourceMethods`] implementation.
//!
//! This is not part of the cache's core contract — concrete source types
//! (files, PostScript objects, …) are explicitly out of scope for this
//! crate — but it is the reference implementation the crate's own tests use
//! to exercise the Frame Engine, the same role `InMemoryStore` plays in the
//! teacher's caching layer.

use std::any::Any;
use std::cell::RefCell;
use std::rc::Rc;

use crate::error::{BlobError, BlobResult};
use crate::methods::{AvailableData, Protection, SourceIdentity, SourceMethods};
use crate::mode::ModeFlags;

/// Identity for a [`MemorySource`]: just a handle id, compared by value so
/// two clones of the same handle are recognized as the same source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryHandle(pub u64);

#[derive(Debug)]
struct MemoryState {
    data: RefCell<Vec<u8>>,
    open: RefCell<bool>,
}

/// An in-memory byte buffer exposed as a blob source. Reads copy out of the
/// buffer; writes extend or overwrite it in place; `available` hands back a
/// zero-copy pointer straight into the buffer.
#[derive(Debug)]
pub struct MemorySource {
    handle: u64,
    state: Rc<MemoryState>,
}

impl MemorySource {
    /// Build a fresh buffer and its methods table, ready to pass to
    /// `open_entry`/`BlobHandle::create`. `available` offers zero-copy
    /// access straight into the buffer, the fast path a real in-memory
    /// source would take.
    pub fn new(data: Vec<u8>) -> (MemoryHandle, Rc<dyn SourceMethods>) {
        Self::build(data, true, false)
    }

    /// Like `new`, but `available` always reports nothing, forcing the
    /// Frame Engine through its block-allocation-and-read path — the shape
    /// a file-backed source would have.
    pub fn without_zero_copy(data: Vec<u8>) -> (MemoryHandle, Rc<dyn SourceMethods>) {
        Self::build(data, false, false)
    }

    /// Like `new`, but flagged "cheap to regenerate" for the Purge Engine —
    /// the shape a small PostScript array or string source would have.
    pub fn cheap(data: Vec<u8>) -> (MemoryHandle, Rc<dyn SourceMethods>) {
        Self::build(data, true, true)
    }

    fn build(data: Vec<u8>, zero_copy: bool, cheap: bool) -> (MemoryHandle, Rc<dyn SourceMethods>) {
        static NEXT_HANDLE: std::sync::atomic::AtomicU64 = std::sync::atomic::AtomicU64::new(1);
        let handle = NEXT_HANDLE.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        let methods = MemoryMethods {
            state: Rc::new(MemoryState {
                data: RefCell::new(data),
                open: RefCell::new(false),
            }),
            zero_copy,
            cheap,
        };
        (MemoryHandle(handle), Rc::new(methods))
    }
}

#[derive(Debug)]
struct MemoryMethods {
    state: Rc<MemoryState>,
    zero_copy: bool,
    cheap: bool,
}

impl SourceMethods for MemoryMethods {
    fn same(&self, a: &dyn SourceIdentity, b: &dyn SourceIdentity) -> bool {
        match (a.as_any().downcast_ref::<MemoryHandle>(), b.as_any().downcast_ref::<MemoryHandle>()) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }

    fn create(&self, _source: &dyn SourceIdentity) -> BlobResult<Box<dyn Any>> {
        Ok(Box::new(self.state.clone()))
    }

    fn destroy(&self, _source: &dyn SourceIdentity, _private: &mut Box<dyn Any>) {}

    fn open(&self, _source: &dyn SourceIdentity, private: &mut dyn Any, _mode: ModeFlags) -> BlobResult<()> {
        let state = private.downcast_ref::<Rc<MemoryState>>().expect("private state type mismatch");
        *state.open.borrow_mut() = true;
        Ok(())
    }

    fn close(&self, _source: &dyn SourceIdentity, private: &mut dyn Any) {
        if let Some(state) = private.downcast_ref::<Rc<MemoryState>>() {
            *state.open.borrow_mut() = false;
        }
    }

    fn available(&self, _source: &dyn SourceIdentity, private: &mut dyn Any, offset: u64) -> Option<AvailableData> {
        if !self.zero_copy {
            return None;
        }
        let state = private.downcast_ref::<Rc<MemoryState>>()?;
        let data = state.data.borrow();
        let offset = offset as usize;
        if offset >= data.len() {
            return None;
        }
        Some(AvailableData {
            ptr: unsafe { data.as_ptr().add(offset) },
            len: data.len() - offset,
        })
    }

    fn read(&self, _source: &dyn SourceIdentity, private: &mut dyn Any, dst: &mut [u8], offset: u64) -> usize {
        let Some(state) = private.downcast_ref::<Rc<MemoryState>>() else {
            return 0;
        };
        let data = state.data.borrow();
        let offset = offset as usize;
        if offset >= data.len() {
            return 0;
        }
        let n = dst.len().min(data.len() - offset);
        dst[..n].copy_from_slice(&data[offset..offset + n]);
        n
    }

    fn write(&self, _source: &dyn SourceIdentity, private: &mut dyn Any, src: &[u8], offset: u64) -> BlobResult<()> {
        let state = private
            .downcast_ref::<Rc<MemoryState>>()
            .ok_or_else(|| BlobError::Io("private state type mismatch".into()))?;
        let mut data = state.data.borrow_mut();
        let offset = offset as usize;
        let need = offset + src.len();
        if data.len() < need {
            data.resize(need, 0);
        }
        data[offset..need].copy_from_slice(src);
        Ok(())
    }

    fn length(&self, _source: &dyn SourceIdentity, private: &mut dyn Any) -> BlobResult<u64> {
        let state = private
            .downcast_ref::<Rc<MemoryState>>()
            .ok_or_else(|| BlobError::Io("private state type mismatch".into()))?;
        Ok(state.data.borrow().len() as u64)
    }

    fn protection(&self, _source: &dyn SourceIdentity, _private: &mut dyn Any) -> Protection {
        Protection::None
    }

    fn restored(&self, _source: &dyn SourceIdentity, _private: &mut dyn Any, _save_level: u32) -> Option<Box<dyn SourceIdentity>> {
        // An in-memory buffer has no notion of VM save levels; once a
        // restore rolls past its creation point it cannot be kept alive.
        None
    }

    fn cheap_to_regenerate(&self, _source: &dyn SourceIdentity) -> bool {
        self.cheap
    }
}
