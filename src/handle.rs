//! The public, reference-counted handle surface: `BlobHandle` for
//! read/write/seek access, `MapHandle` for Frame Engine mappings.

use std::cell::RefCell;
use std::rc::Rc;

use log::trace;

use crate::cache::BlobCache;
use crate::entry::{close_entry, open_entry, EntryRef};
use crate::error::{BlobError, BlobResult};
use crate::frame::{frame, Frame};
use crate::methods::SourceIdentity;
use crate::methods::{Protection, SourceMethods};
use crate::mode::ModeFlags;

/// Chunk size used when a writable handle is sought past the current end of
/// its source: the gap is filled with zeros this many bytes at a time.
pub const BLOB_EXTEND_ZEROS: usize = 1024;

/// Mirrors `std::io::SeekFrom`'s shape as a crate-local type, since this
/// crate has no dependency on `std::io::{Read, Write}`.
#[derive(Debug, Clone, Copy)]
pub enum SeekFrom {
    /// Absolute offset from the start of the source.
    Start(u64),
    /// Offset relative to the current position.
    Current(i64),
    /// Offset relative to the end of the source.
    End(i64),
}

struct BlobHandleInner {
    cache: BlobCache,
    entry: EntryRef,
    mode: ModeFlags,
    position: u64,
    refcount: u32,
    maps: Vec<MapHandle>,
}

/// A reference-counted, cloneable view over an open blob.
#[derive(Clone)]
pub struct BlobHandle(Rc<RefCell<BlobHandleInner>>);

impl BlobHandle {
    /// Open `source` against `cache` with the given `methods`/`mode`,
    /// allocating a fresh handle at seek position zero.
    pub fn create(
        cache: &BlobCache,
        source: &dyn SourceIdentity,
        methods: Rc<dyn SourceMethods>,
        mode: ModeFlags,
    ) -> BlobResult<Self> {
        let entry = open_entry(cache.inner(), source, methods, mode)?;
        {
            let c = cache.inner().borrow();
            c.refcount.set(c.refcount.get() + 1);
        }
        Ok(BlobHandle(Rc::new(RefCell::new(BlobHandleInner {
            cache: cache.clone(),
            entry,
            mode,
            position: 0,
            refcount: 1,
            maps: Vec::new(),
        }))))
    }

    /// Clone this handle onto a (possibly different) mode. Validates the
    /// mode is a legal subset, rejects if the source has been cleared by
    /// the GC, inherits the seek position, and never inherits mappings.
    pub fn open(&self, mode: ModeFlags) -> BlobResult<Self> {
        let mode = mode.normalize();
        if !mode.is_known() {
            return Err(BlobError::Invalid("unknown mode bits".into()));
        }
        let h = self.0.borrow();
        if h.entry.borrow().cleared {
            return Err(BlobError::Expired);
        }
        h.entry.borrow_mut().in_use += 1;
        h.cache.inner().borrow().refcount.set(h.cache.inner().borrow().refcount.get() + 1);
        Ok(BlobHandle(Rc::new(RefCell::new(BlobHandleInner {
            cache: h.cache.clone(),
            entry: h.entry.clone(),
            mode,
            position: h.position,
            refcount: 1,
            maps: Vec::new(),
        }))))
    }

    /// Decrement this handle's refcount; at zero, close the entry and
    /// release the cache's reference.
    pub fn close(self) {
        let should_close = {
            let mut h = self.0.borrow_mut();
            h.refcount = h.refcount.saturating_sub(1);
            h.refcount == 0
        };
        if should_close {
            let h = self.0.borrow();
            close_entry(&h.entry);
            let inner = h.cache.inner();
            let rc = inner.borrow().refcount.get().saturating_sub(1);
            inner.borrow().refcount.set(rc);
        }
    }

    /// The source's current length.
    pub fn length(&self) -> BlobResult<u64> {
        let h = self.0.borrow();
        let e = h.entry.borrow();
        if e.cleared {
            return Err(BlobError::Expired);
        }
        let result = e.methods.length(e.source.as_ref(), &mut **e.private.borrow_mut());
        result
    }

    /// This handle's current seek position.
    pub fn tell(&self) -> u64 {
        self.0.borrow().position
    }

    /// The source's protection classification.
    pub fn protection(&self) -> Protection {
        let h = self.0.borrow();
        let e = h.entry.borrow();
        let result = e.methods.protection(e.source.as_ref(), &mut **e.private.borrow_mut());
        result
    }

    /// Read up to `buf.len()` bytes at the current position, advancing it.
    /// Zero bytes read is reported as `EndOfData`.
    pub fn read(&self, buf: &mut [u8]) -> BlobResult<usize> {
        let h = self.0.borrow();
        if !h.mode.readable() {
            return Err(BlobError::Access("handle is not readable".into()));
        }
        let e = h.entry.borrow();
        if e.cleared {
            return Err(BlobError::Expired);
        }
        let got = e.methods.read(e.source.as_ref(), &mut **e.private.borrow_mut(), buf, h.position);
        drop(e);
        drop(h);
        if got == 0 {
            return Err(BlobError::EndOfData);
        }
        self.0.borrow_mut().position += got as u64;
        Ok(got)
    }

    /// Write `buf` at the current position, advancing it. Rejected if the
    /// entry has any live blocks (a mapping precludes writing underneath
    /// it).
    pub fn write(&self, buf: &[u8]) -> BlobResult<()> {
        let h = self.0.borrow();
        if !h.mode.writable() {
            return Err(BlobError::Access("handle is not writable".into()));
        }
        let e = h.entry.borrow();
        if e.cleared {
            return Err(BlobError::Expired);
        }
        if !e.blocks.is_empty() {
            return Err(BlobError::Access("entry has live mappings".into()));
        }
        e.methods.write(e.source.as_ref(), &mut **e.private.borrow_mut(), buf, h.position)?;
        drop(e);
        drop(h);
        self.0.borrow_mut().position += buf.len() as u64;
        Ok(())
    }

    /// Reposition the handle. Seeking negative is `EndOfData`. Seeking past
    /// the end on a writable handle extends the source with zero-filled
    /// chunks of [`BLOB_EXTEND_ZEROS`] bytes; on a read-only handle it is
    /// `EndOfData`.
    pub fn seek(&self, pos: SeekFrom) -> BlobResult<u64> {
        let h = self.0.borrow();
        let e = h.entry.borrow();
        if e.cleared {
            return Err(BlobError::Expired);
        }
        let len = e.methods.length(e.source.as_ref(), &mut **e.private.borrow_mut())?;
        let base = match pos {
            SeekFrom::Start(p) => p as i128,
            SeekFrom::Current(delta) => h.position as i128 + delta as i128,
            SeekFrom::End(delta) => len as i128 + delta as i128,
        };
        if base < 0 {
            return Err(BlobError::EndOfData);
        }
        let new_pos = base as u64;
        if new_pos > len {
            if !h.mode.writable() {
                return Err(BlobError::EndOfData);
            }
            let mut remaining = new_pos - len;
            let mut at = len;
            let zeros = [0u8; BLOB_EXTEND_ZEROS];
            while remaining > 0 {
                let chunk = remaining.min(BLOB_EXTEND_ZEROS as u64) as usize;
                e.methods.write(e.source.as_ref(), &mut **e.private.borrow_mut(), &zeros[..chunk], at)?;
                at += chunk as u64;
                remaining -= chunk as u64;
            }
        }
        drop(e);
        drop(h);
        self.0.borrow_mut().position = new_pos;
        Ok(new_pos)
    }

    /// Open a mapping context on this handle.
    pub fn map_open(&self) -> MapHandle {
        let mut h = self.0.borrow_mut();
        h.refcount += 1;
        h.cache.inner().borrow().open_map_count.set(h.cache.inner().borrow().open_map_count.get() + 1);
        let map = MapHandle(Rc::new(RefCell::new(MapHandleInner {
            handle: self.clone(),
        })));
        h.maps.push(map.clone());
        map
    }
}

struct MapHandleInner {
    handle: BlobHandle,
}

/// A single Frame Engine mapping context, opened from a [`BlobHandle`].
#[derive(Clone)]
pub struct MapHandle(Rc<RefCell<MapHandleInner>>);

impl MapHandle {
    /// Resolve `[start, start + length)` to a contiguous, aligned pointer
    /// via the Frame Engine. Zero-length returns the null sentinel.
    pub fn map_region(&self, start: u64, length: usize, alignment: usize) -> BlobResult<Frame> {
        let m = self.0.borrow();
        let h = m.handle.0.borrow();
        let e = h.entry.borrow();
        if e.cleared {
            return Err(BlobError::Expired);
        }
        let entry = h.entry.clone();
        let cache = h.cache.clone();
        drop(e);
        drop(h);
        frame(&cache, &entry, start, length, alignment)
    }

    /// Close this mapping context: unlink it from the owning handle's list,
    /// and if the cache's open-map counter transitions to zero, bump the
    /// cache's lock generation — the mechanism that unlocks every block for
    /// future stealing and purging.
    pub fn close(self) {
        let handle = self.0.borrow().handle.clone();
        {
            let mut h = handle.0.borrow_mut();
            h.maps.retain(|m| !Rc::ptr_eq(&m.0, &self.0));
            let cache = h.cache.clone();
            let count = cache.inner().borrow().open_map_count.get().saturating_sub(1);
            cache.inner().borrow().open_map_count.set(count);
            if count == 0 {
                trace!("last mapping closed on '{}', advancing lock generation", cache.name());
                cache.bump_lock_generation();
            }
        }
        handle.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::demo_source::MemorySource;

    fn setup(data: &[u8]) -> (BlobCache, BlobHandle) {
        let cache = BlobCache::init("handle-test", 1 << 20, 16, 64, 4);
        let (source, methods) = MemorySource::new(data.to_vec());
        let handle = BlobHandle::create(&cache, &source, methods, ModeFlags::RDWR).unwrap();
        (cache, handle)
    }

    #[test]
    fn read_advances_position() {
        let (_cache, handle) = setup(b"0123456789");
        let mut buf = [0u8; 4];
        let n = handle.read(&mut buf).unwrap();
        assert_eq!(n, 4);
        assert_eq!(&buf, b"0123");
        assert_eq!(handle.tell(), 4);
    }

    #[test]
    fn read_at_end_is_end_of_data() {
        let (_cache, handle) = setup(b"");
        let mut buf = [0u8; 4];
        assert!(matches!(handle.read(&mut buf), Err(BlobError::EndOfData)));
    }

    #[test]
    fn seek_past_end_extends_with_zeros_on_writable_handle() {
        let (_cache, handle) = setup(b"abc");
        let pos = handle.seek(SeekFrom::Start(10)).unwrap();
        assert_eq!(pos, 10);
        assert_eq!(handle.length().unwrap(), 10);
    }

    #[test]
    fn seek_past_end_on_read_only_handle_fails() {
        let cache = BlobCache::init("handle-test-ro", 1 << 20, 16, 64, 4);
        let (source, methods) = MemorySource::new(b"abc".to_vec());
        let handle = BlobHandle::create(&cache, &source, methods, ModeFlags::RDONLY).unwrap();
        assert!(matches!(handle.seek(SeekFrom::Start(10)), Err(BlobError::EndOfData)));
    }

    #[test]
    fn write_rejected_while_entry_has_live_blocks() {
        let (cache, handle) = setup(b"0123456789");
        let map = handle.map_open();
        map.map_region(0, 4, 1).unwrap();
        assert!(matches!(handle.write(b"x"), Err(BlobError::Access(_))));
        let _ = cache;
    }

    #[test]
    fn map_close_bumps_lock_generation_once_all_maps_close() {
        let (cache, handle) = setup(b"0123456789");
        let map = handle.map_open();
        assert_eq!(cache.lock_generation(), 0);
        map.close();
        assert_eq!(cache.lock_generation(), 1);
    }
}
