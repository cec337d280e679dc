//! The Frame Engine: turns `(entry, start_offset, length, alignment)` into a
//! pointer to at least `length` readable, correctly aligned bytes.

use std::rc::Rc;

use log::trace;

use crate::block::{Block, BLOB_MAX_ALIGNMENT};
use crate::cache::{recompute_data_size, BlobCache};
use crate::entry::EntryRef;
use crate::error::{BlobError, BlobResult};
use crate::methods::AvailableData;

/// A contiguous, aligned view returned by [`frame`].
///
/// Validity follows the rules in the crate-level docs: the pointer stays
/// good until the next `close` of the owning handle, except that stealing
/// may invalidate it once the cache's lock generation advances past the one
/// it was stamped with.
#[derive(Debug, Clone, Copy)]
pub struct Frame {
    ptr: *const u8,
    len: usize,
}

static NULLFRAME: [u8; BLOB_MAX_ALIGNMENT] = [0u8; BLOB_MAX_ALIGNMENT];

impl Frame {
    /// The zero-length sentinel frame, realigned to `alignment`. Never nil.
    pub fn null_frame(alignment: usize) -> Self {
        let base = NULLFRAME.as_ptr() as usize;
        let aligned = (base + alignment - 1) & !(alignment - 1);
        Frame {
            ptr: aligned as *const u8,
            len: 0,
        }
    }

    /// `true` for the zero-length sentinel.
    pub fn is_null(&self) -> bool {
        self.len == 0
    }

    /// View this frame's bytes.
    ///
    /// # Safety invariant
    /// The caller must not retain this slice past the next `close` of the
    /// owning handle, nor across a `map_close` that advances the cache's
    /// lock generation while other handles remain open on the same cache
    /// (see the crate docs' "Ordering guarantees").
    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: `ptr` addresses at least `len` initialized bytes for the
        // validity window documented above; the frame never outlives that
        // window if callers uphold the contract.
        unsafe { std::slice::from_raw_parts(self.ptr, self.len) }
    }
}

fn ptr_alignment_ok(ptr: *const u8, alignment: usize) -> bool {
    (ptr as usize) % alignment == 0
}

struct ScanResult {
    found_idx: Option<usize>,
    misaligned_idx: Option<usize>,
    backstop: Option<u64>,
}

fn scan_blocks(entry: &EntryRef, start_offset: u64, length: usize, alignment: usize) -> ScanResult {
    let want_end = start_offset + length as u64;
    let e = entry.borrow();
    let mut found_idx = None;
    let mut misaligned_idx = None;
    let mut backstop = None;

    for (i, b) in e.blocks.iter().enumerate() {
        if found_idx.is_none() && b.start <= start_offset {
            let delta = (start_offset - b.start) as usize;
            let candidate_ptr = unsafe { b.data_ptr().add(delta) };
            if ptr_alignment_ok(candidate_ptr, alignment) && b.capacity_covers(want_end) {
                found_idx = Some(i);
            } else if misaligned_idx.is_none() && b.end() >= want_end {
                misaligned_idx = Some(i);
            }
        }
        if backstop.is_none() && b.start >= want_end {
            backstop = Some(b.start);
        }
        if found_idx.is_some() && backstop.is_some() {
            break;
        }
    }

    ScanResult {
        found_idx,
        misaligned_idx,
        backstop,
    }
}

enum StealRank {
    Orphan = 0,
    OtherNotInUse = 1,
    OtherInUse = 2,
    SameEntry = 3,
}

/// Walk every entry in `cache` looking for a block to repurpose for
/// `needed_capacity` bytes aligned to `alignment`, excluding `exclude`'s own
/// blocks from the two "other entry" ranks (they still count as
/// `SameEntry`, the least preferred rank).
fn steal_block(cache: &BlobCache, exclude: &EntryRef, needed_capacity: usize, alignment: usize) -> Option<Block> {
    let generation = cache.lock_generation();
    let entries: Vec<EntryRef> = cache.inner().borrow().entries.clone();

    let mut best: Option<(u8, u64, EntryRef, usize)> = None; // (rank, lock_gen, entry, block_idx)

    for candidate_entry in &entries {
        let is_same = Rc::ptr_eq(candidate_entry, exclude);
        let (in_use, block_count) = {
            let e = candidate_entry.borrow();
            (e.in_use, e.blocks.len())
        };

        let mut max_end_seen = 0u64;
        for idx in 0..block_count {
            let e = candidate_entry.borrow();
            let b = &e.blocks[idx];
            let is_orphan = b.end() < max_end_seen;
            max_end_seen = max_end_seen.max(b.end());

            if b.is_locked(generation) {
                continue;
            }
            if b.available_capacity_for(alignment) < needed_capacity {
                continue;
            }

            let rank = if is_orphan {
                StealRank::Orphan as u8
            } else if is_same {
                StealRank::SameEntry as u8
            } else if in_use > 0 {
                StealRank::OtherInUse as u8
            } else {
                StealRank::OtherNotInUse as u8
            };

            if rank == StealRank::Orphan as u8 {
                trace!("block stealing: orphan short-circuit");
                return detach_and_realign(candidate_entry, idx, needed_capacity, alignment);
            }

            let lock_gen = b.lock_generation;
            let better = match &best {
                None => true,
                Some((best_rank, best_gen, ..)) => {
                    rank < *best_rank || (rank == *best_rank && lock_gen < *best_gen)
                }
            };
            if better {
                best = Some((rank, lock_gen, candidate_entry.clone(), idx));
            }
        }
    }

    let (_, _, entry, idx) = best?;
    detach_and_realign(&entry, idx, needed_capacity, alignment)
}

fn detach_and_realign(entry: &EntryRef, idx: usize, needed_capacity: usize, alignment: usize) -> Option<Block> {
    let mut block = entry.borrow_mut().blocks.remove(idx);
    if block.realign(0, needed_capacity, alignment) {
        Some(block)
    } else {
        entry.borrow_mut().blocks.push(block);
        None
    }
}

fn allocation_capacity(
    length: usize,
    alignment: usize,
    have_zero_copy: bool,
    backstop: Option<u64>,
    start_offset: u64,
    read_quantum: usize,
    alloc_quantum: usize,
) -> usize {
    let mut cap = length;
    if !have_zero_copy {
        cap = cap.max(read_quantum);
    }
    if let Some(backstop) = backstop {
        let distance = backstop.saturating_sub(start_offset) as usize;
        if distance >= length && distance <= cap {
            cap = distance;
        }
    }
    let q = alloc_quantum.max(1);
    let _ = alignment;
    ((cap + q - 1) / q) * q
}

/// The Frame Engine's sole public operation (spec "the heart" of the
/// design): resolve `[start_offset, start_offset + length)` on `entry`'s
/// source to a contiguous, aligned pointer.
pub fn frame(
    cache: &BlobCache,
    entry: &EntryRef,
    start_offset: u64,
    length: usize,
    alignment: usize,
) -> BlobResult<Frame> {
    if alignment == 0 || !alignment.is_power_of_two() || alignment > BLOB_MAX_ALIGNMENT {
        return Err(BlobError::Invalid(format!("bad alignment {alignment}")));
    }
    if length == 0 {
        return Ok(Frame::null_frame(alignment));
    }
    let want_end = start_offset + length as u64;

    let scan = scan_blocks(entry, start_offset, length, alignment);

    // Phase 2: zero-copy short-circuit.
    let zero_copy: Option<AvailableData> = {
        let e = entry.borrow();
        let result = e.methods.available(e.source.as_ref(), &mut **e.private.borrow_mut(), start_offset);
        result
    };
    if let Some(avail) = zero_copy {
        if avail.len >= length && ptr_alignment_ok(avail.ptr, alignment) {
            return Ok(Frame {
                ptr: avail.ptr,
                len: length,
            });
        }
    }

    // Lock the misaligned block (if any) before any allocation that might
    // trigger stealing elsewhere, so it cannot be stolen out from under us.
    if let (None, Some(midx)) = (scan.found_idx, scan.misaligned_idx) {
        let generation = cache.lock_generation();
        entry.borrow_mut().blocks[midx].lock(generation);
    }

    let (alloc_quantum, read_quantum, data_limit) = {
        let c = cache.inner().borrow();
        (c.alloc_quantum, c.read_quantum, c.data_limit.get())
    };

    let mut block = if let Some(idx) = scan.found_idx {
        entry.borrow_mut().blocks.remove(idx)
    } else {
        let needed = allocation_capacity(
            length,
            alignment,
            zero_copy.is_some(),
            scan.backstop,
            start_offset,
            read_quantum,
            alloc_quantum,
        );
        let over_soft_limit = cache.data_size() as u64 >= data_limit;
        let stolen = if over_soft_limit {
            steal_block(cache, entry, needed, alignment)
        } else {
            None
        };
        match stolen {
            Some(mut b) => {
                b.start = start_offset;
                b
            }
            None => Block::try_new(start_offset, needed, alignment).ok_or(BlobError::Memory)?,
        }
    };

    // Phase 4: populate. `avail` (when present) covers the absolute source
    // range `[start_offset, start_offset + avail.len)`.
    let mut filled_from_zero_copy = false;
    if let Some(avail) = zero_copy {
        let avail_start = start_offset;
        let avail_end = start_offset + avail.len as u64;
        let overlap_start = block.end().max(avail_start);
        let overlap_end = block.alloc_end().min(avail_end);
        if overlap_end > overlap_start {
            let src_offset = (overlap_start - avail_start) as usize;
            let copy_len = (overlap_end - overlap_start) as usize;
            let write_at = (overlap_start - block.start) as usize;
            // SAFETY: `avail.ptr` is valid for `avail.len` bytes per the
            // source methods contract; `src_offset + copy_len <= avail.len`.
            let src = unsafe { std::slice::from_raw_parts(avail.ptr.add(src_offset), copy_len) };
            block.write_payload(write_at, src);
            filled_from_zero_copy = true;
        }
    }

    if block.end() < want_end {
        if let (None, Some(midx)) = (scan.found_idx, scan.misaligned_idx) {
            let (src_start, copy): (u64, Vec<u8>) = {
                let e = entry.borrow();
                let m = &e.blocks[midx];
                let overlap_start = block.end().max(m.start);
                let overlap_end = block.alloc_end().min(m.end());
                if overlap_end > overlap_start {
                    let off = (overlap_start - m.start) as usize;
                    let len = (overlap_end - overlap_start) as usize;
                    (overlap_start, m.valid_slice()[off..off + len].to_vec())
                } else {
                    (overlap_start, Vec::new())
                }
            };
            if !copy.is_empty() {
                let write_at = (src_start - block.start) as usize;
                block.write_payload(write_at, &copy);
            }
        }
    }

    if block.end() < want_end {
        let round_to = if filled_from_zero_copy { 1 } else { read_quantum.max(1) };
        let mut want_read_end = if round_to > 1 {
            let rounded = ((want_end as usize + round_to - 1) / round_to) * round_to;
            rounded as u64
        } else {
            want_end
        };
        if let Some(backstop) = scan.backstop {
            want_read_end = want_read_end.min(backstop);
        }
        want_read_end = want_read_end.min(block.alloc_end());
        let at = block.end();
        if want_read_end > at {
            let read_len = (want_read_end - at) as usize;
            let mut buf = vec![0u8; read_len];
            let got = {
                let e = entry.borrow();
                let result = e.methods.read(e.source.as_ref(), &mut **e.private.borrow_mut(), &mut buf, at);
                result
            };
            if got > 0 {
                let write_at = (at - block.start) as usize;
                block.write_payload(write_at, &buf[..got]);
            }
        }
    }

    if block.end() < want_end {
        return Err(BlobError::EndOfData);
    }

    let generation = cache.lock_generation();
    block.lock(generation);
    let data_ptr = block.data_ptr();
    let delta = (start_offset - block.start) as usize;
    crate::entry::reinsert_block(entry, block);
    recompute_data_size(cache.inner());

    Ok(Frame {
        ptr: unsafe { data_ptr.add(delta) },
        len: length,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::demo_source::MemorySource;
    use crate::entry::open_entry;
    use crate::mode::ModeFlags;

    fn setup(data: &[u8]) -> (BlobCache, EntryRef) {
        let cache = BlobCache::init("frame-test", 1 << 20, 16, 64, 4);
        let (source, methods) = MemorySource::new(data.to_vec());
        let entry = open_entry(cache.inner(), &source, methods, ModeFlags::RDONLY).unwrap();
        (cache, entry)
    }

    #[test]
    fn frame_of_zero_length_is_null_and_aligned() {
        let (cache, entry) = setup(b"hello world");
        let f = frame(&cache, &entry, 0, 0, 4).unwrap();
        assert!(f.is_null());
        assert_eq!(f.as_slice().len(), 0);
        assert_eq!((&f as *const Frame as usize), (&f as *const Frame as usize));
    }

    #[test]
    fn frame_reads_requested_range() {
        let (cache, entry) = setup(b"0123456789abcdef");
        let f = frame(&cache, &entry, 2, 4, 1).unwrap();
        assert_eq!(f.as_slice(), b"2345");
    }

    #[test]
    fn repeated_frame_calls_reuse_blocks() {
        let (cache, entry) = setup(b"0123456789abcdef");
        let f1 = frame(&cache, &entry, 0, 4, 1).unwrap();
        assert_eq!(f1.as_slice(), b"0123");
        let f2 = frame(&cache, &entry, 0, 8, 1).unwrap();
        assert_eq!(f2.as_slice(), b"01234567");
        assert_eq!(entry.borrow().blocks.len(), 1);
    }

    #[test]
    fn frame_past_end_of_data_fails() {
        let (cache, entry) = setup(b"short");
        let err = frame(&cache, &entry, 0, 100, 1).unwrap_err();
        assert!(matches!(err, BlobError::EndOfData));
    }

    #[test]
    fn frame_rejects_bad_alignment() {
        let (cache, entry) = setup(b"0123456789");
        let err = frame(&cache, &entry, 0, 4, 3).unwrap_err();
        assert!(matches!(err, BlobError::Invalid(_)));
    }
}
