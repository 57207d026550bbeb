//! Block ubuf: an ordered byte sequence backed by a list of shared segments.
//!
//! A block ubuf is, internally, exactly what spec §4.2's "block shared
//! tail" algorithm describes: a list of `(shared-umem, offset, length)`
//! segments. We get that list for free by storing `Vec<bytes::Bytes>` -
//! each `Bytes` already *is* a shared-umem-plus-offset-plus-length triple,
//! with an atomic refcount on the backing allocation. `dup` clones the
//! `Vec` (incrementing each segment's refcount, no copy); `splice` slices
//! segments (again no copy, even across segment boundaries); `append`
//! pushes a segment. Only `map_write` needs the underlying allocation to be
//! singly-owned, which `Bytes::try_into_mut` checks directly.

use std::sync::Arc;

use bytes::{Bytes, BytesMut};

use crate::error::{CoreError, Result};
use crate::umem::UMemManager;

use super::{MapTracker, Range};

/// An ordered, segmented byte buffer with O(segments) (not O(bytes))
/// prepend/append/splice.
pub struct BlockUbuf {
    segments: Vec<Bytes>,
    manager: Arc<dyn UMemManager>,
    map_tracker: MapTracker,
    /// Set while a `map_write` is outstanding: `(segment index, taken-out
    /// buffer)`. The segment is spliced back in (frozen) on `unmap_write`.
    pending_write: Option<(usize, BytesMut)>,
}

impl BlockUbuf {
    /// Allocate a new block ubuf of `size` bytes from `manager`.
    pub fn alloc(manager: Arc<dyn UMemManager>, size: usize) -> Result<Self> {
        let buf = manager.alloc(size)?;
        Ok(Self {
            segments: vec![buf.freeze()],
            manager,
            map_tracker: MapTracker::default(),
            pending_write: None,
        })
    }

    fn zero_filled(&self, size: usize) -> Result<Bytes> {
        Ok(self.manager.alloc(size)?.freeze())
    }

    /// Total size in bytes across all segments.
    pub fn size(&self) -> usize {
        self.segments.iter().map(Bytes::len).sum()
    }

    /// Number of backing segments. Exposed for tests/diagnostics: callers
    /// should not depend on a particular segmentation.
    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    /// Duplicate: new header, same shared segments (cheap refcount bumps).
    pub fn dup(&self) -> Self {
        Self {
            segments: self.segments.clone(),
            manager: self.manager.clone(),
            map_tracker: MapTracker::default(),
            pending_write: None,
        }
    }

    /// Deep copy: always allocates fresh storage and copies every byte.
    pub fn deep_copy(&self) -> Result<Self> {
        let size = self.size();
        let mut fresh = self.manager.alloc(size)?;
        let mut offset = 0;
        for seg in &self.segments {
            fresh[offset..offset + seg.len()].copy_from_slice(seg);
            offset += seg.len();
        }
        Ok(Self {
            segments: vec![fresh.freeze()],
            manager: self.manager.clone(),
            map_tracker: MapTracker::default(),
            pending_write: None,
        })
    }

    /// Locate the single segment fully covering `[start, end)`, if any.
    fn find_contiguous(&self, start: usize, end: usize) -> Result<(usize, usize, usize)> {
        let mut cursor = 0;
        for (idx, seg) in self.segments.iter().enumerate() {
            let seg_start = cursor;
            let seg_end = cursor + seg.len();
            if start >= seg_start && end <= seg_end {
                return Ok((idx, start - seg_start, end - seg_start));
            }
            cursor = seg_end;
        }
        Err(CoreError::NotContiguous)
    }

    /// Map a range for reading. Fails with [`CoreError::NotContiguous`] if
    /// the range crosses a segment boundary - per spec, the caller must
    /// iterate ([`Self::chunks`]) instead.
    pub fn map_read(&self, range: Range) -> Result<&[u8]> {
        let (start, end) = range.resolve(self.size())?;
        let (idx, local_start, local_end) = self.find_contiguous(start, end)?;
        self.map_tracker.begin_read();
        Ok(&self.segments[idx][local_start..local_end])
    }

    /// Release a mapping obtained from [`Self::map_read`].
    pub fn unmap_read(&self) {
        self.map_tracker.end_read();
    }

    /// Map a range for writing. Fails with [`CoreError::Busy`] if the
    /// covering segment's payload is shared with another ubuf.
    pub fn map_write(&mut self, range: Range) -> Result<&mut [u8]> {
        if self.pending_write.is_some() {
            return Err(CoreError::Mapping("map_write already outstanding".into()));
        }
        let (start, end) = range.resolve(self.size())?;
        let (idx, local_start, local_end) = self.find_contiguous(start, end)?;

        let taken = self.segments[idx].clone();
        let owned = taken.try_into_mut().map_err(|_| CoreError::Busy)?;
        self.map_tracker.begin_write();
        self.pending_write = Some((idx, owned));
        Ok(&mut self.pending_write.as_mut().expect("just inserted").1[local_start..local_end])
    }

    /// Release a mapping obtained from [`Self::map_write`], freezing the
    /// mutated segment back into the shared segment list.
    pub fn unmap_write(&mut self) -> Result<()> {
        let (idx, buf) = self
            .pending_write
            .take()
            .ok_or_else(|| CoreError::Mapping("unmap_write without a matching map_write".into()))?;
        self.segments[idx] = buf.freeze();
        self.map_tracker.end_write();
        Ok(())
    }

    /// True if no mapping is currently outstanding.
    pub fn is_idle(&self) -> bool {
        self.map_tracker.is_idle() && self.pending_write.is_none()
    }

    /// Iterate over the contiguous chunks covering `range`, for callers
    /// that can process a buffer piecewise instead of requiring contiguity.
    pub fn chunks(&self, range: Range) -> Result<Vec<&[u8]>> {
        let (start, end) = range.resolve(self.size())?;
        let mut out = Vec::new();
        let mut cursor = 0;
        for seg in &self.segments {
            let seg_start = cursor;
            let seg_end = cursor + seg.len();
            cursor = seg_end;
            if seg_end <= start || seg_start >= end {
                continue;
            }
            let lo = start.max(seg_start) - seg_start;
            let hi = end.min(seg_end) - seg_start;
            out.push(&seg[lo..hi]);
        }
        Ok(out)
    }

    /// Resize, optionally trimming/growing from the front.
    ///
    /// `skip > 0` drops `skip` bytes from the front; `skip < 0` prepends
    /// `-skip` zero-filled bytes (a fresh segment, pushed to the front of
    /// the segment list - see module docs). After applying `skip`, the
    /// buffer is truncated or zero-extended at the tail to exactly
    /// `new_size`.
    pub fn resize(&mut self, new_size: usize, skip: isize) -> Result<()> {
        if !self.is_idle() {
            return Err(CoreError::Mapping("resize while a mapping is outstanding".into()));
        }

        if skip > 0 {
            self.trim_front(skip as usize)?;
        } else if skip < 0 {
            let head = self.zero_filled((-skip) as usize)?;
            self.segments.insert(0, head);
        }

        let current = self.size();
        match current.cmp(&new_size) {
            std::cmp::Ordering::Greater => self.trim_back(current - new_size)?,
            std::cmp::Ordering::Less => {
                let tail = self.zero_filled(new_size - current)?;
                self.segments.push(tail);
            }
            std::cmp::Ordering::Equal => {}
        }
        Ok(())
    }

    fn trim_front(&mut self, mut n: usize) -> Result<()> {
        while n > 0 {
            let Some(first) = self.segments.first_mut() else {
                return Err(CoreError::Invalid("trim exceeds buffer size".into()));
            };
            if first.len() <= n {
                n -= first.len();
                self.segments.remove(0);
            } else {
                *first = first.slice(n..);
                n = 0;
            }
        }
        Ok(())
    }

    fn trim_back(&mut self, mut n: usize) -> Result<()> {
        while n > 0 {
            let Some(last) = self.segments.last_mut() else {
                return Err(CoreError::Invalid("trim exceeds buffer size".into()));
            };
            if last.len() <= n {
                n -= last.len();
                self.segments.pop();
            } else {
                let keep = last.len() - n;
                *last = last.slice(..keep);
                n = 0;
            }
        }
        Ok(())
    }

    /// Extract a new ubuf sharing `[offset, offset+size)` of this one's
    /// payload, without copying, even if the range spans several segments.
    pub fn splice(&self, offset: usize, size: usize) -> Result<Self> {
        let (start, end) = Range::bounded(offset, size).resolve(self.size())?;
        let mut out = Vec::new();
        let mut cursor = 0;
        for seg in &self.segments {
            let seg_start = cursor;
            let seg_end = cursor + seg.len();
            cursor = seg_end;
            if seg_end <= start || seg_start >= end {
                continue;
            }
            let lo = start.max(seg_start) - seg_start;
            let hi = end.min(seg_end) - seg_start;
            out.push(seg.slice(lo..hi));
        }
        Ok(Self {
            segments: out,
            manager: self.manager.clone(),
            map_tracker: MapTracker::default(),
            pending_write: None,
        })
    }

    /// Append another block ubuf's segments to this one's tail. Always
    /// O(segments): our segment-list representation never needs the
    /// appended payload to be unshared (a stronger guarantee than the
    /// spec's "cheap when not shared" - see DESIGN.md).
    pub fn append(&mut self, other: Self) {
        self.segments.extend(other.segments);
    }

    /// Copy this ubuf's bytes into a fresh, contiguous `Vec<u8>`. Mainly
    /// useful for tests and for callers that must hand a slice to legacy
    /// APIs that cannot iterate segments.
    pub fn to_contiguous_vec(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.size());
        for seg in &self.segments {
            out.extend_from_slice(seg);
        }
        out
    }
}

impl std::fmt::Debug for BlockUbuf {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockUbuf")
            .field("size", &self.size())
            .field("segments", &self.segments.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::umem::MallocUMemManager;

    fn mgr() -> Arc<dyn UMemManager> {
        MallocUMemManager::new()
    }

    #[test]
    fn alloc_and_size() {
        let b = BlockUbuf::alloc(mgr(), 16).unwrap();
        assert_eq!(b.size(), 16);
        assert_eq!(b.segment_count(), 1);
    }

    #[test]
    fn dup_shares_payload_and_is_independent_header() {
        let mut a = BlockUbuf::alloc(mgr(), 4).unwrap();
        {
            let w = a.map_write(Range::all()).unwrap();
            w.copy_from_slice(&[1, 2, 3, 4]);
        }
        a.unmap_write().unwrap();

        let b = a.dup();
        assert_eq!(b.to_contiguous_vec(), vec![1, 2, 3, 4]);

        // Writing through `a` again must not affect the bytes already read
        // out of `b` independently (S4/invariant 4 of the spec).
        let snapshot = b.to_contiguous_vec();
        {
            let w = a.map_write(Range::all()).unwrap();
            w.copy_from_slice(&[9, 9, 9, 9]);
        }
        a.unmap_write().unwrap();
        assert_eq!(b.to_contiguous_vec(), snapshot);
    }

    #[test]
    fn map_write_fails_busy_when_shared() {
        let mut a = BlockUbuf::alloc(mgr(), 4).unwrap();
        let _b = a.dup();
        assert!(matches!(a.map_write(Range::all()), Err(CoreError::Busy)));
    }

    #[test]
    fn map_write_succeeds_after_duplicate_is_dropped() {
        let mut a = BlockUbuf::alloc(mgr(), 4).unwrap();
        let b = a.dup();
        drop(b);
        assert!(a.map_write(Range::all()).is_ok());
    }

    #[test]
    fn unmap_read_without_map_panics_in_debug() {
        let a = BlockUbuf::alloc(mgr(), 4).unwrap();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| a.unmap_read()));
        if cfg!(debug_assertions) {
            assert!(result.is_err());
        }
    }

    #[test]
    fn resize_grows_and_shrinks() {
        let mut b = BlockUbuf::alloc(mgr(), 4).unwrap();
        b.resize(8, 0).unwrap();
        assert_eq!(b.size(), 8);
        b.resize(2, 0).unwrap();
        assert_eq!(b.size(), 2);
    }

    #[test]
    fn resize_skip_trims_front() {
        let mut b = BlockUbuf::alloc(mgr(), 4).unwrap();
        {
            let w = b.map_write(Range::all()).unwrap();
            w.copy_from_slice(&[1, 2, 3, 4]);
        }
        b.unmap_write().unwrap();
        b.resize(2, 2).unwrap();
        assert_eq!(b.to_contiguous_vec(), vec![3, 4]);
    }

    #[test]
    fn resize_negative_skip_prepends() {
        let mut b = BlockUbuf::alloc(mgr(), 2).unwrap();
        {
            let w = b.map_write(Range::all()).unwrap();
            w.copy_from_slice(&[5, 6]);
        }
        b.unmap_write().unwrap();
        b.resize(4, -2).unwrap();
        assert_eq!(b.to_contiguous_vec(), vec![0, 0, 5, 6]);
    }

    #[test]
    fn resize_preserves_surviving_byte_identity() {
        let mut b = BlockUbuf::alloc(mgr(), 4).unwrap();
        {
            let w = b.map_write(Range::all()).unwrap();
            w.copy_from_slice(&[1, 2, 3, 4]);
        }
        b.unmap_write().unwrap();
        b.resize(3, 0).unwrap();
        assert_eq!(b.to_contiguous_vec(), vec![1, 2, 3]);
    }

    #[test]
    fn splice_is_zero_copy_and_shares_payload() {
        let mut b = BlockUbuf::alloc(mgr(), 6).unwrap();
        {
            let w = b.map_write(Range::all()).unwrap();
            w.copy_from_slice(&[1, 2, 3, 4, 5, 6]);
        }
        b.unmap_write().unwrap();

        let s = b.splice(2, 3).unwrap();
        assert_eq!(s.to_contiguous_vec(), vec![3, 4, 5]);
        // splicing shares the payload: map_write on the original must now
        // observe the splice as another owner.
        assert!(matches!(b.map_write(Range::all()), Err(CoreError::Busy)));
    }

    #[test]
    fn append_concatenates_segments() {
        let mut a = BlockUbuf::alloc(mgr(), 2).unwrap();
        {
            let w = a.map_write(Range::all()).unwrap();
            w.copy_from_slice(&[1, 2]);
        }
        a.unmap_write().unwrap();

        let mut b = BlockUbuf::alloc(mgr(), 2).unwrap();
        {
            let w = b.map_write(Range::all()).unwrap();
            w.copy_from_slice(&[3, 4]);
        }
        b.unmap_write().unwrap();

        a.append(b);
        assert_eq!(a.size(), 4);
        assert_eq!(a.to_contiguous_vec(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn map_read_across_segments_requires_iteration() {
        let mut a = BlockUbuf::alloc(mgr(), 2).unwrap();
        let b = BlockUbuf::alloc(mgr(), 2).unwrap();
        a.append(b);
        assert_eq!(a.segment_count(), 2);
        assert!(matches!(a.map_read(Range::all()), Err(CoreError::NotContiguous)));
        assert_eq!(a.chunks(Range::all()).unwrap().len(), 2);
    }

    #[test]
    fn empty_block_has_zero_size() {
        let b = BlockUbuf::alloc(mgr(), 0).unwrap();
        assert_eq!(b.size(), 0);
        assert_eq!(b.to_contiguous_vec(), Vec::<u8>::new());
    }
}
