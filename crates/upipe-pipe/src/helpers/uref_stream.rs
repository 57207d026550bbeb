//! Uref-stream helper (spec §4.6): concatenates successive block urefs into
//! one continuous byte stream, for pipes (parsers, framers) that need to
//! read a number of bytes without caring where uref boundaries fell.
//!
//! Grounded on `upipe_helper_ubuf_mgr.h`/stream-parser pipes in
//! `original_source/` (e.g. the TS demux's `upipe_ts_psi_append`): frames
//! rarely line up with the urefs delivered by the pipe upstream, so a
//! parser keeps a FIFO of not-yet-consumed segments and presents them to
//! its caller as `consume`/`extract` over a single logical offset. Built on
//! [`BlockUbuf::splice`]/[`BlockUbuf::append`], both zero-copy.

use std::collections::VecDeque;

use parking_lot::Mutex;
use upipe_core::ubuf::{BlockUbuf, Ubuf};
use upipe_core::uref::Uref;

use crate::error::{PipeError, Result};

struct Segment {
    block: BlockUbuf,
    consumed: usize,
    /// Attributes (flow id, timestamps, ...) carried by the uref this
    /// segment came from, preserved so [`UrefStreamHelper::extract`] can
    /// stamp the first touched segment's metadata onto the output.
    attrs: Uref,
}

impl Segment {
    fn remaining(&self) -> usize {
        self.block.size() - self.consumed
    }
}

/// A FIFO of block urefs presented as one continuous, seekable byte stream.
pub struct UrefStreamHelper {
    segments: Mutex<VecDeque<Segment>>,
}

impl UrefStreamHelper {
    pub fn new() -> Self {
        Self { segments: Mutex::new(VecDeque::new()) }
    }

    /// Append a uref's block payload to the tail of the stream. The uref's
    /// attributes are retained (stripped of its payload) for later use by
    /// [`Self::extract`]; `uref` must carry a [`upipe_core::ubuf::Ubuf::Block`].
    pub fn append(&self, mut uref: Uref) -> Result<()> {
        let ubuf = uref
            .take_ubuf()
            .ok_or_else(|| PipeError::Invalid("uref-stream append requires a payload".into()))?;
        let block = match ubuf {
            Ubuf::Block(b) => b,
            _ => return Err(PipeError::Invalid("uref-stream only accepts block ubufs".into())),
        };
        self.segments.lock().push_back(Segment { block, consumed: 0, attrs: uref });
        Ok(())
    }

    /// Total unconsumed bytes currently buffered.
    pub fn available(&self) -> usize {
        self.segments.lock().iter().map(Segment::remaining).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.available() == 0
    }

    /// Advance the read position by `n` bytes without copying anything,
    /// dropping segments that become fully consumed. Fails if `n` exceeds
    /// the buffered length.
    pub fn consume(&self, mut n: usize) -> Result<()> {
        let mut segments = self.segments.lock();
        while n > 0 {
            let Some(front) = segments.front_mut() else {
                return Err(PipeError::Invalid("consume exceeds buffered length".into()));
            };
            let avail = front.remaining();
            if avail <= n {
                n -= avail;
                segments.pop_front();
            } else {
                front.consumed += n;
                n = 0;
            }
        }
        Ok(())
    }

    /// Build a new uref covering the next `n` unconsumed bytes, without
    /// copying (each contributing segment is [`BlockUbuf::splice`]d out and
    /// [`BlockUbuf::append`]ed together). Does not advance the read
    /// position; pair with [`Self::consume`] to do both. The returned
    /// uref's attributes come from whichever buffered uref the extracted
    /// range starts in.
    pub fn extract(&self, mut n: usize) -> Result<Uref> {
        let segments = self.segments.lock();
        let mut out: Option<BlockUbuf> = None;
        let mut attrs: Option<Uref> = None;
        for seg in segments.iter() {
            if n == 0 {
                break;
            }
            let avail = seg.remaining();
            if avail == 0 {
                continue;
            }
            let take = avail.min(n);
            let piece = seg.block.splice(seg.consumed, take)?;
            if attrs.is_none() {
                attrs = Some(seg.attrs.dup());
            }
            out = Some(match out {
                None => piece,
                Some(mut acc) => {
                    acc.append(piece);
                    acc
                }
            });
            n -= take;
        }
        if n > 0 {
            return Err(PipeError::Invalid("extract exceeds buffered length".into()));
        }
        let mut result = attrs.unwrap_or_else(Uref::new);
        result.set_ubuf(Ubuf::Block(out.unwrap_or(BlockUbuf::alloc(
            upipe_core::umem::MallocUMemManager::new(),
            0,
        )?)));
        Ok(result)
    }

    /// Consume and return the next `n` bytes in one call.
    pub fn extract_and_consume(&self, n: usize) -> Result<Uref> {
        let result = self.extract(n)?;
        self.consume(n)?;
        Ok(result)
    }
}

impl Default for UrefStreamHelper {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for UrefStreamHelper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UrefStreamHelper").field("available", &self.available()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use upipe_core::umem::MallocUMemManager;

    fn block_uref(bytes: &[u8]) -> Uref {
        let mgr = MallocUMemManager::new();
        let mut block = BlockUbuf::alloc(mgr, bytes.len()).unwrap();
        {
            let w = block.map_write(upipe_core::ubuf::Range::all()).unwrap();
            w.copy_from_slice(bytes);
        }
        block.unmap_write().unwrap();
        let mut uref = Uref::new();
        uref.set_flow_id(7);
        uref.set_ubuf(Ubuf::Block(block));
        uref
    }

    #[test]
    fn extract_spans_multiple_appended_urefs() {
        let stream = UrefStreamHelper::new();
        stream.append(block_uref(&[1, 2, 3])).unwrap();
        stream.append(block_uref(&[4, 5, 6])).unwrap();
        assert_eq!(stream.available(), 6);

        let out = stream.extract(5).unwrap();
        let block = out.ubuf().unwrap().as_block().unwrap();
        assert_eq!(block.to_contiguous_vec(), vec![1, 2, 3, 4, 5]);
        assert_eq!(out.flow_id(), Some(7));
        // extract does not consume.
        assert_eq!(stream.available(), 6);
    }

    #[test]
    fn consume_drops_fully_spent_segments_and_trims_partial_ones() {
        let stream = UrefStreamHelper::new();
        stream.append(block_uref(&[1, 2, 3])).unwrap();
        stream.append(block_uref(&[4, 5, 6])).unwrap();

        stream.consume(4).unwrap();
        assert_eq!(stream.available(), 2);
        let rest = stream.extract(2).unwrap();
        assert_eq!(rest.ubuf().unwrap().as_block().unwrap().to_contiguous_vec(), vec![5, 6]);
    }

    #[test]
    fn extract_and_consume_exceeding_buffer_errors() {
        let stream = UrefStreamHelper::new();
        stream.append(block_uref(&[1, 2])).unwrap();
        assert!(stream.extract(5).is_err());
        assert!(stream.consume(5).is_err());
    }

    #[test]
    fn extract_and_consume_combined_advances_read_position() {
        let stream = UrefStreamHelper::new();
        stream.append(block_uref(&[1, 2, 3, 4])).unwrap();
        let first = stream.extract_and_consume(2).unwrap();
        assert_eq!(first.ubuf().unwrap().as_block().unwrap().to_contiguous_vec(), vec![1, 2]);
        assert_eq!(stream.available(), 2);
        let second = stream.extract_and_consume(2).unwrap();
        assert_eq!(second.ubuf().unwrap().as_block().unwrap().to_contiguous_vec(), vec![3, 4]);
        assert!(stream.is_empty());
    }
}
