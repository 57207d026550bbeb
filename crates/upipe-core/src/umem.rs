//! umem: raw memory regions obtained from a refcounted allocator.
//!
//! A [`UMem`] is a handle to a block of raw bytes. It is backed by
//! [`bytes::BytesMut`] so the rest of the stack (in particular
//! [`crate::ubuf::block`]) gets zero-copy slicing and a built-in
//! uniqueness check ([`bytes::Bytes::try_into_mut`]) for free instead of
//! hand-rolling a shared-segment scheme.
//!
//! Managers are themselves refcounted ([`UMemManager`] is `Arc`-shared by
//! every `UMem` it produces) so that outstanding buffers keep their
//! allocator - and its pool - alive even after every other handle to the
//! manager has been dropped.

use std::fmt;
use std::sync::Arc;

use bytes::BytesMut;
use parking_lot::Mutex;

use crate::error::{CoreError, Result};

/// Factory for [`UMem`] regions.
///
/// Two implementations are provided: [`MallocUMemManager`] (always
/// heap-allocates, no pooling) and [`PoolUMemManager`] (a two-size-class
/// free list, grounded on `ubuf_block.c`'s `small_pool`/`big_pool` split).
pub trait UMemManager: Send + Sync + fmt::Debug {
    /// Allocate a region of at least `size` bytes.
    fn alloc(&self, size: usize) -> Result<BytesMut>;

    /// Return a no-longer-used region to the manager. The default
    /// implementation just drops it; pooling managers override this to
    /// recycle the allocation instead of freeing it.
    fn recycle(&self, _buf: BytesMut) {}
}

/// A handle to a raw memory region.
///
/// Dropping the last `UMem` recycles (or frees) the backing storage via the
/// manager that produced it, and releases the manager's keep-alive
/// reference.
pub struct UMem {
    buf: Option<BytesMut>,
    manager: Arc<dyn UMemManager>,
}

impl UMem {
    /// Allocate a new region of `size` bytes from `manager`.
    pub fn alloc(manager: Arc<dyn UMemManager>, size: usize) -> Result<Self> {
        let buf = manager.alloc(size)?;
        Ok(Self {
            buf: Some(buf),
            manager,
        })
    }

    /// Borrow the region as a mutable byte slice.
    pub fn as_mut_bytes(&mut self) -> &mut BytesMut {
        self.buf.as_mut().expect("UMem buffer taken before drop")
    }

    /// Borrow the region as a byte slice.
    pub fn as_bytes(&self) -> &BytesMut {
        self.buf.as_ref().expect("UMem buffer taken before drop")
    }

    /// Size of the region in bytes.
    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    /// True if the region is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The manager that owns this region's pool.
    pub fn manager(&self) -> &Arc<dyn UMemManager> {
        &self.manager
    }
}

impl Drop for UMem {
    fn drop(&mut self) {
        if let Some(buf) = self.buf.take() {
            self.manager.recycle(buf);
        }
    }
}

impl fmt::Debug for UMem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UMem").field("len", &self.len()).finish()
    }
}

/// An allocator that always heap-allocates and never pools.
///
/// The simplest possible manager; suitable for low-frequency allocation or
/// as a baseline to compare pooled managers against.
#[derive(Debug, Default)]
pub struct MallocUMemManager;

impl MallocUMemManager {
    /// Create a new malloc-backed manager.
    pub fn new() -> Arc<Self> {
        Arc::new(Self)
    }
}

impl UMemManager for MallocUMemManager {
    fn alloc(&self, size: usize) -> Result<BytesMut> {
        if size > isize::MAX as usize {
            return Err(CoreError::Allocation { requested: size });
        }
        let mut buf = BytesMut::with_capacity(size);
        buf.resize(size, 0);
        Ok(buf)
    }
}

/// A size-classed pool: allocations at or below `threshold` bytes recycle
/// through a small-buffer free list, larger ones through a separate
/// big-buffer free list, mirroring `ubuf_block_mgr`'s `small_pool`/
/// `big_pool` split. Buffers returned to the pool are reused (after being
/// cleared and resized) rather than freed, up to `max_pooled` entries per
/// class.
pub struct PoolUMemManager {
    threshold: usize,
    max_pooled: usize,
    small_pool: Mutex<Vec<BytesMut>>,
    big_pool: Mutex<Vec<BytesMut>>,
}

impl PoolUMemManager {
    /// Create a pool manager. `threshold` is the size (inclusive) below
    /// which allocations use the small-buffer free list; `max_pooled` caps
    /// how many freed buffers are retained per class before they are
    /// dropped for real.
    pub fn new(threshold: usize, max_pooled: usize) -> Arc<Self> {
        Arc::new(Self {
            threshold,
            max_pooled,
            small_pool: Mutex::new(Vec::new()),
            big_pool: Mutex::new(Vec::new()),
        })
    }

    fn pool_for(&self, size: usize) -> &Mutex<Vec<BytesMut>> {
        if size <= self.threshold {
            &self.small_pool
        } else {
            &self.big_pool
        }
    }

    /// Number of buffers currently held in each pool, `(small, big)`. For
    /// tests and diagnostics.
    pub fn pooled_counts(&self) -> (usize, usize) {
        (self.small_pool.lock().len(), self.big_pool.lock().len())
    }
}

impl fmt::Debug for PoolUMemManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (small, big) = self.pooled_counts();
        f.debug_struct("PoolUMemManager")
            .field("threshold", &self.threshold)
            .field("pooled_small", &small)
            .field("pooled_big", &big)
            .finish()
    }
}

impl UMemManager for PoolUMemManager {
    fn alloc(&self, size: usize) -> Result<BytesMut> {
        let pool = self.pool_for(size);
        let mut guard = pool.lock();
        if let Some(pos) = guard.iter().position(|b| b.capacity() >= size) {
            let mut buf = guard.swap_remove(pos);
            buf.clear();
            buf.resize(size, 0);
            return Ok(buf);
        }
        drop(guard);

        if size > isize::MAX as usize {
            return Err(CoreError::Allocation { requested: size });
        }
        let mut buf = BytesMut::with_capacity(size.max(self.threshold));
        buf.resize(size, 0);
        Ok(buf)
    }

    fn recycle(&self, buf: BytesMut) {
        let pool = self.pool_for(buf.capacity());
        let mut guard = pool.lock();
        if guard.len() < self.max_pooled {
            guard.push(buf);
        }
    }
}
