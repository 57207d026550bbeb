//! Picture ubuf: one or more chroma planes with sub-sampling and stride.
//!
//! Unlike [`super::block::BlockUbuf`], a picture has no `resize`/`splice`/
//! `append` - its dimensions are fixed at allocation. Only dup, deep-copy,
//! and map-read/map-write/unmap apply (per spec §4.2, picture and sound
//! share a narrower operation set than block).

use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};

use crate::error::{CoreError, Result};
use crate::umem::UMemManager;

use super::MapTracker;

/// Identifies a chroma plane (`"y8"`, `"u8"`, `"v8"`, ...). Opaque to this
/// crate; pipes agree on the set of tags a given picture flow format uses.
pub type ChromaTag = Arc<str>;

/// One plane of a [`PictureUbuf`]: its own backing bytes, stride, and
/// horizontal/vertical sub-sampling relative to the picture's luma
/// dimensions.
#[derive(Clone)]
pub struct ChromaPlane {
    data: Bytes,
    /// Bytes per row.
    stride: usize,
    /// Horizontal sub-sampling factor (1 = no sub-sampling, 2 = half).
    hsub: u8,
    /// Vertical sub-sampling factor.
    vsub: u8,
    /// Size in bytes of one macropixel, for packed formats.
    macropixel_size: u8,
}

impl ChromaPlane {
    /// Bytes per row.
    pub fn stride(&self) -> usize {
        self.stride
    }

    /// Horizontal sub-sampling factor.
    pub fn hsub(&self) -> u8 {
        self.hsub
    }

    /// Vertical sub-sampling factor.
    pub fn vsub(&self) -> u8 {
        self.vsub
    }

    /// Macropixel size in bytes.
    pub fn macropixel_size(&self) -> u8 {
        self.macropixel_size
    }

    /// Size of this plane's storage in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }
}

impl std::fmt::Debug for ChromaPlane {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChromaPlane")
            .field("len", &self.data.len())
            .field("stride", &self.stride)
            .field("hsub", &self.hsub)
            .field("vsub", &self.vsub)
            .finish()
    }
}

/// A picture, as a named set of chroma planes plus the luma dimensions that
/// planes' sub-sampling is relative to.
pub struct PictureUbuf {
    hsize: usize,
    vsize: usize,
    planes: BTreeMap<ChromaTag, ChromaPlane>,
    manager: Arc<dyn UMemManager>,
    map_tracker: MapTracker,
    /// Set while a `map_write` is outstanding: the plane being written, with
    /// its bytes taken out and made mutable. Put back (frozen) on
    /// `unmap_write`.
    pending_write: Option<(ChromaTag, BytesMut)>,
}

impl PictureUbuf {
    /// Begin building a picture of `hsize` x `vsize` luma pixels.
    pub fn builder(manager: Arc<dyn UMemManager>, hsize: usize, vsize: usize) -> PictureBuilder {
        PictureBuilder {
            manager,
            hsize,
            vsize,
            planes: BTreeMap::new(),
        }
    }

    /// Horizontal size in luma pixels.
    pub fn hsize(&self) -> usize {
        self.hsize
    }

    /// Vertical size in luma pixels.
    pub fn vsize(&self) -> usize {
        self.vsize
    }

    /// Plane tags present on this picture.
    pub fn plane_tags(&self) -> impl Iterator<Item = &ChromaTag> {
        self.planes.keys()
    }

    /// Borrow a plane's descriptor (stride/sub-sampling), without mapping.
    pub fn plane(&self, tag: &str) -> Option<&ChromaPlane> {
        self.planes.get(tag)
    }

    /// Duplicate: new header, same shared plane payloads.
    pub fn dup(&self) -> Self {
        Self {
            hsize: self.hsize,
            vsize: self.vsize,
            planes: self.planes.clone(),
            manager: self.manager.clone(),
            map_tracker: MapTracker::default(),
            pending_write: None,
        }
    }

    /// Deep copy: fresh storage for every plane.
    pub fn deep_copy(&self) -> Result<Self> {
        let mut planes = BTreeMap::new();
        for (tag, plane) in &self.planes {
            let mut fresh = self.manager.alloc(plane.data.len())?;
            fresh.copy_from_slice(&plane.data);
            planes.insert(
                tag.clone(),
                ChromaPlane {
                    data: fresh.freeze(),
                    stride: plane.stride,
                    hsub: plane.hsub,
                    vsub: plane.vsub,
                    macropixel_size: plane.macropixel_size,
                },
            );
        }
        Ok(Self {
            hsize: self.hsize,
            vsize: self.vsize,
            planes,
            manager: self.manager.clone(),
            map_tracker: MapTracker::default(),
            pending_write: None,
        })
    }

    /// Map a plane's full extent for reading.
    pub fn map_read(&self, tag: &str) -> Result<&[u8]> {
        let plane = self
            .planes
            .get(tag)
            .ok_or_else(|| CoreError::Invalid(format!("no such plane {tag}")))?;
        self.map_tracker.begin_read();
        Ok(&plane.data)
    }

    /// Release a mapping obtained from [`Self::map_read`].
    pub fn unmap_read(&self) {
        self.map_tracker.end_read();
    }

    /// Map a plane for writing; fails with [`CoreError::Busy`] if its
    /// payload is shared with another picture.
    pub fn map_write(&mut self, tag: &str) -> Result<&mut [u8]> {
        if self.pending_write.is_some() {
            return Err(CoreError::Mapping("map_write already outstanding".into()));
        }
        let plane = self
            .planes
            .get(tag)
            .ok_or_else(|| CoreError::Invalid(format!("no such plane {tag}")))?;
        let owned = plane.data.clone().try_into_mut().map_err(|_| CoreError::Busy)?;

        let tag: ChromaTag = Arc::from(tag);
        self.map_tracker.begin_write();
        self.pending_write = Some((tag, owned));
        Ok(&mut self.pending_write.as_mut().expect("just inserted").1[..])
    }

    /// Release a mapping obtained from [`Self::map_write`], freezing the
    /// mutated plane back into place.
    pub fn unmap_write(&mut self) -> Result<()> {
        let (tag, buf) = self
            .pending_write
            .take()
            .ok_or_else(|| CoreError::Mapping("unmap_write without a matching map_write".into()))?;
        let plane = self
            .planes
            .get_mut(&tag)
            .expect("plane removed while a write mapping was outstanding");
        plane.data = buf.freeze();
        self.map_tracker.end_write();
        Ok(())
    }

    /// True if no mapping is currently outstanding.
    pub fn is_idle(&self) -> bool {
        self.map_tracker.is_idle() && self.pending_write.is_none()
    }
}

/// Builder for [`PictureUbuf`]: add planes, then `alloc`.
pub struct PictureBuilder {
    manager: Arc<dyn UMemManager>,
    hsize: usize,
    vsize: usize,
    planes: BTreeMap<ChromaTag, (usize, u8, u8, u8)>,
}

impl PictureBuilder {
    /// Register a plane: `stride` bytes per row, `hsub`/`vsub` sub-sampling,
    /// `macropixel_size` bytes per macropixel.
    pub fn plane(mut self, tag: impl Into<ChromaTag>, stride: usize, hsub: u8, vsub: u8, macropixel_size: u8) -> Self {
        self.planes.insert(tag.into(), (stride, hsub, vsub, macropixel_size));
        self
    }

    /// Allocate storage for every registered plane.
    pub fn alloc(self) -> Result<PictureUbuf> {
        let mut planes = BTreeMap::new();
        for (tag, (stride, hsub, vsub, macropixel_size)) in self.planes {
            let rows = self.vsize / vsub as usize;
            let size = stride * rows;
            let buf = self.manager.alloc(size)?;
            planes.insert(
                tag,
                ChromaPlane {
                    data: buf.freeze(),
                    stride,
                    hsub,
                    vsub,
                    macropixel_size,
                },
            );
        }
        Ok(PictureUbuf {
            hsize: self.hsize,
            vsize: self.vsize,
            planes,
            manager: self.manager,
            map_tracker: MapTracker::default(),
            pending_write: None,
        })
    }
}

impl std::fmt::Debug for PictureUbuf {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PictureUbuf")
            .field("hsize", &self.hsize)
            .field("vsize", &self.vsize)
            .field("planes", &self.planes.keys().collect::<Vec<_>>())
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

    fn yuv420(hsize: usize, vsize: usize) -> PictureUbuf {
        PictureUbuf::builder(mgr(), hsize, vsize)
            .plane("y8", hsize, 1, 1, 1)
            .plane("u8", hsize / 2, 2, 2, 1)
            .plane("v8", hsize / 2, 2, 2, 1)
            .alloc()
            .unwrap()
    }

    #[test]
    fn alloc_sizes_planes_by_subsampling() {
        let pic = yuv420(4, 4);
        assert_eq!(pic.plane("y8").unwrap().len(), 16);
        assert_eq!(pic.plane("u8").unwrap().len(), 4);
        assert_eq!(pic.plane("v8").unwrap().len(), 4);
    }

    #[test]
    fn dup_shares_plane_payload() {
        let mut pic = yuv420(2, 2);
        {
            let w = pic.map_write("y8").unwrap();
            w.fill(7);
        }
        pic.unmap_write().unwrap();

        let dup = pic.dup();
        assert_eq!(dup.map_read("y8").unwrap(), &[7, 7, 7, 7]);
        dup.unmap_read();
        assert!(matches!(pic.map_write("y8"), Err(CoreError::Busy)));
    }

    #[test]
    fn deep_copy_is_independent() {
        let mut pic = yuv420(2, 2);
        {
            let w = pic.map_write("y8").unwrap();
            w.fill(1);
        }
        pic.unmap_write().unwrap();

        let mut copy = pic.deep_copy().unwrap();
        assert!(copy.map_write("y8").is_ok());
        copy.unmap_write().unwrap();
    }

    #[test]
    fn map_write_unknown_plane_is_invalid() {
        let mut pic = yuv420(2, 2);
        assert!(matches!(pic.map_write("nonexistent"), Err(CoreError::Invalid(_))));
    }
}
