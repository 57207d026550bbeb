//! Sound ubuf: one or more channel planes of fixed-size samples.
//!
//! Structurally a simplified [`super::picture::PictureUbuf`]: planes keyed
//! by channel tag instead of chroma tag, no sub-sampling, a sample size
//! instead of a stride. Same narrow operation set (no resize/splice/append).

use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};

use crate::error::{CoreError, Result};
use crate::umem::UMemManager;

use super::MapTracker;

/// Identifies a channel plane (`"L"`, `"R"`, `"LFE"`, or `"lr"` for
/// interleaved stereo, ...).
pub type ChannelTag = Arc<str>;

/// One channel's backing samples.
#[derive(Clone)]
pub struct SoundPlane {
    data: Bytes,
    /// Size in bytes of a single sample (e.g. 4 for `f32`, 2 for `s16`).
    sample_size: u8,
}

impl SoundPlane {
    /// Size in bytes of one sample.
    pub fn sample_size(&self) -> u8 {
        self.sample_size
    }

    /// Number of samples stored.
    pub fn sample_count(&self) -> usize {
        self.data.len() / self.sample_size as usize
    }

    /// Size of this plane's storage in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }
}

impl std::fmt::Debug for SoundPlane {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SoundPlane")
            .field("samples", &self.sample_count())
            .field("sample_size", &self.sample_size)
            .finish()
    }
}

/// A block of audio samples, as a named set of channel planes sharing a
/// sample count.
pub struct SoundUbuf {
    samples: usize,
    planes: BTreeMap<ChannelTag, SoundPlane>,
    manager: Arc<dyn UMemManager>,
    map_tracker: MapTracker,
    pending_write: Option<(ChannelTag, BytesMut)>,
}

impl SoundUbuf {
    /// Begin building a sound buffer of `samples` samples per channel.
    pub fn builder(manager: Arc<dyn UMemManager>, samples: usize) -> SoundBuilder {
        SoundBuilder {
            manager,
            samples,
            planes: BTreeMap::new(),
        }
    }

    /// Number of samples per channel.
    pub fn samples(&self) -> usize {
        self.samples
    }

    /// Channel tags present on this buffer.
    pub fn plane_tags(&self) -> impl Iterator<Item = &ChannelTag> {
        self.planes.keys()
    }

    /// Borrow a channel's descriptor, without mapping.
    pub fn plane(&self, tag: &str) -> Option<&SoundPlane> {
        self.planes.get(tag)
    }

    /// Duplicate: new header, same shared channel payloads.
    pub fn dup(&self) -> Self {
        Self {
            samples: self.samples,
            planes: self.planes.clone(),
            manager: self.manager.clone(),
            map_tracker: MapTracker::default(),
            pending_write: None,
        }
    }

    /// Deep copy: fresh storage for every channel.
    pub fn deep_copy(&self) -> Result<Self> {
        let mut planes = BTreeMap::new();
        for (tag, plane) in &self.planes {
            let mut fresh = self.manager.alloc(plane.data.len())?;
            fresh.copy_from_slice(&plane.data);
            planes.insert(
                tag.clone(),
                SoundPlane {
                    data: fresh.freeze(),
                    sample_size: plane.sample_size,
                },
            );
        }
        Ok(Self {
            samples: self.samples,
            planes,
            manager: self.manager.clone(),
            map_tracker: MapTracker::default(),
            pending_write: None,
        })
    }

    /// Map a channel's full extent for reading.
    pub fn map_read(&self, tag: &str) -> Result<&[u8]> {
        let plane = self
            .planes
            .get(tag)
            .ok_or_else(|| CoreError::Invalid(format!("no such channel {tag}")))?;
        self.map_tracker.begin_read();
        Ok(&plane.data)
    }

    /// Release a mapping obtained from [`Self::map_read`].
    pub fn unmap_read(&self) {
        self.map_tracker.end_read();
    }

    /// Map a channel for writing; fails with [`CoreError::Busy`] if its
    /// payload is shared with another sound buffer.
    pub fn map_write(&mut self, tag: &str) -> Result<&mut [u8]> {
        if self.pending_write.is_some() {
            return Err(CoreError::Mapping("map_write already outstanding".into()));
        }
        let plane = self
            .planes
            .get(tag)
            .ok_or_else(|| CoreError::Invalid(format!("no such channel {tag}")))?;
        let owned = plane.data.clone().try_into_mut().map_err(|_| CoreError::Busy)?;

        let tag: ChannelTag = Arc::from(tag);
        self.map_tracker.begin_write();
        self.pending_write = Some((tag, owned));
        Ok(&mut self.pending_write.as_mut().expect("just inserted").1[..])
    }

    /// Release a mapping obtained from [`Self::map_write`], freezing the
    /// mutated channel back into place.
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

/// Builder for [`SoundUbuf`]: add channels, then `alloc`.
pub struct SoundBuilder {
    manager: Arc<dyn UMemManager>,
    samples: usize,
    planes: BTreeMap<ChannelTag, u8>,
}

impl SoundBuilder {
    /// Register a channel with the given sample size in bytes.
    pub fn channel(mut self, tag: impl Into<ChannelTag>, sample_size: u8) -> Self {
        self.planes.insert(tag.into(), sample_size);
        self
    }

    /// Allocate storage for every registered channel.
    pub fn alloc(self) -> Result<SoundUbuf> {
        let mut planes = BTreeMap::new();
        for (tag, sample_size) in self.planes {
            let size = self.samples * sample_size as usize;
            let buf = self.manager.alloc(size)?;
            planes.insert(
                tag,
                SoundPlane {
                    data: buf.freeze(),
                    sample_size,
                },
            );
        }
        Ok(SoundUbuf {
            samples: self.samples,
            planes,
            manager: self.manager,
            map_tracker: MapTracker::default(),
            pending_write: None,
        })
    }
}

impl std::fmt::Debug for SoundUbuf {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SoundUbuf")
            .field("samples", &self.samples)
            .field("planes", &self.planes.keys().collect::<Vec<_>>())
            .finish()
    }
}
