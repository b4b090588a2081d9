#![allow(unsafe_code)]
//! Memory-mapped frame regions.
//!
//! [`SharedRegion`] is the consumer's read-only view. [`RegionWriter`] is the
//! producer side and exists for the simulator and tests; the consumer never
//! writes a region.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use memmap2::{Mmap, MmapMut, MmapOptions};

use crate::error::{IpcError, IpcResult};

/// Read-only mapping of a producer-owned region.
#[derive(Debug)]
pub struct SharedRegion {
    mmap: Mmap,
    path: PathBuf,
}

impl SharedRegion {
    /// Map an existing region read-only.
    ///
    /// Fails with [`IpcError::Unavailable`] when the file does not exist or has
    /// not been sized by the producer yet.
    pub fn open(path: impl AsRef<Path>) -> IpcResult<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .map_err(|e| IpcError::unavailable("shared memory segment", path, e))?;
        let len = file.metadata()?.len();
        if len == 0 {
            return Err(IpcError::unavailable(
                "shared memory segment",
                path,
                "segment has zero length",
            ));
        }

        // SAFETY: The mapping is read-only and we never hand out references that
        // outlive it. The producer rewrites the contents concurrently, which is why
        // every read goes through checksum validation; torn reads are rejected
        // there. The producer never shrinks the segment while it is running.
        let mmap = unsafe { MmapOptions::new().map(&file) }
            .map_err(|e| IpcError::unavailable("shared memory segment", path, e))?;

        Ok(Self {
            mmap,
            path: path.to_path_buf(),
        })
    }

    /// Mapped bytes, from offset zero.
    pub fn bytes(&self) -> &[u8] {
        &self.mmap
    }

    /// Mapped length.
    pub fn len(&self) -> usize {
        self.mmap.len()
    }

    /// Whether the mapping is empty. Never true for an opened region.
    pub fn is_empty(&self) -> bool {
        self.mmap.is_empty()
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Writable mapping used by the producer stand-in.
#[derive(Debug)]
pub struct RegionWriter {
    mmap: MmapMut,
    path: PathBuf,
}

impl RegionWriter {
    /// Create (or reuse) the backing file, size it to `capacity` bytes and map
    /// it read-write. Existing contents are zeroed.
    pub fn create(path: impl AsRef<Path>, capacity: usize) -> IpcResult<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        file.set_len(capacity as u64)?;

        // SAFETY: We just sized the file to `capacity`. Readers in other processes
        // only read it and validate every frame by checksum.
        let mut mmap = unsafe { MmapOptions::new().len(capacity).map_mut(&file)? };
        mmap.fill(0);

        Ok(Self {
            mmap,
            path: path.to_path_buf(),
        })
    }

    /// Copy an encoded frame to offset zero and flush it.
    pub fn write_frame(&mut self, frame: &[u8]) -> IpcResult<()> {
        if frame.len() > self.mmap.len() {
            return Err(IpcError::Configuration(format!(
                "frame of {} bytes does not fit region {} ({} bytes)",
                frame.len(),
                self.path.display(),
                self.mmap.len()
            )));
        }
        self.mmap[..frame.len()].copy_from_slice(frame);
        self.mmap.flush()?;
        Ok(())
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}
