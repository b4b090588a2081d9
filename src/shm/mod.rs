//! Shared-memory read tier.
//!
//! The producer keeps one memory-mapped region per high-frequency category and
//! posts a named semaphore after each complete frame write. This module maps
//! those regions read-only and polls the semaphores without blocking.
//!
//! Segment and semaphore names are a protocol contract with the producer and
//! are deliberately not configurable; only the directory backing the POSIX shm
//! namespace is.

pub mod reader;
pub mod region;
pub mod signal;

use std::path::{Path, PathBuf};

pub use reader::{ReaderCounters, ShmReader};
pub use region::{RegionWriter, SharedRegion};
#[cfg(unix)]
pub use signal::PosixSemaphore;
pub use signal::{InProcessSignal, ReadinessSignal, SignalPoster};

/// Names of one category's shared-memory segment and readiness semaphore.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShmChannel {
    /// POSIX shm segment name, with leading slash
    pub segment: &'static str,
    /// POSIX named semaphore, with leading slash
    pub semaphore: &'static str,
}

impl ShmChannel {
    /// Detection frames.
    pub const DETECTIONS: Self = Self {
        segment: "/omnisight_detections",
        semaphore: "/omnisight_frame_ready",
    };

    /// Tracked-object frames.
    pub const TRACKS: Self = Self {
        segment: "/omnisight_tracks",
        semaphore: "/omnisight_tracks_ready",
    };

    /// Timeline frames.
    pub const TIMELINES: Self = Self {
        segment: "/omnisight_timelines",
        semaphore: "/omnisight_timelines_ready",
    };

    /// File backing the segment under `shm_dir` (`/dev/shm` on Linux).
    pub fn region_path(&self, shm_dir: &Path) -> PathBuf {
        shm_dir.join(self.segment.trim_start_matches('/'))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_region_path_strips_leading_slash() {
        assert_eq!(
            ShmChannel::TRACKS.region_path(Path::new("/dev/shm")),
            PathBuf::from("/dev/shm/omnisight_tracks")
        );
    }
}
